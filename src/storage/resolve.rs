//! Mapping of untrusted request paths onto the document root

use crate::errors::ErrorKind;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use tracing::debug;

/// Canonical, symlink-free directory every served or mutated path must
/// resolve inside.
///
/// Built once at startup and shared read-only by all workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocRoot {
    path: PathBuf,
}

impl DocRoot {
    /// Canonicalizes `path` and checks that it is a directory.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ErrorKind> {
        let path = fs::canonicalize(path.as_ref())?;

        if !fs::metadata(&path)?.is_dir() {
            return Err(ErrorKind::Conflict("document root is not a directory"));
        }

        Ok(Self { path })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolves a percent-decoded request path to an absolute path inside
    /// the root.
    ///
    /// The returned path may not exist yet: everything after the deepest
    /// existing directory is appended verbatim so that create operations
    /// can use it. No lock is taken and nothing is modified.
    ///
    /// # Errors
    ///
    /// - [`ErrorKind::InvalidInput`]: the root is not absolute, or `..`
    ///   ascends above the root. Checked before touching the filesystem.
    /// - [`ErrorKind::NotFound`]: the root itself no longer exists.
    /// - [`ErrorKind::PermissionDenied`]: a symlink resolves outside the root,
    ///   or the final component is a dangling symlink.
    /// - [`ErrorKind::Exhausted`]: the result is longer than `max_len` bytes.
    pub fn resolve(&self, request_path: &str, max_len: usize) -> Result<PathBuf, ErrorKind> {
        if !self.path.is_absolute() {
            return Err(ErrorKind::InvalidInput("document root is not absolute"));
        }

        let components = normalize(request_path)?;

        let (parent, tail) = self.deepest_dir(&components)?;

        let canonical = fs::canonicalize(&parent)?;
        if !canonical.starts_with(&self.path) {
            debug!(path = %request_path, resolved = %canonical.display(), "path escapes document root");
            return Err(ErrorKind::PermissionDenied("path escapes document root"));
        }

        let mut resolved = canonical;
        resolved.extend(tail);

        if !tail.is_empty() {
            resolved = self.follow_final_link(resolved)?;
        }

        if resolved.as_os_str().len() > max_len {
            return Err(ErrorKind::Exhausted("resolved path is too long"));
        }

        Ok(resolved)
    }

    /// Finds the longest prefix of `components` that is an existing
    /// directory below the root. Returns it together with the remaining
    /// components.
    fn deepest_dir<'a>(&self, components: &'a [&'a str]) -> Result<(PathBuf, &'a [&'a str]), ErrorKind> {
        for split in (0..=components.len()).rev() {
            let mut candidate = self.path.clone();
            candidate.extend(&components[..split]);

            match fs::metadata(&candidate) {
                Ok(meta) if meta.is_dir() => return Ok((candidate, &components[split..])),
                Ok(_) => continue,
                Err(err) if split == 0 => return Err(err.into()),
                Err(_) => continue,
            }
        }

        Err(ErrorKind::NotFound)
    }

    /// The final component may be a symlink to a file. Its target has to lie
    /// inside the root as well, and the target path is what gets locked and
    /// opened.
    fn follow_final_link(&self, path: PathBuf) -> Result<PathBuf, ErrorKind> {
        match fs::symlink_metadata(&path) {
            Ok(meta) if meta.file_type().is_symlink() => {}
            Ok(_) => return Ok(path),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(path),
            Err(err) => return Err(err.into()),
        }

        let target = match fs::canonicalize(&path) {
            Ok(target) => target,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ErrorKind::PermissionDenied("dangling symlink"))
            }
            Err(err) => return Err(err.into()),
        };

        if !target.starts_with(&self.path) {
            debug!(link = %path.display(), target = %target.display(), "symlink escapes document root");
            return Err(ErrorKind::PermissionDenied("symlink escapes document root"));
        }

        Ok(target)
    }
}

/// Drops empty and `.` components and applies `..` lexically.
fn normalize(request_path: &str) -> Result<Vec<&str>, ErrorKind> {
    let mut components = Vec::new();

    for component in request_path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if components.pop().is_none() {
                    return Err(ErrorKind::InvalidInput("path ascends above document root"));
                }
            }
            other => components.push(other),
        }
    }

    Ok(components)
}
