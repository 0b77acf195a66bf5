//! Locked filesystem operations behind the request methods
//!
//! Every mutation takes the exclusive lock of its target for the whole
//! operation. Reads take the shared lock only while opening the file and
//! snapshotting its length.

use crate::{errors::ErrorKind, storage::lock::PathLocks};
use std::{
    fs::{self, File, OpenOptions, Permissions},
    io::{self, Read},
    os::unix::fs::{OpenOptionsExt, PermissionsExt},
    path::{Path, PathBuf},
};
use tracing::debug;

const FILE_MODE: u32 = 0o644;
const TEMP_PREFIX: &str = ".docroot-web.";
pub(crate) const INDEX_FILE: &str = "index.html";

/// Result of a whole-file replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The target did not exist before.
    Created,
    /// An existing file was replaced.
    Replaced,
}

/// File opened for streaming, with its length as seen under the shared lock.
#[derive(Debug)]
pub struct OpenFile {
    pub file: File,
    pub len: u64,
}

/// Replaces `target` with exactly `len` bytes read from `body`.
///
/// The bytes go into a temporary file in the target's directory, which is
/// synced and then renamed over the target. On any error the temporary file
/// is removed and the target is left untouched.
pub fn put_atomic<R: Read>(
    locks: &PathLocks,
    target: &Path,
    body: &mut R,
    len: u64,
) -> Result<PutOutcome, ErrorKind> {
    let _guard = locks.write(target)?;

    let existed = match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() => return Err(ErrorKind::Conflict("target is a directory")),
        Ok(_) => true,
        Err(err) if err.kind() == io::ErrorKind::NotFound => false,
        Err(err) => return Err(err.into()),
    };

    let dir = parent_dir(target)?;
    let mut temp = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .tempfile_in(dir)?;

    let copied = io::copy(&mut body.by_ref().take(len), temp.as_file_mut())?;
    if copied != len {
        return Err(ErrorKind::ProtocolViolation("body shorter than Content-Length"));
    }

    temp.as_file()
        .set_permissions(Permissions::from_mode(FILE_MODE))?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|err| ErrorKind::from(err.error))?;

    // The rename itself is durable only once the directory entry is.
    File::open(dir)?.sync_all()?;

    debug!(path = %target.display(), len, existed, "file replaced");
    Ok(match existed {
        true => PutOutcome::Replaced,
        false => PutOutcome::Created,
    })
}

/// Appends exactly `len` bytes from `body` to `target`, creating it if needed.
///
/// Serialized against other writers, not atomic: a short body leaves the
/// bytes that did arrive in place.
pub fn append<R: Read>(
    locks: &PathLocks,
    target: &Path,
    body: &mut R,
    len: u64,
) -> Result<(), ErrorKind> {
    let _guard = locks.write(target)?;

    if fs::metadata(target).is_ok_and(|meta| meta.is_dir()) {
        return Err(ErrorKind::Conflict("cannot append to a directory"));
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(FILE_MODE)
        .open(target)?;

    let copied = io::copy(&mut body.by_ref().take(len), &mut file)?;
    file.sync_all()?;

    if copied != len {
        return Err(ErrorKind::ProtocolViolation("body shorter than Content-Length"));
    }

    debug!(path = %target.display(), len, "file appended");
    Ok(())
}

/// Removes `target`, which must be a regular file.
pub fn delete(locks: &PathLocks, target: &Path) -> Result<(), ErrorKind> {
    let _guard = locks.write(target)?;

    let meta = fs::symlink_metadata(target)?;
    if !meta.is_file() {
        return Err(ErrorKind::Conflict("only regular files can be deleted"));
    }

    fs::remove_file(target)?;

    debug!(path = %target.display(), "file deleted");
    Ok(())
}

/// Opens a regular file for reading.
pub fn open_read(locks: &PathLocks, target: &Path) -> Result<OpenFile, ErrorKind> {
    let _guard = locks.read(target)?;

    let file = File::open(target)?;
    let meta = file.metadata()?;
    if !meta.is_file() {
        return Err(ErrorKind::Conflict("not a regular file"));
    }

    Ok(OpenFile {
        file,
        len: meta.len(),
    })
}

/// Whether `path` is an existing directory.
pub fn is_dir(path: &Path) -> Result<bool, ErrorKind> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.is_dir()),
        Err(err) => Err(err.into()),
    }
}

/// `index.html` inside `dir`, if it is a regular file (not a symlink).
pub fn index_file(dir: &Path) -> Option<PathBuf> {
    let index = dir.join(INDEX_FILE);

    fs::symlink_metadata(&index)
        .is_ok_and(|meta| meta.is_file())
        .then_some(index)
}

#[inline]
fn parent_dir(target: &Path) -> Result<&Path, ErrorKind> {
    target
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .ok_or(ErrorKind::InvalidInput("target has no parent directory"))
}

#[cfg(test)]
mod ops_tests {
    use super::*;
    use std::{io::Cursor, sync::Arc, thread};
    use tempfile::TempDir;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    #[test]
    fn put_created_then_replaced() {
        let dir = TempDir::new().unwrap();
        let locks = PathLocks::new();
        let target = dir.path().join("a.txt");

        let outcome = put_atomic(&locks, &target, &mut Cursor::new("hello"), 5).unwrap();
        assert_eq!(outcome, PutOutcome::Created);
        assert_eq!(fs::read(&target).unwrap(), b"hello");

        let outcome = put_atomic(&locks, &target, &mut Cursor::new("world!"), 6).unwrap();
        assert_eq!(outcome, PutOutcome::Replaced);
        assert_eq!(fs::read(&target).unwrap(), b"world!");

        let mode = fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, FILE_MODE);
        assert_eq!(entries(dir.path()), ["a.txt"]);
        assert!(locks.is_empty());
    }

    #[test]
    fn put_reads_exactly_len() {
        let dir = TempDir::new().unwrap();
        let locks = PathLocks::new();
        let target = dir.path().join("a.txt");
        let mut body = Cursor::new("abcdefgh");

        put_atomic(&locks, &target, &mut body, 3).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"abc");
        assert_eq!(body.position(), 3);
    }

    #[test]
    fn short_body_leaves_target_untouched() {
        let dir = TempDir::new().unwrap();
        let locks = PathLocks::new();
        let target = dir.path().join("a.txt");
        fs::write(&target, b"original").unwrap();

        let err = put_atomic(&locks, &target, &mut Cursor::new("abc"), 10).unwrap_err();
        assert!(matches!(err, ErrorKind::ProtocolViolation(_)));
        assert_eq!(fs::read(&target).unwrap(), b"original");
        assert_eq!(entries(dir.path()), ["a.txt"]);
        assert!(locks.is_empty());
    }

    #[test]
    fn put_on_directory_or_missing_parent() {
        let dir = TempDir::new().unwrap();
        let locks = PathLocks::new();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let err = put_atomic(&locks, &dir.path().join("sub"), &mut Cursor::new("x"), 1).unwrap_err();
        assert!(matches!(err, ErrorKind::Conflict(_)));

        let target = dir.path().join("missing/a.txt");
        let err = put_atomic(&locks, &target, &mut Cursor::new("x"), 1).unwrap_err();
        assert!(matches!(err, ErrorKind::NotFound));
        assert!(locks.is_empty());
    }

    #[test]
    fn concurrent_puts_never_interleave() {
        let dir = TempDir::new().unwrap();
        let locks = Arc::new(PathLocks::new());
        let target = dir.path().join("race.bin");
        let payloads = [vec![b'a'; 256 * 1024], vec![b'b'; 200 * 1024]];

        for _ in 0..10 {
            let handles = payloads
                .iter()
                .cloned()
                .map(|payload| {
                    let locks = Arc::clone(&locks);
                    let target = target.clone();
                    thread::spawn(move || {
                        let len = payload.len() as u64;
                        put_atomic(&locks, &target, &mut Cursor::new(payload), len).unwrap();
                    })
                })
                .collect::<Vec<_>>();

            for handle in handles {
                handle.join().unwrap();
            }

            let content = fs::read(&target).unwrap();
            assert!(payloads.contains(&content));
        }
        assert_eq!(entries(dir.path()), ["race.bin"]);
    }

    #[test]
    fn append_creates_and_extends() {
        let dir = TempDir::new().unwrap();
        let locks = PathLocks::new();
        let target = dir.path().join("log.txt");

        append(&locks, &target, &mut Cursor::new("abc"), 3).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"abc");

        append(&locks, &target, &mut Cursor::new("def"), 3).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"abcdef");

        let err = append(&locks, &target, &mut Cursor::new("g"), 2).unwrap_err();
        assert!(matches!(err, ErrorKind::ProtocolViolation(_)));
        assert_eq!(fs::read(&target).unwrap(), b"abcdefg");

        let err = append(&locks, dir.path(), &mut Cursor::new("x"), 1).unwrap_err();
        assert!(matches!(err, ErrorKind::Conflict(_)));
    }

    #[test]
    fn delete_regular_files_only() {
        let dir = TempDir::new().unwrap();
        let locks = PathLocks::new();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a.txt"), b"x").unwrap();

        let err = delete(&locks, &dir.path().join("sub")).unwrap_err();
        assert!(matches!(err, ErrorKind::Conflict(_)));

        delete(&locks, &dir.path().join("a.txt")).unwrap();
        assert!(!dir.path().join("a.txt").exists());

        let err = delete(&locks, &dir.path().join("a.txt")).unwrap_err();
        assert!(matches!(err, ErrorKind::NotFound));
        assert!(locks.is_empty());
    }

    #[test]
    fn open_and_index() {
        let dir = TempDir::new().unwrap();
        let locks = PathLocks::new();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let opened = open_read(&locks, &dir.path().join("a.txt")).unwrap();
        assert_eq!(opened.len, 5);
        assert!(locks.is_empty());

        let err = open_read(&locks, dir.path()).unwrap_err();
        assert!(matches!(err, ErrorKind::Conflict(_)));

        let err = open_read(&locks, &dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, ErrorKind::NotFound));

        assert!(is_dir(dir.path()).unwrap());
        assert!(!is_dir(&dir.path().join("a.txt")).unwrap());
        assert!(index_file(dir.path()).is_none());

        fs::write(dir.path().join(INDEX_FILE), b"<h1>hi</h1>").unwrap();
        assert_eq!(index_file(dir.path()), Some(dir.path().join(INDEX_FILE)));
    }
}
