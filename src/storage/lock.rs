//! Per-path reader/writer locks
//!
//! # Lifecycle
//!
//! ```text
//!     acquire(p)                              drop(guard)
//!         ||                                       ||
//!         \/                                       \/
//! [ shard mutex: find-or-insert  ]     [ unlock the RwLock            ]
//! [ slot(p), refs += 1           ]     [ shard mutex: refs -= 1,      ]
//! [ clone Arc<RwLock>            ]     [ remove slot(p) if refs == 0  ]
//!         ||
//!         \/
//! [ block on RwLock (shard mutex ]
//! [ already released)            ]
//! ```
//!
//! A slot exists exactly while some guard holds or waits on its lock, so the
//! table never grows with the number of distinct paths ever touched.

use crate::errors::ErrorKind;
use fnv::FnvHasher;
use lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use std::{
    collections::HashMap,
    hash::Hasher,
    path::{Path, PathBuf},
    sync::Arc,
};

const DEFAULT_SHARDS: usize = 256;

#[derive(Debug)]
struct Slot {
    lock: Arc<RwLock<()>>,
    refs: usize,
}

/// Table of reader/writer locks keyed by absolute path.
///
/// Constructed once and shared between workers through an `Arc`.
#[derive(Debug)]
pub struct PathLocks {
    shards: Box<[Mutex<HashMap<PathBuf, Slot>>]>,
}

impl Default for PathLocks {
    fn default() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shards(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self { shards }
    }

    /// Shared lock on `path`; blocks while a writer holds it.
    #[inline]
    pub fn read(&self, path: &Path) -> Result<PathGuard<'_>, ErrorKind> {
        let lock = self.checkout(path)?;
        let held = Held::Shared(lock.read_arc());
        Ok(self.guard(path, held))
    }

    /// Exclusive lock on `path`; blocks while anyone else holds it.
    #[inline]
    pub fn write(&self, path: &Path) -> Result<PathGuard<'_>, ErrorKind> {
        let lock = self.checkout(path)?;
        let held = Held::Exclusive(lock.write_arc());
        Ok(self.guard(path, held))
    }

    /// Number of paths that currently have a slot.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PathLocks {
    #[inline]
    fn shard(&self, path: &Path) -> &Mutex<HashMap<PathBuf, Slot>> {
        let mut hasher = FnvHasher::default();
        hasher.write(path.as_os_str().as_encoded_bytes());
        &self.shards[hasher.finish() as usize % self.shards.len()]
    }

    fn checkout(&self, path: &Path) -> Result<Arc<RwLock<()>>, ErrorKind> {
        if path.as_os_str().is_empty() || !path.is_absolute() {
            return Err(ErrorKind::InvalidInput("lock key must be an absolute path"));
        }

        let mut shard = self.shard(path).lock();
        let slot = shard.entry(path.to_path_buf()).or_insert_with(|| Slot {
            lock: Arc::new(RwLock::new(())),
            refs: 0,
        });
        slot.refs += 1;

        Ok(Arc::clone(&slot.lock))
    }

    #[inline]
    fn guard(&self, path: &Path, held: Held) -> PathGuard<'_> {
        PathGuard {
            locks: self,
            key: path.to_path_buf(),
            held: Some(held),
        }
    }

    fn release(&self, path: &Path) {
        let mut shard = self.shard(path).lock();

        if let Some(slot) = shard.get_mut(path) {
            slot.refs -= 1;
            if slot.refs == 0 {
                shard.remove(path);
            }
        }
    }
}

enum Held {
    Shared(#[allow(dead_code)] ArcRwLockReadGuard<RawRwLock, ()>),
    Exclusive(#[allow(dead_code)] ArcRwLockWriteGuard<RawRwLock, ()>),
}

/// Lock on one path, released when dropped.
pub struct PathGuard<'a> {
    locks: &'a PathLocks,
    key: PathBuf,
    held: Option<Held>,
}

impl PathGuard<'_> {
    #[inline]
    pub fn path(&self) -> &Path {
        &self.key
    }

    #[inline]
    pub fn is_exclusive(&self) -> bool {
        matches!(self.held, Some(Held::Exclusive(_)))
    }
}

impl Drop for PathGuard<'_> {
    fn drop(&mut self) {
        // Unlock before touching the table so a waiter never sees a removed slot.
        drop(self.held.take());
        self.locks.release(&self.key);
    }
}

impl std::fmt::Debug for PathGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathGuard")
            .field("path", &self.key)
            .field("exclusive", &self.is_exclusive())
            .finish()
    }
}

#[cfg(test)]
mod lock_tests {
    use super::*;
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            mpsc,
        },
        thread,
        time::Duration,
    };

    #[test]
    fn slot_lifecycle() {
        let locks = PathLocks::new();
        let path = Path::new("/srv/a.txt");

        let first = locks.read(path).unwrap();
        let second = locks.read(path).unwrap();
        assert_eq!(locks.len(), 1);
        assert!(!first.is_exclusive());

        drop(first);
        assert_eq!(locks.len(), 1);
        drop(second);
        assert!(locks.is_empty());

        let guard = locks.write(path).unwrap();
        assert!(guard.is_exclusive());
        assert_eq!(guard.path(), path);
        drop(guard);
        assert!(locks.is_empty());
    }

    #[test]
    fn invalid_keys() {
        let locks = PathLocks::new();

        for path in ["", "relative/path", "a.txt"] {
            let err = locks.write(Path::new(path)).unwrap_err();
            assert!(matches!(err, ErrorKind::InvalidInput(_)), "{path:?}");
        }
        assert!(locks.is_empty());
    }

    #[test]
    fn writer_excludes_writer() {
        let locks = Arc::new(PathLocks::new());
        let held = locks.write(Path::new("/x")).unwrap();

        let (tx, rx) = mpsc::channel();
        let handle = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                let _guard = locks.write(Path::new("/x")).unwrap();
                tx.send(()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(held);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
        assert!(locks.is_empty());
    }

    #[test]
    fn writer_waits_for_readers() {
        let locks = Arc::new(PathLocks::new());
        let reader = locks.read(Path::new("/x")).unwrap();

        let (tx, rx) = mpsc::channel();
        let handle = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                let _guard = locks.write(Path::new("/x")).unwrap();
                tx.send(()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(reader);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn distinct_paths_do_not_block() {
        let locks = Arc::new(PathLocks::with_shards(1));
        let _held = locks.write(Path::new("/a")).unwrap();

        let (tx, rx) = mpsc::channel();
        let handle = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                let _guard = locks.write(Path::new("/b")).unwrap();
                tx.send(()).unwrap();
            })
        };

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
        assert_eq!(locks.len(), 1);
    }

    #[test]
    fn mutual_exclusion_under_contention() {
        let locks = Arc::new(PathLocks::with_shards(4));
        let inside = Arc::new(AtomicUsize::new(0));

        let handles = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                thread::spawn(move || {
                    for _ in 0..200 {
                        let _guard = locks.write(Path::new("/contended")).unwrap();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        thread::yield_now();
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(locks.is_empty());
    }
}
