//! Inode numbers handed to the kernel, mapped to underlying paths.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub const ROOT_INODE: u64 = 1;

#[derive(Debug)]
struct InodeData {
    path: PathBuf,
    /// Outstanding kernel lookups; the entry goes away when this reaches 0.
    nlookup: u64,
}

#[derive(Debug)]
struct Inner {
    by_ino: HashMap<u64, InodeData>,
    by_path: HashMap<PathBuf, u64>,
    next_ino: u64,
}

#[derive(Debug)]
pub struct InodeTable {
    inner: Mutex<Inner>,
}

impl InodeTable {
    /// A table whose root inode maps to `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let mut by_ino = HashMap::new();
        let mut by_path = HashMap::new();
        by_path.insert(root.clone(), ROOT_INODE);
        by_ino.insert(
            ROOT_INODE,
            InodeData {
                path: root,
                nlookup: 1,
            },
        );
        Self {
            inner: Mutex::new(Inner {
                by_ino,
                by_path,
                next_ino: ROOT_INODE + 1,
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path_of(&self, ino: u64) -> Option<PathBuf> {
        self.inner().by_ino.get(&ino).map(|d| d.path.clone())
    }

    pub fn ino_of(&self, path: &Path) -> Option<u64> {
        self.inner().by_path.get(path).copied()
    }

    /// Record one kernel lookup of `path` and return its inode, allocating
    /// one on first sight.
    pub fn lookup(&self, path: &Path) -> u64 {
        let mut inner = self.inner();
        if let Some(&ino) = inner.by_path.get(path) {
            if let Some(data) = inner.by_ino.get_mut(&ino) {
                data.nlookup += 1;
            }
            return ino;
        }
        let ino = inner.next_ino;
        inner.next_ino += 1;
        inner.by_path.insert(path.to_path_buf(), ino);
        inner.by_ino.insert(
            ino,
            InodeData {
                path: path.to_path_buf(),
                nlookup: 1,
            },
        );
        ino
    }

    /// Drop `nlookup` references to `ino`. The root is never removed.
    pub fn forget(&self, ino: u64, nlookup: u64) {
        if ino == ROOT_INODE {
            return;
        }
        let mut inner = self.inner();
        let Some(data) = inner.by_ino.get_mut(&ino) else {
            return;
        };
        data.nlookup = data.nlookup.saturating_sub(nlookup);
        if data.nlookup == 0
            && let Some(data) = inner.by_ino.remove(&ino)
        {
            inner.by_path.remove(&data.path);
        }
    }

    pub fn len(&self) -> usize {
        self.inner().by_ino.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
