//! FUSE adapter.
//!
//! `ViewFs` implements the rfuse3 raw `Filesystem` trait on top of a
//! [`Dispatcher`]. The kernel speaks inodes; an [`InodeTable`] maps them
//! back to paths under the mirrored root directory. Dispatcher calls may
//! block (stat, xattr lookups, running scripts) so they run on tokio's
//! blocking pool.
pub mod inode;
pub mod mount;

use std::ffi::{OsStr, OsString};
use std::fs::FileType;
use std::io;
use std::num::NonZeroU32;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use rfuse3::raw::Filesystem;
use rfuse3::raw::Request;
use rfuse3::raw::reply::{
    DirectoryEntry, DirectoryEntryPlus, FileAttr, ReplyAttr, ReplyData, ReplyDirectory,
    ReplyDirectoryPlus, ReplyEntry, ReplyInit, ReplyOpen, ReplyStatFs,
};
use rfuse3::{FileType as FuseFileType, Result as FuseResult, Timestamp};

use crate::config::Config;
use crate::dispatch::{Dispatcher, Stat};
use crate::marker::{FileKind, MarkerSource, XattrMarker};
use crate::util::open_options::OpenOptions;
use inode::{InodeTable, ROOT_INODE};

const TTL: Duration = Duration::from_secs(1);
const MAX_WRITE: NonZeroU32 = NonZeroU32::new(128 * 1024).unwrap();

pub struct ViewFs<S = XattrMarker> {
    dispatcher: Arc<Dispatcher<S>>,
    inodes: InodeTable,
}

impl ViewFs<XattrMarker> {
    /// Build the filesystem described by `config`, mirroring its canonical
    /// root directory.
    pub fn from_config(config: &Config) -> io::Result<Self> {
        let rootdir = config.rootdir.canonicalize()?;
        if !rootdir.is_dir() {
            return Err(io::Error::from_raw_os_error(libc::ENOTDIR));
        }
        let dispatcher = Dispatcher::new(config.marker(), XattrMarker, config.runner());
        Ok(Self::new(rootdir, dispatcher))
    }
}

impl<S: MarkerSource + 'static> ViewFs<S> {
    pub fn new(rootdir: impl Into<PathBuf>, dispatcher: Dispatcher<S>) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            inodes: InodeTable::new(rootdir),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<S> {
        &self.dispatcher
    }

    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    fn path_of(&self, ino: u64) -> FuseResult<PathBuf> {
        self.inodes.path_of(ino).ok_or_else(|| libc::ENOENT.into())
    }

    /// Inode reported for `..` of directory `ino` at `path`. The root is its
    /// own parent.
    fn parent_ino(&self, ino: u64, path: &Path) -> u64 {
        if ino == ROOT_INODE {
            return ROOT_INODE;
        }
        path.parent()
            .and_then(|p| self.inodes.ino_of(p))
            .unwrap_or(ROOT_INODE)
    }

    /// Run `f` against the dispatcher on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> FuseResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Dispatcher<S>) -> crate::Result<T> + Send + 'static,
    {
        let dispatcher = Arc::clone(&self.dispatcher);
        match tokio::task::spawn_blocking(move || f(&dispatcher)).await {
            Ok(res) => res.map_err(Into::into),
            Err(e) => {
                error!("blocking filesystem task failed: {e}");
                Err(libc::EIO.into())
            }
        }
    }
}

impl<S: MarkerSource + 'static> Filesystem for ViewFs<S> {
    type DirEntryStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntry>> + Send + 'a>>
    where
        Self: 'a;

    type DirEntryPlusStream<'a>
        = Pin<Box<dyn Stream<Item = FuseResult<DirectoryEntryPlus>> + Send + 'a>>
    where
        Self: 'a;

    async fn init(&self, _req: Request) -> FuseResult<ReplyInit> {
        let marker = self.dispatcher.marker();
        info!(
            "viewfs serving {}, virtual files marked {}={}",
            self.path_of(ROOT_INODE)?.display(),
            marker.name(),
            String::from_utf8_lossy(marker.value())
        );
        Ok(ReplyInit {
            max_write: MAX_WRITE,
        })
    }

    async fn destroy(&self, _req: Request) {
        info!(
            "viewfs unmounted with {} handles still open",
            self.dispatcher.handles().len()
        );
    }

    async fn lookup(&self, _req: Request, parent: u64, name: &OsStr) -> FuseResult<ReplyEntry> {
        debug!("lookup parent {parent} name {name:?}");
        let path = self.path_of(parent)?.join(name);
        let lookup_path = path.clone();
        let stat = self.blocking(move |d| d.getattr(&lookup_path)).await?;
        let ino = self.inodes.lookup(&path);
        Ok(ReplyEntry {
            ttl: TTL,
            attr: to_attr(ino, &stat),
            generation: 0,
        })
    }

    async fn forget(&self, _req: Request, inode: u64, nlookup: u64) {
        self.inodes.forget(inode, nlookup);
    }

    async fn batch_forget(&self, _req: Request, inodes: &[(u64, u64)]) {
        for &(inode, nlookup) in inodes {
            self.inodes.forget(inode, nlookup);
        }
    }

    async fn getattr(
        &self,
        _req: Request,
        inode: u64,
        fh: Option<u64>,
        _flags: u32,
    ) -> FuseResult<ReplyAttr> {
        debug!("getattr inode {inode} fh {fh:?}");
        let path = self.path_of(inode)?;
        let stat = self
            .blocking(move |d| match fh {
                Some(fh) => d.getattr_handle(&path, fh),
                None => d.getattr(&path),
            })
            .await?;
        Ok(ReplyAttr {
            ttl: TTL,
            attr: to_attr(inode, &stat),
        })
    }

    async fn access(&self, _req: Request, inode: u64, mask: u32) -> FuseResult<()> {
        debug!("access inode {inode} mask {mask:o}");
        let path = self.path_of(inode)?;
        self.blocking(move |d| d.access(&path, mask)).await
    }

    async fn readlink(&self, _req: Request, inode: u64) -> FuseResult<ReplyData> {
        let path = self.path_of(inode)?;
        let target = self.blocking(move |d| d.readlink(&path)).await?;
        Ok(ReplyData {
            data: Bytes::from(target),
        })
    }

    async fn open(&self, _req: Request, inode: u64, flags: u32) -> FuseResult<ReplyOpen> {
        debug!("open inode {inode} flags {flags:#o}");
        let path = self.path_of(inode)?;
        let opened = self.blocking(move |d| d.open(&path, flags)).await?;
        Ok(ReplyOpen {
            fh: opened.fh,
            flags: OpenOptions::for_kind(opened.kind).bits(),
        })
    }

    async fn read(
        &self,
        _req: Request,
        inode: u64,
        fh: u64,
        offset: u64,
        size: u32,
    ) -> FuseResult<ReplyData> {
        debug!("read inode {inode} fh {fh} offset {offset} size {size}");
        let data = self
            .blocking(move |d| d.read(fh, size as usize, offset))
            .await
            .inspect_err(|e| warn!("read of fh {fh} failed: {e:?}"))?;
        Ok(ReplyData { data })
    }

    async fn flush(&self, _req: Request, _inode: u64, _fh: u64, _lock_owner: u64) -> FuseResult<()> {
        Ok(())
    }

    async fn release(
        &self,
        _req: Request,
        inode: u64,
        fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> FuseResult<()> {
        debug!("release inode {inode} fh {fh}");
        self.dispatcher.close(fh);
        Ok(())
    }

    async fn opendir(&self, _req: Request, inode: u64, _flags: u32) -> FuseResult<ReplyOpen> {
        let path = self.path_of(inode)?;
        let is_dir = self
            .blocking(move |_| Ok(std::fs::metadata(&path)?.is_dir()))
            .await?;
        if !is_dir {
            return Err(libc::ENOTDIR.into());
        }
        Ok(ReplyOpen { fh: 0, flags: 0 })
    }

    async fn readdir<'a>(
        &'a self,
        _req: Request,
        parent: u64,
        _fh: u64,
        offset: i64,
    ) -> FuseResult<ReplyDirectory<Self::DirEntryStream<'a>>> {
        debug!("readdir inode {parent} offset {offset}");
        let path = self.path_of(parent)?;
        let parent_ino = self.parent_ino(parent, &path);
        let dir = path.clone();
        let items = self.blocking(move |d| d.read_dir(&dir)).await?;

        let mut all: Vec<DirectoryEntry> = Vec::with_capacity(items.len() + 2);
        all.push(DirectoryEntry {
            inode: parent,
            kind: FuseFileType::Directory,
            name: OsString::from("."),
            offset: 1,
        });
        all.push(DirectoryEntry {
            inode: parent_ino,
            kind: FuseFileType::Directory,
            name: OsString::from(".."),
            offset: 2,
        });
        for (i, item) in items.into_iter().enumerate() {
            // Children the kernel already knows keep their lookup inode.
            let inode = self
                .inodes
                .ino_of(&path.join(&item.name))
                .unwrap_or(item.ino);
            all.push(DirectoryEntry {
                inode,
                kind: fuse_kind(item.file_type),
                name: item.name,
                offset: i as i64 + 3,
            });
        }

        let start = usize::try_from(offset).unwrap_or(0).min(all.len());
        let entries = all.split_off(start);
        let boxed: Self::DirEntryStream<'a> = Box::pin(stream::iter(entries.into_iter().map(Ok)));
        Ok(ReplyDirectory { entries: boxed })
    }

    /// Listing with attributes. Every child entry counts as a kernel lookup,
    /// so its inode is recorded as the entry is handed out. Virtual files
    /// carry zero TTLs: their size is only known after running the script,
    /// which a later `lookup`/`getattr` does.
    async fn readdirplus<'a>(
        &'a self,
        _req: Request,
        parent: u64,
        _fh: u64,
        offset: u64,
        _lock_owner: u64,
    ) -> FuseResult<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>> {
        debug!("readdirplus inode {parent} offset {offset}");
        let path = self.path_of(parent)?;
        let parent_ino = self.parent_ino(parent, &path);
        let parent_path = match parent {
            ROOT_INODE => path.clone(),
            _ => path.parent().map_or_else(|| path.clone(), Path::to_path_buf),
        };
        let dir = path.clone();
        let (dot, dotdot, children) = self
            .blocking(move |d| {
                let dot = d.stat_entry(&dir)?;
                let dotdot = d.stat_entry(&parent_path)?;
                let mut children = Vec::new();
                for (i, item) in d.read_dir(&dir)?.into_iter().enumerate() {
                    let child = dir.join(&item.name);
                    // Entries removed since the listing are skipped.
                    match d.stat_entry(&child) {
                        Ok(stat) => children.push((i as i64 + 3, item.name, child, stat)),
                        Err(e) => debug!("skip {}: {e}", child.display()),
                    }
                }
                Ok((dot, dotdot, children))
            })
            .await?;

        let mut all: Vec<PlusItem> = Vec::with_capacity(children.len() + 2);
        all.push(PlusItem {
            name: OsString::from("."),
            offset: 1,
            target: PlusTarget::Known(parent),
            stat: dot,
        });
        all.push(PlusItem {
            name: OsString::from(".."),
            offset: 2,
            target: PlusTarget::Known(parent_ino),
            stat: dotdot,
        });
        for (offset, name, child, stat) in children {
            all.push(PlusItem {
                name,
                offset,
                target: PlusTarget::Child(child),
                stat,
            });
        }

        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(all.len());
        let pending = all.split_off(start);
        let inodes = &self.inodes;
        let entries = pending.into_iter().map(move |item| {
            let inode = match &item.target {
                PlusTarget::Known(ino) => *ino,
                PlusTarget::Child(path) => inodes.lookup(path),
            };
            Ok(item.into_entry(inode))
        });
        let boxed: Self::DirEntryPlusStream<'a> = Box::pin(stream::iter(entries));
        Ok(ReplyDirectoryPlus { entries: boxed })
    }

    async fn releasedir(&self, _req: Request, _inode: u64, _fh: u64, _flags: u32) -> FuseResult<()> {
        Ok(())
    }

    async fn statfs(&self, _req: Request, inode: u64) -> FuseResult<ReplyStatFs> {
        let path = self.path_of(inode)?;
        let st = self.blocking(move |d| d.statfs(&path)).await?;
        Ok(ReplyStatFs {
            blocks: st.blocks() as u64,
            bfree: st.blocks_free() as u64,
            bavail: st.blocks_available() as u64,
            files: st.files() as u64,
            ffree: st.files_free() as u64,
            bsize: st.block_size() as u32,
            namelen: st.name_max() as u32,
            frsize: st.fragment_size() as u32,
        })
    }
}

// =============== helpers ===============
/// A `readdirplus` entry before its inode is assigned.
struct PlusItem {
    name: OsString,
    offset: i64,
    target: PlusTarget,
    stat: Stat,
}

enum PlusTarget {
    /// `.` and `..`: not a lookup, the inode is already known.
    Known(u64),
    Child(PathBuf),
}

impl PlusItem {
    fn into_entry(self, inode: u64) -> DirectoryEntryPlus {
        let ttl = match self.stat.kind {
            FileKind::Regular => TTL,
            FileKind::Virtual => Duration::ZERO,
        };
        let attr = to_attr(inode, &self.stat);
        DirectoryEntryPlus {
            inode,
            generation: 0,
            kind: attr.kind,
            name: self.name,
            offset: self.offset,
            attr,
            entry_ttl: ttl,
            attr_ttl: ttl,
        }
    }
}

fn fuse_kind(t: FileType) -> FuseFileType {
    if t.is_dir() {
        FuseFileType::Directory
    } else if t.is_symlink() {
        FuseFileType::Symlink
    } else if t.is_block_device() {
        FuseFileType::BlockDevice
    } else if t.is_char_device() {
        FuseFileType::CharDevice
    } else if t.is_fifo() {
        FuseFileType::NamedPipe
    } else if t.is_socket() {
        FuseFileType::Socket
    } else {
        FuseFileType::RegularFile
    }
}

fn timestamp(sec: i64, nsec: i64) -> Timestamp {
    let nanos = Duration::from_nanos(nsec.clamp(0, 999_999_999) as u64);
    let time = if sec >= 0 {
        UNIX_EPOCH + Duration::from_secs(sec as u64) + nanos
    } else {
        UNIX_EPOCH - Duration::from_secs(sec.unsigned_abs()) + nanos
    };
    Timestamp::from(time)
}

/// Attributes reported for inode `ino`. Only the size (and the block count
/// derived from it) differs from the underlying file for virtual files.
fn to_attr(ino: u64, stat: &Stat) -> FileAttr {
    let m = &stat.metadata;
    let blocks = match stat.kind {
        FileKind::Regular => m.blocks(),
        FileKind::Virtual => stat.size.div_ceil(512),
    };
    FileAttr {
        ino,
        size: stat.size,
        blocks,
        atime: timestamp(m.atime(), m.atime_nsec()),
        mtime: timestamp(m.mtime(), m.mtime_nsec()),
        ctime: timestamp(m.ctime(), m.ctime_nsec()),
        kind: fuse_kind(m.file_type()),
        perm: (m.mode() & 0o7777) as u16,
        nlink: m.nlink() as u32,
        uid: m.uid(),
        gid: m.gid(),
        rdev: m.rdev() as u32,
        blksize: m.blksize() as u32,
    }
}
