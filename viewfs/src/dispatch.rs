//! Path-level operations shared by every host callback.
//!
//! `Dispatcher` classifies each path through its marker attribute, opens
//! real files or captures script output, and serves reads and sizes from
//! the per-handle state registered at open time.

use std::ffi::OsString;
use std::fs::{self, File, FileType, Metadata, OpenOptions};
use std::io::{self, ErrorKind};
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStringExt;
use std::os::unix::fs::{DirEntryExt, FileExt, OpenOptionsExt};
use std::path::Path;

use bytes::Bytes;
use nix::sys::statvfs::{Statvfs, statvfs};
use nix::unistd::AccessFlags;

use crate::capture::ScriptRunner;
use crate::error::{Result, ViewError};
use crate::handle::{HandleRegistry, HandleState};
use crate::marker::{FileKind, Marker, MarkerSource, XattrMarker};

/// Metadata as presented through the mount.
#[derive(Debug)]
pub struct Stat {
    pub kind: FileKind,
    /// Metadata of the underlying file.
    pub metadata: Metadata,
    /// Reported size: the real size for regular files, the capture length
    /// for virtual ones.
    pub size: u64,
}

/// A freshly opened handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opened {
    pub fh: u64,
    pub kind: FileKind,
}

/// One entry of an underlying directory listing.
#[derive(Debug)]
pub struct DirItem {
    pub name: OsString,
    pub ino: u64,
    pub file_type: FileType,
}

pub struct Dispatcher<S = XattrMarker> {
    marker: Marker,
    source: S,
    runner: ScriptRunner,
    handles: HandleRegistry,
}

impl<S: MarkerSource> Dispatcher<S> {
    pub fn new(marker: Marker, source: S, runner: ScriptRunner) -> Self {
        Self {
            marker,
            source,
            runner,
            handles: HandleRegistry::new(),
        }
    }

    pub fn marker(&self) -> &Marker {
        &self.marker
    }

    pub fn handles(&self) -> &HandleRegistry {
        &self.handles
    }

    pub fn classify(&self, path: &Path) -> Result<FileKind> {
        Ok(self.marker.classify(&self.source, path)?)
    }

    /// Metadata of `path`. For a virtual file the script is run once, just
    /// to learn the size of its output.
    pub fn getattr(&self, path: &Path) -> Result<Stat> {
        let kind = self.classify(path)?;
        let metadata = fs::symlink_metadata(path)?;
        let size = match kind {
            FileKind::Regular => metadata.len(),
            FileKind::Virtual => self.runner.capture(path)?.buffer.len() as u64,
        };
        Ok(Stat {
            kind,
            metadata,
            size,
        })
    }

    /// Metadata of `path` as seen through the open handle `fh`.
    ///
    /// A virtual handle reports the length of the capture it serves reads
    /// from, without running the script again. Any other handle falls back
    /// to [`getattr`](Self::getattr).
    pub fn getattr_handle(&self, path: &Path, fh: u64) -> Result<Stat> {
        if let Some(state) = self.handles.lookup(fh)
            && let Some(buffer) = state.capture()
        {
            let metadata = fs::symlink_metadata(path)?;
            return Ok(Stat {
                kind: FileKind::Virtual,
                metadata,
                size: buffer.len() as u64,
            });
        }
        self.getattr(path)
    }

    /// Metadata of `path` for a directory listing. Scripts are not run, so a
    /// virtual file reports size 0 and must not be cached by the caller.
    pub fn stat_entry(&self, path: &Path) -> Result<Stat> {
        let kind = self.classify(path)?;
        let metadata = fs::symlink_metadata(path)?;
        let size = match kind {
            FileKind::Regular => metadata.len(),
            FileKind::Virtual => 0,
        };
        Ok(Stat {
            kind,
            metadata,
            size,
        })
    }

    /// Open `path` and register the resulting handle.
    ///
    /// Regular files are opened with `flags`. Virtual files ignore `flags`:
    /// the script runs to completion here and the handle is the capture
    /// pipe's read end.
    pub fn open(&self, path: &Path, flags: u32) -> Result<Opened> {
        let kind = self.classify(path)?;
        let fh = match kind {
            FileKind::Regular => {
                let file = open_real(path, flags)?;
                let fh = file.as_raw_fd() as u64;
                self.handles.register(fh, HandleState::Passthrough(file));
                fh
            }
            FileKind::Virtual => {
                let capture = self.runner.capture(path)?;
                let fh = capture.handle();
                self.handles.register(
                    fh,
                    HandleState::Virtual {
                        buffer: capture.buffer,
                        pipe: capture.pipe,
                    },
                );
                fh
            }
        };
        debug!("opened {} as {kind:?}, fh {fh}", path.display());
        Ok(Opened { fh, kind })
    }

    /// Up to `size` bytes at `offset` from handle `fh`.
    pub fn read(&self, fh: u64, size: usize, offset: u64) -> Result<Bytes> {
        let state = self.handles.lookup(fh).ok_or(ViewError::BadDescriptor(fh))?;
        match state.as_ref() {
            HandleState::Passthrough(file) => Ok(Bytes::from(read_at(file, size, offset)?)),
            HandleState::Virtual { buffer, .. } => {
                Ok(Bytes::copy_from_slice(buffer.slice_at(size, offset)))
            }
        }
    }

    /// Retire `fh`. The descriptor it owns closes once no read still holds
    /// the entry. Returns false for unknown handles.
    pub fn close(&self, fh: u64) -> bool {
        match self.handles.retire(fh) {
            Some(state) => {
                debug!("closed fh {fh} (virtual: {})", state.is_virtual());
                true
            }
            None => {
                debug!("close of unknown fh {fh}");
                false
            }
        }
    }

    pub fn access(&self, path: &Path, mask: u32) -> Result<()> {
        nix::unistd::access(path, AccessFlags::from_bits_truncate(mask as i32))?;
        Ok(())
    }

    pub fn readlink(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(fs::read_link(path)?.into_os_string().into_vec())
    }

    /// Entries of the underlying directory, without `.` and `..`.
    pub fn read_dir(&self, path: &Path) -> Result<Vec<DirItem>> {
        let mut items = Vec::new();
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            items.push(DirItem {
                ino: entry.ino(),
                file_type: entry.file_type()?,
                name: entry.file_name(),
            });
        }
        Ok(items)
    }

    pub fn statfs(&self, path: &Path) -> Result<Statvfs> {
        Ok(statvfs(path)?)
    }
}

fn open_real(path: &Path, flags: u32) -> io::Result<File> {
    let flags = flags as i32;
    let mut options = OpenOptions::new();
    match flags & libc::O_ACCMODE {
        libc::O_WRONLY => options.write(true),
        libc::O_RDWR => options.read(true).write(true),
        _ => options.read(true),
    };
    options.custom_flags(flags & !libc::O_ACCMODE).open(path)
}

/// Positional read that only comes back short at end-of-file.
fn read_at(file: &File, size: usize, offset: u64) -> io::Result<Vec<u8>> {
    let mut buf = vec![0u8; size];
    let mut filled = 0;
    while filled < size {
        match file.read_at(&mut buf[filled..], offset + filled as u64) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    buf.truncate(filled);
    Ok(buf)
}
