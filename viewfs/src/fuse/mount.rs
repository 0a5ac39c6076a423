//! Mount helpers for starting/stopping the FUSE session.
//!
//! Thin wrappers over rfuse3 raw Session APIs. Unprivileged mounts go through
//! fusermount3, which must be in PATH.

use std::io;

use rfuse3::MountOptions;
use rfuse3::raw::MountHandle;
#[cfg(target_os = "linux")]
use rfuse3::raw::Session;

use super::ViewFs;
use crate::config::Config;
use crate::marker::MarkerSource;

/// Mount options for a viewfs session. The mount is read-only and owned by
/// the calling user.
pub fn mount_options(config: &Config) -> MountOptions {
    let uid = nix::unistd::getuid().as_raw();
    let gid = nix::unistd::getgid().as_raw();

    let mut mount_options = MountOptions::default();
    mount_options
        .fs_name("viewfs")
        .read_only(true)
        .allow_other(config.allow_other)
        .uid(uid)
        .gid(gid);
    mount_options
}

/// Mount `fs` at the configured mount point and return once the session is
/// running.
#[cfg(target_os = "linux")]
pub async fn mount<S>(fs: ViewFs<S>, config: &Config) -> io::Result<MountHandle>
where
    S: MarkerSource + 'static,
{
    let session = Session::new(mount_options(config));
    if config.privileged {
        session.mount(fs, &config.mountpoint).await
    } else {
        session.mount_with_unprivileged(fs, &config.mountpoint).await
    }
}

/// Fallback stub for non-Linux targets.
#[cfg(not(target_os = "linux"))]
pub async fn mount<S>(_fs: ViewFs<S>, _config: &Config) -> io::Result<MountHandle>
where
    S: MarkerSource + 'static,
{
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "FUSE mount is only supported on Linux in this build",
    ))
}
