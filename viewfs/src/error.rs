use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ViewError>;

#[derive(Debug, Error)]
pub enum ViewError {
    /// A read or close arrived for a handle that was never opened, or was
    /// already released.
    #[error("handle {0} is not open")]
    BadDescriptor(u64),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ViewError {
    /// Positive errno reported back to the kernel.
    pub fn errno(&self) -> i32 {
        match self {
            ViewError::BadDescriptor(_) => libc::EBADFD,
            ViewError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

impl From<nix::Error> for ViewError {
    fn from(e: nix::Error) -> Self {
        ViewError::Io(e.into())
    }
}

impl From<ViewError> for rfuse3::Errno {
    fn from(e: ViewError) -> Self {
        e.errno().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(ViewError::BadDescriptor(9).errno(), libc::EBADFD);
        let e: ViewError = io::Error::from_raw_os_error(libc::EACCES).into();
        assert_eq!(e.errno(), libc::EACCES);
        let e: ViewError = io::Error::other("no code").into();
        assert_eq!(e.errno(), libc::EIO);
        let e: ViewError = nix::Error::ENOTDIR.into();
        assert_eq!(e.errno(), libc::ENOTDIR);
    }
}
