use bitflags::bitflags;

use crate::marker::FileKind;

// Flags used by the OPEN reply.
/// Bypass page cache for this open file.
const FOPEN_DIRECT_IO: u32 = 1;

bitflags! {
    /// Options returned to the kernel with an open handle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenOptions: u32 {
        /// Bypass page cache for this open file.
        const DIRECT_IO = FOPEN_DIRECT_IO;
    }
}

impl OpenOptions {
    /// Virtual handles skip the page cache: the kernel keeps reading until
    /// the capture runs out instead of trusting a size from an earlier run.
    pub fn for_kind(kind: FileKind) -> Self {
        match kind {
            FileKind::Regular => OpenOptions::empty(),
            FileKind::Virtual => OpenOptions::DIRECT_IO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_handles_use_direct_io() {
        assert_eq!(OpenOptions::for_kind(FileKind::Virtual).bits(), 1);
        assert!(OpenOptions::for_kind(FileKind::Regular).is_empty());
    }
}
