//! Deciding whether a path is served as-is or as a script's output.
//!
//! A file is virtual when its marker extended attribute holds the enabled
//! value. The attribute is read on every call; nothing is cached.

use std::io;
use std::path::Path;

/// Default marker attribute (`attr -s viewfile -V enabled <file>`).
pub const DEFAULT_MARKER_NAME: &str = "user.viewfile";
pub const DEFAULT_MARKER_VALUE: &str = "enabled";

/// How a path is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Virtual,
}

/// Extended attribute lookup on the underlying filesystem.
pub trait MarkerSource: Send + Sync {
    /// Value of attribute `name` on `path`, `None` when the attribute is absent.
    fn get(&self, path: &Path, name: &str) -> io::Result<Option<Vec<u8>>>;
}

/// Reads real extended attributes, following symlinks.
#[derive(Debug, Default, Clone, Copy)]
pub struct XattrMarker;

impl MarkerSource for XattrMarker {
    fn get(&self, path: &Path, name: &str) -> io::Result<Option<Vec<u8>>> {
        xattr::get_deref(path, name)
    }
}

/// The attribute name and value that mark a file as virtual.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    name: String,
    value: Vec<u8>,
}

impl Default for Marker {
    fn default() -> Self {
        Self::new(DEFAULT_MARKER_NAME, DEFAULT_MARKER_VALUE)
    }
}

impl Marker {
    pub fn new(name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Classify `path`. Errors other than "attribute not present" come back
    /// unchanged, including a missing `path`.
    pub fn classify<S: MarkerSource + ?Sized>(
        &self,
        source: &S,
        path: &Path,
    ) -> io::Result<FileKind> {
        match source.get(path, &self.name)? {
            Some(found) if self.matches(&found) => Ok(FileKind::Virtual),
            _ => Ok(FileKind::Regular),
        }
    }

    // Tools that store C strings leave a trailing NUL in the value.
    fn matches(&self, found: &[u8]) -> bool {
        let mut found = found;
        while let [rest @ .., 0] = found {
            found = rest;
        }
        found == self.value.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use super::*;
    use crate::unwrap_or_skip_unsupported;

    #[derive(Default)]
    struct FakeSource {
        attrs: HashMap<PathBuf, Vec<u8>>,
        errors: HashMap<PathBuf, i32>,
    }

    impl MarkerSource for FakeSource {
        fn get(&self, path: &Path, name: &str) -> io::Result<Option<Vec<u8>>> {
            assert_eq!(name, DEFAULT_MARKER_NAME);
            if let Some(code) = self.errors.get(path) {
                return Err(io::Error::from_raw_os_error(*code));
            }
            Ok(self.attrs.get(path).cloned())
        }
    }

    #[test]
    fn test_classify_by_attribute_value() {
        let mut source = FakeSource::default();
        source.attrs.insert("/v".into(), b"enabled".to_vec());
        source.attrs.insert("/nul".into(), b"enabled\0".to_vec());
        source.attrs.insert("/other".into(), b"disabled".to_vec());
        source.attrs.insert("/prefix".into(), b"enable".to_vec());
        source.attrs.insert("/empty".into(), Vec::new());

        let marker = Marker::default();
        let kind = |p: &str| marker.classify(&source, Path::new(p)).unwrap();
        assert_eq!(kind("/v"), FileKind::Virtual);
        assert_eq!(kind("/nul"), FileKind::Virtual);
        assert_eq!(kind("/other"), FileKind::Regular);
        assert_eq!(kind("/prefix"), FileKind::Regular);
        assert_eq!(kind("/empty"), FileKind::Regular);
        assert_eq!(kind("/absent"), FileKind::Regular);
    }

    #[test]
    fn test_classify_propagates_lookup_errors() {
        let mut source = FakeSource::default();
        source.errors.insert("/gone".into(), libc::ENOENT);
        source.errors.insert("/denied".into(), libc::EACCES);

        let marker = Marker::default();
        for (path, code) in [("/gone", libc::ENOENT), ("/denied", libc::EACCES)] {
            let err = marker.classify(&source, Path::new(path)).unwrap_err();
            assert_eq!(err.raw_os_error(), Some(code));
        }
    }

    #[test]
    fn test_xattr_marker_on_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe");
        std::fs::write(&path, "echo hi\n").unwrap();

        let marker = Marker::default();
        assert_eq!(
            marker.classify(&XattrMarker, &path).unwrap(),
            FileKind::Regular
        );

        unwrap_or_skip_unsupported!(
            xattr::set(&path, DEFAULT_MARKER_NAME, b"enabled"),
            "set marker xattr"
        );
        assert_eq!(
            marker.classify(&XattrMarker, &path).unwrap(),
            FileKind::Virtual
        );

        let missing = dir.path().join("missing");
        let err = marker.classify(&XattrMarker, &missing).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }
}
