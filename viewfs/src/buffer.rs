//! Growable byte buffer holding the captured output of a script.
//!
//! A buffer is filled once by a single capture and then only read from, so
//! readers can share it through an `Arc` without further locking.

use std::io::{ErrorKind, Read};

/// Chunk size used when draining a reader into the buffer.
pub const DRAIN_CHUNK_SIZE: usize = 1024;

/// Append-only capture of a subprocess's combined stdout/stderr.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CaptureBuffer {
    data: Vec<u8>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    /// Number of captured bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Read `source` to end-of-stream in fixed-size chunks.
    ///
    /// A read error ends the drain and keeps whatever was captured before it;
    /// the error is not reported. Returns the number of bytes appended.
    pub fn drain_from<R: Read>(&mut self, mut source: R) -> usize {
        let start = self.data.len();
        let mut chunk = [0u8; DRAIN_CHUNK_SIZE];
        loop {
            match source.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => self.append(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("capture drain stopped after {} bytes: {e}", self.data.len() - start);
                    break;
                }
            }
        }
        self.data.len() - start
    }

    /// Positional copy into `dest`: at most `min(dest.len(), len - offset)`
    /// bytes starting at `offset`. An offset at or past the end copies nothing.
    pub fn copy_out(&self, dest: &mut [u8], offset: u64) -> usize {
        let Some(tail) = self.tail(offset) else {
            return 0;
        };
        let n = dest.len().min(tail.len());
        dest[..n].copy_from_slice(&tail[..n]);
        n
    }

    /// Borrowing variant of [`copy_out`](Self::copy_out) returning the bytes
    /// a read of `size` bytes at `offset` would produce.
    pub fn slice_at(&self, size: usize, offset: u64) -> &[u8] {
        match self.tail(offset) {
            Some(tail) => &tail[..size.min(tail.len())],
            None => &[],
        }
    }

    fn tail(&self, offset: u64) -> Option<&[u8]> {
        let offset = usize::try_from(offset).ok()?;
        self.data.get(offset..)
    }
}

impl From<Vec<u8>> for CaptureBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor, Read};

    use super::*;

    /// Yields its data in small pieces, then fails.
    struct FailingReader {
        data: Vec<u8>,
        pos: usize,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.pos >= self.data.len() {
                return Err(io::Error::from_raw_os_error(libc::EIO));
            }
            let n = buf.len().min(3).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn test_new_buffer_is_empty() {
        let buf = CaptureBuffer::new();
        assert!(buf.is_empty());
        assert_eq!(buf.len(), 0);
        let mut dest = [0u8; 4];
        assert_eq!(buf.copy_out(&mut dest, 0), 0);
    }

    #[test]
    fn test_appended_chunks_read_back_in_order() {
        let mut buf = CaptureBuffer::new();
        for chunk in [&b"abc"[..], b"", b"defg", b"h"] {
            buf.append(chunk);
        }
        let mut dest = vec![0u8; buf.len()];
        assert_eq!(buf.copy_out(&mut dest, 0), 8);
        assert_eq!(&dest, b"abcdefgh");
    }

    #[test]
    fn test_copy_out_boundaries() {
        let buf = CaptureBuffer::from(b"hello\n".to_vec());
        let mut dest = [0u8; 10];

        assert_eq!(buf.copy_out(&mut dest, 6), 0);
        assert_eq!(buf.copy_out(&mut dest, 7), 0);
        assert_eq!(buf.copy_out(&mut dest, u64::MAX), 0);

        assert_eq!(buf.copy_out(&mut dest, 3), 3);
        assert_eq!(&dest[..3], b"lo\n");

        let mut small = [0u8; 2];
        assert_eq!(buf.copy_out(&mut small, 1), 2);
        assert_eq!(&small, b"el");
    }

    #[test]
    fn test_slice_at_matches_copy_out() {
        let buf = CaptureBuffer::from(b"0123456789".to_vec());
        assert_eq!(buf.slice_at(4, 2), b"2345");
        assert_eq!(buf.slice_at(100, 8), b"89");
        assert_eq!(buf.slice_at(1, 10), b"");
        assert_eq!(buf.slice_at(0, 3), b"");
    }

    #[test]
    fn test_drain_spans_multiple_chunks() {
        let data: Vec<u8> = (0..DRAIN_CHUNK_SIZE * 3 + 17).map(|i| i as u8).collect();
        let mut buf = CaptureBuffer::new();
        assert_eq!(buf.drain_from(Cursor::new(data.clone())), data.len());
        assert_eq!(buf.as_slice(), &data[..]);
    }

    #[test]
    fn test_drain_keeps_partial_data_on_error() {
        let mut buf = CaptureBuffer::new();
        buf.append(b">");
        let reader = FailingReader {
            data: b"partial".to_vec(),
            pos: 0,
        };
        assert_eq!(buf.drain_from(reader), 7);
        assert_eq!(buf.as_slice(), b">partial");
    }
}
