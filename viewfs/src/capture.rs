//! Running a marked file as a script and capturing what it prints.

use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use nix::fcntl::OFlag;
use nix::unistd::pipe2;

use crate::buffer::CaptureBuffer;

/// Result of running a script to completion.
#[derive(Debug)]
pub struct Capture {
    /// Combined stdout and stderr, in write order.
    pub buffer: CaptureBuffer,
    /// Read end of the capture pipe, already at end-of-stream.
    pub pipe: OwnedFd,
}

impl Capture {
    /// Descriptor number of the pipe's read end.
    pub fn handle(&self) -> u64 {
        self.pipe.as_raw_fd() as u64
    }
}

/// Spawns `<shell> <script>` with stdout and stderr on one pipe.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    shell: PathBuf,
}

impl ScriptRunner {
    pub fn new(shell: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
        }
    }

    pub fn shell(&self) -> &Path {
        &self.shell
    }

    /// Run `script` and block until its output stream is closed.
    ///
    /// Only pipe creation and spawning can fail. A script that does not
    /// parse, exits non-zero, or prints nothing still yields a capture.
    pub fn capture(&self, script: &Path) -> io::Result<Capture> {
        let (pipe, mut child) = self.spawn(script)?;

        let mut buffer = CaptureBuffer::new();
        let mut reader = File::from(pipe);
        buffer.drain_from(&mut reader);
        let pipe = OwnedFd::from(reader);

        match child.wait() {
            Ok(status) => debug!(
                "captured {} bytes from {} ({status})",
                buffer.len(),
                script.display()
            ),
            Err(e) => warn!("failed to reap script {}: {e}", script.display()),
        }

        Ok(Capture { buffer, pipe })
    }

    /// Spawn the child with both output streams redirected into a fresh
    /// pipe and return the pipe's read end.
    fn spawn(&self, script: &Path) -> io::Result<(OwnedFd, Child)> {
        // Close-on-exec, so concurrently spawned children don't inherit the
        // write end and hold the pipe open past this child's exit.
        let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC).map_err(io::Error::from)?;
        let stderr_end = write_end.try_clone()?;

        // The command owns our copies of the write end; they must be dropped
        // before draining or the read end never sees end-of-stream.
        let child = Command::new(&self.shell)
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::from(write_end))
            .stderr(Stdio::from(stderr_end))
            .spawn()?;

        Ok((read_end, child))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    const SHELL: &str = "/bin/sh";

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        path
    }

    #[test]
    fn test_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "hello", "echo hello\n");
        let capture = ScriptRunner::new(SHELL).capture(&path).unwrap();
        assert_eq!(capture.buffer.as_slice(), b"hello\n");
    }

    #[test]
    fn test_interleaves_stdout_and_stderr_in_write_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(
            dir.path(),
            "mixed",
            "printf 'out1\\n'\nprintf 'err1\\n' >&2\nprintf 'out2\\n'\n",
        );
        let capture = ScriptRunner::new(SHELL).capture(&path).unwrap();
        assert_eq!(capture.buffer.as_slice(), b"out1\nerr1\nout2\n");
    }

    #[test]
    fn test_output_larger_than_pipe_buffer() {
        let dir = tempfile::tempdir().unwrap();
        // 200000 bytes: well past the default 64KiB pipe capacity.
        let path = script(
            dir.path(),
            "big",
            "i=0\nwhile [ $i -lt 20000 ]; do echo 123456789; i=$((i+1)); done\n",
        );
        let capture = ScriptRunner::new(SHELL).capture(&path).unwrap();
        assert_eq!(capture.buffer.len(), 200_000);
    }

    #[test]
    fn test_silent_or_failing_script_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let silent = script(dir.path(), "silent", "exit 3\n");
        let capture = ScriptRunner::new(SHELL).capture(&silent).unwrap();
        assert!(capture.buffer.is_empty());

        let missing = dir.path().join("does-not-exist");
        let capture = ScriptRunner::new(SHELL).capture(&missing).unwrap();
        // The shell reports the missing script on stderr.
        assert!(!capture.buffer.is_empty());
    }

    #[test]
    fn test_missing_shell_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "s", "echo hi\n");
        let err = ScriptRunner::new(dir.path().join("no-such-shell"))
            .capture(&path)
            .unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn test_each_capture_gets_its_own_pipe() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "hello", "echo hello\n");
        let runner = ScriptRunner::new(SHELL);
        let a = runner.capture(&path).unwrap();
        let b = runner.capture(&path).unwrap();
        assert_ne!(a.handle(), b.handle());
        assert_eq!(a.buffer, b.buffer);
    }
}
