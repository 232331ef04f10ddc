//! Helpers intended for [`std::process::Command`].

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};

/// Where a child process's stdout or stderr should go.
#[derive(Clone, Default)]
pub enum OutputSink {
    /// Share the calling process's own stream.
    #[default]
    Inherit,
    /// Copy everything into this writer. The lock is taken per chunk,
    /// so one writer may serve both streams and several children.
    Writer(Arc<Mutex<dyn Write + Send>>),
}

impl std::fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inherit => f.write_str("Inherit"),
            Self::Writer(_) => f.write_str("Writer(..)"),
        }
    }
}

impl OutputSink {
    /// Wrap a writer.
    pub fn writer(w: impl Write + Send + 'static) -> Self {
        Self::Writer(Arc::new(Mutex::new(w)))
    }

    fn stdio(&self) -> Stdio {
        match self {
            Self::Inherit => Stdio::inherit(),
            Self::Writer(_) => Stdio::piped(),
        }
    }

    /// Copy `src` to the writer until EOF. After a write error the pipe
    /// is still drained so the child never blocks on it; the first error
    /// is returned at the end.
    fn forward(&self, src: Option<impl Read>) -> std::io::Result<()> {
        let (Self::Writer(w), Some(mut src)) = (self, src) else {
            return Ok(());
        };
        let mut buf = [0u8; 8192];
        let mut failed = None;
        loop {
            let n = match src.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(failed.unwrap_or(e)),
            };
            if failed.is_none() {
                failed = Self::write_chunk(w, &buf[..n]).err();
            }
        }
        match failed {
            Some(e) => Err(e),
            None => Self::write_chunk(w, &[]),
        }
    }

    fn write_chunk(w: &Mutex<dyn Write + Send>, chunk: &[u8]) -> std::io::Result<()> {
        let mut w = w
            .lock()
            .map_err(|_| std::io::Error::other("output writer lock poisoned"))?;
        w.write_all(chunk)?;
        w.flush()
    }
}

/// Helpers intended for [`std::process::Command`].
pub trait CommandRunExt {
    /// Log (at debug level) the full child commandline.
    fn log_debug(&mut self) -> &mut Self;

    /// Render the program and its arguments as a shell-quoted string.
    fn to_string_pretty(&self) -> String;

    /// Execute the child process to completion, feeding `stdin` to it and
    /// routing its output streams to the given sinks. A non-zero exit
    /// is an error.
    fn run_with_io(&mut self, stdin: &[u8], stdout: &OutputSink, stderr: &OutputSink)
        -> Result<()>;
}

impl CommandRunExt for Command {
    fn log_debug(&mut self) -> &mut Self {
        tracing::debug!("exec: {}", self.to_string_pretty());
        self
    }

    fn to_string_pretty(&self) -> String {
        std::iter::once(self.get_program())
            .chain(self.get_args())
            .map(|a| {
                let a = a.to_string_lossy();
                shlex::try_quote(&a)
                    .map(|q| q.into_owned())
                    .unwrap_or_else(|_| a.into_owned())
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn run_with_io(
        &mut self,
        stdin: &[u8],
        stdout: &OutputSink,
        stderr: &OutputSink,
    ) -> Result<()> {
        let cmdline = self.to_string_pretty();
        let child = self
            .stdin(Stdio::piped())
            .stdout(stdout.stdio())
            .stderr(stderr.stdio())
            .spawn()
            .with_context(|| format!("Spawning {cmdline}"))?;
        let status = drive_child(child, stdin, stdout, stderr)
            .with_context(|| format!("Running {cmdline}"))?;
        if !status.success() {
            anyhow::bail!("Subprocess failed: {status}");
        }
        Ok(())
    }
}

/// Feed stdin and drain the output pipes concurrently, then reap the child.
fn drive_child(
    mut child: Child,
    stdin: &[u8],
    stdout: &OutputSink,
    stderr: &OutputSink,
) -> Result<ExitStatus> {
    let child_stdin = child.stdin.take();
    let child_stdout = child.stdout.take();
    let child_stderr = child.stderr.take();

    std::thread::scope(|s| {
        let feeder = s.spawn(move || feed_stdin(child_stdin, stdin));
        let out = s.spawn(move || stdout.forward(child_stdout));
        let err = s.spawn(move || stderr.forward(child_stderr));

        let results = [("stdin", feeder), ("stdout", out), ("stderr", err)]
            .map(|(name, h)| (name, h.join()));
        // Always reap, even if forwarding failed.
        let status = child.wait().context("Waiting for child");
        for (name, r) in results {
            r.map_err(|_| anyhow::anyhow!("{name} worker panicked"))?
                .with_context(|| format!("Forwarding {name}"))?;
        }
        status
    })
}

fn feed_stdin(dest: Option<std::process::ChildStdin>, payload: &[u8]) -> std::io::Result<()> {
    let Some(mut dest) = dest else {
        return Ok(());
    };
    // The child may exit without reading its input at all.
    match dest.write_all(payload) {
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        r => r,
    }
    // Dropping `dest` closes the pipe so the child sees EOF.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_string_pretty() {
        let mut cmd = Command::new("nydus-image");
        cmd.args(["create", "--blob", "/tmp/a blob", "--whiteout-spec", "oci"]);
        similar_asserts::assert_eq!(
            cmd.to_string_pretty(),
            "nydus-image create --blob '/tmp/a blob' --whiteout-spec oci"
        );
    }

    #[test]
    fn test_run_stdin_roundtrip() {
        let out = Arc::new(Mutex::new(Vec::new()));
        let sink = OutputSink::Writer(out.clone());
        Command::new("cat")
            .run_with_io(b"pattern1\npattern2", &sink, &OutputSink::Inherit)
            .unwrap();
        assert_eq!(out.lock().unwrap().as_slice(), b"pattern1\npattern2");
    }

    #[test]
    fn test_run_stderr_sink() {
        let err = Arc::new(Mutex::new(Vec::new()));
        let sink = OutputSink::Writer(err.clone());
        Command::new("sh")
            .args(["-c", "echo oops >&2"])
            .run_with_io(b"", &OutputSink::Inherit, &sink)
            .unwrap();
        assert_eq!(err.lock().unwrap().as_slice(), b"oops\n");
    }

    #[test]
    fn test_run_ignores_unread_stdin() {
        let payload = vec![b'x'; 1 << 20];
        Command::new("true")
            .run_with_io(&payload, &OutputSink::Inherit, &OutputSink::Inherit)
            .unwrap();
    }

    /// Run `f` on another thread, failing instead of hanging if it stalls.
    fn with_deadline<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(f());
        });
        rx.recv_timeout(std::time::Duration::from_secs(30))
            .expect("child run did not finish")
    }

    #[test]
    fn test_run_shared_sink_both_streams() {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let sink = OutputSink::Writer(buf.clone());
        let r = with_deadline(move || {
            Command::new("sh")
                .args([
                    "-c",
                    "head -c 200000 /dev/zero >&2; head -c 200000 /dev/zero",
                ])
                .run_with_io(b"", &sink, &sink)
        });
        r.unwrap();
        assert_eq!(buf.lock().unwrap().len(), 400000);
    }

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_run_failing_writer() {
        let sink = OutputSink::writer(FailingWriter);
        let r = with_deadline(move || {
            Command::new("sh")
                .args(["-c", "head -c 200000 /dev/zero"])
                .run_with_io(b"", &sink, &OutputSink::Inherit)
        });
        let e = r.unwrap_err();
        let msg = format!("{e:#}");
        assert!(msg.contains("Forwarding stdout"), "{msg}");
        assert!(msg.contains("disk full"), "{msg}");
    }

    #[test]
    fn test_run_nonzero_exit() {
        let e = Command::new("false")
            .run_with_io(b"", &OutputSink::Inherit, &OutputSink::Inherit)
            .unwrap_err();
        assert!(e.to_string().contains("Subprocess failed"), "{e:#}");
    }

    #[test]
    fn test_run_missing_binary() {
        let e = Command::new("/nonexistent/nydus-image")
            .run_with_io(b"", &OutputSink::Inherit, &OutputSink::Inherit)
            .unwrap_err();
        let io = e.downcast_ref::<std::io::Error>().unwrap();
        assert_eq!(io.kind(), std::io::ErrorKind::NotFound);
    }
}
