//! One attempt to run the command on one host.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::hook::{HookSet, StreamKind};
use crate::host::Host;
use crate::outcome::{FailureKind, Outcome};
use crate::sync::sleep_until;
use crate::transport::{OutputStream, ProcessHandle, RemoteProcess, Transport};
use crate::Command;

/// How long a killed process gets to go away before the attempt stops waiting for it.
pub const KILL_GRACE: Duration = Duration::from_secs(2);

enum Stop {
    Exited(Result<i32, TransportError>),
    TimedOut,
    Cancelled,
}

pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    hooks: Arc<HookSet>,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, hooks: Arc<HookSet>) -> Self {
        Self { transport, hooks }
    }

    /// Runs `command` on `host` and reports exactly one terminal outcome, both to
    /// the hooks and as the return value.
    ///
    /// `timeout` covers the whole attempt, starting the remote command included.
    pub async fn run(
        &self,
        host: &Host,
        command: &Command,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Outcome {
        // A timeout too large to represent never expires.
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));

        let spawned = tokio::select! {
            biased;
            _ = cancel.cancelled() => return self.interrupted(host),
            _ = sleep_until(deadline) => return self.timed_out(host, timeout),
            spawned = self.transport.spawn(host, command) => spawned,
        };
        let RemoteProcess {
            stdout,
            stderr,
            mut handle,
        } = match spawned {
            Ok(process) => process,
            Err(error) => return self.transport_failed(host, error),
        };
        debug!(host = %host, "Remote command started");

        let stop = tokio::select! {
            biased;
            _ = cancel.cancelled() => Stop::Cancelled,
            _ = sleep_until(deadline) => Stop::TimedOut,
            exited = self.drive(host, stdout, stderr, handle.as_mut()) => Stop::Exited(exited),
        };

        match stop {
            Stop::Exited(Ok(code)) => {
                self.hooks.complete(host, code);
                Outcome::Completed(code)
            }
            Stop::Exited(Err(error)) => {
                kill(host, handle.as_mut()).await;
                self.transport_failed(host, error)
            }
            Stop::TimedOut => {
                kill(host, handle.as_mut()).await;
                self.timed_out(host, timeout)
            }
            Stop::Cancelled => {
                kill(host, handle.as_mut()).await;
                self.interrupted(host)
            }
        }
    }

    /// Streams both outputs to the hooks until EOF, then collects the exit code.
    async fn drive(
        &self,
        host: &Host,
        stdout: Option<OutputStream>,
        stderr: Option<OutputStream>,
        handle: &mut dyn ProcessHandle,
    ) -> Result<i32, TransportError> {
        let (out, err) = join(
            self.stream(host, stdout, StreamKind::Stdout),
            self.stream(host, stderr, StreamKind::Stderr),
        )
        .await;
        out?;
        err?;
        handle.wait().await
    }

    async fn stream(
        &self,
        host: &Host,
        stream: Option<OutputStream>,
        kind: StreamKind,
    ) -> std::io::Result<()> {
        let Some(stream) = stream else {
            return Ok(());
        };
        let mut lines = LineReader::new(stream);
        let mut buf = Vec::new();
        while lines.next_line(&mut buf).await? {
            // Invalid UTF-8 sequences become U+FFFD.
            self.hooks.output(host, kind, &String::from_utf8_lossy(&buf));
            buf.clear();
        }
        Ok(())
    }

    fn timed_out(&self, host: &Host, timeout: Option<Duration>) -> Outcome {
        let detail = timeout
            .map(|timeout| format!("after {}s", timeout.as_secs_f64()))
            .unwrap_or_default();
        self.hooks.fail(host, FailureKind::TimedOut, &detail);
        Outcome::TimedOut
    }

    fn interrupted(&self, host: &Host) -> Outcome {
        self.hooks.fail(host, FailureKind::Interrupted, "");
        Outcome::Interrupted
    }

    fn transport_failed(&self, host: &Host, error: TransportError) -> Outcome {
        let reason = error.to_string();
        self.hooks.fail(host, FailureKind::TransportFailed, &reason);
        Outcome::TransportFailed(reason)
    }
}

async fn kill(host: &Host, handle: &mut dyn ProcessHandle) {
    match tokio::time::timeout(KILL_GRACE, handle.kill()).await {
        Ok(Ok(())) => debug!(host = %host, "Killed remote command"),
        Ok(Err(error)) => warn!(host = %host, %error, "Failed to kill remote command"),
        Err(_) => warn!(host = %host, "Remote command did not exit after kill"),
    }
}

/// Splits a byte stream into lines terminated by `\n`, `\r` or `\r\n`.
/// Terminators are not included in the returned lines.
struct LineReader<R> {
    reader: BufReader<R>,
    /// The previous line ended with `\r`; a directly following `\n` belongs to it.
    skip_lf: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(reader: R) -> Self {
        Self::from_buf_reader(BufReader::new(reader))
    }

    fn from_buf_reader(reader: BufReader<R>) -> Self {
        Self {
            reader,
            skip_lf: false,
        }
    }

    /// Reads the next line into `buf`. Returns `false` once the stream is exhausted.
    /// A trailing line without terminator is still returned.
    async fn next_line(&mut self, buf: &mut Vec<u8>) -> std::io::Result<bool> {
        loop {
            let (done, used) = {
                let available = self.reader.fill_buf().await?;
                if available.is_empty() {
                    return Ok(!buf.is_empty());
                }
                let mut start = 0;
                if self.skip_lf {
                    self.skip_lf = false;
                    if available[0] == b'\n' {
                        start = 1;
                    }
                }
                let rest = &available[start..];
                match memchr::memchr2(b'\r', b'\n', rest) {
                    Some(i) => {
                        buf.extend_from_slice(&rest[..i]);
                        self.skip_lf = rest[i] == b'\r';
                        (true, start + i + 1)
                    }
                    None => {
                        buf.extend_from_slice(rest);
                        (false, available.len())
                    }
                }
            };
            self.reader.consume(used);
            if done {
                return Ok(true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn lines_of(input: &[u8], capacity: usize) -> Vec<String> {
        let mut reader = LineReader::from_buf_reader(BufReader::with_capacity(capacity, input));
        let mut buf = Vec::new();
        let mut lines = vec![];
        while reader.next_line(&mut buf).await.unwrap() {
            lines.push(String::from_utf8_lossy(&buf).into_owned());
            buf.clear();
        }
        lines
    }

    #[tokio::test]
    async fn test_split_on_newlines() {
        assert_eq!(lines_of(b"a\nbb\n\nccc\n", 64).await, vec!["a", "bb", "", "ccc"]);
    }

    #[tokio::test]
    async fn test_trailing_partial_line() {
        assert_eq!(lines_of(b"a\nno newline", 64).await, vec!["a", "no newline"]);
        assert!(lines_of(b"", 64).await.is_empty());
    }

    #[tokio::test]
    async fn test_carriage_returns() {
        // Progress bars redraw with `\r`; Windows-style line ends are one terminator.
        assert_eq!(
            lines_of(b"10%\r50%\r100%\r\ndone\r\n", 64).await,
            vec!["10%", "50%", "100%", "done"]
        );
    }

    #[tokio::test]
    async fn test_crlf_split_across_buffer_refills() {
        for capacity in 1..6 {
            assert_eq!(
                lines_of(b"abc\r\ndef\r\n\r\nx", capacity).await,
                vec!["abc", "def", "", "x"],
                "capacity {}",
                capacity
            );
        }
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        assert_eq!(lines_of(b"ok \xff\xfe end\n", 64).await, vec!["ok \u{FFFD}\u{FFFD} end"]);
    }
}
