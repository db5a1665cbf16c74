//! Execution lifecycle hooks.
//!
//! Hooks observe a run; they never control it. Every callback may be invoked
//! concurrently from several host attempts, so implementations must be `Send + Sync`
//! and do their own locking. A hook that errors or panics only loses that one event.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::error::HookError;
use crate::host::Host;
use crate::outcome::{FailureKind, RunResult};
use crate::printer::Sink;

/// Which output stream of the remote command a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

pub trait Hook: Send + Sync {
    /// One line of output, without its line terminator.
    fn on_output(&self, _host: &Host, _stream: StreamKind, _text: &str) -> Result<(), HookError> {
        Ok(())
    }

    /// The command ran to completion on `host`.
    fn on_complete(&self, _host: &Host, _exit_code: i32) -> Result<(), HookError> {
        Ok(())
    }

    /// The attempt on `host` ended without an exit code.
    fn on_fail(&self, _host: &Host, _kind: FailureKind, _detail: &str) -> Result<(), HookError> {
        Ok(())
    }

    /// Called once, after every host has an outcome.
    fn on_finish(&self, _result: &RunResult) -> Result<(), HookError> {
        Ok(())
    }
}

/// The hooks active for a run, invoked in insertion order.
#[derive(Clone, Default)]
pub struct HookSet {
    hooks: Vec<(String, Arc<dyn Hook>)>,
}

impl HookSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, hook: Arc<dyn Hook>) {
        self.hooks.push((name.into(), hook));
    }

    pub fn with(mut self, name: impl Into<String>, hook: Arc<dyn Hook>) -> Self {
        self.push(name, hook);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hooks.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub(crate) fn output(&self, host: &Host, stream: StreamKind, text: &str) {
        self.each("on_output", Some(host), |hook| hook.on_output(host, stream, text));
    }

    pub(crate) fn complete(&self, host: &Host, exit_code: i32) {
        self.each("on_complete", Some(host), |hook| hook.on_complete(host, exit_code));
    }

    pub(crate) fn fail(&self, host: &Host, kind: FailureKind, detail: &str) {
        self.each("on_fail", Some(host), |hook| hook.on_fail(host, kind, detail));
    }

    pub(crate) fn finish(&self, result: &RunResult) {
        self.each("on_finish", None, |hook| hook.on_finish(result));
    }

    fn each<F>(&self, event: &'static str, host: Option<&Host>, call: F)
    where
        F: Fn(&dyn Hook) -> Result<(), HookError>,
    {
        let host = host.map(Host::name).unwrap_or("-");
        for (name, hook) in &self.hooks {
            match catch_unwind(AssertUnwindSafe(|| call(hook.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    warn!(hook = %name, event, host, %error, "Hook failed");
                }
                Err(_) => {
                    warn!(hook = %name, event, host, "Hook panicked");
                }
            }
        }
    }
}

/// Counts outcomes and prints a one-line tally when the run finishes.
pub struct Summary {
    ok: AtomicUsize,
    failed: AtomicUsize,
    timed_out: AtomicUsize,
    unreachable: AtomicUsize,
    interrupted: AtomicUsize,
    sink: Sink,
}

impl Summary {
    pub fn new() -> Self {
        Self::with_sink(Sink::stderr())
    }

    pub fn with_sink(sink: Sink) -> Self {
        Self {
            ok: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            timed_out: AtomicUsize::new(0),
            unreachable: AtomicUsize::new(0),
            interrupted: AtomicUsize::new(0),
            sink,
        }
    }

    pub fn line(&self) -> String {
        format!(
            "[Gsh] {} ok, {} failed, {} timed out, {} unreachable, {} interrupted",
            self.ok.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            self.timed_out.load(Ordering::Relaxed),
            self.unreachable.load(Ordering::Relaxed),
            self.interrupted.load(Ordering::Relaxed),
        )
    }
}

impl Default for Summary {
    fn default() -> Self {
        Self::new()
    }
}

impl Hook for Summary {
    fn on_complete(&self, _host: &Host, exit_code: i32) -> Result<(), HookError> {
        let counter = if exit_code == 0 { &self.ok } else { &self.failed };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn on_fail(&self, _host: &Host, kind: FailureKind, _detail: &str) -> Result<(), HookError> {
        let counter = match kind {
            FailureKind::TimedOut => &self.timed_out,
            FailureKind::TransportFailed => &self.unreachable,
            FailureKind::Interrupted => &self.interrupted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn on_finish(&self, _result: &RunResult) -> Result<(), HookError> {
        self.sink.write_line(&self.line())?;
        Ok(())
    }
}

/// Prints every host that did not exit 0, one per line, when the run finishes.
pub struct FailedHosts {
    sink: Sink,
}

impl FailedHosts {
    pub fn new() -> Self {
        Self::with_sink(Sink::stderr())
    }

    pub fn with_sink(sink: Sink) -> Self {
        Self { sink }
    }
}

impl Default for FailedHosts {
    fn default() -> Self {
        Self::new()
    }
}

impl Hook for FailedHosts {
    fn on_finish(&self, result: &RunResult) -> Result<(), HookError> {
        for host in result.failed_hosts() {
            self.sink.write_line(host.name())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::outcome::Outcome;
    use crate::printer::SharedBuffer;

    struct Recorder(Mutex<Vec<String>>);

    impl Hook for Recorder {
        fn on_complete(&self, host: &Host, exit_code: i32) -> Result<(), HookError> {
            self.0.lock().unwrap().push(format!("{} {}", host, exit_code));
            Ok(())
        }
    }

    struct Failing;

    impl Hook for Failing {
        fn on_complete(&self, _host: &Host, _exit_code: i32) -> Result<(), HookError> {
            Err(HookError::Message("boom".into()))
        }
    }

    struct Panicking;

    impl Hook for Panicking {
        fn on_complete(&self, _host: &Host, _exit_code: i32) -> Result<(), HookError> {
            panic!("hook bug");
        }
    }

    #[test]
    fn test_failing_hooks_do_not_stop_others() {
        let recorder = Arc::new(Recorder(Mutex::new(vec![])));
        let hooks = HookSet::new()
            .with("failing", Arc::new(Failing))
            .with("panicking", Arc::new(Panicking))
            .with("recorder", recorder.clone());
        hooks.complete(&Host::from("a"), 0);
        hooks.complete(&Host::from("b"), 3);
        assert_eq!(*recorder.0.lock().unwrap(), vec!["a 0", "b 3"]);
        assert_eq!(hooks.names().collect::<Vec<_>>(), vec!["failing", "panicking", "recorder"]);
    }

    #[test]
    fn test_empty_hook_set() {
        let hooks = HookSet::new();
        assert!(hooks.is_empty());
        hooks.output(&Host::from("a"), StreamKind::Stdout, "line");
        hooks.finish(&RunResult::default());
    }

    #[test]
    fn test_summary_counts() {
        let buffer = SharedBuffer::default();
        let summary = Summary::with_sink(Sink::new(buffer.clone()));
        summary.on_complete(&Host::from("a"), 0).unwrap();
        summary.on_complete(&Host::from("b"), 2).unwrap();
        summary.on_fail(&Host::from("c"), FailureKind::TimedOut, "").unwrap();
        summary.on_fail(&Host::from("d"), FailureKind::TransportFailed, "refused").unwrap();
        summary.on_finish(&RunResult::default()).unwrap();
        assert_eq!(
            buffer.contents(),
            "[Gsh] 1 ok, 1 failed, 1 timed out, 1 unreachable, 0 interrupted\n"
        );
    }

    #[test]
    fn test_failed_hosts_lists_non_successes() {
        let buffer = SharedBuffer::default();
        let hook = FailedHosts::with_sink(Sink::new(buffer.clone()));
        let result = RunResult::new(
            [
                (Host::from("b"), Outcome::Completed(1)),
                (Host::from("a"), Outcome::Completed(0)),
                (Host::from("c"), Outcome::Interrupted),
            ]
            .into_iter()
            .collect(),
        );
        hook.on_finish(&result).unwrap();
        assert_eq!(buffer.contents(), "b\nc\n");
    }
}
