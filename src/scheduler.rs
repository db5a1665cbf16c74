//! Bounded-concurrency scheduling of one command over a set of hosts.
//!
//! The engine task admits at most `concurrency_limit` dispatches at a time, in host
//! set order, and refills slots as completions come back over a channel. It is the
//! only writer of the outcome map. Cancelling the run stops admission at once; the
//! running dispatches kill their commands, and whatever has not reported within
//! the grace period is aborted and counted as interrupted.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::GshError;
use crate::hook::HookSet;
use crate::host::{Host, HostSet};
use crate::outcome::{FailureKind, Outcome, RunResult};
use crate::sync::sleep_until;
use crate::transport::Transport;

/// The argument tokens run on every host. Shared read-only by all dispatches.
pub type Command = Arc<[String]>;

/// How long in-flight dispatches get to wind down after the run is cancelled.
pub const CANCEL_GRACE: Duration = Duration::from_secs(3);

/// Everything one run needs. Immutable once handed to [`Engine::start`].
#[derive(Clone)]
pub struct RunConfig {
    hosts: HostSet,
    command: Command,
    concurrency_limit: usize,
    timeout: Option<Duration>,
    hooks: HookSet,
}

impl RunConfig {
    /// A sequential run without timeout or hooks.
    pub fn new<I, S>(hosts: HostSet, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts,
            command: command.into_iter().map(Into::into).collect(),
            concurrency_limit: 1,
            timeout: None,
            hooks: HookSet::new(),
        }
    }

    /// Caps the number of simultaneously running hosts. Zero is treated as one.
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }

    pub fn sequential(self) -> Self {
        self.with_concurrency_limit(1)
    }

    /// Bounds every single host attempt, not the run as a whole.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_hooks(mut self, hooks: HookSet) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn hosts(&self) -> &HostSet {
        &self.hosts
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn hooks(&self) -> &HookSet {
        &self.hooks
    }
}

pub struct Engine {
    transport: Arc<dyn Transport>,
    cancel_grace: Duration,
}

impl Engine {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            cancel_grace: CANCEL_GRACE,
        }
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    /// Starts the run on the current tokio runtime and returns immediately.
    pub fn start(&self, config: RunConfig) -> RunHandle {
        let cancel = CancellationToken::new();
        let run = Run {
            dispatcher: Arc::new(Dispatcher::new(
                Arc::clone(&self.transport),
                Arc::new(config.hooks.clone()),
            )),
            config,
            cancel: cancel.clone(),
            cancel_grace: self.cancel_grace,
        };
        RunHandle {
            cancel,
            task: tokio::spawn(run.execute()),
        }
    }
}

/// Handle to a started run.
pub struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<RunResult>,
}

impl RunHandle {
    /// Interrupts the run. `wait` still returns, with pending hosts marked interrupted.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that interrupts the run when cancelled, e.g. from a signal handler.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits until every host has an outcome.
    pub async fn wait(self) -> Result<RunResult, GshError> {
        self.task
            .await
            .map_err(|error| GshError::Engine(error.to_string()))
    }
}

struct Run {
    dispatcher: Arc<Dispatcher>,
    config: RunConfig,
    cancel: CancellationToken,
    cancel_grace: Duration,
}

impl Run {
    async fn execute(self) -> RunResult {
        let Run {
            dispatcher,
            config,
            cancel,
            cancel_grace,
        } = self;
        let limit = config.concurrency_limit;
        let hooks = config.hooks;
        info!(
            hosts = config.hosts.len(),
            limit,
            timeout = ?config.timeout,
            "Starting run"
        );

        // MPMC channel (used as MPSC) for dispatches to report their outcome.
        // `None` means the dispatch died before producing an outcome.
        let (done_tx, done_rx) = flume::unbounded::<(Host, Option<Outcome>)>();
        let mut queue = config.hosts.into_iter();
        let mut in_flight: HashMap<Host, AbortHandle> = HashMap::new();
        let mut outcomes = BTreeMap::new();
        let mut interrupted = false;
        let mut grace_deadline: Option<Instant> = None;

        loop {
            if !cancel.is_cancelled() {
                while in_flight.len() < limit {
                    let Some(host) = queue.next() else {
                        break;
                    };
                    debug!(host = %host, in_flight = in_flight.len(), "Dispatching");
                    let report = Report {
                        host: Some(host.clone()),
                        tx: done_tx.clone(),
                    };
                    let task = tokio::spawn(dispatch(
                        Arc::clone(&dispatcher),
                        Arc::clone(&config.command),
                        config.timeout,
                        cancel.clone(),
                        report,
                    ));
                    in_flight.insert(host, task.abort_handle());
                }
            }
            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled(), if !interrupted => {
                    warn!(in_flight = in_flight.len(), "Run interrupted");
                    interrupted = true;
                    // A grace period too large to represent never expires.
                    grace_deadline = Instant::now().checked_add(cancel_grace);
                }
                received = done_rx.recv_async() => {
                    if let Ok((host, outcome)) = received {
                        in_flight.remove(&host);
                        settle(&hooks, &mut outcomes, host, outcome);
                    }
                }
                _ = sleep_until(grace_deadline) => {
                    while let Ok((host, outcome)) = done_rx.try_recv() {
                        in_flight.remove(&host);
                        settle(&hooks, &mut outcomes, host, outcome);
                    }
                    for (host, task) in in_flight.drain() {
                        warn!(host = %host, "Dispatch did not stop in time, aborting");
                        task.abort();
                        hooks.fail(&host, FailureKind::Interrupted, "did not stop in time");
                        outcomes.insert(host, Outcome::Interrupted);
                    }
                    break;
                }
            }
        }

        // Only left over when the run was cancelled.
        for host in queue {
            hooks.fail(&host, FailureKind::Interrupted, "not started");
            outcomes.insert(host, Outcome::Interrupted);
        }

        let result = RunResult::new(outcomes);
        info!(exit_code = result.aggregate_exit_code, "Run finished");
        hooks.finish(&result);
        result
    }
}

/// Records a finished host. A dispatch that died without an outcome counts as a
/// transport failure, and the hooks hear about it here instead.
fn settle(
    hooks: &HookSet,
    outcomes: &mut BTreeMap<Host, Outcome>,
    host: Host,
    outcome: Option<Outcome>,
) {
    let outcome = outcome.unwrap_or_else(|| {
        let reason = "dispatch ended without an outcome";
        warn!(host = %host, reason);
        hooks.fail(&host, FailureKind::TransportFailed, reason);
        Outcome::TransportFailed(reason.to_string())
    });
    debug!(host = %host, outcome = %outcome, "Host finished");
    outcomes.insert(host, outcome);
}

async fn dispatch(
    dispatcher: Arc<Dispatcher>,
    command: Command,
    timeout: Option<Duration>,
    cancel: CancellationToken,
    report: Report,
) {
    let Some(host) = report.host.clone() else {
        return;
    };
    let outcome = dispatcher.run(&host, &command, timeout, &cancel).await;
    report.send(outcome);
}

/// Delivers one host's outcome to the engine exactly once, even if the dispatch
/// task dies before producing one.
struct Report {
    host: Option<Host>,
    tx: flume::Sender<(Host, Option<Outcome>)>,
}

impl Report {
    fn send(mut self, outcome: Outcome) {
        if let Some(host) = self.host.take() {
            let _ = self.tx.send((host, Some(outcome)));
        }
    }
}

impl Drop for Report {
    fn drop(&mut self) {
        if let Some(host) = self.host.take() {
            let _ = self.tx.send((host, None));
        }
    }
}
