//! Per-host outcomes and the aggregate exit code policy.
//!
//! The aggregate is the worst signal over all hosts:
//!
//! - any non-zero `Completed` code: the numerically highest one,
//! - otherwise any `TimedOut`, `TransportFailed` or `Interrupted`: [`HOST_FAILURE_EXIT_CODE`],
//! - otherwise `0`.

use std::collections::BTreeMap;
use std::fmt;

use crate::host::Host;

/// Exit code reported when at least one host failed without producing an exit code
/// of its own and no host exited non-zero.
pub const HOST_FAILURE_EXIT_CODE: i32 = 125;

/// The terminal result of one host's attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed(i32),
    TimedOut,
    TransportFailed(String),
    Interrupted,
}

/// Why a host attempt failed, as reported to hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    TimedOut,
    TransportFailed,
    Interrupted,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Completed(0))
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Outcome::Completed(_) => None,
            Outcome::TimedOut => Some(FailureKind::TimedOut),
            Outcome::TransportFailed(_) => Some(FailureKind::TransportFailed),
            Outcome::Interrupted => Some(FailureKind::Interrupted),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Outcome::Completed(code) => write!(f, "exited with status {}", code),
            Outcome::TimedOut => f.write_str("timed out"),
            Outcome::TransportFailed(reason) => write!(f, "transport failed: {}", reason),
            Outcome::Interrupted => f.write_str("interrupted"),
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            FailureKind::TimedOut => "timed out",
            FailureKind::TransportFailed => "unreachable",
            FailureKind::Interrupted => "interrupted",
        })
    }
}

/// Everything known about a finished (or cancelled) run.
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    pub outcome_by_host: BTreeMap<Host, Outcome>,
    pub aggregate_exit_code: i32,
}

impl RunResult {
    pub fn new(outcome_by_host: BTreeMap<Host, Outcome>) -> Self {
        let aggregate_exit_code = aggregate_exit_code(outcome_by_host.values());
        Self {
            outcome_by_host,
            aggregate_exit_code,
        }
    }

    pub fn failed_hosts(&self) -> impl Iterator<Item = &Host> {
        self.outcome_by_host
            .iter()
            .filter(|(_, outcome)| !outcome.is_success())
            .map(|(host, _)| host)
    }
}

/// Folds outcomes into one process exit code. Independent of iteration order.
pub fn aggregate_exit_code<'a>(outcomes: impl IntoIterator<Item = &'a Outcome>) -> i32 {
    let mut worst_code: Option<i32> = None;
    let mut host_failure = false;
    for outcome in outcomes {
        match outcome {
            Outcome::Completed(0) => {}
            Outcome::Completed(code) => {
                worst_code = Some(worst_code.map_or(*code, |worst| worst.max(*code)));
            }
            Outcome::TimedOut | Outcome::TransportFailed(_) | Outcome::Interrupted => {
                host_failure = true;
            }
        }
    }
    match worst_code {
        Some(code) => code,
        None if host_failure => HOST_FAILURE_EXIT_CODE,
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(outcomes: Vec<(&str, Outcome)>) -> RunResult {
        RunResult::new(
            outcomes
                .into_iter()
                .map(|(host, outcome)| (Host::from(host), outcome))
                .collect(),
        )
    }

    #[test]
    fn test_all_success_is_zero() {
        let run = result(vec![
            ("a", Outcome::Completed(0)),
            ("b", Outcome::Completed(0)),
            ("c", Outcome::Completed(0)),
        ]);
        assert_eq!(run.aggregate_exit_code, 0);
        assert_eq!(run.failed_hosts().count(), 0);
    }

    #[test]
    fn test_no_hosts_is_zero() {
        assert_eq!(result(vec![]).aggregate_exit_code, 0);
    }

    #[test]
    fn test_nonzero_completed_wins() {
        let run = result(vec![("a", Outcome::Completed(0)), ("b", Outcome::Completed(2))]);
        assert_eq!(run.aggregate_exit_code, 2);
    }

    #[test]
    fn test_highest_nonzero_wins_over_failures() {
        let run = result(vec![
            ("a", Outcome::Completed(1)),
            ("b", Outcome::TimedOut),
            ("c", Outcome::Completed(7)),
            ("d", Outcome::TransportFailed("refused".into())),
        ]);
        assert_eq!(run.aggregate_exit_code, 7);
    }

    #[test]
    fn test_host_failure_sentinel() {
        for failure in [
            Outcome::TimedOut,
            Outcome::TransportFailed("no route".into()),
            Outcome::Interrupted,
        ] {
            let run = result(vec![("a", Outcome::Completed(0)), ("b", failure)]);
            assert_eq!(run.aggregate_exit_code, HOST_FAILURE_EXIT_CODE);
            assert_eq!(run.failed_hosts().collect::<Vec<_>>(), vec![&Host::from("b")]);
        }
    }

    #[test]
    fn test_aggregation_is_order_independent() {
        let outcomes = vec![
            Outcome::Completed(0),
            Outcome::Interrupted,
            Outcome::Completed(3),
            Outcome::TimedOut,
            Outcome::Completed(1),
        ];
        let forward = aggregate_exit_code(&outcomes);
        let backward = aggregate_exit_code(outcomes.iter().rev());
        assert_eq!(forward, 3);
        assert_eq!(forward, backward);
        assert_eq!(forward, aggregate_exit_code(&outcomes));
    }
}
