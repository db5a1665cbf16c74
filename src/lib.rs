//! Gsh: A Concurrent Multi-Host Command Runner.

// Serde helper module.
mod serde;
// Command line arguments and layered configuration.
pub mod config;
// Diagnostics setup for the binary.
pub mod logging;
// How to represent hosts.
pub mod host;
// Plugins that discover hosts.
pub mod loader;
// Plugins that observe execution.
pub mod hook;
// The always-on output hooks.
pub mod printer;
// Name tables of available loaders and hooks.
pub mod registry;
// Per-host outcomes and exit code aggregation.
pub mod outcome;
// Remote execution primitive.
pub mod transport;
// One attempt on one host.
pub mod dispatch;
// Bounded-concurrency scheduling.
pub mod scheduler;
// Synchronization primitives.
pub mod sync;
// Error handling.
pub mod error;

pub use config::{Cli, Settings};
pub use dispatch::Dispatcher;
pub use error::{GshError, HookError, LoaderError, TransportError};
pub use hook::{FailedHosts, Hook, HookSet, StreamKind, Summary};
pub use host::{Host, HostSet};
pub use loader::{FileLoader, HostListLoader, HostLoader, LoaderDescriptor, RangeLoader};
pub use outcome::{aggregate_exit_code, FailureKind, Outcome, RunResult, HOST_FAILURE_EXIT_CODE};
pub use printer::{MachinePrinter, PlainPrinter, Sink};
pub use registry::{HookRegistry, LoaderRegistry};
pub use scheduler::{Command, Engine, RunConfig, RunHandle};
pub use transport::{LocalTransport, ProcessHandle, RemoteProcess, SshTransport, Transport};
