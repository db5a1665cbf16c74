//! Remote execution primitive.
//!
//! A `Transport` starts the command for one host and hands back its output streams
//! together with a handle that can wait for the exit code or kill the process.
//! Everything above this module is transport-agnostic.

use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command as ProcessCommand};
use tracing::debug;

use crate::error::TransportError;
use crate::host::Host;
use crate::Command;

/// Exit status the OpenSSH client uses for its own connection errors.
const SSH_CONNECTION_FAILURE: i32 = 255;

pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// A started remote command.
pub struct RemoteProcess {
    pub stdout: Option<OutputStream>,
    pub stderr: Option<OutputStream>,
    pub handle: Box<dyn ProcessHandle>,
}

#[async_trait]
pub trait ProcessHandle: Send {
    /// Waits for the command to exit and returns its exit code.
    async fn wait(&mut self) -> Result<i32, TransportError>;

    /// Terminates the command and waits until it is gone.
    async fn kill(&mut self) -> Result<(), TransportError>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn spawn(&self, host: &Host, command: &Command) -> Result<RemoteProcess, TransportError>;
}

/// Runs commands through the system `ssh` client, one client process per host.
///
/// Killing the attempt kills the local client, which tears down the channel.
/// Without a pseudo-terminal the remote command is not sent SIGHUP when that
/// happens; it keeps running until its next write fails. [`with_tty`] requests
/// a terminal (`-tt`) so the remote side hangs up with the client, at the cost
/// of merging the remote stderr into stdout.
///
/// [`with_tty`]: SshTransport::with_tty
#[derive(Debug, Clone)]
pub struct SshTransport {
    program: String,
    options: Vec<String>,
    tty: bool,
}

impl SshTransport {
    pub fn new() -> Self {
        Self {
            program: "ssh".to_string(),
            options: vec![],
            tty: false,
        }
    }

    /// Extra `-o` options, e.g. `ConnectTimeout=5`.
    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    pub fn with_tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }

    /// Uses a different client binary with ssh-compatible arguments.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn args(&self, host: &Host, command: &Command) -> Vec<String> {
        let mut args = vec!["-o".to_string(), "BatchMode=yes".to_string()];
        if self.tty {
            args.push("-tt".to_string());
        }
        for option in &self.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }
        args.push(host.name().to_string());
        args.push("--".to_string());
        args.extend(command.iter().cloned());
        args
    }
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn spawn(&self, host: &Host, command: &Command) -> Result<RemoteProcess, TransportError> {
        let mut process = ProcessCommand::new(&self.program);
        process.args(self.args(host, command)).stdin(Stdio::null());
        debug!(host = %host, program = %self.program, "Spawning ssh client");
        spawn_child(process, true)
    }
}

/// Runs the command on the local machine with `GSH_HOST` set to the host name.
#[derive(Debug, Clone, Default)]
pub struct LocalTransport;

#[async_trait]
impl Transport for LocalTransport {
    async fn spawn(&self, host: &Host, command: &Command) -> Result<RemoteProcess, TransportError> {
        let (program, args) = command.split_first().ok_or_else(|| {
            TransportError::Spawn(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty command",
            ))
        })?;
        let mut process = ProcessCommand::new(program);
        process
            .args(args)
            .env("GSH_HOST", host.name())
            .stdin(Stdio::null());
        spawn_child(process, false)
    }
}

fn spawn_child(
    mut process: ProcessCommand,
    ssh_exit_codes: bool,
) -> Result<RemoteProcess, TransportError> {
    let mut child = process
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(TransportError::Spawn)?;
    Ok(RemoteProcess {
        stdout: child.stdout.take().map(|s| Box::new(s) as OutputStream),
        stderr: child.stderr.take().map(|s| Box::new(s) as OutputStream),
        handle: Box::new(ChildHandle {
            child,
            ssh_exit_codes,
        }),
    })
}

struct ChildHandle {
    child: Child,
    ssh_exit_codes: bool,
}

#[async_trait]
impl ProcessHandle for ChildHandle {
    async fn wait(&mut self) -> Result<i32, TransportError> {
        let code = exit_code(self.child.wait().await?);
        if self.ssh_exit_codes && code == SSH_CONNECTION_FAILURE {
            return Err(TransportError::Unreachable(format!(
                "ssh exited with status {}",
                SSH_CONNECTION_FAILURE
            )));
        }
        Ok(code)
    }

    async fn kill(&mut self) -> Result<(), TransportError> {
        self.child.kill().await?;
        Ok(())
    }
}

/// Exit code of a finished process. Death by signal N is reported as 128 + N.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}
