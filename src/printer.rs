//! Printer-class hooks. Exactly one of these is active in every run.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

use colored::ColoredString;
use colourado::{ColorPalette, PaletteType};
use itertools::zip;

use crate::error::HookError;
use crate::hook::{Hook, StreamKind};
use crate::host::{Host, HostSet};
use crate::outcome::FailureKind;

/// A line-oriented, lock-protected output stream shared by hook callbacks.
pub struct Sink(Mutex<Box<dyn Write + Send>>);

impl Sink {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self(Mutex::new(Box::new(writer)))
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }

    pub fn stderr() -> Self {
        Self::new(io::stderr())
    }

    /// Writes `line` plus a newline while holding the lock, so lines from
    /// different hosts never interleave mid-line.
    pub fn write_line(&self, line: &str) -> io::Result<()> {
        let mut guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(guard, "{}", line)?;
        guard.flush()
    }
}

/// Emits output verbatim.
pub struct PlainPrinter {
    stdout: Sink,
    stderr: Sink,
}

impl PlainPrinter {
    pub fn new() -> Self {
        Self::with_sinks(Sink::stdout(), Sink::stderr())
    }

    pub fn with_sinks(stdout: Sink, stderr: Sink) -> Self {
        Self { stdout, stderr }
    }
}

impl Default for PlainPrinter {
    fn default() -> Self {
        Self::new()
    }
}

impl Hook for PlainPrinter {
    fn on_output(&self, _host: &Host, stream: StreamKind, text: &str) -> Result<(), HookError> {
        match stream {
            StreamKind::Stdout => self.stdout.write_line(text)?,
            StreamKind::Stderr => self.stderr.write_line(text)?,
        }
        Ok(())
    }

    fn on_fail(&self, host: &Host, kind: FailureKind, detail: &str) -> Result<(), HookError> {
        self.stderr
            .write_line(&failure_line(&format!("[Gsh] {}:", host), kind, detail))?;
        Ok(())
    }
}

/// Prefixes every line with the (colored, aligned) name of the host it came from.
pub struct MachinePrinter {
    prefixes: HashMap<Host, ColoredString>,
    stdout: Sink,
    stderr: Sink,
}

impl MachinePrinter {
    pub fn new(hosts: &HostSet) -> Self {
        Self::with_sinks(hosts, Sink::stdout(), Sink::stderr())
    }

    pub fn with_sinks(hosts: &HostSet, stdout: Sink, stderr: Sink) -> Self {
        let width = hosts.iter().map(|host| host.name().len()).max().unwrap_or(0);
        let colors = ColorPalette::new(hosts.len().max(1) as u32, PaletteType::Pastel, false).colors;
        let prefixes = zip(hosts, colors.iter())
            .map(|(host, color)| (host.clone(), host.prettify(color, width)))
            .collect();
        Self {
            prefixes,
            stdout,
            stderr,
        }
    }

    fn prefix(&self, host: &Host) -> String {
        match self.prefixes.get(host) {
            Some(prefix) => prefix.to_string(),
            None => host.to_string(),
        }
    }
}

impl Hook for MachinePrinter {
    fn on_output(&self, host: &Host, stream: StreamKind, text: &str) -> Result<(), HookError> {
        let line = format!("{}: {}", self.prefix(host), text);
        match stream {
            StreamKind::Stdout => self.stdout.write_line(&line)?,
            StreamKind::Stderr => self.stderr.write_line(&line)?,
        }
        Ok(())
    }

    fn on_fail(&self, host: &Host, kind: FailureKind, detail: &str) -> Result<(), HookError> {
        let prefix = format!("{}: [Gsh]", self.prefix(host));
        self.stderr.write_line(&failure_line(&prefix, kind, detail))?;
        Ok(())
    }
}

fn failure_line(prefix: &str, kind: FailureKind, detail: &str) -> String {
    if detail.is_empty() {
        format!("{} {}", prefix, kind)
    } else {
        format!("{} {} ({})", prefix, kind, detail)
    }
}

/// In-memory writer for inspecting hook output in tests.
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct SharedBuffer(std::sync::Arc<Mutex<Vec<u8>>>);

#[cfg(test)]
impl SharedBuffer {
    pub(crate) fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

#[cfg(test)]
impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(names: &[&str]) -> HostSet {
        names.iter().copied().map(Host::from).collect()
    }

    #[test]
    fn test_plain_printer_routes_streams() {
        let (out, err) = (SharedBuffer::default(), SharedBuffer::default());
        let printer = PlainPrinter::with_sinks(Sink::new(out.clone()), Sink::new(err.clone()));
        let host = Host::from("web1");
        printer.on_output(&host, StreamKind::Stdout, "hello").unwrap();
        printer.on_output(&host, StreamKind::Stderr, "oops").unwrap();
        printer.on_output(&host, StreamKind::Stdout, "").unwrap();
        assert_eq!(out.contents(), "hello\n\n");
        assert_eq!(err.contents(), "oops\n");
    }

    #[test]
    fn test_plain_printer_reports_failures() {
        let (out, err) = (SharedBuffer::default(), SharedBuffer::default());
        let printer = PlainPrinter::with_sinks(Sink::new(out.clone()), Sink::new(err.clone()));
        printer
            .on_fail(&Host::from("db"), FailureKind::TransportFailed, "connection refused")
            .unwrap();
        printer.on_fail(&Host::from("db"), FailureKind::TimedOut, "").unwrap();
        assert_eq!(out.contents(), "");
        assert_eq!(
            err.contents(),
            "[Gsh] db: unreachable (connection refused)\n[Gsh] db: timed out\n"
        );
    }

    #[test]
    fn test_machine_printer_prefixes_and_aligns() {
        colored::control::set_override(false);
        let (out, err) = (SharedBuffer::default(), SharedBuffer::default());
        let printer = MachinePrinter::with_sinks(
            &hosts(&["a", "long-name"]),
            Sink::new(out.clone()),
            Sink::new(err.clone()),
        );
        printer.on_output(&Host::from("a"), StreamKind::Stdout, "up 3 days").unwrap();
        printer.on_output(&Host::from("long-name"), StreamKind::Stdout, "up 1 day").unwrap();
        printer.on_output(&Host::from("a"), StreamKind::Stderr, "warning").unwrap();
        assert_eq!(out.contents(), "a        : up 3 days\nlong-name: up 1 day\n");
        assert_eq!(err.contents(), "a        : warning\n");
    }

    #[test]
    fn test_machine_printer_unknown_host_is_unpadded() {
        colored::control::set_override(false);
        let out = SharedBuffer::default();
        let printer =
            MachinePrinter::with_sinks(&hosts(&["abcdef"]), Sink::new(out.clone()), Sink::stderr());
        printer.on_output(&Host::from("x"), StreamKind::Stdout, "hi").unwrap();
        assert_eq!(out.contents(), "x: hi\n");
    }
}
