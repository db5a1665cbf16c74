//! Configuration for Gsh.
//!
//! Settings are layered: built-in defaults, then `/etc/gsh/gsh.yaml`, then
//! `~/.gsh/gsh.yaml`, then an explicit `--config` file, then command line flags.
//! The result is resolved once into an immutable `RunConfig`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{ArgAction, Parser};
use serde::Deserialize;

use crate::error::GshError;
use crate::hook::HookSet;
use crate::host::HostSet;
use crate::scheduler::RunConfig;
use crate::serde::string_or_seq;

pub const DEFAULT_FORKLIMIT: usize = 64;
pub const SYSTEM_CONFIG: &str = "/etc/gsh/gsh.yaml";

/// Run a command on many hosts at once.
///
/// Loader options (-H, -r, -f) may be repeated; their hosts are combined.
/// Without a command, the resolved hosts are printed instead.
#[derive(Parser, Debug)]
#[command(name = "gsh", version, author)]
pub struct Cli {
    /// Maximum number of hosts to run on at the same time
    #[arg(long, short = 'F', value_name = "N")]
    pub forklimit: Option<usize>,

    /// Prefix every output line with the host name
    #[arg(long, short = 'm', conflicts_with = "no_print_machines")]
    pub print_machines: bool,

    /// Print output verbatim
    #[arg(long, short = 'M')]
    pub no_print_machines: bool,

    /// Run on all hosts concurrently, up to the fork limit
    #[arg(long, short = 'c', conflicts_with = "sequential")]
    pub concurrent: bool,

    /// Run on one host at a time
    #[arg(long, short = 's')]
    pub sequential: bool,

    /// Seconds to wait for the command on each host. 0 waits forever
    #[arg(long, short = 't', value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Additional hooks to run, by name
    #[arg(long, value_name = "NAME", value_delimiter = ',', action = ArgAction::Append)]
    pub hooks: Vec<String>,

    /// List the available hooks and exit
    #[arg(long)]
    pub list_hooks: bool,

    /// Extra configuration file, applied after the default locations
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Extra ssh client option (passed as -o OPTION)
    #[arg(long = "ssh-option", value_name = "OPTION", action = ArgAction::Append)]
    pub ssh_options: Vec<String>,

    /// Allocate a remote terminal (ssh -tt) so killed commands get SIGHUP
    #[arg(long, conflicts_with = "local")]
    pub ssh_tty: bool,

    /// Run the command locally once per host instead of over ssh
    #[arg(long)]
    pub local: bool,

    /// Increase diagnostic logging (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = ArgAction::Count)]
    pub verbose: u8,

    /// Command to run on every host
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

/// One configuration file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub forklimit: Option<usize>,
    pub print_machines: Option<bool>,
    pub concurrent: Option<bool>,
    pub timeout: Option<u64>,
    #[serde(deserialize_with = "string_or_seq")]
    pub hooks: Vec<String>,
    #[serde(deserialize_with = "string_or_seq")]
    pub ssh_options: Vec<String>,
}

impl FileConfig {
    /// Reads `path`. A missing file yields `None`; a file that is not a
    /// mapping counts as empty.
    pub fn load(path: &Path) -> Result<Option<Self>, GshError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(GshError::Config {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })
            }
        };
        Self::parse(&contents).map(Some).map_err(|message| GshError::Config {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn parse(contents: &str) -> Result<Self, String> {
        if is_blank(contents) {
            return Ok(Self::default());
        }
        let value: serde_yaml::Value = serde_yaml::from_str(contents).map_err(|e| e.to_string())?;
        if !value.is_mapping() {
            return Ok(Self::default());
        }
        serde_yaml::from_value(value).map_err(|e| e.to_string())
    }
}

/// Nothing but whitespace and comments.
fn is_blank(contents: &str) -> bool {
    contents
        .lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with('#'))
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub forklimit: usize,
    pub print_machines: bool,
    pub concurrent: bool,
    /// Zero means no timeout.
    pub timeout: u64,
    pub hooks: Vec<String>,
    pub ssh_options: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            forklimit: DEFAULT_FORKLIMIT,
            print_machines: true,
            concurrent: true,
            timeout: 0,
            hooks: vec![],
            ssh_options: vec![],
        }
    }
}

impl Settings {
    /// Defaults, the standard config files, `cli.config`, then `cli` itself.
    pub fn load(cli: &Cli) -> Result<Self, GshError> {
        let mut settings = Self::default();
        let mut files = vec![PathBuf::from(SYSTEM_CONFIG)];
        if let Some(home) = dirs::home_dir() {
            files.push(home.join(".gsh").join("gsh.yaml"));
        }
        for path in &files {
            if let Some(file) = FileConfig::load(path)? {
                settings.apply_file(file);
            }
        }
        if let Some(path) = &cli.config {
            match FileConfig::load(path)? {
                Some(file) => settings.apply_file(file),
                None => {
                    return Err(GshError::Config {
                        path: path.clone(),
                        message: "No such file".to_string(),
                    })
                }
            }
        }
        settings.apply_cli(cli);
        Ok(settings)
    }

    pub fn apply_file(&mut self, file: FileConfig) {
        if let Some(forklimit) = file.forklimit {
            self.forklimit = forklimit;
        }
        if let Some(print_machines) = file.print_machines {
            self.print_machines = print_machines;
        }
        if let Some(concurrent) = file.concurrent {
            self.concurrent = concurrent;
        }
        if let Some(timeout) = file.timeout {
            self.timeout = timeout;
        }
        extend_unique(&mut self.hooks, file.hooks);
        extend_unique(&mut self.ssh_options, file.ssh_options);
    }

    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(forklimit) = cli.forklimit {
            self.forklimit = forklimit;
        }
        if cli.print_machines {
            self.print_machines = true;
        } else if cli.no_print_machines {
            self.print_machines = false;
        }
        if cli.concurrent {
            self.concurrent = true;
        } else if cli.sequential {
            self.concurrent = false;
        }
        if let Some(timeout) = cli.timeout {
            self.timeout = timeout;
        }
        extend_unique(&mut self.hooks, cli.hooks.iter().cloned());
        extend_unique(&mut self.ssh_options, cli.ssh_options.iter().cloned());
    }

    pub fn concurrency_limit(&self) -> usize {
        if self.concurrent {
            self.forklimit.max(1)
        } else {
            1
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_secs(self.timeout))
    }

    pub fn run_config(&self, hosts: HostSet, command: Vec<String>, hooks: HookSet) -> RunConfig {
        RunConfig::new(hosts, command)
            .with_concurrency_limit(self.concurrency_limit())
            .with_timeout(self.timeout())
            .with_hooks(hooks)
    }
}

fn extend_unique(into: &mut Vec<String>, values: impl IntoIterator<Item = String>) {
    for value in values {
        if !into.contains(&value) {
            into.push(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use clap::CommandFactory;
    use tempfile::NamedTempFile;

    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("gsh").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_command_after_flags() {
        let cli = cli(&["-F", "8", "-t", "30", "uptime", "-p"]);
        assert_eq!(cli.forklimit, Some(8));
        assert_eq!(cli.timeout, Some(30));
        assert_eq!(cli.command, vec!["uptime", "-p"]);
    }

    #[test]
    fn test_ssh_tty_flag() {
        assert!(cli(&["--ssh-tty", "top"]).ssh_tty);
        assert!(!cli(&["top"]).ssh_tty);
        assert!(Cli::try_parse_from(["gsh", "--ssh-tty", "--local", "top"]).is_err());
    }

    #[test]
    fn test_hooks_comma_and_repeat() {
        let cli = cli(&["--hooks", "summary,failed_hosts", "--hooks", "other", "true"]);
        assert_eq!(cli.hooks, vec!["summary", "failed_hosts", "other"]);
    }

    #[test]
    fn test_parse_file_config() {
        let file = FileConfig::parse(
            "forklimit: 10\nprint_machines: false\ntimeout: 5\nhooks: summary\nssh_options: [ConnectTimeout=3]\n",
        )
        .unwrap();
        assert_eq!(file.forklimit, Some(10));
        assert_eq!(file.print_machines, Some(false));
        assert_eq!(file.concurrent, None);
        assert_eq!(file.timeout, Some(5));
        assert_eq!(file.hooks, vec!["summary"]);
        assert_eq!(file.ssh_options, vec!["ConnectTimeout=3"]);
    }

    #[test]
    fn test_non_mapping_file_is_empty() {
        for contents in ["", "- a\n- b\n", "just a string", "# only a comment\n"] {
            let file = FileConfig::parse(contents).unwrap();
            assert_eq!(file.forklimit, None, "{:?}", contents);
            assert!(file.hooks.is_empty());
        }
    }

    #[test]
    fn test_invalid_file_is_error() {
        assert!(FileConfig::parse("forklimit: [1\n").is_err());
        assert!(FileConfig::parse("forklimit: many\n").is_err());
    }

    #[test]
    fn test_missing_file_is_skipped() {
        assert!(FileConfig::load(Path::new("/nonexistent/gsh.yaml"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_layering() {
        let mut settings = Settings::default();
        settings.apply_file(FileConfig::parse("forklimit: 10\nhooks: [summary]\ntimeout: 9\n").unwrap());
        settings.apply_file(FileConfig::parse("concurrent: false\nhooks: failed_hosts\n").unwrap());
        assert_eq!(settings.forklimit, 10);
        assert!(!settings.concurrent);
        assert_eq!(settings.concurrency_limit(), 1);

        settings.apply_cli(&cli(&["-c", "-t", "0", "--hooks", "summary", "true"]));
        assert!(settings.concurrent);
        assert_eq!(settings.concurrency_limit(), 10);
        assert_eq!(settings.timeout(), None);
        assert_eq!(settings.hooks, vec!["summary", "failed_hosts"]);
    }

    #[test]
    fn test_print_machines_flags() {
        let mut settings = Settings::default();
        settings.apply_cli(&cli(&["-M"]));
        assert!(!settings.print_machines);
        settings.apply_cli(&cli(&["-m"]));
        assert!(settings.print_machines);
        settings.apply_cli(&cli(&[]));
        assert!(settings.print_machines);
    }

    #[test]
    fn test_run_config() {
        let mut settings = Settings::default();
        settings.apply_cli(&cli(&["-s", "-t", "3"]));
        let config = settings.run_config(HostSet::new(), vec!["true".into()], HookSet::new());
        assert_eq!(config.concurrency_limit(), 1);
        assert_eq!(config.timeout(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_explicit_config_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"forklimit: 3\n").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let settings = Settings::load(&cli(&["--config", &path, "-F", "2"])).unwrap();
        assert_eq!(settings.forklimit, 2);

        let missing = Settings::load(&cli(&["--config", "/nonexistent/gsh.yaml"]));
        assert!(matches!(missing, Err(GshError::Config { .. })));
    }
}
