//! Static registry of the host loaders and hooks available on the command line.
//!
//! Hooks are registered under a capability name in `CapitalizedWords` form and
//! selected by operators through its `lower_snake_case` option name. Both
//! directions of that mapping are computed once, at registration.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use clap::{Arg, ArgAction, ArgMatches};
use tracing::debug;

use crate::error::LoaderError;
use crate::hook::{FailedHosts, Hook, HookSet, Summary};
use crate::host::HostSet;
use crate::loader::{FileLoader, HostListLoader, HostLoader, RangeLoader};

pub type HookFactory = fn() -> Arc<dyn Hook>;

/// `MachinePrinter` -> `machine_printer`.
pub fn option_name(capability: &str) -> String {
    let mut name = String::with_capacity(capability.len() + 4);
    for (i, c) in capability.chars().enumerate() {
        if c.is_uppercase() {
            if i != 0 {
                name.push('_');
            }
            name.extend(c.to_lowercase());
        } else {
            name.push(c);
        }
    }
    name
}

/// `machine_printer` -> `MachinePrinter`.
pub fn capability_name(option: &str) -> String {
    option
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

struct HookEntry {
    capability: &'static str,
    factory: HookFactory,
}

#[derive(Default)]
pub struct HookRegistry {
    by_option: BTreeMap<String, HookEntry>,
    by_capability: HashMap<&'static str, String>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every hook shipped with gsh that can be selected by name.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("Summary", || Arc::new(Summary::new()));
        registry.register("FailedHosts", || Arc::new(FailedHosts::new()));
        registry
    }

    pub fn register(&mut self, capability: &'static str, factory: HookFactory) {
        let option = option_name(capability);
        debug!(capability, option = %option, "Registering hook");
        self.by_capability.insert(capability, option.clone());
        self.by_option.insert(
            option,
            HookEntry {
                capability,
                factory,
            },
        );
    }

    /// Option names of all registered hooks, sorted.
    pub fn option_names(&self) -> impl Iterator<Item = &str> {
        self.by_option.keys().map(String::as_str)
    }

    pub fn option_name_of(&self, capability: &str) -> Option<&str> {
        self.by_capability.get(capability).map(String::as_str)
    }

    pub fn capability_of(&self, option: &str) -> Option<&'static str> {
        self.by_option.get(option).map(|entry| entry.capability)
    }

    /// Instantiates the named hooks into `hooks`, in the given order. Names are
    /// matched after trimming; duplicates are instantiated once. Unknown names
    /// are returned for the caller to report.
    pub fn select<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
        hooks: &mut HookSet,
    ) -> Vec<String> {
        let mut unknown = vec![];
        let mut selected: Vec<&str> = vec![];
        for name in names.into_iter().map(str::trim).filter(|name| !name.is_empty()) {
            match self.by_option.get_key_value(name) {
                Some((option, entry)) => {
                    if !selected.contains(&option.as_str()) {
                        selected.push(option.as_str());
                        hooks.push(entry.capability, (entry.factory)());
                    }
                }
                None => unknown.push(name.to_string()),
            }
        }
        unknown
    }
}

/// The host loaders, each exposed as one repeatable command line option.
pub struct LoaderRegistry {
    loaders: Vec<Box<dyn HostLoader>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self { loaders: vec![] }
    }

    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(HostListLoader));
        registry.register(Box::new(RangeLoader));
        registry.register(Box::new(FileLoader));
        registry
    }

    pub fn register(&mut self, loader: Box<dyn HostLoader>) {
        self.loaders.push(loader);
    }

    pub fn loaders(&self) -> impl Iterator<Item = &dyn HostLoader> {
        self.loaders.iter().map(|loader| loader.as_ref())
    }

    /// Adds one option per loader to `command`.
    pub fn augment_args(&self, mut command: clap::Command) -> clap::Command {
        for loader in &self.loaders {
            let descriptor = loader.descriptor();
            let mut arg = Arg::new(descriptor.name)
                .long(descriptor.long)
                .help(descriptor.help)
                .value_name(descriptor.metavar)
                .action(ArgAction::Append)
                .help_heading("Host loaders");
            if let Some(short) = descriptor.short {
                arg = arg.short(short);
            }
            command = command.arg(arg);
        }
        command
    }

    /// Runs every loader that was given values and unions the results.
    /// The first malformed input aborts loading.
    pub fn load(&self, matches: &ArgMatches) -> Result<HostSet, LoaderError> {
        let mut hosts = HostSet::new();
        for loader in &self.loaders {
            let name = loader.descriptor().name;
            let values: Vec<String> = match matches.try_get_many::<String>(name) {
                Ok(Some(values)) => values.cloned().collect(),
                _ => continue,
            };
            let loaded = loader.load(&values)?;
            debug!(loader = name, hosts = loaded.len(), "Loaded hosts");
            hosts.extend(loaded);
        }
        Ok(hosts)
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::Host;

    #[test]
    fn test_option_name() {
        assert_eq!(option_name("MachinePrinter"), "machine_printer");
        assert_eq!(option_name("Summary"), "summary");
        assert_eq!(option_name("FailedHosts"), "failed_hosts");
    }

    #[test]
    fn test_capability_name() {
        assert_eq!(capability_name("machine_printer"), "MachinePrinter");
        assert_eq!(capability_name("summary"), "Summary");
    }

    #[test]
    fn test_names_round_trip() {
        for capability in ["PlainPrinter", "MachinePrinter", "Summary", "FailedHosts"] {
            assert_eq!(capability_name(&option_name(capability)), capability);
        }
    }

    #[test]
    fn test_registry_table() {
        let registry = HookRegistry::builtin();
        assert_eq!(
            registry.option_names().collect::<Vec<_>>(),
            vec!["failed_hosts", "summary"]
        );
        assert_eq!(registry.option_name_of("FailedHosts"), Some("failed_hosts"));
        assert_eq!(registry.capability_of("failed_hosts"), Some("FailedHosts"));
        assert_eq!(registry.capability_of("FailedHosts"), None);
    }

    #[test]
    fn test_select_keeps_order_and_reports_unknown() {
        let registry = HookRegistry::builtin();
        let mut hooks = HookSet::new();
        let unknown = registry.select(
            ["summary", " nope ", "failed_hosts", "summary", ""],
            &mut hooks,
        );
        assert_eq!(unknown, vec!["nope"]);
        assert_eq!(hooks.names().collect::<Vec<_>>(), vec!["Summary", "FailedHosts"]);
    }

    #[test]
    fn test_select_nothing() {
        let mut hooks = HookSet::new();
        assert!(HookRegistry::builtin().select([], &mut hooks).is_empty());
        assert!(hooks.is_empty());
    }

    fn matches(args: &[&str]) -> ArgMatches {
        LoaderRegistry::builtin()
            .augment_args(clap::Command::new("gsh"))
            .try_get_matches_from(std::iter::once("gsh").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_loaders_union() {
        let matches = matches(&["-H", "a,b", "--hosts", "b", "-r", "b", "-r", "c"]);
        let hosts = LoaderRegistry::builtin().load(&matches).unwrap();
        let expected: HostSet = ["a", "b", "c"].into_iter().map(Host::from).collect();
        assert_eq!(hosts, expected);
    }

    #[test]
    fn test_no_loader_options() {
        let hosts = LoaderRegistry::builtin().load(&matches(&[])).unwrap();
        assert!(hosts.is_empty());
    }

    #[test]
    fn test_malformed_loader_input_fails() {
        let matches = matches(&["-H", "a", "-r", "web[3-1]"]);
        assert!(matches!(
            LoaderRegistry::builtin().load(&matches),
            Err(LoaderError::InvalidRange { .. })
        ));
    }
}
