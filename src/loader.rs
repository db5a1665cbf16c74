//! Host loaders turn command line option values into hosts.
//!
//! Every loader is pure with respect to the run: it may read files, but it
//! either returns the complete host set for its values or an error.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use handlebars::Handlebars;
use itertools::sorted;
use serde::{Deserialize, Deserializer};
use void::Void;

use crate::error::LoaderError;
use crate::host::{Host, HostSet};
use crate::serde::{string_or_mapping, string_or_seq};

/// How a loader shows up on the command line.
#[derive(Debug, Clone, Copy)]
pub struct LoaderDescriptor {
    pub name: &'static str,
    pub short: Option<char>,
    pub long: &'static str,
    pub help: &'static str,
    pub metavar: &'static str,
}

pub trait HostLoader: Send + Sync {
    fn descriptor(&self) -> LoaderDescriptor;

    /// Loads hosts from all values given for this loader's option.
    fn load(&self, values: &[String]) -> Result<HostSet, LoaderError>;
}

fn checked_host(loader: &'static str, name: &str) -> Result<Host, LoaderError> {
    let name = name.trim();
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        return Err(LoaderError::InvalidHost {
            loader,
            value: name.to_string(),
        });
    }
    Ok(Host::new(name))
}

/// `-H web1,web2`
#[derive(Debug, Clone, Copy, Default)]
pub struct HostListLoader;

impl HostLoader for HostListLoader {
    fn descriptor(&self) -> LoaderDescriptor {
        LoaderDescriptor {
            name: "hosts",
            short: Some('H'),
            long: "hosts",
            help: "Comma-separated list of hosts",
            metavar: "HOSTS",
        }
    }

    fn load(&self, values: &[String]) -> Result<HostSet, LoaderError> {
        values
            .iter()
            .flat_map(|value| value.split(','))
            .map(|name| checked_host("hosts", name))
            .collect()
    }
}

/// `-r web[01-03,7].example.com`
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeLoader;

impl HostLoader for RangeLoader {
    fn descriptor(&self) -> LoaderDescriptor {
        LoaderDescriptor {
            name: "range",
            short: Some('r'),
            long: "range",
            help: "Host range expression, e.g. web[01-03,7].dc[1-2]",
            metavar: "EXPR",
        }
    }

    fn load(&self, values: &[String]) -> Result<HostSet, LoaderError> {
        let mut hosts = HostSet::new();
        for expr in values {
            for name in expand_range(expr)? {
                hosts.insert(checked_host("range", &name)?);
            }
        }
        Ok(hosts)
    }
}

const BRACKETS: &[char] = &['[', ']'];

/// Most hosts a single range expression may expand to.
pub const MAX_RANGE_HOSTS: usize = 100_000;

/// Expands every `[...]` group of `expr` and returns the cartesian product.
///
/// A group holds comma-separated items, each a number or an inclusive `lo-hi`
/// range. Numbers keep the width of the range's lower bound, so `[08-10]`
/// yields `08`, `09`, `10`.
pub fn expand_range(expr: &str) -> Result<Vec<String>, LoaderError> {
    let invalid = |reason: &str| LoaderError::InvalidRange {
        expr: expr.to_string(),
        reason: reason.to_string(),
    };

    let mut expanded = vec![String::new()];
    let mut rest = expr;
    while !rest.is_empty() {
        let Some(open) = rest.find(BRACKETS) else {
            for name in expanded.iter_mut() {
                name.push_str(rest);
            }
            break;
        };
        if rest.as_bytes()[open] == b']' {
            return Err(invalid("unmatched ']'"));
        }
        let close = rest[open + 1..]
            .find(BRACKETS)
            .map(|i| open + 1 + i)
            .filter(|&i| rest.as_bytes()[i] == b']')
            .ok_or_else(|| invalid("unclosed '['"))?;

        let literal = &rest[..open];
        let items = expand_group(&rest[open + 1..close]).map_err(|reason| invalid(&reason))?;
        if expanded.len().saturating_mul(items.len()) > MAX_RANGE_HOSTS {
            return Err(invalid(&format!("expands to more than {} hosts", MAX_RANGE_HOSTS)));
        }
        let mut next = Vec::with_capacity(expanded.len() * items.len());
        for prefix in &expanded {
            for item in &items {
                next.push(format!("{}{}{}", prefix, literal, item));
            }
        }
        expanded = next;
        rest = &rest[close + 1..];
    }
    Ok(expanded)
}

fn expand_group(group: &str) -> Result<Vec<String>, String> {
    if group.trim().is_empty() {
        return Err("empty brackets".to_string());
    }
    let mut items = vec![];
    for item in group.split(',') {
        let item = item.trim();
        let (lo, hi) = match item.split_once('-') {
            Some((lo, hi)) => (lo.trim(), hi.trim()),
            None => (item, item),
        };
        let width = lo.len();
        let parse = |s: &str| {
            if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
                return Err(format!("'{}' is not a number", s));
            }
            s.parse::<u64>()
                .map_err(|_| format!("'{}' is out of range", s))
        };
        let (start, end) = (parse(lo)?, parse(hi)?);
        if start > end {
            return Err(format!("range '{}' is reversed", item));
        }
        if end - start >= (MAX_RANGE_HOSTS - items.len()) as u64 {
            return Err(format!("expands to more than {} hosts", MAX_RANGE_HOSTS));
        }
        items.extend((start..=end).map(|n| format!("{:0width$}", n, width = width)));
    }
    Ok(items)
}

/// `-f hosts.yaml`
///
/// The file is a YAML list. Entries are either a bare host name or a mapping
/// with a `hostname` key and parameters that are filled into the hostname
/// template; list values expand to the cartesian product:
///
/// ```yaml
/// - db.example.com
/// - hostname: "node{{id}}.{{dc}}"
///   id: [1, 2]
///   dc: east
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLoader;

impl HostLoader for FileLoader {
    fn descriptor(&self) -> LoaderDescriptor {
        LoaderDescriptor {
            name: "file",
            short: Some('f'),
            long: "file",
            help: "YAML file listing hosts",
            metavar: "PATH",
        }
    }

    fn load(&self, values: &[String]) -> Result<HostSet, LoaderError> {
        let mut hosts = HostSet::new();
        for path in values {
            hosts.extend(load_hosts_file(Path::new(path))?);
        }
        Ok(hosts)
    }
}

#[derive(Debug, Deserialize)]
struct HostSpec(#[serde(deserialize_with = "string_or_mapping")] HostSpecInner);

#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct HostSpecInner(HashMap<String, ParamValues>);

#[derive(Debug)]
struct ParamValues(Vec<String>);

impl<'de> Deserialize<'de> for ParamValues {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        string_or_seq(deserializer).map(ParamValues)
    }
}

impl FromStr for HostSpecInner {
    type Err = Void;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut map = HashMap::new();
        map.insert("hostname".to_string(), ParamValues(vec![s.to_string()]));
        Ok(Self(map))
    }
}

pub fn load_hosts_file(path: &Path) -> Result<HostSet, LoaderError> {
    let error = |reason: String| LoaderError::HostFile {
        path: PathBuf::from(path),
        reason,
    };

    // Read and parse the host file to a vector of HostSpec objects.
    let contents =
        fs::read_to_string(path).map_err(|e| error(format!("Failed to open: {}", e)))?;
    if contents.trim().is_empty() {
        return Ok(HostSet::new());
    }
    let specs: Option<Vec<HostSpec>> =
        serde_yaml::from_str(&contents).map_err(|e| error(format!("Failed to parse: {}", e)))?;

    let mut registry = Handlebars::new();
    registry.set_strict_mode(true);
    handlebars_misc_helpers::register(&mut registry);

    let mut hosts = HostSet::new();
    let specs = specs.unwrap_or_default();
    for (index, HostSpec(HostSpecInner(mut spec))) in specs.into_iter().enumerate() {
        let templates = spec
            .remove("hostname")
            .ok_or_else(|| error(format!("Entry {} is missing the 'hostname' key", index)))?;

        // Cartesian product over all parameter values.
        let mut expanded: Vec<HashMap<String, String>> = vec![HashMap::new()];
        for key in sorted(spec.keys()) {
            let ParamValues(values) = &spec[key];
            let mut next = Vec::with_capacity(expanded.len() * values.len());
            for params in &expanded {
                for value in values {
                    let mut params = params.clone();
                    params.insert(key.clone(), value.clone());
                    next.push(params);
                }
            }
            expanded = next;
        }

        // Fill in parameters with Handlebars.
        for template in &templates.0 {
            for params in &expanded {
                let name = registry
                    .render_template(template, params)
                    .map_err(|e| error(format!("Failed to render '{}': {}", template, e)))?;
                hosts.insert(checked_host("file", &name)?);
            }
        }
    }
    Ok(hosts)
}
