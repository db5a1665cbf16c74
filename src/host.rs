//! Remote hosts.
//!
//! A `Host` is an opaque name handed to the transport. Hosts are always kept in a
//! `HostSet`, so duplicates discovered by different loaders collapse and the
//! dispatch order is stable (lexicographic).

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use colored::{ColoredString, Colorize};
use colourado::Color;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Host(Arc<str>);

pub type HostSet = BTreeSet<Host>;

impl Host {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// For pretty-printing the host name.
    /// Pads to `width` and colors it with the given palette color.
    pub fn prettify(&self, color: &Color, width: usize) -> ColoredString {
        let r = (color.red * 255.0) as u8;
        let g = (color.green * 255.0) as u8;
        let b = (color.blue * 255.0) as u8;
        format!("{:<width$}", self.name(), width = width).truecolor(r, g, b)
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Host {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Host {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_collapse() {
        let hosts: HostSet = ["b", "a", "b", "c", "a"].into_iter().map(Host::from).collect();
        let names: Vec<_> = hosts.iter().map(Host::name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_prettify_pads_name() {
        colored::control::set_override(false);
        let palette = colourado::ColorPalette::new(1, colourado::PaletteType::Pastel, false);
        let pretty = Host::from("web1").prettify(&palette.colors[0], 8);
        assert_eq!(pretty.to_string(), "web1    ");
    }
}
