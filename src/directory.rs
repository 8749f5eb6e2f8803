//! Rule directories and the complete firewall script.
//!
//! A firewall base directory looks like:
//!
//! ```text
//! /etc/symbiosis/firewall/
//!   whitelist.d/1.2.3.4          address lists, one file per address
//!   blacklist.d/192.0.2.7.auto
//!   incoming.d/10-ssh            NN-<identifier>, one address per line
//!   outgoing.d/50-smtp
//!   local.d/                     extra scripts for run-parts
//! ```

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{FirewallError, Result};
use crate::iprange::IpRange;
use crate::rule::{Direction, Rule, RuleEngine};
use crate::template::{Template, IP6TABLES, IPTABLES};

/// Template used for whitelisted addresses.
pub const WHITELIST_TEMPLATE: &str = "accept";

/// Template used for blacklisted addresses.
pub const BLACKLIST_TEMPLATE: &str = "reject";

const BANNER_WIDTH: usize = 72;

/// Section banner lines.
pub fn banner(title: &str) -> Vec<String> {
    let rule = "#".repeat(BANNER_WIDTH);
    vec![rule.clone(), "#".to_string(), format!("# {}", title), "#".to_string(), rule]
}

/// Comment line recording a rule that could not be rendered.
pub fn ignoring(direction: Direction, name: &str, address: Option<&str>, reason: &str) -> String {
    let to = address.map(|a| format!("to {} ", a)).unwrap_or_default();
    let msg = format!("Ignoring {} rule {} {}because {}", direction, name, to, reason);
    warn!("{}", msg);
    format!("# {}", msg)
}

/// Render one address (or none) through a template, turning failures into
/// an [`ignoring`] line.
fn render_address(
    engine: &RuleEngine,
    template: &Template,
    rule: Rule,
    raw_address: Option<&str>,
) -> Vec<String> {
    let name = rule.identifier.name();
    let direction = rule.direction;

    let rule = match raw_address.map(IpRange::parse).transpose() {
        Ok(address) => rule.with_address(address),
        Err(e) => return vec![ignoring(direction, &name, raw_address, &e.to_string())],
    };
    engine.compile_with(&rule, template).commands
}

/// An `incoming.d` / `outgoing.d` directory of `NN-<identifier>` entries.
#[derive(Debug, Clone)]
pub struct RuleDirectory {
    path: PathBuf,
    direction: Direction,
    chain: Option<String>,
    default_template: String,
}

impl RuleDirectory {
    pub fn new(path: impl Into<PathBuf>, direction: Direction) -> Self {
        Self {
            path: path.into(),
            direction,
            chain: None,
            default_template: WHITELIST_TEMPLATE.to_string(),
        }
    }

    pub fn with_chain(mut self, chain: impl Into<String>) -> Self {
        self.chain = Some(chain.into());
        self
    }

    pub fn with_default_template(mut self, name: impl Into<String>) -> Self {
        self.default_template = name.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `(identifier, addresses)` in entry name order. An entry with no
    /// addresses yields a single `None`.
    pub fn entries(&self) -> Result<Vec<(String, Vec<Option<String>>)>> {
        let mut names = list_names(&self.path)?;
        names.sort();

        let mut entries = Vec::new();
        for file_name in names {
            let Some(identifier) = entry_identifier(&file_name) else {
                debug!("Ignoring {} in {}", file_name, self.path.display());
                continue;
            };

            let file = self.path.join(&file_name);
            let content =
                std::fs::read_to_string(&file).map_err(|e| FirewallError::io(&file, e))?;
            let mut addresses: Vec<Option<String>> = content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(|l| Some(l.to_string()))
                .collect();
            if addresses.is_empty() {
                addresses.push(None);
            }
            entries.push((identifier.to_string(), addresses));
        }
        Ok(entries)
    }

    /// Command lines for every entry. Rules that fail are recorded as
    /// comments and do not stop the rest.
    pub fn render(&self, engine: &RuleEngine) -> Result<Vec<String>> {
        let mut lines = Vec::new();

        for (name, addresses) in self.entries()? {
            let identifier = engine.classify(&name);
            let mut candidates = vec![format!("{}.{}", name, self.direction)];
            // Falling back with neither ports nor an address would accept everything.
            if !engine.ports_for(&identifier).is_empty() || addresses.iter().any(Option::is_some) {
                candidates.push(format!("{}.{}", self.default_template, self.direction));
            }
            let template = match engine.find(&candidates).and_then(Template::load) {
                Ok(template) => template,
                Err(e) => {
                    for address in &addresses {
                        lines.push(ignoring(self.direction, &name, address.as_deref(), &e.to_string()));
                    }
                    continue;
                }
            };

            for address in &addresses {
                let mut rule = Rule::new(identifier.clone(), self.direction);
                if let Some(chain) = &self.chain {
                    rule = rule.with_chain(chain.clone());
                }
                lines.extend(render_address(engine, &template, rule, address.as_deref()));
            }
        }
        Ok(lines)
    }
}

/// `NN-<identifier>` with an optional numeric prefix.
fn entry_identifier(file_name: &str) -> Option<&str> {
    let (prefix, identifier) = file_name.split_once('-')?;
    if !prefix.bytes().all(|b| b.is_ascii_digit()) || identifier.is_empty() {
        return None;
    }
    Some(identifier)
}

/// A `whitelist.d` / `blacklist.d` directory: every file name is an address.
#[derive(Debug, Clone)]
pub struct IpListDirectory {
    path: PathBuf,
    template: String,
}

impl IpListDirectory {
    pub fn new(path: impl Into<PathBuf>, template: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            template: template.into(),
        }
    }

    pub fn whitelist(path: impl Into<PathBuf>) -> Self {
        Self::new(path, WHITELIST_TEMPLATE)
    }

    pub fn blacklist(path: impl Into<PathBuf>) -> Self {
        Self::new(path, BLACKLIST_TEMPLATE)
    }

    /// Addresses named by the directory, sorted. Dotfiles are skipped and a
    /// trailing `.auto` is stripped.
    pub fn addresses(&self) -> Result<Vec<String>> {
        let mut addresses: Vec<String> = list_names(&self.path)?
            .into_iter()
            .filter(|name| !name.starts_with('.'))
            .map(|name| name.strip_suffix(".auto").map(str::to_string).unwrap_or(name))
            .collect();
        addresses.sort();
        addresses.dedup();
        Ok(addresses)
    }

    /// Incoming rules for every address.
    pub fn render(&self, engine: &RuleEngine) -> Result<Vec<String>> {
        let direction = Direction::Incoming;
        let addresses = self.addresses()?;
        let candidates = vec![format!("{}.{}", self.template, direction)];

        let template = match engine.find(&candidates).and_then(Template::load) {
            Ok(template) => template,
            Err(e) => {
                return Ok(addresses
                    .iter()
                    .map(|a| ignoring(direction, &self.template, Some(a.as_str()), &e.to_string()))
                    .collect())
            }
        };

        let mut lines = Vec::new();
        for address in &addresses {
            let rule = Rule::new(engine.classify(&self.template), direction);
            lines.extend(render_address(engine, &template, rule, Some(address.as_str())));
        }
        Ok(lines)
    }
}

fn list_names(dir: &Path) -> Result<Vec<String>> {
    Ok(std::fs::read_dir(dir)
        .map_err(|e| FirewallError::io(dir, e))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect())
}

/// The complete firewall for a base directory.
pub struct Firewall<'a> {
    base_dir: PathBuf,
    engine: &'a RuleEngine,
}

impl<'a> Firewall<'a> {
    pub fn new(base_dir: impl Into<PathBuf>, engine: &'a RuleEngine) -> Self {
        Self {
            base_dir: base_dir.into(),
            engine,
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Shell script that resets the packet filter and applies every rule.
    pub fn script(&self) -> Result<String> {
        let mut lines = header();
        lines.extend(flush());
        lines.extend(permit_lo());

        for (name, list) in [
            ("whitelist", IpListDirectory::whitelist(self.base_dir.join("whitelist.d"))),
            ("blacklist", IpListDirectory::blacklist(self.base_dir.join("blacklist.d"))),
        ] {
            if !list.path.is_dir() {
                continue;
            }
            lines.extend(banner(&format!("{} from {}", name, list.path.display())));
            lines.extend(list.render(self.engine)?);
        }

        for direction in Direction::ALL {
            let dir = RuleDirectory::new(self.base_dir.join(format!("{}.d", direction)), direction);
            if !dir.path().is_dir() {
                continue;
            }
            lines.extend(banner(&format!("{} rules from {}", direction, dir.path().display())));
            lines.extend(dir.render(self.engine)?);
        }

        let local = self.base_dir.join("local.d");
        if local.is_dir() {
            lines.extend(banner(&format!("Run rules from {} using run-parts", local.display())));
            lines.push(format!("run-parts {}", local.display()));
        }

        let mut script = lines.join("\n");
        script.push('\n');
        Ok(script)
    }
}

fn header() -> Vec<String> {
    vec!["#!/bin/bash".to_string(), "set -e".to_string()]
}

fn flush() -> Vec<String> {
    let mut lines = Vec::new();
    for binary in [IPTABLES, IP6TABLES] {
        for chain in ["INPUT", "OUTPUT", "FORWARD"] {
            lines.push(format!("{} -P {} ACCEPT", binary, chain));
        }
        lines.push(format!("{} -F", binary));
    }
    lines
}

fn permit_lo() -> Vec<String> {
    let mut lines = Vec::new();
    for binary in [IPTABLES, IP6TABLES] {
        lines.push(format!("{} -I INPUT -i lo -j ACCEPT", binary));
        lines.push(format!("{} -I OUTPUT -o lo -j ACCEPT", binary));
    }
    lines
}
