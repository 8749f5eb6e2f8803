//! Service name to port/protocol registry.
//!
//! The registry is read from an `/etc/services`-style file. The parser is
//! deliberately permissive: the file is shared infrastructure config and
//! carries comments, SCTP/DDP entries and other lines we do not care about.
//! Anything that is not `name<ws>port/tcp|udp [aliases...]` is skipped.

use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::error::{FirewallError, Result};

/// Default services file on Debian systems.
pub const DEFAULT_SERVICES_FILE: &str = "/etc/services";

/// Transport protocol of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    /// Both transport protocols, in rendering order.
    pub const ALL: [Protocol; 2] = [Protocol::Tcp, Protocol::Udp];

    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(format!("Unknown protocol: {}", other)),
        }
    }
}

/// A single (port, protocol) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PortSpec {
    pub port: u16,
    pub protocol: Protocol,
}

impl PortSpec {
    pub fn new(port: u16, protocol: Protocol) -> Self {
        Self { port, protocol }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol)
    }
}

/// A named group of port/protocol pairs, in the order they were first seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Service {
    pub name: String,
    pub ports: Vec<PortSpec>,
}

impl Service {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ports: Vec::new(),
        }
    }

    /// Add a pair unless it is already present.
    fn add(&mut self, spec: PortSpec) -> bool {
        if self.ports.contains(&spec) {
            return false;
        }
        self.ports.push(spec);
        true
    }

    /// Distinct port numbers, in first-seen order.
    pub fn port_numbers(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = Vec::new();
        for spec in &self.ports {
            if !ports.contains(&spec.port) {
                ports.push(spec.port);
            }
        }
        ports
    }
}

/// Mapping from service name to [`Service`].
///
/// Owned by whoever built it. There is no global instance: reload by
/// building a new registry, or call [`PortsRegistry::reset`] first.
#[derive(Debug, Clone, Default)]
pub struct PortsRegistry {
    services: BTreeMap<String, Service>,
}

impl PortsRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a services file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|e| FirewallError::io(path, e))?;
        let mut registry = Self::new();
        let skipped = registry.parse_str(&content);
        debug!(
            "Loaded {} services from {} ({} lines skipped)",
            registry.len(),
            path.display(),
            skipped
        );
        Ok(registry)
    }

    /// Parse services-file text into this registry, returning how many
    /// non-comment lines were skipped.
    pub fn parse_str(&mut self, content: &str) -> usize {
        let entry = service_line_regex();
        let mut skipped = 0;

        for (idx, raw) in content.lines().enumerate() {
            // Everything after '#' is a comment.
            let line = raw.split('#').next().unwrap_or("").trim_end();
            if line.trim().is_empty() {
                continue;
            }

            let Some(caps) = entry.captures(line) else {
                warn!("Skipping services line {}: {:?}", idx + 1, raw);
                skipped += 1;
                continue;
            };

            let port = match caps[2].parse::<u16>() {
                Ok(port) => port,
                Err(_) => {
                    warn!("Skipping services line {}: port {} out of range", idx + 1, &caps[2]);
                    skipped += 1;
                    continue;
                }
            };
            let protocol = match caps[3].parse::<Protocol>() {
                Ok(protocol) => protocol,
                Err(_) => {
                    skipped += 1;
                    continue;
                }
            };
            let spec = PortSpec::new(port, protocol);

            self.insert(&caps[1], spec);
            if let Some(aliases) = caps.get(4) {
                for alias in aliases.as_str().split_whitespace() {
                    self.insert(alias, spec);
                }
            }
        }

        skipped
    }

    /// Add a port/protocol pair to a service, creating it if needed.
    /// Names are case-insensitive.
    pub fn insert(&mut self, name: &str, spec: PortSpec) {
        let key = name.to_ascii_lowercase();
        let service = self
            .services
            .entry(key.clone())
            .or_insert_with(|| Service::new(&key));
        if !service.add(spec) {
            debug!("Duplicate services entry {} {}", key, spec);
        }
    }

    /// Find a service by name.
    pub fn lookup(&self, name: &str) -> Option<&Service> {
        self.services.get(&name.to_ascii_lowercase())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Discard everything loaded so far.
    pub fn reset(&mut self) {
        self.services.clear();
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Services sorted by name.
    pub fn services(&self) -> impl Iterator<Item = &Service> {
        self.services.values()
    }
}

fn service_line_regex() -> Regex {
    // service names are alphanumeric plus '-' and '_'
    Regex::new(r"^([\w-]+)\s+(\d+)/(tcp|udp)\b\s*([\w\s-]*)$").expect("services regex is valid")
}
