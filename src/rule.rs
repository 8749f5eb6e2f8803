//! Rule identifiers, template lookup and rule compilation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::debug;

use crate::error::{FirewallError, Result};
use crate::iprange::IpRange;
use crate::ports::{PortSpec, PortsRegistry, Protocol};
use crate::template::{RenderContext, Template};

/// Default template for service rules with no template of their own.
pub const DEFAULT_GENERIC_TEMPLATE: &str = "accept";

/// Traffic direction of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Incoming,
    Outgoing,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Incoming, Direction::Outgoing];

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Incoming => "incoming",
            Direction::Outgoing => "outgoing",
        }
    }

    /// Built-in chain the direction maps to.
    pub fn default_chain(self) -> &'static str {
        match self {
            Direction::Incoming => "INPUT",
            Direction::Outgoing => "OUTPUT",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = FirewallError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "incoming" => Ok(Direction::Incoming),
            "outgoing" => Ok(Direction::Outgoing),
            _ => Err(FirewallError::BadDirection(s.to_string())),
        }
    }
}

/// What a rule name refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RuleIdentifier {
    NumericPort(u16),
    ServiceName(String),
    CustomName(String),
}

impl RuleIdentifier {
    /// Name used in template file names.
    pub fn name(&self) -> String {
        match self {
            RuleIdentifier::NumericPort(port) => port.to_string(),
            RuleIdentifier::ServiceName(name) | RuleIdentifier::CustomName(name) => name.clone(),
        }
    }
}

impl fmt::Display for RuleIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// A rule to be compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub identifier: RuleIdentifier,
    pub direction: Direction,
    pub address: Option<IpRange>,
    /// Overrides the direction's built-in chain.
    pub chain: Option<String>,
    /// Overrides the engine's device.
    pub device: Option<String>,
    /// Overrides the identifier's own ports.
    pub ports: Option<Vec<PortSpec>>,
}

impl Rule {
    pub fn new(identifier: RuleIdentifier, direction: Direction) -> Self {
        Self {
            identifier,
            direction,
            address: None,
            chain: None,
            device: None,
            ports: None,
        }
    }

    pub fn with_address(mut self, address: Option<IpRange>) -> Self {
        self.address = address;
        self
    }

    pub fn with_chain(mut self, chain: impl Into<String>) -> Self {
        self.chain = Some(chain.into());
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn with_ports(mut self, ports: Vec<PortSpec>) -> Self {
        self.ports = Some(ports);
        self
    }

    pub fn chain(&self) -> &str {
        self.chain
            .as_deref()
            .unwrap_or_else(|| self.direction.default_chain())
    }
}

/// Output of compiling a [`Rule`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledRule {
    pub identifier: RuleIdentifier,
    pub direction: Direction,
    pub address: Option<IpRange>,
    pub template: PathBuf,
    pub commands: Vec<String>,
}

/// Turns rules into command lines using templates from a search path.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    template_dirs: Vec<PathBuf>,
    services: PortsRegistry,
    generic_template: String,
    device: Option<String>,
}

impl RuleEngine {
    /// `template_dirs` are searched in order; the first match wins.
    pub fn new(template_dirs: Vec<PathBuf>, services: PortsRegistry) -> Self {
        Self {
            template_dirs,
            services,
            generic_template: DEFAULT_GENERIC_TEMPLATE.to_string(),
            device: None,
        }
    }

    pub fn with_generic_template(mut self, name: impl Into<String>) -> Self {
        self.generic_template = name.into();
        self
    }

    /// Device applied to every rule without its own.
    pub fn with_device(mut self, device: Option<String>) -> Self {
        self.device = device;
        self
    }

    pub fn services(&self) -> &PortsRegistry {
        &self.services
    }

    pub fn template_dirs(&self) -> &[PathBuf] {
        &self.template_dirs
    }

    pub fn generic_template(&self) -> &str {
        &self.generic_template
    }

    /// Classify a raw rule name.
    ///
    /// Digits that do not fit a port number are treated as a custom name.
    pub fn classify(&self, raw: &str) -> RuleIdentifier {
        let raw = raw.trim();
        if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(port) = raw.parse::<u16>() {
                return RuleIdentifier::NumericPort(port);
            }
        } else if let Some(service) = self.services.lookup(raw) {
            return RuleIdentifier::ServiceName(service.name.clone());
        }
        RuleIdentifier::CustomName(raw.to_string())
    }

    /// Template file names to try for an identifier, most specific first.
    pub fn candidates(&self, identifier: &RuleIdentifier, direction: Direction) -> Vec<String> {
        let own = format!("{}.{}", identifier.name(), direction);
        match identifier {
            RuleIdentifier::ServiceName(_) => {
                vec![own, format!("{}.{}", self.generic_template, direction)]
            }
            RuleIdentifier::NumericPort(_) | RuleIdentifier::CustomName(_) => vec![own],
        }
    }

    /// First existing file for any of `candidates`, in candidate order,
    /// across the search path.
    pub fn find(&self, candidates: &[String]) -> Result<PathBuf> {
        for name in candidates {
            if let Some(path) = self.find_one(name) {
                return Ok(path);
            }
        }
        Err(FirewallError::TemplateNotFound(candidates.to_vec()))
    }

    fn find_one(&self, name: &str) -> Option<PathBuf> {
        if !is_plain_name(name) {
            debug!("Refusing template name {:?}", name);
            return None;
        }
        self.template_dirs
            .iter()
            .map(|dir| dir.join(name))
            .find(|path| path.is_file())
    }

    /// Locate the template for an identifier.
    pub fn locate(&self, identifier: &RuleIdentifier, direction: Direction) -> Result<PathBuf> {
        self.find(&self.candidates(identifier, direction))
    }

    /// (port, protocol) pairs an identifier expands to.
    pub fn ports_for(&self, identifier: &RuleIdentifier) -> Vec<PortSpec> {
        match identifier {
            RuleIdentifier::NumericPort(port) => Protocol::ALL
                .iter()
                .map(|protocol| PortSpec::new(*port, *protocol))
                .collect(),
            RuleIdentifier::ServiceName(name) => self
                .services
                .lookup(name)
                .map(|s| s.ports.clone())
                .unwrap_or_default(),
            RuleIdentifier::CustomName(_) => Vec::new(),
        }
    }

    /// Locate, load and render the template for a rule.
    pub fn compile(&self, rule: &Rule) -> Result<CompiledRule> {
        let path = self.locate(&rule.identifier, rule.direction)?;
        let template = Template::load(&path)?;
        Ok(self.compile_with(rule, &template))
    }

    /// Render a rule through an already loaded template.
    pub fn compile_with(&self, rule: &Rule, template: &Template) -> CompiledRule {
        let name = rule.identifier.name();
        let ports = match &rule.ports {
            Some(ports) => ports.clone(),
            None => self.ports_for(&rule.identifier),
        };
        let device = rule.device.as_deref().or(self.device.as_deref());

        debug!(
            "Compiling {} {} rule via {}",
            rule.direction,
            name,
            template.path.display()
        );

        let ctx = RenderContext {
            name: &name,
            direction: rule.direction,
            chain: rule.chain(),
            address: rule.address.as_ref(),
            device,
            ports: &ports,
        };

        CompiledRule {
            identifier: rule.identifier.clone(),
            direction: rule.direction,
            address: rule.address,
            template: template.path.clone(),
            commands: template.render(&ctx),
        }
    }

    /// Classify `raw` and compile it in one step.
    pub fn compile_named(
        &self,
        raw: &str,
        direction: Direction,
        address: Option<IpRange>,
    ) -> Result<CompiledRule> {
        let rule = Rule::new(self.classify(raw), direction).with_address(address);
        self.compile(&rule)
    }
}

/// Template names must stay a single file inside a template directory.
fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && !name.starts_with('.') && !name.contains(|c: char| c == '/' || c == '\0')
}
