//! Configuration management for hostwall.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::blacklist::Blacklist;
use crate::ports::{PortsRegistry, DEFAULT_SERVICES_FILE};
use crate::rule::{RuleEngine, DEFAULT_GENERIC_TEMPLATE};
use crate::utmp::DEFAULT_WTMP_FILE;
use crate::validation::{validate_interface, validate_rule_name, validate_template_dir};

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/hostwall/config.yaml";

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Template directories, searched in order
    pub template_dirs: Vec<PathBuf>,

    /// Template for services without one of their own
    pub generic_template: String,

    /// Services file mapping names to ports
    pub services_file: PathBuf,

    /// Firewall base directory (incoming.d, outgoing.d, whitelist.d, ...)
    pub base_dir: PathBuf,

    /// Pattern file or directory of *.patterns files
    pub patterns_dir: PathBuf,

    /// Login history for the whitelist
    pub wtmp_file: PathBuf,

    /// Restrict rules to one network interface
    pub device: Option<String>,

    /// Blacklist thresholds
    pub blacklist: BlacklistConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            template_dirs: vec![
                PathBuf::from("/etc/symbiosis/firewall/rule.d"),
                PathBuf::from("/usr/share/symbiosis/firewall/rule.d"),
            ],
            generic_template: DEFAULT_GENERIC_TEMPLATE.to_string(),
            services_file: PathBuf::from(DEFAULT_SERVICES_FILE),
            base_dir: PathBuf::from("/etc/symbiosis/firewall"),
            patterns_dir: PathBuf::from("/etc/symbiosis/firewall/patterns.d"),
            wtmp_file: PathBuf::from(DEFAULT_WTMP_FILE),
            device: None,
            blacklist: BlacklistConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;

        config.validate()?;

        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.template_dirs.is_empty() {
            anyhow::bail!("template_dirs cannot be empty");
        }
        for dir in &self.template_dirs {
            validate_template_dir(dir)?;
        }

        validate_rule_name(&self.generic_template)
            .with_context(|| "Invalid generic_template")?;
        validate_rule_name(&self.blacklist.template)
            .with_context(|| "Invalid blacklist.template")?;

        if let Some(device) = &self.device {
            validate_interface(device)?;
        }

        if self.blacklist.block_after == 0 {
            anyhow::bail!("blacklist.block_after must be at least 1");
        }
        if self.blacklist.block_all_after < self.blacklist.block_after {
            anyhow::bail!(
                "blacklist.block_all_after ({}) must not be below block_after ({})",
                self.blacklist.block_all_after,
                self.blacklist.block_after
            );
        }

        Ok(())
    }

    /// Save configuration to YAML file atomically
    ///
    /// Uses tempfile + rename pattern to prevent corruption on crash.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let path = path.as_ref();
        let content = serde_yaml::to_string(self).with_context(|| "Failed to serialize config")?;

        // Temporary file in the same directory so the rename is atomic
        let parent_dir = path.parent().unwrap_or(Path::new("/etc/hostwall"));
        let mut temp_file = NamedTempFile::new_in(parent_dir)
            .context("Failed to create temporary file for config")?;

        temp_file.write_all(content.as_bytes())?;
        temp_file.as_file().sync_all()?;

        temp_file
            .persist(path)
            .with_context(|| format!("Failed to persist config file: {:?}", path))?;

        Ok(())
    }

    /// Read the services file named by the configuration.
    pub fn load_services(&self) -> Result<PortsRegistry> {
        PortsRegistry::load(&self.services_file)
            .with_context(|| format!("Failed to load services from {:?}", self.services_file))
    }

    /// Rule engine over the configured template path and services.
    pub fn engine(&self, services: PortsRegistry) -> RuleEngine {
        RuleEngine::new(self.template_dirs.clone(), services)
            .with_generic_template(self.generic_template.clone())
            .with_device(self.device.clone())
    }
}

/// Blacklist thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlacklistConfig {
    /// Hits on one port before that port is blocked
    pub block_after: u64,

    /// Total hits before every port is blocked
    pub block_all_after: u64,

    /// Template used to render blocks
    pub template: String,
}

impl Default for BlacklistConfig {
    fn default() -> Self {
        let defaults = Blacklist::default();
        Self {
            block_after: defaults.block_after,
            block_all_after: defaults.block_all_after,
            template: defaults.template,
        }
    }
}

impl From<&BlacklistConfig> for Blacklist {
    fn from(config: &BlacklistConfig) -> Self {
        Blacklist::new(config.block_after, config.block_all_after).with_template(config.template.clone())
    }
}
