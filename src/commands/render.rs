//! Render command implementation.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::iprange::IpRange;
use crate::rule::{Direction, Rule};
use crate::validation::{validate_interface, validate_rule_name};

/// Run the render command
pub fn run(
    identifier: &str,
    direction: Direction,
    address: Option<&str>,
    device: Option<&str>,
    json: bool,
    config_path: &Path,
) -> Result<()> {
    validate_rule_name(identifier)?;
    if let Some(device) = device {
        validate_interface(device)?;
    }
    let address = address
        .map(IpRange::parse)
        .transpose()
        .context("Invalid --address")?;

    let config = Config::load_or_default(config_path)?;
    let engine = config.engine(config.load_services()?);

    let mut rule = Rule::new(engine.classify(identifier), direction).with_address(address);
    if let Some(device) = device {
        rule = rule.with_device(device);
    }

    let compiled = engine
        .compile(&rule)
        .with_context(|| format!("Failed to render {} rule {}", direction, identifier))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&compiled)?);
    } else {
        for command in &compiled.commands {
            println!("{}", command);
        }
    }

    Ok(())
}
