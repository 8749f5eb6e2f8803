//! Scan command implementation.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::blacklist::{count_hits, Blacklist};
use crate::config::Config;
use crate::pattern::PatternMatcher;

/// Run the scan command
pub fn run(patterns: Option<&Path>, json: bool, logs: &[PathBuf], config_path: &Path) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let patterns = patterns.unwrap_or(&config.patterns_dir);

    let matcher = PatternMatcher::load(patterns)
        .with_context(|| format!("Failed to load patterns from {:?}", patterns))?;
    if matcher.is_empty() {
        info!("No patterns loaded from {}", patterns.display());
    }

    let counter = count_hits(&matcher, logs)?;
    let blacklist = Blacklist::from(&config.blacklist);
    let blocks = blacklist.decide(&counter);

    if json {
        println!("{}", serde_json::to_string_pretty(&blocks)?);
        return Ok(());
    }

    let engine = config.engine(config.load_services()?);
    for line in blacklist.render(&engine, &blocks) {
        println!("{}", line);
    }
    Ok(())
}
