//! Generate command implementation.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::directory::Firewall;

/// Run the generate command
pub fn run(base_dir: Option<&Path>, config_path: &Path) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let base_dir = base_dir.unwrap_or(&config.base_dir);
    if !base_dir.is_dir() {
        anyhow::bail!("Firewall directory not found: {}", base_dir.display());
    }

    let engine = config.engine(config.load_services()?);
    let script = Firewall::new(base_dir, &engine)
        .script()
        .with_context(|| format!("Failed to generate firewall from {:?}", base_dir))?;

    print!("{}", script);
    Ok(())
}
