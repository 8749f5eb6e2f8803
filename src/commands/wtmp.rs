//! Wtmp command implementation.

use anyhow::{Context, Result};
use std::path::Path;

use crate::blacklist::{render_whitelist, whitelist_from_wtmp};
use crate::config::Config;
use crate::utmp::{self, UtmpRecord};

/// Run the wtmp command
pub fn run(file: Option<&Path>, json: bool, whitelist: bool, config_path: &Path) -> Result<()> {
    let config = Config::load_or_default(config_path)?;
    let file = file.unwrap_or(&config.wtmp_file);

    let records = utmp::read(file).with_context(|| format!("Failed to read {:?}", file))?;

    if whitelist {
        let engine = config.engine(config.load_services()?);
        for line in render_whitelist(&engine, &whitelist_from_wtmp(&records)) {
            println!("{}", line);
        }
    } else if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
    } else {
        for record in &records {
            println!("{}", format_record(record));
        }
    }

    Ok(())
}

fn format_record(record: &UtmpRecord) -> String {
    let ip = record.ip.map(|ip| ip.to_string()).unwrap_or_else(|| "-".to_string());
    format!(
        "{:<12} {:<8} {} {} {}",
        record.user,
        record.line,
        record.time.format("%Y-%m-%d %H:%M:%S%.6f"),
        if record.host.is_empty() { "-" } else { record.host.as_str() },
        ip
    )
}
