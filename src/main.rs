//! hostwall - firewall rule compiler for hosting servers
//!
//! Compiles rule templates into iptables/ip6tables command sequences and
//! scans logs and login records for addresses to block or allow.

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use hostwall::cli::{Cli, Commands};
use hostwall::commands;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::ERROR
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::MakeRules {
            action,
            output_dir,
            services_file,
        } => commands::make_rules::run(action, &output_dir, &services_file),
        Commands::Render {
            identifier,
            direction,
            address,
            device,
            json,
        } => commands::render::run(
            &identifier,
            direction,
            address.as_deref(),
            device.as_deref(),
            json,
            &cli.config,
        ),
        Commands::Generate { base_dir } => {
            commands::generate::run(base_dir.as_deref(), &cli.config)
        }
        Commands::Scan {
            patterns,
            json,
            logs,
        } => commands::scan::run(patterns.as_deref(), json, &logs, &cli.config),
        Commands::Wtmp {
            file,
            json,
            whitelist,
        } => commands::wtmp::run(file.as_deref(), json, whitelist, &cli.config),
        Commands::Version => {
            println!("hostwall {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
