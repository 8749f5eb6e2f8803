//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::compiler::{Action, DEFAULT_OUTPUT_DIR, DEFAULT_SERVICES_FILE};
use crate::config::DEFAULT_CONFIG_PATH;
use crate::rule::Direction;

#[derive(Parser)]
#[command(name = "hostwall")]
#[command(author, version, about = "Firewall rule compiler for hosting servers")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, global = true)]
    pub config: PathBuf,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug output)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate or remove per-service rule templates from a services file
    MakeRules {
        /// create or clean
        #[arg(value_enum, default_value_t = Action::Create)]
        action: Action,

        /// Directory the rule files are written to
        #[arg(default_value = DEFAULT_OUTPUT_DIR)]
        output_dir: PathBuf,

        /// Services file to read
        #[arg(default_value = DEFAULT_SERVICES_FILE)]
        services_file: PathBuf,
    },

    /// Print the commands for a single rule
    Render {
        /// Port number, service name or template name
        identifier: String,

        /// Traffic direction
        #[arg(short, long, value_enum, default_value_t = Direction::Incoming)]
        direction: Direction,

        /// Source (incoming) or destination (outgoing) address or CIDR
        #[arg(short, long)]
        address: Option<String>,

        /// Network interface (overrides the config)
        #[arg(long)]
        device: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the complete firewall script
    Generate {
        /// Firewall base directory (overrides the config)
        #[arg(long)]
        base_dir: Option<PathBuf>,
    },

    /// Scan logs for intrusion patterns and print block rules
    Scan {
        /// Pattern file or directory (overrides the config)
        #[arg(short, long)]
        patterns: Option<PathBuf>,

        /// Print block decisions as JSON instead of rules
        #[arg(long)]
        json: bool,

        /// Log files to scan instead of each pattern file's own
        logs: Vec<PathBuf>,
    },

    /// Show login records
    Wtmp {
        /// utmp/wtmp file (overrides the config)
        file: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,

        /// Print accept rules for login source addresses
        #[arg(long, conflicts_with = "json")]
        whitelist: bool,
    },

    /// Show version
    Version,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses_help() {
        // Verify the CLI structure is valid
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_version_command() {
        let cli = Cli::try_parse_from(["hostwall", "version"]).unwrap();
        assert!(matches!(cli.command, Commands::Version));
    }

    #[test]
    fn test_cli_make_rules_defaults() {
        let cli = Cli::try_parse_from(["hostwall", "make-rules"]).unwrap();
        match cli.command {
            Commands::MakeRules {
                action,
                output_dir,
                services_file,
            } => {
                assert_eq!(action, Action::Create);
                assert_eq!(output_dir, PathBuf::from("rule.d"));
                assert_eq!(services_file, PathBuf::from("services"));
            }
            _ => panic!("Expected MakeRules command"),
        }
    }

    #[test]
    fn test_cli_make_rules_positional() {
        let cli =
            Cli::try_parse_from(["hostwall", "make-rules", "clean", "/tmp/out", "/etc/services"])
                .unwrap();
        match cli.command {
            Commands::MakeRules {
                action,
                output_dir,
                services_file,
            } => {
                assert_eq!(action, Action::Clean);
                assert_eq!(output_dir, PathBuf::from("/tmp/out"));
                assert_eq!(services_file, PathBuf::from("/etc/services"));
            }
            _ => panic!("Expected MakeRules command"),
        }
    }

    #[test]
    fn test_cli_make_rules_bad_action() {
        assert!(Cli::try_parse_from(["hostwall", "make-rules", "purge"]).is_err());
    }

    #[test]
    fn test_cli_render_command() {
        let cli = Cli::try_parse_from([
            "hostwall",
            "render",
            "smtp",
            "--direction",
            "outgoing",
            "--address",
            "192.0.2.0/24",
        ])
        .unwrap();
        match cli.command {
            Commands::Render {
                identifier,
                direction,
                address,
                device,
                json,
            } => {
                assert_eq!(identifier, "smtp");
                assert_eq!(direction, Direction::Outgoing);
                assert_eq!(address.as_deref(), Some("192.0.2.0/24"));
                assert!(device.is_none());
                assert!(!json);
            }
            _ => panic!("Expected Render command"),
        }
    }

    #[test]
    fn test_cli_scan_logs() {
        let cli = Cli::try_parse_from(["hostwall", "scan", "--json", "a.log", "b.log"]).unwrap();
        match cli.command {
            Commands::Scan {
                patterns,
                json,
                logs,
            } => {
                assert!(patterns.is_none());
                assert!(json);
                assert_eq!(logs, vec![PathBuf::from("a.log"), PathBuf::from("b.log")]);
            }
            _ => panic!("Expected Scan command"),
        }
    }

    #[test]
    fn test_cli_wtmp_conflicts() {
        assert!(Cli::try_parse_from(["hostwall", "wtmp", "--json", "--whitelist"]).is_err());
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "hostwall",
            "-q",
            "-v",
            "--config",
            "/custom/path.yaml",
            "generate",
        ])
        .unwrap();
        assert!(cli.quiet);
        assert!(cli.verbose);
        assert_eq!(cli.config.to_str().unwrap(), "/custom/path.yaml");
    }
}
