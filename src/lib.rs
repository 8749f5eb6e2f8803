//! # hostwall - Firewall Rule Compiler for Hosting Servers
//!
//! Turns declarative rule directories and templates into iptables and
//! ip6tables command sequences, and watches logs and login records for
//! addresses that should be blocked or allowed.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        hostwall                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CLI (clap)                                                 │
//! │    └── Commands: make-rules, render, generate, scan, wtmp   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Config (serde_yaml)                                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Compiler (services file -> generated templates)            │
//! │    └── FileSystem trait, fs2 directory lock                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RuleEngine                                                 │
//! │    ├── PortsRegistry (services file)                        │
//! │    ├── Template (legacy / tokenized, per family and port)   │
//! │    └── Firewall (whitelist, blacklist, incoming, outgoing)  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Analyzers                                                  │
//! │    ├── PatternMatcher (regex over log lines)                │
//! │    ├── Blacklist (hit thresholds -> reject rules)           │
//! │    └── utmp reader (logins -> accept rules)                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  IpRange (ipnet)                                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```no_run
//! use hostwall::config::Config;
//! use hostwall::iprange::IpRange;
//! use hostwall::rule::Direction;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load("/etc/hostwall/config.yaml")?;
//!     let engine = config.engine(config.load_services()?);
//!
//!     let address = IpRange::parse("2001:ba8:123::/56")?;
//!     let rule = engine.compile_named("smtp", Direction::Incoming, Some(address))?;
//!     for command in rule.commands {
//!         println!("{}", command);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`iprange`] - Canonical CIDR ranges
//! - [`ports`] - Services file registry
//! - [`pattern`] - Log line pattern matching
//! - [`template`] - Rule templates and rendering
//! - [`rule`] - Rule identifiers, template lookup, compilation
//! - [`utmp`] - Login record decoding
//! - [`compiler`] - Per-service template generation
//! - [`directory`] - Rule directories and the firewall script
//! - [`blacklist`] - Hit counting and block/allow rule rendering
//! - [`config`] - Configuration parsing and validation
//! - [`lock`] - File locking for concurrent execution prevention

pub mod blacklist;
pub mod cli;
pub mod commands;
pub mod compiler;
pub mod config;
pub mod directory;
pub mod error;
pub mod fs_abstraction;
pub mod iprange;
pub mod lock;
pub mod pattern;
pub mod ports;
pub mod rule;
pub mod template;
pub mod utmp;
pub mod validation;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use error::{FirewallError, Result};
