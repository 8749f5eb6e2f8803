//! Turning log matches into block rules, and logins into allow rules.
//!
//! Hits are counted per address per protected port. IPv6 hits are pooled
//! per /64 since a single host usually owns the whole prefix.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::directory::{ignoring, BLACKLIST_TEMPLATE, WHITELIST_TEMPLATE};
use crate::error::{FirewallError, Result};
use crate::iprange::{Family, IpRange};
use crate::pattern::{PatternFile, PatternMatch, PatternMatcher};
use crate::rule::{Direction, Rule, RuleEngine, RuleIdentifier};
use crate::template::Template;
use crate::utmp::UtmpRecord;

/// Port key meaning every port.
pub const ALL_PORTS: &str = "all";

/// Prefix IPv6 hits are pooled under.
const IPV6_POOL_PREFIX: u8 = 64;

/// Range a hit is counted against.
pub fn pool_address(address: &IpRange) -> IpRange {
    match address.family() {
        Family::V4 => *address,
        Family::V6 => address.supernet(IPV6_POOL_PREFIX),
    }
}

/// Hit counts per address, per port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HitCounter {
    counts: BTreeMap<IpRange, BTreeMap<String, u64>>,
}

impl HitCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `hits` against every port in `ports`.
    pub fn record(&mut self, address: &IpRange, ports: &[String], hits: u64) {
        let per_port = self.counts.entry(pool_address(address)).or_default();
        for port in ports {
            *per_port.entry(port.clone()).or_default() += hits;
        }
    }

    /// Count matches produced by `file`'s patterns. Matches without a
    /// usable address are dropped.
    pub fn record_matches(&mut self, file: &PatternFile, matches: &[PatternMatch]) {
        for m in matches {
            match &m.address {
                Some(address) => self.record(address, &file.ports, 1),
                None => debug!(
                    "Pattern {} matched without an address: {:?}",
                    m.pattern, m.raw_address
                ),
            }
        }
    }

    /// Hits for one pooled address.
    pub fn ports(&self, address: &IpRange) -> Option<&BTreeMap<String, u64>> {
        self.counts.get(&pool_address(address))
    }

    pub fn total(&self, address: &IpRange) -> u64 {
        self.ports(address).map(|p| p.values().sum()).unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IpRange, &BTreeMap<String, u64>)> {
        self.counts.iter()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Count hits for every pattern file against its own log file.
///
/// With `logs` given, every file's patterns run against those instead.
/// Log files that cannot be read are skipped.
pub fn count_hits(matcher: &PatternMatcher, logs: &[PathBuf]) -> Result<HitCounter> {
    let mut counter = HitCounter::new();
    let mut cache: HashMap<PathBuf, Vec<String>> = HashMap::new();

    for file in matcher.files() {
        let sources: Vec<PathBuf> = if logs.is_empty() {
            match &file.logfile {
                Some(logfile) => vec![logfile.clone()],
                None => {
                    debug!("No log file set in {}, ignoring", file.path.display());
                    continue;
                }
            }
        } else {
            logs.to_vec()
        };

        for source in sources {
            if !cache.contains_key(&source) {
                let lines = match std::fs::read_to_string(&source) {
                    Ok(content) => content.lines().map(str::to_string).collect(),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        warn!("Log file {} not found", source.display());
                        Vec::new()
                    }
                    Err(e) => return Err(FirewallError::io(&source, e)),
                };
                cache.insert(source.clone(), lines);
            }
            let lines = cache.get(&source).map(Vec::as_slice).unwrap_or_default();
            let matches = file.apply(lines);
            debug!(
                "{}: {} matches in {}",
                file.path.display(),
                matches.len(),
                source.display()
            );
            counter.record_matches(file, &matches);
        }
    }

    Ok(counter)
}

/// What to block for one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Block {
    All,
    Ports(Vec<String>),
}

/// Block thresholds. Counts must exceed a threshold to trigger it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blacklist {
    pub block_after: u64,
    pub block_all_after: u64,
    pub template: String,
}

impl Default for Blacklist {
    fn default() -> Self {
        Self {
            block_after: 10,
            block_all_after: 25,
            template: BLACKLIST_TEMPLATE.to_string(),
        }
    }
}

impl Blacklist {
    pub fn new(block_after: u64, block_all_after: u64) -> Self {
        Self {
            block_after,
            block_all_after,
            ..Self::default()
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    /// Block decisions, in address order.
    pub fn decide(&self, counter: &HitCounter) -> BTreeMap<IpRange, Block> {
        let mut blocks = BTreeMap::new();

        for (address, ports) in counter.iter() {
            let total: u64 = ports.values().sum();
            if total > self.block_all_after || ports.get(ALL_PORTS).is_some_and(|&h| h > self.block_after) {
                blocks.insert(*address, Block::All);
                continue;
            }

            let blocked: Vec<String> = ports
                .iter()
                .filter(|&(_, &hits)| hits > self.block_after)
                .map(|(port, _)| port.clone())
                .collect();
            if !blocked.is_empty() {
                blocks.insert(*address, Block::Ports(blocked));
            }
        }

        info!("{} of {} addresses to block", blocks.len(), counter.len());
        blocks
    }

    /// Incoming reject rules for each decision.
    pub fn render(&self, engine: &RuleEngine, blocks: &BTreeMap<IpRange, Block>) -> Vec<String> {
        let direction = Direction::Incoming;
        let candidates = vec![format!("{}.{}", self.template, direction)];
        let template = match engine.find(&candidates).and_then(Template::load) {
            Ok(template) => template,
            Err(e) => {
                return blocks
                    .keys()
                    .map(|a| ignoring(direction, &self.template, Some(a.to_string().as_str()), &e.to_string()))
                    .collect()
            }
        };

        let mut lines = Vec::new();
        for (address, block) in blocks {
            let base = Rule::new(RuleIdentifier::CustomName(self.template.clone()), direction)
                .with_address(Some(*address));

            match block {
                Block::All => {
                    let rule = base.with_ports(Vec::new());
                    lines.extend(engine.compile_with(&rule, &template).commands);
                }
                Block::Ports(ports) => {
                    for port in ports {
                        let specs = engine.ports_for(&engine.classify(port));
                        if specs.is_empty() {
                            lines.push(ignoring(
                                direction,
                                port,
                                Some(address.to_string().as_str()),
                                "it names no known port",
                            ));
                            continue;
                        }
                        let rule = base.clone().with_ports(specs);
                        lines.extend(engine.compile_with(&rule, &template).commands);
                    }
                }
            }
        }
        lines
    }
}

/// Distinct source ranges of user logins.
pub fn whitelist_from_wtmp(records: &[UtmpRecord]) -> Vec<IpRange> {
    let ranges: BTreeSet<IpRange> = records
        .iter()
        .filter(|r| r.is_user_process())
        .filter_map(|r| r.ip)
        .map(IpRange::host)
        .collect();
    ranges.into_iter().collect()
}

/// Incoming accept rules for each range.
pub fn render_whitelist(engine: &RuleEngine, ranges: &[IpRange]) -> Vec<String> {
    let direction = Direction::Incoming;
    let candidates = vec![format!("{}.{}", WHITELIST_TEMPLATE, direction)];
    let template = match engine.find(&candidates).and_then(Template::load) {
        Ok(template) => template,
        Err(e) => {
            return ranges
                .iter()
                .map(|a| ignoring(direction, WHITELIST_TEMPLATE, Some(a.to_string().as_str()), &e.to_string()))
                .collect()
        }
    };

    ranges
        .iter()
        .flat_map(|range| {
            let rule = Rule::new(RuleIdentifier::CustomName(WHITELIST_TEMPLATE.to_string()), direction)
                .with_address(Some(*range))
                .with_ports(Vec::new());
            engine.compile_with(&rule, &template).commands
        })
        .collect()
}
