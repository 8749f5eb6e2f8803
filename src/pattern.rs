//! Intrusion signatures applied to log lines.
//!
//! A pattern file looks like this:
//!
//! ```text
//! # Failed SSH logins
//! file = /var/log/auth.log
//! ports = ssh
//!
//! @invalid-user sshd\[\d+\]: Invalid user \S+ from __IP__
//! sshd\[\d+\]: Failed password for .* from __IP__ port \d+ ssh2
//! ```
//!
//! `__IP__` expands to a group capturing the source address (with any
//! `::ffff:` mapping prefix stripped). Patterns anchored at neither end get
//! a trailing `$`. Unlike the services file this format is strict: one bad
//! entry fails the whole load, because a silently dropped detection pattern
//! is a hole in the blacklist.

use regex::Regex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{FirewallError, Result};
use crate::iprange::IpRange;

/// Placeholder for the source address in a pattern.
pub const IP_TOKEN: &str = "__IP__";

const IP_CAPTURE: &str = r"(?:::ffff:)?(?P<address>[0-9a-fA-F:.]+(?:/[0-9]+)?)";

const ADDRESS_GROUP: &str = "address";

/// Extension of pattern files inside a patterns directory.
pub const PATTERN_EXTENSION: &str = "patterns";

/// A named, compiled detection pattern.
#[derive(Debug, Clone)]
pub struct PatternDefinition {
    pub name: String,
    regex: Regex,
    address_group: usize,
}

impl PatternDefinition {
    /// Compile `source`, expanding `__IP__` and anchoring it.
    pub fn new(name: &str, source: &str) -> std::result::Result<Self, String> {
        let mut expanded = source.replace(IP_TOKEN, IP_CAPTURE);
        if !expanded.starts_with('^') && !expanded.ends_with('$') {
            expanded.push('$');
        }

        let regex = Regex::new(&expanded).map_err(|e| format!("invalid regex: {}", e))?;

        let address_group = regex
            .capture_names()
            .position(|n| n == Some(ADDRESS_GROUP))
            .unwrap_or(1);
        if regex.captures_len() <= address_group {
            return Err(format!(
                "pattern {:?} has no group capturing the source address (use {})",
                source, IP_TOKEN
            ));
        }

        Ok(Self {
            name: name.to_string(),
            regex,
            address_group,
        })
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// Match a single line.
    pub fn apply(&self, line: &str) -> Option<PatternMatch> {
        let caps = self.regex.captures(line)?;

        let raw_address = caps.get(self.address_group).map(|m| m.as_str().to_string());
        let address = raw_address.as_deref().and_then(|raw| match IpRange::parse(raw) {
            Ok(range) => Some(range),
            Err(_) => {
                debug!("Failed to parse IP {:?} (from {:?})", raw, line);
                None
            }
        });

        let captures = caps
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(idx, _)| *idx != self.address_group)
            .filter_map(|(_, m)| m.map(|m| m.as_str().to_string()))
            .collect();

        Some(PatternMatch {
            pattern: self.name.clone(),
            line: line.to_string(),
            address,
            raw_address,
            captures,
        })
    }
}

/// One line that satisfied one pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatternMatch {
    /// Name of the pattern that matched.
    pub pattern: String,
    /// The log line itself.
    pub line: String,
    /// Parsed source address, if the captured text was a valid address.
    pub address: Option<IpRange>,
    /// Text captured by the address group.
    pub raw_address: Option<String>,
    /// Every other capture group, in order.
    pub captures: Vec<String>,
}

/// Patterns from a single file plus its `file =` and `ports =` directives.
#[derive(Debug, Clone)]
pub struct PatternFile {
    pub path: PathBuf,
    /// Log file the patterns are meant for.
    pub logfile: Option<PathBuf>,
    /// Ports or service names a match counts against (`all` by default).
    pub ports: Vec<String>,
    pub patterns: Vec<PatternDefinition>,
}

impl PatternFile {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| FirewallError::io(path, e))?;
        Self::parse(path, &content)
    }

    /// Parse pattern-file text. `path` names the file in errors and
    /// provides the stem for unnamed patterns.
    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "pattern".to_string());

        let mut logfile: Option<PathBuf> = None;
        let mut ports: Option<Vec<String>> = None;
        let mut patterns = Vec::new();

        for (idx, raw) in content.lines().enumerate() {
            let line = raw.trim();
            let lineno = idx + 1;
            let parse_error = |reason: String| FirewallError::Parse {
                path: path.to_path_buf(),
                line: lineno,
                reason,
            };

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(value) = directive(line, "file") {
                if logfile.is_some() {
                    return Err(parse_error("duplicate 'file' directive".to_string()));
                }
                logfile = Some(PathBuf::from(value));
                continue;
            }

            if let Some(value) = directive(line, "ports") {
                if ports.is_some() {
                    return Err(parse_error("duplicate 'ports' directive".to_string()));
                }
                ports = Some(
                    value
                        .split(|c: char| c == ',' || c.is_whitespace())
                        .filter(|p| !p.is_empty())
                        .map(str::to_string)
                        .collect(),
                );
                continue;
            }

            let (name, source) = match line.strip_prefix('@') {
                Some(rest) => {
                    let (name, source) = rest
                        .split_once(char::is_whitespace)
                        .unwrap_or((rest, ""));
                    if name.is_empty() || !name.chars().all(is_name_char) {
                        return Err(parse_error(format!("bad pattern name {:?}", name)));
                    }
                    let source = source.trim();
                    if source.is_empty() {
                        return Err(parse_error(format!("pattern {:?} has no regex", name)));
                    }
                    (name.to_string(), source)
                }
                None => (format!("{}-{}", stem, patterns.len() + 1), line),
            };

            let definition = PatternDefinition::new(&name, source).map_err(parse_error)?;
            patterns.push(definition);
        }

        let ports = match ports {
            Some(p) if !p.is_empty() => p,
            _ => {
                debug!("No ports set in {} -- assuming 'all'", path.display());
                vec!["all".to_string()]
            }
        };

        Ok(Self {
            path: path.to_path_buf(),
            logfile,
            ports,
            patterns,
        })
    }

    /// Apply this file's patterns to `lines`.
    pub fn apply<I, S>(&self, lines: I) -> Vec<PatternMatch>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns: Vec<&PatternDefinition> = self.patterns.iter().collect();
        apply_patterns(&patterns, lines)
    }
}

/// An ordered set of loaded patterns.
///
/// Built explicitly; reload by building a new one.
#[derive(Debug, Clone, Default)]
pub struct PatternMatcher {
    files: Vec<PatternFile>,
}

impl PatternMatcher {
    /// Empty matcher. Matches nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load one pattern file, or every `*.patterns` file in a directory in
    /// name order.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut matcher = Self::new();

        if path.is_dir() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(path)
                .map_err(|e| FirewallError::io(path, e))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == PATTERN_EXTENSION))
                .collect();
            entries.sort();

            for entry in entries {
                matcher.add_file(PatternFile::load(&entry)?);
            }
        } else {
            matcher.add_file(PatternFile::load(path)?);
        }

        debug!(
            "Loaded {} patterns from {} files under {}",
            matcher.len(),
            matcher.files.len(),
            path.display()
        );
        Ok(matcher)
    }

    pub fn add_file(&mut self, file: PatternFile) {
        self.files.push(file);
    }

    pub fn files(&self) -> &[PatternFile] {
        &self.files
    }

    /// Every pattern, in load order.
    pub fn patterns(&self) -> impl Iterator<Item = &PatternDefinition> {
        self.files.iter().flat_map(|f| f.patterns.iter())
    }

    pub fn len(&self) -> usize {
        self.patterns().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Test every line against every pattern.
    ///
    /// Results follow input line order, then pattern load order. A line can
    /// match more than one pattern; lines matching nothing produce nothing.
    pub fn apply<I, S>(&self, lines: I) -> Vec<PatternMatch>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns: Vec<&PatternDefinition> = self.patterns().collect();
        apply_patterns(&patterns, lines)
    }
}

fn apply_patterns<I, S>(patterns: &[&PatternDefinition], lines: I) -> Vec<PatternMatch>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut matches = Vec::new();
    if patterns.is_empty() {
        return matches;
    }
    for line in lines {
        let line = line.as_ref().trim_end_matches(['\n', '\r']);
        matches.extend(patterns.iter().filter_map(|p| p.apply(line)));
    }
    matches
}

/// Value of a `key = value` directive line.
fn directive<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(key)?.trim_start();
    let value = rest.strip_prefix('=')?;
    Some(value.trim())
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}
