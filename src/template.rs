//! Firewall rule templates.
//!
//! Two kinds of template share the same search path and naming scheme:
//!
//! * **Tokenized** templates contain at least one substitution token
//!   (`$IPTABLES`, `$CHAIN`, `$DEV`, `$SRC`, `$DEST`, `$ADDRESS`, `$PORT`,
//!   `$PROTO`) and are rendered per address family and per port.
//! * **Legacy** templates contain no token at all and render verbatim.
//!
//! The kind is decided once, from the content, when the template is loaded.
//!
//! In a tokenized template with port lines, the portless rule lines are the
//! "any port" form and only render for rules that carry no ports.

use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{FirewallError, Result};
use crate::iprange::{Family, IpRange};
use crate::ports::PortSpec;
use crate::rule::Direction;

/// IPv4 packet filter binary.
pub const IPTABLES: &str = "/sbin/iptables";

/// IPv6 packet filter binary.
pub const IP6TABLES: &str = "/sbin/ip6tables";

/// Binary for an address family.
pub fn iptables_for(family: Family) -> &'static str {
    match family {
        Family::V4 => IPTABLES,
        Family::V6 => IP6TABLES,
    }
}

/// A substitution token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// Family-routed binary; marks the template as dual-family.
    Iptables,
    Chain,
    Dev,
    Src,
    Dest,
    /// `--src` for incoming rules, `--dst` for outgoing ones.
    Address,
    Port,
    Proto,
}

impl Token {
    const ALL: [Token; 8] = [
        Token::Iptables,
        Token::Chain,
        Token::Dev,
        Token::Src,
        Token::Dest,
        Token::Address,
        Token::Port,
        Token::Proto,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Token::Iptables => "IPTABLES",
            Token::Chain => "CHAIN",
            Token::Dev => "DEV",
            Token::Src => "SRC",
            Token::Dest => "DEST",
            Token::Address => "ADDRESS",
            Token::Port => "PORT",
            Token::Proto => "PROTO",
        }
    }

    fn from_name(name: &str) -> Option<Token> {
        Token::ALL.into_iter().find(|t| t.name() == name)
    }

    fn is_port(self) -> bool {
        matches!(self, Token::Port | Token::Proto)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Token(Token),
}

/// One line of a tokenized template, split at its tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateLine {
    raw: String,
    segments: Vec<Segment>,
    literal_family: Option<Family>,
}

impl TemplateLine {
    fn parse(raw: &str) -> Self {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut rest = raw;

        while let Some(pos) = rest.find('$') {
            text.push_str(&rest[..pos]);
            let after = &rest[pos + 1..];
            let ident_len = after
                .find(|c: char| !(c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'))
                .unwrap_or(after.len());

            match Token::from_name(&after[..ident_len]) {
                Some(token) => {
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Token(token));
                }
                // Not ours, e.g. a shell variable.
                None => {
                    text.push('$');
                    text.push_str(&after[..ident_len]);
                }
            }
            rest = &after[ident_len..];
        }
        text.push_str(rest);
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }

        Self {
            raw: raw.to_string(),
            segments,
            literal_family: literal_family(raw),
        }
    }

    fn has(&self, token: Token) -> bool {
        self.segments.contains(&Segment::Token(token))
    }

    fn has_tokens(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Token(_)))
    }

    fn uses_ports(&self) -> bool {
        self.segments
            .iter()
            .any(|s| matches!(s, Segment::Token(t) if t.is_port()))
    }

    /// A rule line that matches on address or chain but not on port.
    fn is_portless_rule(&self) -> bool {
        !self.uses_ports()
            && [Token::Chain, Token::Src, Token::Dest, Token::Address]
                .iter()
                .any(|&t| self.has(t))
    }

    fn substitute(&self, ctx: &RenderContext<'_>, family: Option<Family>, port: Option<&PortSpec>) -> String {
        if !self.has_tokens() {
            return self.raw.trim_end().to_string();
        }

        let mut out = String::with_capacity(self.raw.len() + 32);
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Token(token) => out.push_str(&ctx.value(*token, family, port)),
            }
        }

        // Empty substitutions leave runs of blanks behind.
        out.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// Family of a hard-coded `iptables`/`ip6tables` invocation at the start
/// of a line.
fn literal_family(line: &str) -> Option<Family> {
    let command = line.split_whitespace().next()?;
    let binary = command.rsplit('/').next().unwrap_or(command);
    match binary {
        "iptables" => Some(Family::V4),
        "ip6tables" => Some(Family::V6),
        _ => None,
    }
}

fn is_command(line: &str) -> bool {
    let trimmed = line.trim_start();
    !trimmed.is_empty() && !trimmed.starts_with('#')
}

/// Template kind, fixed at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateKind {
    /// Fixed text. Addresses, devices and ports are never applied.
    Legacy { lines: Vec<String> },
    /// Text with substitution tokens.
    Tokenized { lines: Vec<TemplateLine> },
}

/// Everything a template needs to render one rule.
#[derive(Debug, Clone)]
pub struct RenderContext<'a> {
    /// Rule name, for log messages.
    pub name: &'a str,
    pub direction: Direction,
    pub chain: &'a str,
    pub address: Option<&'a IpRange>,
    pub device: Option<&'a str>,
    pub ports: &'a [PortSpec],
}

impl RenderContext<'_> {
    fn value(&self, token: Token, family: Option<Family>, port: Option<&PortSpec>) -> String {
        let src = || self.address.map(|a| format!("--src {}", a)).unwrap_or_default();
        let dst = || self.address.map(|a| format!("--dst {}", a)).unwrap_or_default();

        match token {
            Token::Iptables => iptables_for(family.unwrap_or(Family::V4)).to_string(),
            Token::Chain => self.chain.to_string(),
            Token::Dev => match (self.device, self.direction) {
                (Some(dev), Direction::Incoming) => format!("--in-interface {}", dev),
                (Some(dev), Direction::Outgoing) => format!("--out-interface {}", dev),
                (None, _) => String::new(),
            },
            Token::Src => src(),
            Token::Dest => dst(),
            Token::Address => match self.direction {
                Direction::Incoming => src(),
                Direction::Outgoing => dst(),
            },
            Token::Port => port.map(|p| p.port.to_string()).unwrap_or_default(),
            Token::Proto => port.map(|p| p.protocol.to_string()).unwrap_or_default(),
        }
    }
}

/// A loaded rule template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub path: PathBuf,
    kind: TemplateKind,
}

impl Template {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| FirewallError::io(path, e))?;
        Ok(Self::parse(path, &content))
    }

    /// Build a template from text and classify it.
    pub fn parse(path: impl Into<PathBuf>, content: &str) -> Self {
        let lines: Vec<TemplateLine> = content.lines().map(TemplateLine::parse).collect();

        let kind = if lines.iter().any(TemplateLine::has_tokens) {
            TemplateKind::Tokenized { lines }
        } else {
            TemplateKind::Legacy {
                lines: content.lines().map(str::to_string).collect(),
            }
        };

        Self {
            path: path.into(),
            kind,
        }
    }

    pub fn kind(&self) -> &TemplateKind {
        &self.kind
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self.kind, TemplateKind::Legacy { .. })
    }

    /// True if the template routes its binary through `$IPTABLES` and can
    /// therefore render for both address families.
    pub fn is_dual_family(&self) -> bool {
        match &self.kind {
            TemplateKind::Legacy { .. } => false,
            TemplateKind::Tokenized { lines } => lines.iter().any(|l| l.has(Token::Iptables)),
        }
    }

    /// Render to complete command lines. Comments and blank lines are not
    /// command lines and are dropped.
    pub fn render(&self, ctx: &RenderContext<'_>) -> Vec<String> {
        match &self.kind {
            TemplateKind::Legacy { lines } => {
                if let Some(address) = ctx.address {
                    warn!(
                        "Legacy template {} has no address token; {} not applied to rule {}",
                        self.path.display(),
                        address,
                        ctx.name
                    );
                }
                lines
                    .iter()
                    .filter(|l| is_command(l))
                    .map(|l| l.trim_end().to_string())
                    .collect()
            }
            TemplateKind::Tokenized { lines } => render_tokenized(&self.path, lines, ctx),
        }
    }
}

fn render_tokenized(path: &Path, lines: &[TemplateLine], ctx: &RenderContext<'_>) -> Vec<String> {
    let mut commands = Vec::new();
    let address_family = ctx.address.map(IpRange::family);
    // Per-port lines replace the catch-all ones whenever there are ports.
    let narrowed = !ctx.ports.is_empty() && lines.iter().any(TemplateLine::uses_ports);

    for line in lines.iter().filter(|l| is_command(&l.raw)) {
        if narrowed && line.is_portless_rule() {
            debug!(
                "Skipping all-ports line in {} for rule {} with ports",
                path.display(),
                ctx.name
            );
            continue;
        }

        let families: Vec<Option<Family>> = if line.has(Token::Iptables) {
            match address_family {
                Some(family) => vec![Some(family)],
                None => vec![Some(Family::V4), Some(Family::V6)],
            }
        } else {
            if let (Some(literal), Some(wanted)) = (line.literal_family, address_family) {
                if literal != wanted {
                    warn!(
                        "Disabling {:?} line in {} for {:?} address in rule {}",
                        literal,
                        path.display(),
                        wanted,
                        ctx.name
                    );
                    continue;
                }
            }
            vec![line.literal_family]
        };

        let ports: Vec<Option<&PortSpec>> = if line.uses_ports() {
            if ctx.ports.is_empty() {
                debug!(
                    "Skipping port line in {} for rule {} without ports",
                    path.display(),
                    ctx.name
                );
                continue;
            }
            ctx.ports.iter().map(Some).collect()
        } else {
            vec![None]
        };

        for family in &families {
            for port in &ports {
                commands.push(line.substitute(ctx, *family, *port));
            }
        }
    }

    commands
}
