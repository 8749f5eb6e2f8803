//! Error types for hostwall.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FirewallError {
    #[error("Malformed address: {0:?}")]
    MalformedAddress(String),

    #[error("Could not find any templates called {}", .0.join(" or "))]
    TemplateNotFound(Vec<String>),

    #[error("Parse error in {}:{line}: {reason}", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error(
        "Corrupt record stream in {}: {len} bytes is not a multiple of {record_size}",
        .path.display()
    )]
    CorruptRecord {
        path: PathBuf,
        len: usize,
        record_size: usize,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Bad direction {0:?} (expected incoming or outgoing)")]
    BadDirection(String),
}

impl FirewallError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, FirewallError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_not_found_lists_candidates() {
        let err = FirewallError::TemplateNotFound(vec![
            "smtp.incoming".to_string(),
            "accept.incoming".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Could not find any templates called smtp.incoming or accept.incoming"
        );
    }

    #[test]
    fn test_parse_error_names_line() {
        let err = FirewallError::Parse {
            path: PathBuf::from("/etc/x/ssh.patterns"),
            line: 7,
            reason: "bad regex".to_string(),
        };
        assert_eq!(err.to_string(), "Parse error in /etc/x/ssh.patterns:7: bad regex");
    }

    #[test]
    fn test_io_keeps_source() {
        use std::error::Error as _;
        let err = FirewallError::io(
            "/nonexistent",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.source().is_some());
        assert!(err.to_string().contains("/nonexistent"));
    }
}
