//! Offline rule compiler.
//!
//! Writes one `<service>.<direction>` template per service in a services
//! file. Generated files start with [`GENERATED_HEADER`]; anything else in
//! the output directory is treated as hand-written and left alone.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::error::{FirewallError, Result};
use crate::fs_abstraction::FileSystem;
use crate::ports::{PortsRegistry, Service};
use crate::rule::Direction;

/// First line of every generated rule file.
pub const GENERATED_HEADER: &str = "# AUTOMATICALLY GENERATED! Do not edit.";

/// Default output directory.
pub const DEFAULT_OUTPUT_DIR: &str = "rule.d";

/// Default services file, relative to the working directory.
pub const DEFAULT_SERVICES_FILE: &str = "services";

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Action {
    /// Write generated rule files
    Create,
    /// Remove generated rule files
    Clean,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Create => f.write_str("create"),
            Action::Clean => f.write_str("clean"),
        }
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "create" => Ok(Action::Create),
            "clean" => Ok(Action::Clean),
            other => Err(format!("Unknown action: {} (expected create or clean)", other)),
        }
    }
}

/// What a compiler run did.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct CompileReport {
    pub written: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    /// Hand-written files that were left untouched.
    pub skipped: Vec<PathBuf>,
}

pub struct Compiler<'a, F: FileSystem> {
    fs: &'a F,
    output_dir: PathBuf,
}

impl<'a, F: FileSystem> Compiler<'a, F> {
    pub fn new(fs: &'a F, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path of the generated file for a service and direction.
    pub fn path_for(&self, service: &str, direction: Direction) -> PathBuf {
        self.output_dir.join(format!("{}.{}", service, direction))
    }

    /// Create or clean rule files for every service in `registry`.
    pub fn run(&self, action: Action, registry: &PortsRegistry) -> Result<CompileReport> {
        let mut report = CompileReport::default();

        if action == Action::Create {
            self.fs
                .create_dir_all(&self.output_dir)
                .map_err(|e| FirewallError::io(&self.output_dir, e))?;
        }

        for service in registry.services() {
            for direction in Direction::ALL {
                let path = self.path_for(&service.name, direction);

                if self.fs.exists(&path) && !self.is_generated(&path) {
                    report.skipped.push(path);
                    continue;
                }

                match action {
                    Action::Create => {
                        let content = render_file(service, direction);
                        self.fs
                            .write(&path, content.as_bytes())
                            .map_err(|e| FirewallError::io(&path, e))?;
                        debug!("Wrote {}", path.display());
                        report.written.push(path);
                    }
                    Action::Clean => {
                        if self.fs.exists(&path) {
                            self.fs
                                .remove_file(&path)
                                .map_err(|e| FirewallError::io(&path, e))?;
                            debug!("Removed {}", path.display());
                            report.removed.push(path);
                        }
                    }
                }
            }
        }

        info!(
            "{}: {} written, {} removed, {} skipped in {}",
            action,
            report.written.len(),
            report.removed.len(),
            report.skipped.len(),
            self.output_dir.display()
        );
        Ok(report)
    }

    /// True if `path` starts with the generated header. Anything that
    /// cannot be read is treated as hand-written.
    fn is_generated(&self, path: &Path) -> bool {
        let content = match self.fs.read(path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Cannot read {}, leaving it alone: {}", path.display(), e);
                return false;
            }
        };

        let first = content.split(|&b| b == b'\n').next().unwrap_or_default();
        let generated = first.strip_suffix(b"\r").unwrap_or(first) == GENERATED_HEADER.as_bytes();
        if !generated {
            warn!("Manually created file exists: {}", path.display());
        }
        generated
    }
}

/// Text of the generated template for one service and direction.
pub fn render_file(service: &Service, direction: Direction) -> String {
    let address = match direction {
        Direction::Incoming => "$SRC",
        Direction::Outgoing => "$DEST",
    };

    let mut out = format!(
        "{}\n#\n# Allow {} connections for {}\n#\n",
        GENERATED_HEADER, direction, service.name
    );

    // Grouped by port number, protocols in first-seen order.
    for port in service.port_numbers() {
        for spec in service.ports.iter().filter(|s| s.port == port) {
            out.push_str(&format!(
                "$IPTABLES --append {} --protocol {} $DEV --destination-port {} {} --jump ACCEPT\n",
                direction.default_chain(),
                spec.protocol,
                spec.port,
                address
            ));
        }
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs_abstraction::{MockFileSystem, RealFileSystem};
    use tempfile::TempDir;

    fn registry(content: &str) -> PortsRegistry {
        let mut registry = PortsRegistry::new();
        registry.parse_str(content);
        registry
    }

    #[test]
    fn test_render_file() {
        let registry = registry("smtp 25/tcp\nsubmission 587/tcp\nsmtp 25/udp\nsmtp 465/tcp\n");
        let smtp = registry.lookup("smtp").unwrap();
        assert_eq!(
            render_file(smtp, Direction::Incoming),
            "# AUTOMATICALLY GENERATED! Do not edit.\n\
             #\n\
             # Allow incoming connections for smtp\n\
             #\n\
             $IPTABLES --append INPUT --protocol tcp $DEV --destination-port 25 $SRC --jump ACCEPT\n\
             $IPTABLES --append INPUT --protocol udp $DEV --destination-port 25 $SRC --jump ACCEPT\n\
             $IPTABLES --append INPUT --protocol tcp $DEV --destination-port 465 $SRC --jump ACCEPT\n\
             \n"
        );
        assert!(render_file(smtp, Direction::Outgoing)
            .contains("--append OUTPUT --protocol tcp $DEV --destination-port 25 $DEST"));
    }

    #[test]
    fn test_action_parse() {
        assert_eq!("create".parse::<Action>().unwrap(), Action::Create);
        assert_eq!("clean".parse::<Action>().unwrap(), Action::Clean);
        assert!("purge".parse::<Action>().is_err());
    }

    #[test]
    fn test_create_writes_both_directions() {
        let mut fs = MockFileSystem::new();
        fs.expect_create_dir_all().times(1).returning(|_| Ok(()));
        fs.expect_exists().returning(|_| false);
        fs.expect_write()
            .times(2)
            .withf(|_, c| c.starts_with(GENERATED_HEADER.as_bytes()))
            .returning(|_, _| Ok(()));

        let compiler = Compiler::new(&fs, "/out");
        let report = compiler.run(Action::Create, &registry("ssh 22/tcp\n")).unwrap();
        assert_eq!(
            report.written,
            vec![PathBuf::from("/out/ssh.incoming"), PathBuf::from("/out/ssh.outgoing")]
        );
    }

    #[test]
    fn test_hand_written_file_is_skipped() {
        let mut fs = MockFileSystem::new();
        fs.expect_create_dir_all().returning(|_| Ok(()));
        fs.expect_exists()
            .returning(|p| p == Path::new("/out/ssh.incoming"));
        fs.expect_read()
            .returning(|_| Ok(b"# my own rule\n/sbin/iptables -A INPUT -j ACCEPT\n".to_vec()));
        fs.expect_write()
            .times(1)
            .withf(|p, _| p == Path::new("/out/ssh.outgoing"))
            .returning(|_, _| Ok(()));

        let compiler = Compiler::new(&fs, "/out");
        let report = compiler.run(Action::Create, &registry("ssh 22/tcp\n")).unwrap();
        assert_eq!(report.skipped, vec![PathBuf::from("/out/ssh.incoming")]);
        assert_eq!(report.written.len(), 1);
    }

    #[test]
    fn test_unreadable_file_is_skipped() {
        let mut fs = MockFileSystem::new();
        fs.expect_create_dir_all().returning(|_| Ok(()));
        fs.expect_exists()
            .returning(|p| p == Path::new("/out/echo.incoming"));
        fs.expect_read().returning(|_| {
            Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "stream did not contain valid UTF-8",
            ))
        });
        fs.expect_write().times(3).returning(|_, _| Ok(()));

        let compiler = Compiler::new(&fs, "/out");
        let report = compiler
            .run(Action::Create, &registry("echo 7/tcp\nssh 22/tcp\n"))
            .unwrap();
        assert_eq!(report.skipped, vec![PathBuf::from("/out/echo.incoming")]);
        assert!(report.written.contains(&PathBuf::from("/out/ssh.incoming")));
        assert_eq!(report.written.len(), 3);
    }

    #[test]
    fn test_non_utf8_hand_edit_survives_create_and_clean() {
        let dir = TempDir::new().unwrap();
        let fs = RealFileSystem;
        let out = dir.path().join("rule.d");
        std::fs::create_dir_all(&out).unwrap();
        let hand_edit: &[u8] = b"# Z\xfcrich office\n/sbin/iptables -A INPUT -s 192.0.2.1 -j ACCEPT\n";
        std::fs::write(out.join("echo.incoming"), hand_edit).unwrap();
        std::fs::create_dir(out.join("echo.outgoing")).unwrap();

        let compiler = Compiler::new(&fs, &out);
        let registry = registry("echo 7/tcp\nssh 22/tcp\n");
        let report = compiler.run(Action::Create, &registry).unwrap();
        assert_eq!(report.skipped, vec![out.join("echo.incoming"), out.join("echo.outgoing")]);
        assert!(out.join("ssh.incoming").exists());
        assert!(out.join("ssh.outgoing").exists());

        let report = compiler.run(Action::Clean, &registry).unwrap();
        assert_eq!(report.removed.len(), 2);
        assert_eq!(std::fs::read(out.join("echo.incoming")).unwrap(), hand_edit);
        assert!(out.join("echo.outgoing").is_dir());
    }

    #[test]
    fn test_write_error_propagates() {
        let mut fs = MockFileSystem::new();
        fs.expect_create_dir_all().returning(|_| Ok(()));
        fs.expect_exists().returning(|_| false);
        fs.expect_write().returning(|_, _| {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"))
        });

        let compiler = Compiler::new(&fs, "/out");
        let result = compiler.run(Action::Create, &registry("ssh 22/tcp\n"));
        assert!(matches!(result, Err(FirewallError::Io { .. })));
    }

    #[test]
    fn test_clean_removes_only_generated() {
        let dir = TempDir::new().unwrap();
        let fs = RealFileSystem;
        let compiler = Compiler::new(&fs, dir.path());
        let registry = registry("ssh 22/tcp\nsmtp 25/tcp\n");

        compiler.run(Action::Create, &registry).unwrap();
        std::fs::write(dir.path().join("smtp.outgoing"), "# hand edited\n").unwrap();
        std::fs::write(dir.path().join("custom.incoming"), "# other\n").unwrap();

        let report = compiler.run(Action::Clean, &registry).unwrap();
        assert_eq!(report.removed.len(), 3);
        assert_eq!(report.skipped, vec![dir.path().join("smtp.outgoing")]);
        assert!(dir.path().join("smtp.outgoing").exists());
        assert!(dir.path().join("custom.incoming").exists());
        assert!(!dir.path().join("ssh.incoming").exists());
    }

    #[test]
    fn test_create_is_repeatable() {
        let dir = TempDir::new().unwrap();
        let fs = RealFileSystem;
        let compiler = Compiler::new(&fs, dir.path().join("rule.d"));
        let registry = registry("ssh 22/tcp\n");

        compiler.run(Action::Create, &registry).unwrap();
        let report = compiler.run(Action::Create, &registry).unwrap();
        assert_eq!(report.written.len(), 2);
        assert!(report.skipped.is_empty());
    }
}
