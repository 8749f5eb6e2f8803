//! Make-rules command implementation.

use anyhow::{Context, Result};
use std::path::Path;

use crate::compiler::{Action, Compiler};
use crate::fs_abstraction::real_fs;
use crate::lock::LockGuard;
use crate::ports::PortsRegistry;

/// Run the make-rules command
pub fn run(action: Action, output_dir: &Path, services_file: &Path) -> Result<()> {
    let registry = PortsRegistry::load(services_file)
        .with_context(|| format!("Failed to load services from {:?}", services_file))?;

    if action == Action::Clean && !output_dir.is_dir() {
        println!("Nothing to clean in {}", output_dir.display());
        return Ok(());
    }

    let _lock = LockGuard::acquire(output_dir)?;
    let report = Compiler::new(real_fs(), output_dir).run(action, &registry)?;

    for path in &report.skipped {
        println!("Manually created file exists: {}", path.display());
    }
    match action {
        Action::Create => println!(
            "Wrote {} rule files to {}",
            report.written.len(),
            output_dir.display()
        ),
        Action::Clean => println!(
            "Removed {} rule files from {}",
            report.removed.len(),
            output_dir.display()
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_then_clean() {
        let dir = TempDir::new().unwrap();
        let services = dir.path().join("services");
        std::fs::write(&services, "ssh 22/tcp\nsmtp 25/tcp\n").unwrap();
        let out = dir.path().join("rule.d");

        run(Action::Create, &out, &services).unwrap();
        assert!(out.join("ssh.incoming").exists());
        assert!(out.join("smtp.outgoing").exists());

        run(Action::Clean, &out, &services).unwrap();
        assert!(!out.join("ssh.incoming").exists());
        // Only the directory itself is left behind.
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_services_file() {
        let dir = TempDir::new().unwrap();
        let err = run(Action::Create, dir.path(), &dir.path().join("nope")).unwrap_err();
        assert!(err.to_string().contains("Failed to load services"));
    }
}
