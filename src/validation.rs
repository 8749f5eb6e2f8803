//! Centralized validation functions for hostwall.
//!
//! This module provides unified validation for:
//! - network interface names
//! - rule and template names that end up in file names
//! - template search directories

use anyhow::{bail, Result};
use std::path::Path;

/// Longest interface name the kernel accepts (IFNAMSIZ - 1).
pub const MAX_INTERFACE_LEN: usize = 15;

/// Validate a network interface name.
///
/// # Examples
/// ```
/// use hostwall::validation::validate_interface;
/// assert!(validate_interface("eth0").is_ok());
/// assert!(validate_interface("br-lan.10").is_ok());
/// assert!(validate_interface("eth0; reboot").is_err());
/// ```
pub fn validate_interface(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("Interface name cannot be empty");
    }
    if name.len() > MAX_INTERFACE_LEN {
        bail!(
            "Interface name '{}' is longer than {} characters",
            name,
            MAX_INTERFACE_LEN
        );
    }
    if name == "." || name == ".." {
        bail!("Invalid interface name '{}'", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | ':'))
    {
        bail!(
            "Invalid interface name '{}'. Only letters, digits and -_.@: allowed",
            name
        );
    }
    Ok(())
}

/// Validate a rule or template name before it is joined onto a directory.
///
/// # Examples
/// ```
/// use hostwall::validation::validate_rule_name;
/// assert!(validate_rule_name("smtp").is_ok());
/// assert!(validate_rule_name("8080").is_ok());
/// assert!(validate_rule_name("../../etc/passwd").is_err());
/// ```
pub fn validate_rule_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("Rule name cannot be empty");
    }
    if name.starts_with('.') || name.contains('/') || name.contains('\0') {
        bail!("Invalid rule name '{}'", name);
    }
    if name.chars().any(char::is_whitespace) {
        bail!("Rule name '{}' cannot contain whitespace", name);
    }
    Ok(())
}

/// Validate a template search directory.
pub fn validate_template_dir(dir: &Path) -> Result<()> {
    if dir.as_os_str().is_empty() {
        bail!("Template directory cannot be empty");
    }
    if !dir.is_absolute() {
        bail!("Template directory must be an absolute path: {}", dir.display());
    }
    Ok(())
}
