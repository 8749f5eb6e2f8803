//! CLI command implementations.

pub mod generate;
pub mod make_rules;
pub mod render;
pub mod scan;
pub mod wtmp;
