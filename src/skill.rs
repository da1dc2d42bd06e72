//! The embedded skill document
//!
//! MCP clients that support skill files install this document so the
//! model knows how to drive the monitor loop. The binary embeds it:
//! `pr-sentinel skill` prints the document, `pr-sentinel skill --path`
//! prints where it should be installed.

use std::path::PathBuf;

use crate::config::Config;

/// The document shipped to clients, embedded at build time
pub const DOCUMENT: &str = include_str!("../docs/pr-monitor-skill.md");

/// Where the document is expected to live on this machine
pub fn install_path() -> PathBuf {
    Config::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("skills")
        .join("pr-monitor.md")
}
