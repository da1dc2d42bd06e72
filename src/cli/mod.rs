//! CLI command definitions

use clap::{Parser, Subcommand};

/// PR Sentinel - MCP agent that supervises a pull request's path to merge
///
/// By default, runs as an MCP server on stdio. The LLM client connects,
/// starts a monitor, and drives the decision loop through
/// pr_monitor_next_step.
#[derive(Parser, Debug)]
#[command(name = "pr-sentinel")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Print logs to stderr instead of the log file
    #[arg(long, global = true)]
    pub print_logs: bool,

    /// Log level
    #[arg(long, global = true, value_parser = ["DEBUG", "INFO", "WARN", "ERROR"])]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the MCP server on stdio (the default)
    Serve,

    /// Print the embedded skill document for MCP clients
    Skill(SkillArgs),

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Parser, Debug)]
pub struct SkillArgs {
    /// Print the document's install path instead of its contents
    #[arg(long)]
    pub path: bool,
}
