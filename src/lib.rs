//! PR Sentinel - MCP agent that supervises a pull request's path to merge
//!
//! A long-running agent that watches a single GitHub pull request and drives
//! a deterministic decision loop around it. An LLM client connects over MCP
//! (JSON-RPC on stdio) and calls three tools; the agent answers with
//! directives (ask the human, execute a task, stop) and never hands control
//! flow to the model.

pub mod cli;
pub mod config;
pub mod github;
pub mod mcp;
pub mod monitor;
pub mod skill;
