//! MCP protocol: JSON-RPC over stdio plus the monitor tool surface

pub mod server;
pub mod transport;
pub mod types;

pub use server::McpServer;
pub use transport::{McpMessage, NullTransport, StdioTransport, Transport};
