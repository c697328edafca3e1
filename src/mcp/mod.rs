pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

pub use client::McpClient;
pub use error::McpError;
pub use protocol::{McpRequest, McpResponse, MessageType, Params};
pub use server::{Handler, McpServer};
