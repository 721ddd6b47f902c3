//! MCP 层：服务器描述符、线上协议、HTTP/SSE 客户端、会话注册表

pub mod client;
pub mod descriptor;
pub mod memory;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod sse;
pub mod streamable;

pub use client::{HttpConnector, SseMcpSession};
pub use descriptor::{load_server_descriptors, McpConfigFile, ServerDescriptor, TransportKind};
pub use memory::{InMemoryConnector, InMemorySession};
pub use protocol::{CallToolResult, Content, Tool, ToolResultText};
pub use registry::{ConnectReport, SessionRegistry};
pub use session::{McpError, McpSession, SessionConnector};
pub use streamable::StreamableMcpSession;
