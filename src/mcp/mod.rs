//! MCP (Model Context Protocol) surface over the answer pipeline.
pub mod server;
pub mod tools;
