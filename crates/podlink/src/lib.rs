//! podlink: an MCP tool server with a Solid OIDC login.
//!
//! The binary loads [`config::Config`], establishes a session with the
//! configured login strategy and serves the tools from [`bridge`] on stdio.

pub mod bridge;
pub mod config;
