//! IPC Layer - Unix socket admin interface
//!
//! This module provides:
//! - Message types for admin requests and responses
//! - Unix socket server run by the service
//! - Client used by the CLI subcommands

pub mod client;
pub mod messages;
pub mod server;

pub use client::{IpcClient, IpcClientConfig};
pub use messages::{AdminError, AdminRequest, AdminResponse, ErrorCode, Methods};
pub use server::{IpcServer, IpcServerConfig, RequestHandler};
