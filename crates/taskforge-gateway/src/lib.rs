//! HTTP + WebSocket front door for the task orchestrator runtime.

pub mod auth;
pub mod config;
pub mod error;
pub mod rpc;
pub mod server;
pub mod ws;

pub use config::{AuthConfig, AuthMode, BindMode, GatewayConfig};
pub use error::GatewayError;
pub use server::{build_router, start_gateway, GatewayState};
