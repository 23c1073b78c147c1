//! # collab-gateway
//!
//! WebSocket gateway for realtime document collaboration. Each connection
//! joins one room; updates flow client -> room stream -> every gateway ->
//! every room peer. The gateway holds no authoritative document state: it
//! can be restarted, load-balanced and scaled out freely.

pub mod connection;
pub mod server;
pub mod subscription;

pub use server::{create_app, create_gateway_state, create_gateway_state_with_storage, run, GatewayState};
