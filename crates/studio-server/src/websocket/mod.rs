//! WebSocket connection management, message dispatch, and broadcasting.

pub mod connection;
pub mod handler;
pub mod registry;
pub mod session;
