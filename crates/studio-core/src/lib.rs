//! # studio-core
//!
//! Foundation types shared by the studio crates:
//!
//! - [`errors`]: the [`StudioError`] taxonomy and its wire codes
//! - [`ids`]: validated client request IDs and connection IDs
//! - [`kind`]: request kinds, critique lenses, and kind inference
//! - [`content`]: the host agent's nested message content and its flattening
//! - [`bridge`]: the [`AgentBridge`] collaborator trait and its lifecycle events
//! - [`document`]: the initial-document snapshot and last-response cache entry
//! - [`logging`]: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod bridge;
pub mod content;
pub mod document;
pub mod errors;
pub mod ids;
pub mod kind;
pub mod logging;

pub use bridge::{AgentBridge, AgentEvent, BridgeError};
pub use content::{AgentMessage, ContentBlock, MessageContent, MessageRole};
pub use document::{DocumentSource, InitialDocument, LastResponse};
pub use errors::{ActionError, Result, StudioError};
pub use ids::{ConnectionId, RequestId};
pub use kind::{Lens, RequestKind, infer_kind};
