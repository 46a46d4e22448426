//! Per-user progress fan-out for live connections.
//!
//! The transport (WebSocket upgrade, framing) lives outside this crate; it
//! registers a connection here, forwards whatever arrives on the
//! [`Subscription`] and unregisters on disconnect.

mod hub;

pub use hub::{ConnectionId, HubConfig, ProgressHub, Subscription};
