//! Snare Detector Control - Event Broadcaster
//!
//! Fans detected hits out to any number of WebSocket clients:
//! - **Messages**: the `connected` and `hit` wire format
//! - **Registry**: the explicitly owned set of live connections
//! - **Broadcaster**: non-blocking fan-out with per-client queues
//! - **Web**: axum WebSocket server and status endpoint (requires `http-api`)
//!
//! ## Feature Flags
//!
//! - `http-api`: Enable the WebSocket server (requires `axum`, `tower-http`)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use snaredet_control::{hit_channel, Broadcaster, ConnectionRegistry};
//!
//! let registry = ConnectionRegistry::default();
//! let broadcaster = Broadcaster::new(registry);
//! let (handle, hits) = hit_channel(256);
//! // Give `handle` to the detection loop and run `broadcaster.run(hits, shutdown)`.
//! ```

#![allow(missing_docs)]

/// Error types
pub mod error;
/// Wire messages
pub mod message;
/// Live connection set
pub mod registry;
/// Hit fan-out
pub mod broadcaster;

#[cfg(feature = "http-api")]
/// WebSocket server
pub mod web;

// Re-exports
pub use broadcaster::{
    hit_channel, BroadcastHandle, Broadcaster, BroadcasterStats, DeliveryReport, StatsSnapshot,
};
pub use error::{ControlError, Result};
pub use message::ServerMessage;
pub use registry::{ClientHandle, ConnectionId, ConnectionRegistry};

#[cfg(feature = "http-api")]
pub use web::{WebServer, WebServerConfig};
