//! WebSocket server and status API
//!
//! - `/` and `/ws` upgrade to a WebSocket that receives `connected` and `hit` messages
//! - `GET /api/status` reports live clients and broadcast counters

pub mod handlers;
pub mod routes;
pub mod server;
pub mod websocket;

pub use server::{AppState, WebServer, WebServerConfig};
