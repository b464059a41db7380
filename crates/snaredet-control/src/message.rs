//! Wire messages, one JSON object per text frame

use serde::{Deserialize, Serialize};
use snaredet_core::HitEvent;

use crate::Result;

/// Default text of the greeting sent to each new client
pub const DEFAULT_GREETING: &str = "Connected to snare drum detector";

/// Message from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once, to the new client only, right after it connects
    Connected {
        /// Unix epoch milliseconds
        timestamp: i64,
        /// Human-readable greeting
        message: String,
    },
    /// Sent to every live client for each detected hit
    Hit {
        /// Unix epoch milliseconds of the frame that crossed
        timestamp: i64,
        /// Strictly increasing, starting at 1
        hit_number: u64,
        /// Envelope value at the crossing
        rms_value: f32,
        /// Threshold in effect
        threshold: f32,
    },
}

impl ServerMessage {
    /// Greeting stamped with the current time
    pub fn connected(greeting: &str) -> Self {
        ServerMessage::Connected {
            timestamp: snaredet_core::unix_millis(),
            message: greeting.to_string(),
        }
    }

    /// Serialize to the wire form
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<&HitEvent> for ServerMessage {
    fn from(event: &HitEvent) -> Self {
        ServerMessage::Hit {
            timestamp: event.timestamp_ms,
            hit_number: event.hit_number,
            rms_value: event.rms_value,
            threshold: event.threshold,
        }
    }
}
