//! Hit fan-out
//!
//! The detector thread hands hits to a [`BroadcastHandle`] (a bounded tokio
//! channel, `try_send` only). [`Broadcaster::run`] drains that channel on the
//! runtime and copies each serialized hit into every client's own queue. A
//! full queue costs only that client the message; a closed queue removes
//! the client.

use serde::{Deserialize, Serialize};
use snaredet_core::{HitEvent, HitSink};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::message::ServerMessage;
use crate::registry::ConnectionRegistry;
use crate::Result;

/// Default depth of the detector → broadcaster channel
pub const DEFAULT_HIT_CHANNEL_CAPACITY: usize = 256;

/// Running totals
#[derive(Debug, Default)]
pub struct BroadcasterStats {
    hits_broadcast: AtomicU64,
    deliveries: AtomicU64,
    dropped_deliveries: AtomicU64,
    connections_accepted: AtomicU64,
}

/// Point-in-time copy of [`BroadcasterStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Hits fanned out
    pub hits_broadcast: u64,
    /// Messages queued to clients
    pub deliveries: u64,
    /// Messages dropped on full client queues
    pub dropped_deliveries: u64,
    /// Clients accepted since start
    pub connections_accepted: u64,
}

impl BroadcasterStats {
    /// Count an accepted client
    pub fn record_connection(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    fn record(&self, report: &DeliveryReport) {
        self.hits_broadcast.fetch_add(1, Ordering::Relaxed);
        self.deliveries
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.dropped_deliveries
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
    }

    /// Current values
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits_broadcast: self.hits_broadcast.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            dropped_deliveries: self.dropped_deliveries.load(Ordering::Relaxed),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Clients the message was queued for
    pub delivered: usize,
    /// Clients whose queue was full
    pub dropped: usize,
    /// Clients found closed and removed
    pub removed: usize,
}

/// Fans hits out to every live connection.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: ConnectionRegistry,
    stats: Arc<BroadcasterStats>,
}

impl Broadcaster {
    /// Broadcaster over `registry`
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self {
            registry,
            stats: Arc::new(BroadcasterStats::default()),
        }
    }

    /// Connection set this broadcaster delivers to
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Shared counters
    pub fn stats(&self) -> Arc<BroadcasterStats> {
        self.stats.clone()
    }

    /// Queue `event` for every client live right now. Never waits on a client.
    pub fn broadcast(&self, event: &HitEvent) -> Result<DeliveryReport> {
        let json: Arc<str> = Arc::from(ServerMessage::from(event).to_json()?);
        let mut report = DeliveryReport::default();

        for client in self.registry.snapshot() {
            match client.try_deliver(json.clone()) {
                Ok(()) => report.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    report.dropped += 1;
                    warn!(
                        "Client {} ({}) is not keeping up, dropped hit #{}",
                        client.id, client.addr, event.hit_number
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    if self.registry.remove(client.id) {
                        report.removed += 1;
                        debug!("Client {} already gone, removed", client.id);
                    }
                }
            }
        }

        self.stats.record(&report);
        debug!(
            "Hit #{} delivered to {} client(s), {} dropped, {} removed",
            event.hit_number, report.delivered, report.dropped, report.removed
        );
        Ok(report)
    }

    /// Drain `hits` until it closes or `shutdown` turns true, then drop
    /// every client.
    pub async fn run(self, mut hits: mpsc::Receiver<HitEvent>, mut shutdown: watch::Receiver<bool>) {
        info!("Broadcaster started");
        loop {
            tokio::select! {
                next = hits.recv() => match next {
                    Some(event) => {
                        if let Err(e) = self.broadcast(&event) {
                            warn!("Failed to broadcast hit #{}: {}", event.hit_number, e);
                        }
                    }
                    None => {
                        debug!("Hit channel closed");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let dropped = self.registry.clear();
        info!("Broadcaster stopped, {} client(s) dropped", dropped);
    }
}

/// Detector-side handle; implements [`HitSink`].
#[derive(Debug, Clone)]
pub struct BroadcastHandle {
    tx: mpsc::Sender<HitEvent>,
}

impl HitSink for BroadcastHandle {
    fn publish(&self, event: HitEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!("Broadcaster backlog full, dropping hit #{}", event.hit_number);
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                debug!("Broadcaster stopped, dropping hit #{}", event.hit_number);
                false
            }
        }
    }
}

/// Channel between the detection thread and [`Broadcaster::run`]
pub fn hit_channel(capacity: usize) -> (BroadcastHandle, mpsc::Receiver<HitEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (BroadcastHandle { tx }, rx)
}
