//! Live connection set
//!
//! An explicitly owned, cloneable handle. Every client gets its own bounded
//! outbound queue; the registry only holds the sending half. Broadcasts
//! iterate over a [`snapshot`](ConnectionRegistry::snapshot) taken under a
//! short read lock, so accepts and removals never race with delivery.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Default outbound queue depth per client
pub const DEFAULT_QUEUE_DEPTH: usize = 64;

/// Identity of one accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Registry's view of one client
#[derive(Debug, Clone)]
pub struct ClientHandle {
    /// Connection identity
    pub id: ConnectionId,
    /// Peer address
    pub addr: SocketAddr,
    /// When the connection was accepted
    pub connected_at: Instant,
    outbound: mpsc::Sender<Arc<str>>,
}

impl ClientHandle {
    /// Queue a serialized message without waiting
    pub fn try_deliver(&self, message: Arc<str>) -> Result<(), TrySendError<Arc<str>>> {
        self.outbound.try_send(message)
    }
}

struct Inner {
    clients: RwLock<HashMap<ConnectionId, ClientHandle>>,
    next_id: AtomicU64,
    queue_depth: usize,
}

/// Shared set of live connections
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<Inner>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH)
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("clients", &self.len())
            .field("queue_depth", &self.inner.queue_depth)
            .finish()
    }
}

impl ConnectionRegistry {
    /// Empty registry whose clients get `queue_depth`-deep queues
    pub fn new(queue_depth: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                clients: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                queue_depth: queue_depth.max(1),
            }),
        }
    }

    /// Add a client. `greeting` is queued before the client becomes visible
    /// to broadcasts, so it is always the first thing the client receives
    /// and no earlier hit can reach it.
    pub fn register(
        &self,
        addr: SocketAddr,
        greeting: Arc<str>,
    ) -> (ConnectionId, mpsc::Receiver<Arc<str>>) {
        let id = ConnectionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(self.inner.queue_depth);
        // Fresh queue with capacity >= 1: cannot be full.
        let _ = tx.try_send(greeting);

        let handle = ClientHandle {
            id,
            addr,
            connected_at: Instant::now(),
            outbound: tx,
        };
        self.inner.clients.write().insert(id, handle);
        (id, rx)
    }

    /// Remove a client; returns false if it was already gone.
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.inner.clients.write().remove(&id).is_some()
    }

    /// Copy of the current live set
    pub fn snapshot(&self) -> Vec<ClientHandle> {
        self.inner.clients.read().values().cloned().collect()
    }

    /// Whether `id` is live
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.inner.clients.read().contains_key(&id)
    }

    /// Number of live clients
    pub fn len(&self) -> usize {
        self.inner.clients.read().len()
    }

    /// True if nobody is connected
    pub fn is_empty(&self) -> bool {
        self.inner.clients.read().is_empty()
    }

    /// Drop every client. Their writers see a closed queue and disconnect.
    pub fn clear(&self) -> usize {
        let mut clients = self.inner.clients.write();
        let count = clients.len();
        clients.clear();
        count
    }

    /// Outbound queue depth given to new clients
    pub fn queue_depth(&self) -> usize {
        self.inner.queue_depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn test_register_queues_greeting_first() {
        let registry = ConnectionRegistry::new(4);
        let (id, mut rx) = registry.register(addr(), Arc::from("hello"));
        assert!(registry.contains(id));
        assert_eq!(rx.try_recv().unwrap().as_ref(), "hello");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_ids_are_unique() {
        let registry = ConnectionRegistry::default();
        let (a, _ra) = registry.register(addr(), Arc::from("hi"));
        let (b, _rb) = registry.register(addr(), Arc::from("hi"));
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = ConnectionRegistry::default();
        let (id, _rx) = registry.register(addr(), Arc::from("hi"));
        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let registry = ConnectionRegistry::default();
        let (id, _rx) = registry.register(addr(), Arc::from("hi"));
        let snapshot = registry.snapshot();
        registry.remove(id);
        assert_eq!(snapshot.len(), 1);
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_clear_closes_queues() {
        let registry = ConnectionRegistry::default();
        let (_id, mut rx) = registry.register(addr(), Arc::from("hi"));
        assert_eq!(registry.clear(), 1);
        assert_eq!(rx.try_recv().unwrap().as_ref(), "hi");
        assert!(matches!(
            rx.try_recv(),
            Err(tokio::sync::mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_concurrent_register_and_remove() {
        let registry = ConnectionRegistry::default();
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let (id, _rx) = registry.register(addr(), Arc::from("hi"));
                        let _ = registry.snapshot();
                        assert!(registry.remove(id));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert!(registry.is_empty());
    }
}
