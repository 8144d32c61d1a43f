//! Shared document abstraction.
//!
//! A shared document is a key-value object that every peer of a session reads
//! and writes. Writes carry the id of the peer that produced them so that a
//! subscriber can tell its own writes apart from true remote updates.

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio::sync::{broadcast, watch};

use crate::error::Result;

/// Identifies one writer (a bridge or a WebSocket connection).
pub type PeerId = u64;

/// Global peer ID counter. Zero is reserved for system messages.
static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_peer_id() -> PeerId {
    NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed)
}

/// Where a change came from, relative to the peer observing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Written by the observing peer itself
    Local,
    /// Written by some other peer
    Remote,
}

/// Notification that the value under `key` was overwritten by `writer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChange {
    pub key: String,
    pub writer: PeerId,
}

impl DocumentChange {
    pub fn origin(&self, observer: PeerId) -> ChangeOrigin {
        if self.writer == observer {
            ChangeOrigin::Local
        } else {
            ChangeOrigin::Remote
        }
    }
}

pub type ChangeStream = BoxStream<'static, DocumentChange>;

#[async_trait]
pub trait SharedDocument: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Overwrite `key` wholesale and notify every subscriber, including the writer.
    async fn set(&self, key: &str, value: serde_json::Value, writer: PeerId) -> Result<()>;

    /// Change feed. Dropping the stream unsubscribes.
    fn subscribe(&self) -> ChangeStream;
}

/// Turn a broadcast receiver into a change stream, skipping over lag.
pub(crate) fn broadcast_stream<T, F>(rx: broadcast::Receiver<T>, map: F) -> ChangeStream
where
    T: Clone + Send + 'static,
    F: Fn(T) -> Option<DocumentChange> + Send + 'static,
{
    stream::unfold((rx, map), |(mut rx, map)| async move {
        loop {
            match rx.recv().await {
                Ok(msg) => {
                    if let Some(change) = map(msg) {
                        return Some((change, (rx, map)));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "change feed lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

// ============================================================================
// In-memory document
// ============================================================================

/// A process-local shared document. Used for tests and single-process setups.
pub struct InMemoryDocument {
    values: RwLock<HashMap<String, serde_json::Value>>,
    tx: broadcast::Sender<DocumentChange>,
}

impl InMemoryDocument {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self {
            values: RwLock::new(HashMap::new()),
            tx,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for InMemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedDocument for InMemoryDocument {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: serde_json::Value, writer: PeerId) -> Result<()> {
        {
            let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
            values.insert(key.to_string(), value);
        }
        self.tx
            .send(DocumentChange {
                key: key.to_string(),
                writer,
            })
            .ok();
        Ok(())
    }

    fn subscribe(&self) -> ChangeStream {
        broadcast_stream(self.tx.subscribe(), Some)
    }
}

// ============================================================================
// Membership feed
// ============================================================================

/// Read-only view of how many peers are connected to a session.
#[derive(Clone)]
pub struct Audience {
    rx: watch::Receiver<usize>,
}

impl Audience {
    pub fn new(rx: watch::Receiver<usize>) -> Self {
        Self { rx }
    }

    /// An audience that never changes.
    pub fn fixed(count: usize) -> Self {
        let (_, rx) = watch::channel(count);
        Self { rx }
    }

    pub fn member_count(&self) -> usize {
        *self.rx.borrow()
    }

    /// Wait for the next join/leave. Returns None once the session is gone.
    pub async fn changed(&mut self) -> Option<usize> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_peer_ids_unique_and_nonzero() {
        let a = next_peer_id();
        let b = next_peer_id();
        assert_ne!(a, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_change_origin() {
        let change = DocumentChange {
            key: "gridData".to_string(),
            writer: 7,
        };
        assert_eq!(change.origin(7), ChangeOrigin::Local);
        assert_eq!(change.origin(8), ChangeOrigin::Remote);
    }

    #[tokio::test]
    async fn test_in_memory_get_missing() {
        let doc = InMemoryDocument::new();
        assert_eq!(doc.get("gridData").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_in_memory_set_overwrites() {
        let doc = InMemoryDocument::new();
        doc.set("gridData", json!([1, 2]), 1).await.unwrap();
        doc.set("gridData", json!([3]), 2).await.unwrap();
        assert_eq!(doc.get("gridData").await.unwrap(), Some(json!([3])));
    }

    #[tokio::test]
    async fn test_in_memory_notifies_writer_too() {
        let doc = InMemoryDocument::new();
        let mut changes = doc.subscribe();
        doc.set("gridData", json!([]), 5).await.unwrap();

        let change = changes.next().await.unwrap();
        assert_eq!(change.key, "gridData");
        assert_eq!(change.writer, 5);
        assert_eq!(change.origin(5), ChangeOrigin::Local);
    }

    #[tokio::test]
    async fn test_dropping_stream_unsubscribes() {
        let doc = InMemoryDocument::new();
        let changes = doc.subscribe();
        assert_eq!(doc.subscriber_count(), 1);
        drop(changes);
        assert_eq!(doc.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_audience_changes() {
        let (tx, rx) = watch::channel(1usize);
        let mut audience = Audience::new(rx);
        assert_eq!(audience.member_count(), 1);

        tx.send(3).unwrap();
        assert_eq!(audience.changed().await, Some(3));
        assert_eq!(audience.member_count(), 3);

        drop(tx);
        assert_eq!(audience.changed().await, None);
    }

    #[test]
    fn test_fixed_audience() {
        assert_eq!(Audience::fixed(2).member_count(), 2);
    }
}
