//! Session rooms - the collaboration backend.
//!
//! Each session is a room holding one key-value shared document (an Automerge
//! map with one JSON value per key), a broadcast channel for change fan-out and
//! a peer count. Rooms live in memory while peers are connected and are
//! persisted to sled.

use async_trait::async_trait;
use automerge::{transaction::Transactable, AutoCommit, ReadDoc, ScalarValue};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, RwLock};

use crate::config::Config;
use crate::document::{
    broadcast_stream, next_peer_id, Audience, ChangeStream, DocumentChange, PeerId, SharedDocument,
};
use crate::error::{Result, SyncError};
use crate::models::{SessionId, SessionMeta};
use crate::session::{CollabService, SessionContext};

// ============================================================================
// Data Structures
// ============================================================================

/// In-memory state for an active session.
pub struct GridRoom {
    pub doc: AutoCommit,
    pub meta: SessionMeta,
    pub tx: broadcast::Sender<BroadcastMsg>,
    pub audience: watch::Sender<usize>,
    pub peer_count: usize,
    /// When the room last became empty; None while peers are connected
    pub emptied_at: Option<Instant>,
    pub last_snapshot: Instant,
}

impl GridRoom {
    fn new(meta: SessionMeta, doc: AutoCommit) -> Self {
        let (tx, _) = broadcast::channel(256);
        let (audience, _) = watch::channel(0);
        Self {
            doc,
            meta,
            tx,
            audience,
            peer_count: 0,
            emptied_at: Some(Instant::now()),
            last_snapshot: Instant::now(),
        }
    }

    fn set_peer_count(&mut self, count: usize) {
        self.peer_count = count;
        self.emptied_at = if count == 0 { Some(Instant::now()) } else { None };
        self.audience.send_replace(count);
        self.tx
            .send(BroadcastMsg {
                sender_id: 0,
                kind: BroadcastKind::PeersUpdate(count),
            })
            .ok();
    }
}

#[derive(Clone, Debug)]
pub struct BroadcastMsg {
    /// Writer of the change; 0 for system messages
    pub sender_id: PeerId,
    pub kind: BroadcastKind,
}

#[derive(Clone, Debug)]
pub enum BroadcastKind {
    /// A key was overwritten with a new value
    ValueChanged {
        key: String,
        value: serde_json::Value,
    },
    /// Number of connected peers changed
    PeersUpdate(usize),
}

/// A freshly connected peer.
pub struct PeerConnection {
    pub peer_id: PeerId,
    pub rx: broadcast::Receiver<BroadcastMsg>,
    pub tx: broadcast::Sender<BroadcastMsg>,
    pub audience: watch::Receiver<usize>,
    pub peers: usize,
}

// ============================================================================
// Sled helpers
// ============================================================================

fn meta_tree(db: &sled::Db) -> Result<sled::Tree> {
    Ok(db.open_tree("sessions:meta")?)
}

fn doc_tree(db: &sled::Db, id: &SessionId) -> Result<sled::Tree> {
    Ok(db.open_tree(format!("sessions:doc:{}", id))?)
}

fn save_meta(db: &sled::Db, meta: &SessionMeta) -> Result<()> {
    let json = serde_json::to_vec(meta)?;
    meta_tree(db)?.insert(meta.id.as_str().as_bytes(), json)?;
    Ok(())
}

fn load_meta(db: &sled::Db, id: &SessionId) -> Result<Option<SessionMeta>> {
    match meta_tree(db)?.get(id.as_str().as_bytes())? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

fn save_doc_bytes(db: &sled::Db, id: &SessionId, bytes: &[u8]) -> Result<()> {
    doc_tree(db, id)?.insert("doc", bytes)?;
    Ok(())
}

fn load_doc_bytes(db: &sled::Db, id: &SessionId) -> Result<Option<Vec<u8>>> {
    Ok(doc_tree(db, id)?.get("doc")?.map(|v| v.to_vec()))
}

// ============================================================================
// Automerge helpers
// ============================================================================

/// Read the JSON value stored under `key`. Values are kept as JSON strings.
fn get_doc_value(doc: &AutoCommit, key: &str) -> Option<serde_json::Value> {
    match doc.get(automerge::ROOT, key).ok().flatten() {
        Some((automerge::Value::Scalar(scalar), _)) => match &*scalar {
            ScalarValue::Str(text) => serde_json::from_str(text.as_str()).ok(),
            _ => None,
        },
        _ => None,
    }
}

fn put_doc_value(doc: &mut AutoCommit, key: &str, value: &serde_json::Value) -> Result<()> {
    doc.put(automerge::ROOT, key, value.to_string())?;
    Ok(())
}

/// Rebuild the document from current values only, dropping overwritten history.
fn compact_doc(doc: &AutoCommit) -> Result<AutoCommit> {
    let mut fresh = AutoCommit::new();
    for key in doc.keys(automerge::ROOT) {
        if let Some(value) = get_doc_value(doc, &key) {
            put_doc_value(&mut fresh, &key, &value)?;
        }
    }
    Ok(fresh)
}

fn load_doc(bytes: &[u8], id: &SessionId) -> AutoCommit {
    AutoCommit::load(bytes).unwrap_or_else(|e| {
        tracing::warn!(session = %id, error = %e, "stored document is corrupt, starting empty");
        AutoCommit::new()
    })
}

// ============================================================================
// Registry
// ============================================================================

pub struct RoomRegistry {
    db: sled::Db,
    rooms: RwLock<HashMap<SessionId, GridRoom>>,
    snapshot_interval: Duration,
    evict_after: Duration,
}

impl RoomRegistry {
    pub fn new(db: sled::Db, snapshot_interval: Duration, evict_after: Duration) -> Arc<Self> {
        Arc::new(Self {
            db,
            rooms: RwLock::new(HashMap::new()),
            snapshot_interval,
            evict_after,
        })
    }

    pub fn open(config: &Config) -> Result<Arc<Self>> {
        let db = sled::open(&config.db_path)?;
        Ok(Self::new(db, config.snapshot_interval, config.evict_after))
    }

    /// In-process access to this registry for a [`SyncBridge`](crate::bridge::SyncBridge).
    pub fn service(self: &Arc<Self>) -> InProcessService {
        InProcessService {
            registry: self.clone(),
        }
    }

    fn load_room(&self, id: &SessionId) -> Result<GridRoom> {
        let meta = load_meta(&self.db, id)?
            .ok_or_else(|| SyncError::SessionNotFound(id.to_string()))?;
        let doc = match load_doc_bytes(&self.db, id)? {
            Some(bytes) => load_doc(&bytes, id),
            None => AutoCommit::new(),
        };
        Ok(GridRoom::new(meta, doc))
    }

    fn persist_room(&self, room: &mut GridRoom) -> Result<()> {
        room.doc = compact_doc(&room.doc)?;
        let bytes = room.doc.save();
        save_doc_bytes(&self.db, &room.meta.id, &bytes)?;
        save_meta(&self.db, &room.meta)?;
        room.last_snapshot = Instant::now();
        Ok(())
    }

    /// Allocate a new, empty session. It is evicted again if nobody joins.
    pub async fn create_room(self: &Arc<Self>) -> Result<SessionId> {
        let id = SessionId::generate();
        let mut room = GridRoom::new(SessionMeta::new(id.clone()), AutoCommit::new());
        self.persist_room(&mut room)?;

        self.rooms.write().await.insert(id.clone(), room);
        tracing::info!(session = %id, "room created");
        self.schedule_eviction(id.clone());
        Ok(id)
    }

    fn schedule_eviction(self: &Arc<Self>, id: SessionId) {
        let registry = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(registry.evict_after).await;
            if let Err(e) = registry.evict_if_idle(&id).await {
                tracing::warn!(session = %id, error = %e, "failed to evict room");
            }
        });
    }

    pub async fn exists(&self, id: &SessionId) -> Result<bool> {
        if self.rooms.read().await.contains_key(id) {
            return Ok(true);
        }
        Ok(load_meta(&self.db, id)?.is_some())
    }

    pub async fn is_loaded(&self, id: &SessionId) -> bool {
        self.rooms.read().await.contains_key(id)
    }

    pub async fn peer_count(&self, id: &SessionId) -> usize {
        self.rooms
            .read()
            .await
            .get(id)
            .map(|r| r.peer_count)
            .unwrap_or(0)
    }

    /// Join a session as a new peer. Existing peers are told the new count;
    /// the joining peer gets it in the returned connection.
    pub async fn connect(&self, id: &SessionId) -> Result<PeerConnection> {
        let mut rooms = self.rooms.write().await;
        if !rooms.contains_key(id) {
            let room = self.load_room(id)?;
            rooms.insert(id.clone(), room);
        }
        let room = rooms
            .get_mut(id)
            .ok_or_else(|| SyncError::SessionNotFound(id.to_string()))?;

        let count = room.peer_count + 1;
        room.set_peer_count(count);

        let peer_id = next_peer_id();
        tracing::info!(session = %id, peer = peer_id, peers = count, "peer connected");
        Ok(PeerConnection {
            peer_id,
            rx: room.tx.subscribe(),
            tx: room.tx.clone(),
            audience: room.audience.subscribe(),
            peers: count,
        })
    }

    /// Leave a session. Empty rooms are evicted after the grace period.
    pub async fn disconnect(self: &Arc<Self>, id: &SessionId, peer_id: PeerId) -> Result<()> {
        let now_empty = {
            let mut rooms = self.rooms.write().await;
            let Some(room) = rooms.get_mut(id) else {
                return Ok(());
            };
            let count = room.peer_count.saturating_sub(1);
            room.set_peer_count(count);
            self.persist_room(room)?;
            tracing::info!(session = %id, peer = peer_id, peers = count, "peer disconnected");
            count == 0
        };

        if now_empty {
            self.schedule_eviction(id.clone());
        }
        Ok(())
    }

    /// Persist and drop the room if it has been empty for the whole grace
    /// period. Returns whether it was evicted.
    pub async fn evict_if_idle(&self, id: &SessionId) -> Result<bool> {
        let mut rooms = self.rooms.write().await;
        match rooms.get_mut(id) {
            Some(room)
                if room.peer_count == 0
                    && room
                        .emptied_at
                        .is_some_and(|t| t.elapsed() >= self.evict_after) =>
            {
                self.persist_room(room)?;
                rooms.remove(id);
                tracing::debug!(session = %id, "room evicted");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Current value under `key`, from memory or from sled.
    pub async fn get_value(&self, id: &SessionId, key: &str) -> Result<Option<serde_json::Value>> {
        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(id) {
                return Ok(get_doc_value(&room.doc, key));
            }
        }
        let room = self.load_room(id)?;
        Ok(get_doc_value(&room.doc, key))
    }

    /// Overwrite `key` and notify every peer, the writer included.
    pub async fn set_value(
        &self,
        id: &SessionId,
        key: &str,
        value: serde_json::Value,
        writer: PeerId,
    ) -> Result<()> {
        let mut rooms = self.rooms.write().await;
        match rooms.get_mut(id) {
            Some(room) => self.write_value(room, key, value, writer),
            None => {
                // Nobody is connected: write straight through to sled
                let mut room = self.load_room(id)?;
                self.write_value(&mut room, key, value, writer)?;
                self.persist_room(&mut room)
            }
        }
    }

    fn write_value(
        &self,
        room: &mut GridRoom,
        key: &str,
        value: serde_json::Value,
        writer: PeerId,
    ) -> Result<()> {
        put_doc_value(&mut room.doc, key, &value)?;
        room.meta.updated_at = Utc::now();

        room.tx
            .send(BroadcastMsg {
                sender_id: writer,
                kind: BroadcastKind::ValueChanged {
                    key: key.to_string(),
                    value,
                },
            })
            .ok();

        // Periodic sled snapshot
        if room.last_snapshot.elapsed() >= self.snapshot_interval {
            self.persist_room(room)?;
        }
        Ok(())
    }
}

// ============================================================================
// In-process collaboration
// ============================================================================

/// A shared document handle for one peer connected to a room.
pub struct RoomDocument {
    registry: Arc<RoomRegistry>,
    id: SessionId,
    peer_id: PeerId,
    tx: broadcast::Sender<BroadcastMsg>,
}

#[async_trait]
impl SharedDocument for RoomDocument {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.registry.get_value(&self.id, key).await
    }

    async fn set(&self, key: &str, value: serde_json::Value, writer: PeerId) -> Result<()> {
        self.registry.set_value(&self.id, key, value, writer).await
    }

    fn subscribe(&self) -> ChangeStream {
        broadcast_stream(self.tx.subscribe(), |msg: BroadcastMsg| match msg.kind {
            BroadcastKind::ValueChanged { key, .. } => Some(DocumentChange {
                key,
                writer: msg.sender_id,
            }),
            BroadcastKind::PeersUpdate(_) => None,
        })
    }
}

impl Drop for RoomDocument {
    fn drop(&mut self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let registry = self.registry.clone();
        let id = self.id.clone();
        let peer_id = self.peer_id;
        handle.spawn(async move {
            if let Err(e) = registry.disconnect(&id, peer_id).await {
                tracing::warn!(session = %id, error = %e, "failed to disconnect peer");
            }
        });
    }
}

/// [`CollabService`] backed directly by a [`RoomRegistry`] in this process.
#[derive(Clone)]
pub struct InProcessService {
    registry: Arc<RoomRegistry>,
}

impl InProcessService {
    async fn join(&self, id: SessionId) -> Result<SessionContext> {
        let conn = self.registry.connect(&id).await?;
        let document = RoomDocument {
            registry: self.registry.clone(),
            id: id.clone(),
            peer_id: conn.peer_id,
            tx: conn.tx,
        };
        Ok(SessionContext {
            id,
            document: Arc::new(document),
            audience: Audience::new(conn.audience),
        })
    }
}

#[async_trait]
impl CollabService for InProcessService {
    async fn create_container(&self) -> Result<SessionContext> {
        let id = self.registry.create_room().await?;
        self.join(id).await
    }

    async fn get_container(&self, id: &SessionId) -> Result<SessionContext> {
        self.join(id.clone()).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{default_rows, encode_snapshot, GRID_DATA_KEY};
    use futures_util::StreamExt;
    use serde_json::json;

    fn temp_db() -> sled::Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    fn registry() -> Arc<RoomRegistry> {
        RoomRegistry::new(temp_db(), Duration::from_secs(30), Duration::from_secs(60))
    }

    fn registry_with_grace(evict_after: Duration) -> Arc<RoomRegistry> {
        RoomRegistry::new(temp_db(), Duration::from_secs(30), evict_after)
    }

    async fn wait_for_eviction(registry: &RoomRegistry, id: &SessionId) -> bool {
        for _ in 0..200 {
            if !registry.is_loaded(id).await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    // ---- Sled helpers tests ----

    #[test]
    fn test_save_and_load_meta() {
        let db = temp_db();
        let meta = SessionMeta::new(SessionId::new("abc123"));
        save_meta(&db, &meta).unwrap();

        let loaded = load_meta(&db, &meta.id).unwrap().unwrap();
        assert_eq!(loaded.id, meta.id);
        assert_eq!(loaded.created_at, meta.created_at);
    }

    #[test]
    fn test_load_meta_not_found() {
        let db = temp_db();
        assert!(load_meta(&db, &SessionId::new("nonexistent")).unwrap().is_none());
    }

    #[test]
    fn test_save_and_load_doc_bytes() {
        let db = temp_db();
        let id = SessionId::new("abc123");
        save_doc_bytes(&db, &id, b"test document bytes").unwrap();
        assert_eq!(load_doc_bytes(&db, &id).unwrap().unwrap(), b"test document bytes");
        assert!(load_doc_bytes(&db, &SessionId::new("other")).unwrap().is_none());
    }

    // ---- Automerge helpers tests ----

    #[test]
    fn test_doc_value_roundtrip_through_save() {
        let mut doc = AutoCommit::new();
        let rows = encode_snapshot(&default_rows()).unwrap();
        put_doc_value(&mut doc, GRID_DATA_KEY, &rows).unwrap();

        let reloaded = AutoCommit::load(&doc.save()).unwrap();
        assert_eq!(get_doc_value(&reloaded, GRID_DATA_KEY), Some(rows));
    }

    #[test]
    fn test_get_doc_value_missing_or_non_string() {
        let mut doc = AutoCommit::new();
        assert_eq!(get_doc_value(&doc, GRID_DATA_KEY), None);

        doc.put(automerge::ROOT, GRID_DATA_KEY, 42_i64).unwrap();
        assert_eq!(get_doc_value(&doc, GRID_DATA_KEY), None);
    }

    #[test]
    fn test_compact_doc_keeps_current_values_only() {
        let mut doc = AutoCommit::new();
        for i in 0..100 {
            put_doc_value(&mut doc, GRID_DATA_KEY, &json!([i])).unwrap();
        }
        put_doc_value(&mut doc, "other", &json!("x")).unwrap();

        let mut compacted = compact_doc(&doc).unwrap();
        assert_eq!(get_doc_value(&compacted, GRID_DATA_KEY), Some(json!([99])));
        assert_eq!(get_doc_value(&compacted, "other"), Some(json!("x")));
        assert!(compacted.save().len() < doc.save().len());
    }

    #[test]
    fn test_load_corrupt_doc_starts_empty() {
        let doc = load_doc(b"definitely not automerge", &SessionId::new("x"));
        assert_eq!(get_doc_value(&doc, GRID_DATA_KEY), None);
    }

    // ---- Registry tests ----

    #[tokio::test]
    async fn test_create_room_is_joinable() {
        let registry = registry();
        let id = registry.create_room().await.unwrap();
        assert!(registry.exists(&id).await.unwrap());

        let conn = registry.connect(&id).await.unwrap();
        assert_eq!(conn.peers, 1);
        assert_eq!(registry.peer_count(&id).await, 1);
    }

    #[tokio::test]
    async fn test_connect_unknown_room_fails() {
        let registry = registry();
        let err = registry.connect(&SessionId::new("missing")).await.err().unwrap();
        assert!(matches!(err, SyncError::SessionNotFound(_)));
        assert!(!registry.exists(&SessionId::new("missing")).await.unwrap());
    }

    #[tokio::test]
    async fn test_peer_count_follows_connections() {
        let registry = registry();
        let id = registry.create_room().await.unwrap();

        let a = registry.connect(&id).await.unwrap();
        let mut a_rx = a.rx;
        let b = registry.connect(&id).await.unwrap();
        assert_eq!(b.peers, 2);

        // The first peer hears about the second
        let msg = a_rx.recv().await.unwrap();
        assert_eq!(msg.sender_id, 0);
        assert!(matches!(msg.kind, BroadcastKind::PeersUpdate(2)));

        registry.disconnect(&id, b.peer_id).await.unwrap();
        assert_eq!(registry.peer_count(&id).await, 1);
        assert_eq!(*a.audience.borrow(), 1);
    }

    #[tokio::test]
    async fn test_set_value_broadcasts_with_writer() {
        let registry = registry();
        let id = registry.create_room().await.unwrap();
        let mut conn = registry.connect(&id).await.unwrap();

        registry
            .set_value(&id, GRID_DATA_KEY, json!([]), conn.peer_id)
            .await
            .unwrap();

        let msg = conn.rx.recv().await.unwrap();
        assert_eq!(msg.sender_id, conn.peer_id);
        match msg.kind {
            BroadcastKind::ValueChanged { key, value } => {
                assert_eq!(key, GRID_DATA_KEY);
                assert_eq!(value, json!([]));
            }
            other => panic!("Expected ValueChanged, got {:?}", other),
        }
        assert_eq!(
            registry.get_value(&id, GRID_DATA_KEY).await.unwrap(),
            Some(json!([]))
        );
    }

    #[tokio::test]
    async fn test_last_write_wins() {
        let registry = registry();
        let id = registry.create_room().await.unwrap();
        registry.set_value(&id, GRID_DATA_KEY, json!([1]), 1).await.unwrap();
        registry.set_value(&id, GRID_DATA_KEY, json!([2]), 2).await.unwrap();
        assert_eq!(
            registry.get_value(&id, GRID_DATA_KEY).await.unwrap(),
            Some(json!([2]))
        );
    }

    #[tokio::test]
    async fn test_evict_and_reload_from_sled() {
        let registry = registry_with_grace(Duration::from_millis(10));
        let id = registry.create_room().await.unwrap();
        let rows = encode_snapshot(&default_rows()).unwrap();
        registry.set_value(&id, GRID_DATA_KEY, rows.clone(), 1).await.unwrap();

        // Created rooms that nobody joins are dropped too
        assert!(wait_for_eviction(&registry, &id).await);

        // Readable without loading, joinable again
        assert_eq!(registry.get_value(&id, GRID_DATA_KEY).await.unwrap(), Some(rows.clone()));
        registry.connect(&id).await.unwrap();
        assert!(registry.is_loaded(&id).await);
        assert_eq!(registry.get_value(&id, GRID_DATA_KEY).await.unwrap(), Some(rows));
    }

    #[tokio::test]
    async fn test_occupied_room_not_evicted() {
        let registry = registry();
        let id = registry.create_room().await.unwrap();
        let _conn = registry.connect(&id).await.unwrap();
        assert!(!registry.evict_if_idle(&id).await.unwrap());
        assert!(registry.is_loaded(&id).await);
    }

    #[tokio::test]
    async fn test_empty_room_evicted_after_grace_period() {
        let registry = registry_with_grace(Duration::from_millis(10));
        let id = registry.create_room().await.unwrap();
        let conn = registry.connect(&id).await.unwrap();
        registry.disconnect(&id, conn.peer_id).await.unwrap();

        assert!(wait_for_eviction(&registry, &id).await);
        assert!(registry.exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_grace_period_starts_at_last_disconnect() {
        let registry = registry_with_grace(Duration::from_millis(300));
        let id = registry.create_room().await.unwrap();
        let conn = registry.connect(&id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        registry.disconnect(&id, conn.peer_id).await.unwrap();

        // The timer armed at creation has fired by now
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(registry.is_loaded(&id).await);
        assert!(!registry.evict_if_idle(&id).await.unwrap());

        assert!(wait_for_eviction(&registry, &id).await);
    }

    #[tokio::test]
    async fn test_rejoin_keeps_room_loaded() {
        let registry = registry_with_grace(Duration::from_millis(50));
        let id = registry.create_room().await.unwrap();
        let first = registry.connect(&id).await.unwrap();
        registry.disconnect(&id, first.peer_id).await.unwrap();
        let _second = registry.connect(&id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(registry.is_loaded(&id).await);
        assert!(!registry.evict_if_idle(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_persisted_document_does_not_grow_with_writes() {
        let registry = registry();
        let id = registry.create_room().await.unwrap();
        let rows = default_rows();

        let conn = registry.connect(&id).await.unwrap();
        registry
            .set_value(&id, GRID_DATA_KEY, encode_snapshot(&rows).unwrap(), conn.peer_id)
            .await
            .unwrap();
        registry.disconnect(&id, conn.peer_id).await.unwrap();
        let single = load_doc_bytes(&registry.db, &id).unwrap().unwrap().len();

        let conn = registry.connect(&id).await.unwrap();
        for age in 0..200 {
            let mut edited = rows.clone();
            edited[0].age = age;
            registry
                .set_value(&id, GRID_DATA_KEY, encode_snapshot(&edited).unwrap(), conn.peer_id)
                .await
                .unwrap();
        }
        registry
            .set_value(&id, GRID_DATA_KEY, encode_snapshot(&rows).unwrap(), conn.peer_id)
            .await
            .unwrap();
        registry.disconnect(&id, conn.peer_id).await.unwrap();

        let bytes = load_doc_bytes(&registry.db, &id).unwrap().unwrap();
        assert!(bytes.len() < single * 2);
        assert_eq!(
            get_doc_value(&load_doc(&bytes, &id), GRID_DATA_KEY),
            Some(encode_snapshot(&rows).unwrap())
        );
    }

    // ---- RoomDocument / InProcessService tests ----

    #[tokio::test]
    async fn test_room_document_change_feed() {
        let registry = registry();
        let ctx = registry.service().create_container().await.unwrap();
        let mut changes = ctx.document.subscribe();

        ctx.document.set(GRID_DATA_KEY, json!([]), 77).await.unwrap();

        let change = changes.next().await.unwrap();
        assert_eq!(change, DocumentChange { key: GRID_DATA_KEY.to_string(), writer: 77 });
    }

    #[tokio::test]
    async fn test_service_join_counts_audience() {
        let registry = registry();
        let service = registry.service();
        let first = service.create_container().await.unwrap();
        assert_eq!(first.audience.member_count(), 1);

        let second = service.get_container(&first.id).await.unwrap();
        assert_eq!(second.audience.member_count(), 2);
        assert_eq!(first.audience.member_count(), 2);
    }

    #[tokio::test]
    async fn test_dropping_room_document_disconnects() {
        let registry = registry();
        let service = registry.service();
        let first = service.create_container().await.unwrap();
        let second = service.get_container(&first.id).await.unwrap();
        assert_eq!(registry.peer_count(&first.id).await, 2);

        drop(second);
        let mut count = 2;
        for _ in 0..100 {
            count = registry.peer_count(&first.id).await;
            if count == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(count, 1);
    }
}
