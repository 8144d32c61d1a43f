//! Sync bridge - keeps a grid view and a shared document in step.
//!
//! Two one-directional flows:
//!
//! - local edit -> the full row snapshot is written under [`GRID_DATA_KEY`]
//! - remote change -> the stored snapshot replaces the view's rows wholesale
//!
//! Every write is tagged with the bridge's peer id, so notifications caused by
//! the bridge's own writes are recognized and skipped.

use futures_util::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::task::JoinHandle;

use crate::document::{next_peer_id, ChangeOrigin, ChangeStream, DocumentChange, PeerId, SharedDocument};
use crate::error::{Result, SyncError};
use crate::models::{
    decode_snapshot, default_columns, encode_snapshot, ColumnDef, GridSnapshot, GRID_DATA_KEY,
};
use crate::session::SessionContext;

// ============================================================================
// Grid View
// ============================================================================

/// What the bridge needs from the UI grid.
pub trait GridView: Send + Sync + 'static {
    /// Every currently displayed row, in display order.
    fn row_snapshot(&self) -> GridSnapshot;

    /// Replace the displayed rows wholesale.
    fn set_row_data(&self, rows: GridSnapshot);
}

/// Emitted when a cell edit is committed.
#[derive(Debug, Clone, PartialEq)]
pub struct CellValueChanged {
    pub row_index: usize,
    pub field: String,
    pub old_value: Option<serde_json::Value>,
    pub new_value: serde_json::Value,
}

/// In-memory grid: rows plus column configuration.
pub struct LocalGrid {
    rows: RwLock<GridSnapshot>,
    columns: Vec<ColumnDef>,
    renders: AtomicUsize,
}

impl LocalGrid {
    pub fn new(rows: GridSnapshot) -> Self {
        Self::with_columns(rows, default_columns())
    }

    pub fn with_columns(rows: GridSnapshot, columns: Vec<ColumnDef>) -> Self {
        Self {
            rows: RwLock::new(rows),
            columns,
            renders: AtomicUsize::new(0),
        }
    }

    /// How many times the rows were replaced from outside.
    pub fn render_count(&self) -> usize {
        self.renders.load(Ordering::Relaxed)
    }

    /// Commit a cell edit. Returns None when the row does not exist, the
    /// column is not editable, or the value did not change.
    pub fn set_cell(
        &self,
        row_index: usize,
        field: &str,
        value: serde_json::Value,
    ) -> Result<Option<CellValueChanged>> {
        if !self.columns.iter().any(|c| c.field == field && c.editable) {
            return Ok(None);
        }

        let mut rows = self.rows.write().unwrap_or_else(|e| e.into_inner());
        let row = match rows.get_mut(row_index) {
            Some(r) => r,
            None => return Ok(None),
        };

        let old_value = row.field(field);
        if old_value.as_ref() == Some(&value) {
            return Ok(None);
        }

        *row = row.with_field(field, value.clone())?;
        Ok(Some(CellValueChanged {
            row_index,
            field: field.to_string(),
            old_value,
            new_value: value,
        }))
    }
}

impl GridView for LocalGrid {
    fn row_snapshot(&self) -> GridSnapshot {
        self.rows.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_row_data(&self, rows: GridSnapshot) {
        *self.rows.write().unwrap_or_else(|e| e.into_inner()) = rows;
        self.renders.fetch_add(1, Ordering::Relaxed);
    }
}

// ============================================================================
// Bridge
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Uninitialized,
    Subscribing,
    Active,
    TornDown,
}

impl BridgeState {
    pub fn name(&self) -> &'static str {
        match self {
            BridgeState::Uninitialized => "uninitialized",
            BridgeState::Subscribing => "subscribing",
            BridgeState::Active => "active",
            BridgeState::TornDown => "torn-down",
        }
    }
}

/// Result of handling one change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteApply {
    Applied,
    /// Our own write coming back
    SelfWrite,
    OtherKey,
    /// No value stored yet
    Missing,
    Malformed,
    /// Not attached, or already torn down
    Inactive,
}

struct Attachment {
    state: BridgeState,
    document: Option<Arc<dyn SharedDocument>>,
    listener: Option<JoinHandle<()>>,
}

pub struct SyncBridge<V: GridView> {
    id: PeerId,
    view: Arc<V>,
    attachment: Mutex<Attachment>,
}

impl<V: GridView> SyncBridge<V> {
    pub fn new(view: Arc<V>) -> Arc<Self> {
        Arc::new(Self {
            id: next_peer_id(),
            view,
            attachment: Mutex::new(Attachment {
                state: BridgeState::Uninitialized,
                document: None,
                listener: None,
            }),
        })
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn state(&self) -> BridgeState {
        self.lock().state
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Attachment> {
        self.attachment.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn active_document(&self) -> Option<Arc<dyn SharedDocument>> {
        let attachment = self.lock();
        match attachment.state {
            BridgeState::Active => attachment.document.clone(),
            _ => None,
        }
    }

    /// Bind to a session's document: subscribe, render what is stored, then
    /// listen for changes until [`teardown`](Self::teardown).
    pub async fn attach(self: &Arc<Self>, ctx: &SessionContext) -> Result<()> {
        {
            let mut attachment = self.lock();
            if attachment.state != BridgeState::Uninitialized {
                return Err(SyncError::InvalidState {
                    expected: BridgeState::Uninitialized.name(),
                    found: attachment.state.name(),
                });
            }
            attachment.state = BridgeState::Subscribing;
            attachment.document = Some(ctx.document.clone());
        }

        // Subscribe before the initial read so nothing written in between is lost
        let changes = ctx.document.subscribe();

        let stored = match ctx.document.get(GRID_DATA_KEY).await {
            Ok(stored) => stored,
            Err(e) => {
                self.teardown();
                return Err(e);
            }
        };
        match stored {
            Some(value) => match decode_snapshot(&value) {
                Ok(rows) => self.view.set_row_data(rows),
                Err(e) => tracing::debug!(error = %e, "ignoring malformed initial grid data"),
            },
            None => tracing::debug!(session = %ctx.id, "no grid data stored yet"),
        }

        let mut attachment = self.lock();
        if attachment.state != BridgeState::Subscribing {
            // Torn down while reading
            return Ok(());
        }
        attachment.state = BridgeState::Active;
        attachment.listener = Some(Self::spawn_listener(Arc::downgrade(self), changes));
        tracing::debug!(bridge = self.id, session = %ctx.id, "bridge active");
        Ok(())
    }

    fn spawn_listener(bridge: Weak<Self>, mut changes: ChangeStream) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(change) = changes.next().await {
                let Some(active) = bridge.upgrade() else {
                    break;
                };
                if let Err(e) = active.on_value_changed(&change).await {
                    tracing::warn!(bridge = active.id, error = %e, "failed to apply remote change");
                }
            }
        })
    }

    /// Local -> shared. Writes the full current snapshot, not just the edited cell.
    /// Returns false when the bridge is not active and nothing was written.
    pub async fn on_cell_value_changed(&self, event: &CellValueChanged) -> Result<bool> {
        tracing::debug!(
            bridge = self.id,
            row = event.row_index,
            field = %event.field,
            "cell value changed"
        );
        self.push_snapshot().await
    }

    /// Write the view's rows into the shared document.
    pub async fn push_snapshot(&self) -> Result<bool> {
        let Some(document) = self.active_document() else {
            return Ok(false);
        };
        let value = encode_snapshot(&self.view.row_snapshot())?;
        document.set(GRID_DATA_KEY, value, self.id).await?;
        Ok(true)
    }

    /// Shared -> local. Replaces the view's rows with the stored snapshot.
    pub async fn on_value_changed(&self, change: &DocumentChange) -> Result<RemoteApply> {
        let Some(document) = self.active_document() else {
            return Ok(RemoteApply::Inactive);
        };
        if change.key != GRID_DATA_KEY {
            return Ok(RemoteApply::OtherKey);
        }
        if change.origin(self.id) == ChangeOrigin::Local {
            return Ok(RemoteApply::SelfWrite);
        }

        let Some(value) = document.get(GRID_DATA_KEY).await? else {
            return Ok(RemoteApply::Missing);
        };
        let rows = match decode_snapshot(&value) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::debug!(bridge = self.id, error = %e, "skipping malformed grid data");
                return Ok(RemoteApply::Malformed);
            }
        };

        if self.state() != BridgeState::Active {
            return Ok(RemoteApply::Inactive);
        }
        self.view.set_row_data(rows);
        Ok(RemoteApply::Applied)
    }

    /// Stop listening. Later notifications and edits are ignored.
    pub fn teardown(&self) {
        let mut attachment = self.lock();
        if attachment.state == BridgeState::TornDown {
            return;
        }
        attachment.state = BridgeState::TornDown;
        attachment.document = None;
        if let Some(listener) = attachment.listener.take() {
            listener.abort();
        }
        tracing::debug!(bridge = self.id, "bridge torn down");
    }
}

impl<V: GridView> Drop for SyncBridge<V> {
    fn drop(&mut self) {
        if let Some(listener) = self.lock().listener.take() {
            listener.abort();
        }
    }
}
