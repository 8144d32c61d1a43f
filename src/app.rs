//! Grid app lifecycle.
//!
//! Owns the local grid, the address fragment and the sync bridge. Mounting
//! starts the session bootstrap as a task bound to the app; unmounting cancels
//! it and tears the bridge down, so a late bootstrap never touches the grid.

use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bridge::{BridgeState, GridView, LocalGrid, SyncBridge};
use crate::document::Audience;
use crate::error::Result;
use crate::models::{default_rows, GridSnapshot, SessionId};
use crate::session::{bootstrap, AddressFragment, CollabService, SessionContext};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapStatus {
    NotStarted,
    Pending,
    Connected(SessionId),
    /// Bootstrap failed; the grid stays local-only
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Mounted,
    Unmounted,
}

struct Lifecycle {
    phase: Phase,
    bootstrap: Option<JoinHandle<()>>,
    session: Option<SessionContext>,
}

pub struct GridApp<S: CollabService + 'static> {
    service: Arc<S>,
    grid: Arc<LocalGrid>,
    bridge: Arc<SyncBridge<LocalGrid>>,
    fragment: Arc<Mutex<AddressFragment>>,
    lifecycle: Arc<Mutex<Lifecycle>>,
    status: watch::Sender<BootstrapStatus>,
}

impl<S: CollabService + 'static> GridApp<S> {
    pub fn new(service: Arc<S>, fragment: AddressFragment) -> Self {
        Self::with_rows(service, fragment, default_rows())
    }

    pub fn with_rows(service: Arc<S>, fragment: AddressFragment, rows: GridSnapshot) -> Self {
        let grid = Arc::new(LocalGrid::new(rows));
        let (status, _) = watch::channel(BootstrapStatus::NotStarted);
        Self {
            service,
            bridge: SyncBridge::new(grid.clone()),
            grid,
            fragment: Arc::new(Mutex::new(fragment)),
            lifecycle: Arc::new(Mutex::new(Lifecycle {
                phase: Phase::Idle,
                bootstrap: None,
                session: None,
            })),
            status,
        }
    }

    pub fn grid(&self) -> &Arc<LocalGrid> {
        &self.grid
    }

    pub fn bridge(&self) -> &Arc<SyncBridge<LocalGrid>> {
        &self.bridge
    }

    pub fn rows(&self) -> GridSnapshot {
        self.grid.row_snapshot()
    }

    pub fn fragment(&self) -> AddressFragment {
        self.fragment.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn bridge_state(&self) -> BridgeState {
        self.bridge.state()
    }

    pub fn status(&self) -> BootstrapStatus {
        self.status.borrow().clone()
    }

    /// Membership feed of the joined session, if any.
    pub fn audience(&self) -> Option<Audience> {
        self.lock()
            .session
            .as_ref()
            .map(|ctx| ctx.audience.clone())
    }

    /// Connected peers, 0 until a session is joined.
    pub fn viewer_count(&self) -> usize {
        self.audience().map(|a| a.member_count()).unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start the session bootstrap. Calling it again is a no-op.
    pub fn mount(&self) {
        let mut lifecycle = self.lock();
        if lifecycle.phase != Phase::Idle {
            return;
        }
        lifecycle.phase = Phase::Mounted;
        self.status.send_replace(BootstrapStatus::Pending);

        let service = self.service.clone();
        let bridge = self.bridge.clone();
        let fragment = self.fragment.clone();
        let shared = self.lifecycle.clone();
        let status = self.status.clone();

        lifecycle.bootstrap = Some(tokio::spawn(async move {
            let mut target = fragment.lock().unwrap_or_else(|e| e.into_inner()).clone();
            let result = bootstrap(&mut target, service.as_ref()).await;

            let ctx = {
                let mut lifecycle = shared.lock().unwrap_or_else(|e| e.into_inner());
                if lifecycle.phase != Phase::Mounted {
                    tracing::debug!("ignoring bootstrap that completed after unmount");
                    return;
                }
                match result {
                    Ok(ctx) => {
                        *fragment.lock().unwrap_or_else(|e| e.into_inner()) = target;
                        lifecycle.session = Some(ctx.clone());
                        ctx
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "session bootstrap failed, edits stay local");
                        status.send_replace(BootstrapStatus::Failed(e.to_string()));
                        return;
                    }
                }
            };

            match bridge.attach(&ctx).await {
                Ok(()) => {
                    status.send_replace(BootstrapStatus::Connected(ctx.id.clone()));
                }
                Err(e) => {
                    tracing::warn!(session = %ctx.id, error = %e, "failed to attach bridge");
                    shared.lock().unwrap_or_else(|e| e.into_inner()).session = None;
                    status.send_replace(BootstrapStatus::Failed(e.to_string()));
                }
            }
        }));
    }

    /// Wait until the bootstrap has connected, failed or been cancelled.
    /// Settled states are final, so the current status is the settled one.
    pub async fn settled(&self) -> BootstrapStatus {
        let mut rx = self.status.subscribe();
        if rx
            .wait_for(|s| !matches!(s, BootstrapStatus::NotStarted | BootstrapStatus::Pending))
            .await
            .is_err()
        {
            tracing::debug!("bootstrap status channel closed");
        }
        self.status()
    }

    /// Commit a cell edit and propagate the full snapshot. Returns whether the
    /// edit reached the shared document.
    pub async fn edit_cell(
        &self,
        row_index: usize,
        field: &str,
        value: serde_json::Value,
    ) -> Result<bool> {
        match self.grid.set_cell(row_index, field, value)? {
            Some(event) => self.bridge.on_cell_value_changed(&event).await,
            None => Ok(false),
        }
    }

    /// Cancel an in-flight bootstrap and stop syncing.
    pub fn unmount(&self) {
        let mut lifecycle = self.lock();
        if lifecycle.phase == Phase::Unmounted {
            return;
        }
        lifecycle.phase = Phase::Unmounted;
        if let Some(task) = lifecycle.bootstrap.take() {
            task.abort();
        }
        self.bridge.teardown();
        lifecycle.session = None;

        if matches!(
            *self.status.borrow(),
            BootstrapStatus::NotStarted | BootstrapStatus::Pending
        ) {
            self.status.send_replace(BootstrapStatus::Cancelled);
        }
    }
}

impl<S: CollabService + 'static> Drop for GridApp<S> {
    fn drop(&mut self) {
        self.unmount();
    }
}
