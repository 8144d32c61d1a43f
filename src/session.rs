//! Session bootstrap - create or join a collaborative session.
//!
//! The address fragment (`#<id>`) is the only signal: an empty fragment
//! creates a new session and writes its id back, a non-empty one joins.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use url::Url;

use crate::document::{Audience, SharedDocument};
use crate::error::Result;
use crate::models::SessionId;

// ============================================================================
// Address Fragment
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressFragment {
    raw: String,
}

impl AddressFragment {
    /// Parse `"#abc"`, `"abc"` or `""`.
    pub fn parse(fragment: &str) -> Self {
        Self {
            raw: fragment.strip_prefix('#').unwrap_or(fragment).to_string(),
        }
    }

    pub fn from_url(url: &Url) -> Self {
        Self::parse(url.fragment().unwrap_or(""))
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        if self.raw.is_empty() {
            None
        } else {
            Some(SessionId::new(self.raw.clone()))
        }
    }

    pub fn set(&mut self, id: &SessionId) {
        self.raw = id.as_str().to_string();
    }

    /// The shareable URL for this fragment.
    pub fn to_url(&self, base: &Url) -> Url {
        let mut url = base.clone();
        if self.raw.is_empty() {
            url.set_fragment(None);
        } else {
            url.set_fragment(Some(&self.raw));
        }
        url
    }
}

impl fmt::Display for AddressFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.raw.is_empty() {
            Ok(())
        } else {
            write!(f, "#{}", self.raw)
        }
    }
}

// ============================================================================
// Collaboration Service
// ============================================================================

/// Everything a bridge needs from an established session.
#[derive(Clone)]
pub struct SessionContext {
    pub id: SessionId,
    pub document: Arc<dyn SharedDocument>,
    pub audience: Audience,
}

/// Backend that hosts sessions.
#[async_trait]
pub trait CollabService: Send + Sync {
    /// Allocate and attach a new session.
    async fn create_container(&self) -> Result<SessionContext>;

    /// Join an existing session. Fails with `SessionNotFound` for unknown ids.
    async fn get_container(&self, id: &SessionId) -> Result<SessionContext>;
}

/// Create or join depending on the fragment. On create the fragment is
/// rewritten with the new id; on join it is left untouched.
pub async fn bootstrap<S>(fragment: &mut AddressFragment, service: &S) -> Result<SessionContext>
where
    S: CollabService + ?Sized,
{
    match fragment.session_id() {
        None => {
            let ctx = service.create_container().await?;
            fragment.set(&ctx.id);
            tracing::info!(session = %ctx.id, "created session");
            Ok(ctx)
        }
        Some(id) => {
            let ctx = service.get_container(&id).await?;
            tracing::info!(session = %ctx.id, "joined session");
            Ok(ctx)
        }
    }
}
