//! Opaque page cursors
//!
//! A cursor pins the ordered snapshot of task ids taken when the first page was
//! served. Next and previous cursors share that snapshot, so pages never skip
//! or repeat entries while new tasks are being created. Tokens are a random
//! cursor id plus a signature prefix; the position itself never leaves the
//! server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::error::{NexaError, Result};
use crate::types::TaskState;

const SIGNATURE_LEN: usize = 16;
/// Issuing sweeps expired cursors once per this many tokens
const PURGE_EVERY: usize = 64;

#[derive(Debug, Clone)]
pub struct PageCursor {
    pub snapshot: Arc<Vec<String>>,
    pub entity_id: String,
    pub state_filter: Option<TaskState>,
    pub offset: usize,
    pub page_size: usize,
    pub expires_at: DateTime<Utc>,
}

impl PageCursor {
    /// Ids on the page this cursor points at
    pub fn window(&self) -> &[String] {
        let start = self.offset.min(self.snapshot.len());
        let end = (self.offset + self.page_size).min(self.snapshot.len());
        &self.snapshot[start..end]
    }

    pub fn has_next(&self) -> bool {
        self.offset + self.page_size < self.snapshot.len()
    }

    pub fn has_previous(&self) -> bool {
        self.offset > 0
    }

    fn at(&self, offset: usize) -> Self {
        Self {
            offset,
            ..self.clone()
        }
    }

    pub fn next(&self) -> Option<Self> {
        self.has_next().then(|| self.at(self.offset + self.page_size))
    }

    pub fn previous(&self) -> Option<Self> {
        self.has_previous()
            .then(|| self.at(self.offset.saturating_sub(self.page_size)))
    }
}

/// Server-side cursor table
#[derive(Debug)]
pub struct CursorStore {
    cursors: DashMap<Uuid, PageCursor>,
    secret: [u8; 32],
    ttl: Duration,
    issued: AtomicUsize,
}

impl CursorStore {
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            cursors: DashMap::new(),
            secret: rand::random(),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::minutes(10)),
            issued: AtomicUsize::new(0),
        }
    }

    /// Start a cursor over a fresh snapshot
    pub fn open(
        &self,
        snapshot: Vec<String>,
        entity_id: &str,
        state_filter: Option<TaskState>,
        page_size: usize,
    ) -> PageCursor {
        PageCursor {
            snapshot: Arc::new(snapshot),
            entity_id: entity_id.to_string(),
            state_filter,
            offset: 0,
            page_size,
            expires_at: Utc::now() + self.ttl,
        }
    }

    /// Store a cursor and hand back its opaque token. Issuing refreshes the
    /// expiry of the shared snapshot.
    pub fn issue(&self, cursor: PageCursor) -> String {
        if self.issued.fetch_add(1, Ordering::Relaxed) % PURGE_EVERY == PURGE_EVERY - 1 {
            let purged = self.purge_expired();
            if purged > 0 {
                debug!("Purged {} expired page cursors", purged);
            }
        }

        let id = Uuid::new_v4();
        let cursor = PageCursor {
            expires_at: Utc::now() + self.ttl,
            ..cursor
        };
        self.cursors.insert(id, cursor);
        format!("{}.{}", id, self.sign(&id))
    }

    pub fn resolve(&self, token: &str) -> Result<PageCursor> {
        let expired = || NexaError::PageExpired(token.to_string());
        let (id, signature) = token.split_once('.').ok_or_else(expired)?;
        let id = Uuid::parse_str(id).map_err(|_| expired())?;
        if signature != self.sign(&id) {
            debug!("Rejecting page link with bad signature");
            return Err(expired());
        }

        let cursor = self.cursors.get(&id).map(|c| c.clone()).ok_or_else(expired)?;
        if cursor.expires_at <= Utc::now() {
            self.cursors.remove(&id);
            return Err(expired());
        }
        Ok(cursor)
    }

    /// Drop expired cursors, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.cursors.len();
        self.cursors.retain(|_, c| c.expires_at > now);
        before - self.cursors.len()
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    fn sign(&self, id: &Uuid) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret);
        hasher.update(id.as_bytes());
        let mut signature = format!("{:x}", hasher.finalize());
        signature.truncate(SIGNATURE_LEN);
        signature
    }
}
