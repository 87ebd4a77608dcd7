//! Lifecycle tracker for submitted transactions.

use super::{ActionKey, TxEvent, TxStatus};
use crate::error::ClientError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Capacity of the event channel. Slow subscribers skip older events.
const EVENT_CAPACITY: usize = 64;

/// The current attempt in one lifecycle slot.
#[derive(Debug, Clone)]
pub struct PendingTransaction {
    pub id: Uuid,
    pub key: ActionKey,
    pub status: TxStatus,
    /// Human-readable summary, e.g. "swap 1 ETH for USDC".
    pub description: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Tracks one lifecycle slot per [`ActionKey`].
pub struct TransactionTracker {
    entries: Arc<RwLock<HashMap<ActionKey, PendingTransaction>>>,
    history: Arc<RwLock<Vec<TxEvent>>>,
    events: broadcast::Sender<TxEvent>,
}

impl TransactionTracker {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(Vec::new())),
            events,
        }
    }

    /// Claims the slot for `key` and moves it to `Submitting`.
    ///
    /// Fails with `AlreadyPending` when `key` or any of `blockers` is in
    /// flight. A terminal attempt in the slot is replaced.
    pub async fn begin(
        &self,
        key: ActionKey,
        blockers: &[ActionKey],
        description: impl Into<String>,
    ) -> Result<Uuid, ClientError> {
        let event = {
            let mut entries = self.entries.write().await;
            if let Some(busy) = std::iter::once(&key)
                .chain(blockers)
                .find(|k| entries.get(k).is_some_and(|e| e.status.is_in_flight()))
            {
                warn!(action = %key, pending = %busy, "action already pending");
                return Err(ClientError::AlreadyPending(busy.to_string()));
            }

            let now = Utc::now();
            let entry = PendingTransaction {
                id: Uuid::new_v4(),
                key,
                status: TxStatus::Submitting,
                description: description.into(),
                started_at: now,
                updated_at: now,
            };
            info!(action = %key, id = %entry.id, description = %entry.description, "submitting");
            let event = TxEvent::new(entry.id, key, TxStatus::Submitting);
            entries.insert(key, entry);
            event
        };
        let id = event.id;
        self.emit(event).await;
        Ok(id)
    }

    /// Moves attempt `id` to `status`. Ignored when the slot has since been
    /// acknowledged or claimed by a newer attempt.
    pub async fn transition(&self, key: ActionKey, id: Uuid, status: TxStatus) {
        {
            let mut entries = self.entries.write().await;
            let Some(entry) = entries.get_mut(&key).filter(|e| e.id == id) else {
                debug!(action = %key, %id, "stale lifecycle transition ignored");
                return;
            };
            entry.status = status.clone();
            entry.updated_at = Utc::now();
        }

        match &status {
            TxStatus::Confirmed { hash, block_number } => {
                info!(action = %key, ?hash, block_number, "transaction confirmed")
            }
            TxStatus::Failed { error, hash } => {
                warn!(action = %key, ?hash, error = %error, "transaction failed")
            }
            TxStatus::Unconfirmed { hash } => {
                warn!(action = %key, ?hash, "transaction not confirmed in time")
            }
            other => debug!(action = %key, status = other.label(), "transaction status"),
        }
        self.emit(TxEvent::new(id, key, status)).await;
    }

    pub async fn status(&self, key: &ActionKey) -> TxStatus {
        self.entries
            .read()
            .await
            .get(key)
            .map(|e| e.status.clone())
            .unwrap_or(TxStatus::Idle)
    }

    pub async fn entry(&self, key: &ActionKey) -> Option<PendingTransaction> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn is_in_flight(&self, key: &ActionKey) -> bool {
        self.status(key).await.is_in_flight()
    }

    /// Returns a terminal slot to `Idle`. In-flight slots are left alone.
    pub async fn acknowledge(&self, key: &ActionKey) -> bool {
        let removed = {
            let mut entries = self.entries.write().await;
            match entries.get(key) {
                Some(entry) if entry.status.is_terminal() => entries.remove(key),
                _ => None,
            }
        };
        match removed {
            Some(entry) => {
                self.emit(TxEvent::new(entry.id, *key, TxStatus::Idle)).await;
                true
            }
            None => false,
        }
    }

    /// Attempts currently submitting or confirming.
    pub async fn in_flight(&self) -> Vec<PendingTransaction> {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.status.is_in_flight())
            .cloned()
            .collect()
    }

    /// Every event emitted so far, oldest first.
    pub async fn history(&self) -> Vec<TxEvent> {
        self.history.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TxEvent> {
        self.events.subscribe()
    }

    async fn emit(&self, event: TxEvent) {
        self.history.write().await.push(event.clone());
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl Default for TransactionTracker {
    fn default() -> Self {
        Self::new()
    }
}
