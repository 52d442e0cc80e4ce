//! Editor session: draft store + reconciliation + autosave
//!
//! `EditorSession` is the single owner of document mutation. Committed
//! edits flow through the reconciliation engine into the draft store and
//! then trigger a coalesced autosave on the sync channel. Save failures
//! surface as a status flag; the local draft is never rolled back.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::draft::DraftStore;
use crate::reconcile::{apply_command, EditCommand, ReconcileError};
use crate::sync::{SyncChannel, SyncError, SyncEvent};

/// The user-visible outcome of the most recent save attempt.
#[derive(Clone, Debug, PartialEq)]
pub enum SaveStatus {
    /// Nothing committed yet.
    Idle,
    /// A save is queued or in flight.
    Pending,
    Saved { at: DateTime<Utc> },
    Failed { message: String },
}

pub struct EditorSession {
    store: Arc<DraftStore>,
    channel: Arc<SyncChannel>,
    save_status: RwLock<SaveStatus>,
    /// Serializes commits so edits apply in the order they were made.
    edit_gate: Mutex<()>,
    shutdown_tx: broadcast::Sender<()>,
}

impl EditorSession {
    pub fn new(store: Arc<DraftStore>, channel: Arc<SyncChannel>) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            store,
            channel,
            save_status: RwLock::new(SaveStatus::Idle),
            edit_gate: Mutex::new(()),
            shutdown_tx,
        })
    }

    pub fn store(&self) -> &Arc<DraftStore> {
        &self.store
    }

    pub async fn save_status(&self) -> SaveStatus {
        self.save_status.read().await.clone()
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Start consuming channel events. Call before `SyncChannel::start`
    /// so the initial fetch is not missed.
    pub fn start(self: &Arc<Self>) {
        let session = Arc::clone(self);
        let mut events = self.channel.events();
        let mut shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    event = events.recv() => match event {
                        Ok(SyncEvent::Fetched(doc)) => {
                            session.store.load(doc).await;
                        }
                        Ok(SyncEvent::SaveCompleted { at }) => {
                            *session.save_status.write().await = SaveStatus::Saved { at };
                        }
                        Ok(SyncEvent::SaveFailed { message }) => {
                            log::warn!("last save failed: {message}");
                            *session.save_status.write().await = SaveStatus::Failed { message };
                        }
                        Ok(SyncEvent::StateChanged(_)) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            log::warn!("session event consumer lagged by {skipped} events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
    }

    /// Merge a committed edit into the draft and queue an autosave.
    ///
    /// A rejected merge leaves the draft untouched; the caller keeps the
    /// in-flight UI edit for correction.
    pub async fn commit(&self, command: EditCommand) -> Result<(), ReconcileError> {
        let _gate = self.edit_gate.lock().await;

        let snapshot = self.store.current_snapshot().await;
        let merged = apply_command(&snapshot, &command)?;
        self.store
            .apply_reconciled(merged)
            .await
            .map_err(ReconcileError::InvalidDocument)?;

        *self.save_status.write().await = SaveStatus::Pending;
        self.channel
            .queue_save(self.store.current_snapshot().await)
            .await;
        Ok(())
    }

    /// Final synchronous save plus the finish signal. On failure the
    /// operator must re-trigger; nothing retries automatically.
    pub async fn finish(&self) -> Result<(), SyncError> {
        let doc = self.store.current_snapshot().await;
        self.channel.finish(&doc).await
    }
}
