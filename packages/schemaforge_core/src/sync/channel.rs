//! The reconnecting sync channel
//!
//! One logical connection to the backing store. On every (re)connect the
//! channel probes health, fetches the authoritative document, and
//! publishes it; on any drop it backs off for a fixed interval and tries
//! again, indefinitely. Saves are single-flight: while one transmission
//! is outstanding, newer snapshots coalesce into a single pending slot
//! so an older document can never overwrite a newer one.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, Notify, RwLock};
use tokio::time::Duration;

use crate::document::SchemaDocument;

use super::transport::{StoreTransport, TransportError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events published to channel subscribers.
#[derive(Clone, Debug)]
pub enum SyncEvent {
    StateChanged(ConnectionState),
    /// The authoritative document fetched on (re)connect.
    Fetched(SchemaDocument),
    SaveCompleted {
        at: DateTime<Utc>,
    },
    SaveFailed {
        message: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Connection lost")]
    ConnectionLost,

    #[error("Request timed out")]
    Timeout,

    #[error("Remote error: {0}")]
    Remote(String),
}

impl SyncError {
    /// Timeouts count as lost connections: both trigger reconnection.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::ConnectionLost | SyncError::Timeout)
    }
}

impl From<TransportError> for SyncError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::ConnectionLost(_) => SyncError::ConnectionLost,
            TransportError::Timeout => SyncError::Timeout,
            TransportError::Remote(message) => SyncError::Remote(message),
            TransportError::Malformed(message) => SyncError::Remote(message),
        }
    }
}

/// Channel timing configuration.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Fixed wait between reconnection attempts.
    pub reconnect_backoff: Duration,
    /// How long a request may await acknowledgment before it fails.
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconnect_backoff: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
        }
    }
}

pub struct SyncChannel {
    transport: Arc<dyn StoreTransport>,
    config: SyncConfig,
    state: RwLock<ConnectionState>,
    /// Latest queued snapshot awaiting transmission.
    pending_save: Mutex<Option<SchemaDocument>>,
    /// Held for the duration of any save/finish transmission.
    transmit_gate: Mutex<()>,
    save_notify: Notify,
    disconnect_notify: Notify,
    events_tx: broadcast::Sender<SyncEvent>,
    shutdown_tx: broadcast::Sender<()>,
}

impl SyncChannel {
    pub fn new(transport: Arc<dyn StoreTransport>, config: SyncConfig) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(64);
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            transport,
            config,
            state: RwLock::new(ConnectionState::Disconnected),
            pending_save: Mutex::new(None),
            transmit_gate: Mutex::new(()),
            save_notify: Notify::new(),
            disconnect_notify: Notify::new(),
            events_tx,
            shutdown_tx,
        })
    }

    /// Subscribe to channel events. Subscribe before `start` so the
    /// initial `Fetched` is not missed.
    pub fn events(&self) -> broadcast::Receiver<SyncEvent> {
        self.events_tx.subscribe()
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Spawn the connection and save loops.
    pub fn start(self: &Arc<Self>) {
        self.spawn_connection_loop();
        self.spawn_save_loop();
    }

    async fn set_state(&self, next: ConnectionState) {
        let mut state = self.state.write().await;
        if *state != next {
            log::debug!("sync channel {:?} -> {:?}", *state, next);
            *state = next;
            let _ = self.events_tx.send(SyncEvent::StateChanged(next));
        }
    }

    async fn mark_disconnected(&self) {
        self.set_state(ConnectionState::Disconnected).await;
        self.disconnect_notify.notify_one();
    }

    /// Queue a coalescing save: replaces any not-yet-transmitted
    /// snapshot, so only the latest document goes out once the
    /// in-flight transmission (if any) completes.
    pub async fn queue_save(&self, doc: SchemaDocument) {
        *self.pending_save.lock().await = Some(doc);
        self.save_notify.notify_one();
    }

    /// Bound a transport call to the configured acknowledgment window.
    async fn with_timeout<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, TransportError>>,
    ) -> Result<T, SyncError> {
        match tokio::time::timeout(self.config.request_timeout, call).await {
            Ok(result) => result.map_err(SyncError::from),
            Err(_) => Err(SyncError::Timeout),
        }
    }

    /// Fetch the authoritative document now.
    pub async fn fetch(&self) -> Result<SchemaDocument, SyncError> {
        match self.with_timeout(self.transport.get_schema()).await {
            Ok(doc) => Ok(doc),
            Err(error) => {
                if error.is_retryable() {
                    self.mark_disconnected().await;
                }
                Err(error)
            }
        }
    }

    /// Transmit one document immediately, bypassing the queue but still
    /// holding the single-flight gate.
    pub async fn save_now(&self, doc: &SchemaDocument) -> Result<(), SyncError> {
        let _gate = self.transmit_gate.lock().await;
        self.transmit(doc).await
    }

    /// One final save followed by the finish signal. Failures are
    /// surfaced, never retried automatically.
    pub async fn finish(&self, doc: &SchemaDocument) -> Result<(), SyncError> {
        let _gate = self.transmit_gate.lock().await;
        self.transmit(doc).await?;
        match self.with_timeout(self.transport.finish()).await {
            Ok(()) => Ok(()),
            Err(error) => {
                if error.is_retryable() {
                    self.mark_disconnected().await;
                }
                Err(error)
            }
        }
    }

    async fn transmit(&self, doc: &SchemaDocument) -> Result<(), SyncError> {
        match self.with_timeout(self.transport.save_schema(doc)).await {
            Ok(()) => {
                let _ = self.events_tx.send(SyncEvent::SaveCompleted { at: Utc::now() });
                Ok(())
            }
            Err(error) => {
                let _ = self.events_tx.send(SyncEvent::SaveFailed {
                    message: error.to_string(),
                });
                if error.is_retryable() {
                    self.mark_disconnected().await;
                }
                Err(error)
            }
        }
    }

    fn spawn_connection_loop(self: &Arc<Self>) {
        let chan = Arc::clone(self);
        tokio::spawn(async move {
            let mut shutdown = chan.shutdown_tx.subscribe();
            let mut first_attempt = true;
            loop {
                if !first_attempt {
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = tokio::time::sleep(chan.config.reconnect_backoff) => {}
                    }
                }
                first_attempt = false;

                chan.set_state(ConnectionState::Connecting).await;
                let reachable =
                    tokio::time::timeout(chan.config.request_timeout, chan.transport.health())
                        .await
                        .unwrap_or(false);
                if !reachable {
                    chan.set_state(ConnectionState::Disconnected).await;
                    continue;
                }

                match chan.with_timeout(chan.transport.get_schema()).await {
                    Ok(doc) => {
                        chan.set_state(ConnectionState::Connected).await;
                        let _ = chan.events_tx.send(SyncEvent::Fetched(doc));
                    }
                    Err(error) => {
                        log::warn!("fetch after connect failed: {error}");
                        chan.set_state(ConnectionState::Disconnected).await;
                        continue;
                    }
                }

                // Resume anything queued while we were away
                chan.save_notify.notify_one();

                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = chan.disconnect_notify.notified() => {}
                }
            }
        });
    }

    fn spawn_save_loop(self: &Arc<Self>) {
        let chan = Arc::clone(self);
        tokio::spawn(async move {
            let mut shutdown = chan.shutdown_tx.subscribe();
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = chan.save_notify.notified() => {}
                }

                loop {
                    let next = chan.pending_save.lock().await.take();
                    let Some(doc) = next else { break };

                    if chan.state().await != ConnectionState::Connected {
                        // Park the snapshot; the connection loop pokes us
                        // again after the next successful reconnect.
                        let mut pending = chan.pending_save.lock().await;
                        if pending.is_none() {
                            *pending = Some(doc);
                        }
                        break;
                    }

                    let gate = chan.transmit_gate.lock().await;
                    let result = chan.transmit(&doc).await;
                    drop(gate);

                    if let Err(error) = result {
                        log::warn!("autosave failed: {error}");
                        if error.is_retryable() {
                            let mut pending = chan.pending_save.lock().await;
                            if pending.is_none() {
                                *pending = Some(doc);
                            }
                        }
                        break;
                    }
                }
            }
        });
    }
}
