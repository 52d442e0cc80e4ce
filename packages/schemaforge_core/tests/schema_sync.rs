//! Sync lifecycle integration tests
//!
//! Drives the sync channel and editor session against a controllable
//! in-process transport (save coalescing, connection-drop recovery) and
//! against the real backing-store server over HTTP (fetch, autosave to
//! disk, finish).
//!
//! Run with:
//!   cargo test --test schema_sync

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::timeout;

use schemaforge::document::{Property, PropertyType, SchemaDocument, Section};
use schemaforge::draft::DraftStore;
use schemaforge::reconcile::{EditCommand, SectionPatch};
use schemaforge::server::SchemaServer;
use schemaforge::session::{EditorSession, SaveStatus};
use schemaforge::sync::{
    ConnectionState, HttpTransport, StoreTransport, SyncChannel, SyncConfig, SyncError, SyncEvent,
    TransportError,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn seed_document() -> SchemaDocument {
    let mut section = Section::new("General options");
    section
        .properties
        .insert("name".to_string(), Property::new(PropertyType::String));
    let mut doc = SchemaDocument::new();
    doc.sections.insert("general".to_string(), section);
    doc
}

fn titled(title: &str) -> SchemaDocument {
    let mut doc = seed_document();
    doc.title = Some(title.to_string());
    doc
}

fn fast_config() -> SyncConfig {
    SyncConfig {
        reconnect_backoff: Duration::from_millis(25),
        request_timeout: Duration::from_secs(2),
    }
}

/// Backing store double with a controllable save gate and health flag.
struct MockStore {
    doc: SchemaDocument,
    healthy: AtomicBool,
    /// Permits released by the test; each transmission consumes one.
    save_gate: Semaphore,
    gate_saves: AtomicBool,
    save_started: AtomicUsize,
    fetch_count: AtomicUsize,
    saves: Mutex<Vec<SchemaDocument>>,
}

impl MockStore {
    fn new(doc: SchemaDocument) -> Arc<Self> {
        Arc::new(Self {
            doc,
            healthy: AtomicBool::new(true),
            save_gate: Semaphore::new(0),
            gate_saves: AtomicBool::new(false),
            save_started: AtomicUsize::new(0),
            fetch_count: AtomicUsize::new(0),
            saves: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl StoreTransport for MockStore {
    async fn health(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn get_schema(&self) -> Result<SchemaDocument, TransportError> {
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionLost("store is down".to_string()));
        }
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.doc.clone())
    }

    async fn save_schema(&self, doc: &SchemaDocument) -> Result<(), TransportError> {
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionLost("store is down".to_string()));
        }
        self.save_started.fetch_add(1, Ordering::SeqCst);
        if self.gate_saves.load(Ordering::SeqCst) {
            let permit = self
                .save_gate
                .acquire()
                .await
                .map_err(|e| TransportError::ConnectionLost(e.to_string()))?;
            permit.forget();
        }
        if !self.healthy.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionLost("store is down".to_string()));
        }
        self.saves.lock().await.push(doc.clone());
        Ok(())
    }

    async fn finish(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

async fn wait_for<F, Fut>(what: &str, mut probe: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    timeout(Duration::from_secs(3), async {
        loop {
            if probe().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

async fn wait_connected(channel: &Arc<SyncChannel>) {
    wait_for("connection", || async {
        channel.state().await == ConnectionState::Connected
    })
    .await;
}

// ---------------------------------------------------------------------------
// Coalescing
// ---------------------------------------------------------------------------

/// Saves triggered while a transmission is outstanding collapse into a
/// single follow-up transmission carrying the latest snapshot.
#[tokio::test]
async fn test_saves_coalesce_to_latest_document() {
    let store = MockStore::new(seed_document());
    let channel = SyncChannel::new(store.clone() as Arc<dyn StoreTransport>, fast_config());
    channel.start();
    wait_connected(&channel).await;

    store.gate_saves.store(true, Ordering::SeqCst);

    // First save goes out and blocks on the gate
    channel.queue_save(titled("first")).await;
    wait_for("first transmission to start", || async {
        store.save_started.load(Ordering::SeqCst) == 1
    })
    .await;

    // Two more triggers arrive before the first acknowledgment
    channel.queue_save(titled("second")).await;
    channel.queue_save(titled("third")).await;

    // Release the in-flight save, then the coalesced follow-up
    store.save_gate.add_permits(1);
    wait_for("second transmission to start", || async {
        store.save_started.load(Ordering::SeqCst) == 2
    })
    .await;
    store.save_gate.add_permits(1);

    wait_for("both transmissions to complete", || async {
        store.saves.lock().await.len() == 2
    })
    .await;

    // Exactly two transmissions: the in-flight one, then only the latest
    let saves = store.saves.lock().await;
    assert_eq!(saves.len(), 2);
    assert_eq!(saves[0].title.as_deref(), Some("first"));
    assert_eq!(saves[1].title.as_deref(), Some("third"));
    assert_eq!(store.save_started.load(Ordering::SeqCst), 2);

    channel.stop();
}

// ---------------------------------------------------------------------------
// Connection loss and recovery
// ---------------------------------------------------------------------------

/// A drop during an in-flight save surfaces ConnectionLost, and after
/// the fixed backoff the channel reconnects and reissues the fetch.
#[tokio::test]
async fn test_drop_during_save_reconnects_and_refetches() {
    let store = MockStore::new(seed_document());
    let channel = SyncChannel::new(store.clone() as Arc<dyn StoreTransport>, fast_config());
    let mut events = channel.events();
    channel.start();
    wait_connected(&channel).await;
    assert_eq!(store.fetch_count.load(Ordering::SeqCst), 1);

    store.healthy.store(false, Ordering::SeqCst);
    let err = channel.save_now(&titled("doomed")).await.unwrap_err();
    assert_eq!(err, SyncError::ConnectionLost);
    assert_eq!(channel.state().await, ConnectionState::Disconnected);

    // Store comes back; the channel reconnects on its own
    store.healthy.store(true, Ordering::SeqCst);
    wait_connected(&channel).await;
    assert!(store.fetch_count.load(Ordering::SeqCst) >= 2);

    // The reconnect republished the authoritative document
    let refetched = timeout(Duration::from_secs(3), async {
        loop {
            if let SyncEvent::Fetched(doc) = events.recv().await.unwrap() {
                break doc;
            }
        }
    })
    .await
    .unwrap();
    assert!(refetched.sections.contains_key("general"));

    channel.stop();
}

/// A save whose acknowledgment never arrives within the configured
/// window fails as a timeout and drops the connection, and the channel
/// then recovers on its own.
#[tokio::test]
async fn test_unacknowledged_save_times_out_and_reconnects() {
    let store = MockStore::new(seed_document());
    let channel = SyncChannel::new(
        store.clone() as Arc<dyn StoreTransport>,
        SyncConfig {
            reconnect_backoff: Duration::from_millis(25),
            request_timeout: Duration::from_millis(100),
        },
    );
    channel.start();
    wait_connected(&channel).await;

    // Gate with no permits: the acknowledgment never comes
    store.gate_saves.store(true, Ordering::SeqCst);
    let err = channel.save_now(&titled("stalled")).await.unwrap_err();
    assert_eq!(err, SyncError::Timeout);
    assert_eq!(channel.state().await, ConnectionState::Disconnected);

    // Health is still good, so the channel reconnects after backoff
    wait_connected(&channel).await;

    channel.stop();
}

/// An autosave that fails on a dead connection is parked and goes out
/// once the channel reconnects.
#[tokio::test]
async fn test_parked_save_retries_after_reconnect() {
    let store = MockStore::new(seed_document());
    let channel = SyncChannel::new(store.clone() as Arc<dyn StoreTransport>, fast_config());
    channel.start();
    wait_connected(&channel).await;

    store.healthy.store(false, Ordering::SeqCst);
    channel.queue_save(titled("parked")).await;

    wait_for("channel to notice the drop", || async {
        channel.state().await == ConnectionState::Disconnected
    })
    .await;
    assert!(store.saves.lock().await.is_empty());

    store.healthy.store(true, Ordering::SeqCst);
    wait_for("parked save to transmit", || async {
        !store.saves.lock().await.is_empty()
    })
    .await;

    let saves = store.saves.lock().await;
    assert_eq!(saves[0].title.as_deref(), Some("parked"));

    channel.stop();
}

// ---------------------------------------------------------------------------
// End to end against the real backing store
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_edit_session_against_http_store() {
    let dir = tempfile::tempdir().unwrap();
    let schema_file = dir.path().join("pipeline_schema.json");
    schemaforge::document::write_document(&schema_file, &seed_document()).unwrap();

    let server = SchemaServer::new(schema_file.clone());
    let (addr, serving) = server.bind(([127, 0, 0, 1], 0).into()).unwrap();
    let server_handle = tokio::spawn(serving);

    let transport = Arc::new(HttpTransport::new(addr.to_string(), Duration::from_secs(1)));
    let channel = SyncChannel::new(transport, fast_config());
    let session = EditorSession::new(Arc::new(DraftStore::empty()), Arc::clone(&channel));
    session.start();
    channel.start();

    wait_for("initial fetch into the draft", || async {
        session
            .store()
            .current_snapshot()
            .await
            .sections
            .contains_key("general")
    })
    .await;

    // Rename a section; the autosave must land on disk
    session
        .commit(EditCommand::UpdateSection {
            key: "general".to_string(),
            patch: SectionPatch {
                rename: Some("basic_options".to_string()),
                ..Default::default()
            },
        })
        .await
        .unwrap();

    wait_for("autosave to reach the schema file", || async {
        match std::fs::read_to_string(&schema_file) {
            Ok(text) => text.contains("basic_options"),
            Err(_) => false,
        }
    })
    .await;
    wait_for("save status to settle", || async {
        matches!(session.save_status().await, SaveStatus::Saved { .. })
    })
    .await;

    // The renamed section kept its position and contents
    let on_disk = schemaforge::document::load_document(&schema_file).unwrap();
    let keys: Vec<&String> = on_disk.sections.keys().collect();
    assert_eq!(keys, ["basic_options"]);
    assert!(on_disk.sections["basic_options"]
        .properties
        .contains_key("name"));

    // Finish performs one last save and stops the backing store
    session.finish().await.unwrap();
    timeout(Duration::from_secs(3), server_handle)
        .await
        .expect("server to shut down after finish")
        .unwrap();

    channel.stop();
    session.stop();
}
