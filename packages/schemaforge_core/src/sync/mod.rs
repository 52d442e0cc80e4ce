//! Backing-store synchronization
//!
//! `StoreTransport` is the seam to the backing store process;
//! `SyncChannel` owns the connection lifecycle on top of it:
//! health-gated connects, fetch-on-connect, fixed-backoff reconnects,
//! and a coalescing single-flight save queue.

mod channel;
mod transport;

pub use channel::{ConnectionState, SyncChannel, SyncConfig, SyncError, SyncEvent};
pub use transport::{HttpTransport, StoreReply, StoreTransport, TransportError};
