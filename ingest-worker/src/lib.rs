//! Dispatch - voice-call webhook ingest.
//!
//! This library provides shared modules for the two binaries:
//! - `dispatch-web`: web server receiving ElevenLabs post-call webhooks
//! - `dispatch-inspect`: prints what the local stores hold
//!
//! ## Architecture
//!
//! ```text
//!                                     ┌→ structured store (one row per call)
//! Webhook → verify → parse → persist ─┤
//!                                     └→ blob store (one archive per delivery)
//! ```

pub mod call;
pub mod call_log;
pub mod config;
pub mod persist;
pub mod store;
pub mod web;

use std::sync::Arc;

// Re-export commonly used types
pub use call::{CallEvent, PersistedRecord};
pub use call_log::CallLog;
pub use config::{Config, StoreBackend};
pub use persist::{PersistOutcome, Persister};
pub use store::{BlobStore, StoreError, StructuredStore};
pub use web::AppState;

/// Store handles selected by `config.store_backend`.
pub fn build_stores(config: &Config) -> (Arc<dyn StructuredStore>, Arc<dyn BlobStore>) {
    match config.store_backend {
        StoreBackend::Local => (
            Arc::new(store::LocalStructuredStore::new(
                &config.data_dir,
                &config.structured_store_table,
            )),
            Arc::new(store::LocalBlobStore::new(
                &config.data_dir,
                &config.blob_store_bucket,
            )),
        ),
        StoreBackend::Memory => (
            Arc::new(store::MemoryStructuredStore::new()),
            Arc::new(store::MemoryBlobStore::new()),
        ),
    }
}
