//! Local-first storage and background sync for inspection photos.
//!
//! Edits land in the [`store::RecordStore`] first and are queued in the
//! durable [`sync::SyncQueue`]; a [`sync::SyncDrainer`] applies them to the
//! remote authority whenever the device is online.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod store;
pub mod sync;

pub use config::Config;
pub use error::{RemoteError, StoreError, StoreResult};
pub use store::RecordStore;
