//! Key-value storage contract for FlashDeck.
//!
//! Every persistent record the service keeps (users, sessions, indexes)
//! lives behind the [`KvStore`] trait: string, hash and set values with
//! per-key expiry and a prefix scan. [`MemoryStore`] is the in-process
//! backend used by tests and single-node deployments.
//!
//! # Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use deck_store::{KvStore, MemoryStore, store_key};
//!
//! # tokio_test();
//! # fn tokio_test() {
//! # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! # rt.block_on(async {
//! let store = MemoryStore::new();
//!
//! let key = store_key!("user", "u1");
//! let mut fields = BTreeMap::new();
//! fields.insert("email".to_string(), "a@example.com".to_string());
//! store.hash_set(&key, &fields).await.unwrap();
//!
//! let record = store.hash_get_all(&key).await.unwrap();
//! assert_eq!(record.unwrap()["email"], "a@example.com");
//! # });
//! # }
//! ```

mod clock;
mod error;
mod kv;
mod memory;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::{StoreError, StoreResult};
pub use kv::{Fields, KvStore, ScanPage, SharedStore};
pub use memory::MemoryStore;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::{
        Clock, Fields, KvStore, MemoryStore, ScanPage, SharedClock, SharedStore, StoreError,
        StoreResult,
    };
}
