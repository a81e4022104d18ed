//! Durable storage subsystem.
//!
//! # Data Flow
//! ```text
//! SharedRegistry (keyed by storage path)
//!     → shared.rs (one Shared<FileStore> per path, owner set + ref count)
//!     → kv.rs (KeyValueStore contract, write-through JSON file)
//!     → nonce::store (NonceStore key layout on top)
//! ```
//!
//! # Design Decisions
//! - The store is a plain string key/value map; callers own the key layout
//! - Every `put` is flushed to disk before it returns
//! - A store shared by several coordinators closes only when its last owner leaves

pub mod kv;
pub mod shared;

pub use kv::{FileStore, KeyValueStore, MemoryStore, StorageError, StorageResult};
pub use shared::{Closeable, OwnerHandle, OwnerSet, Shared, SharedRegistry};
