//! stackdb — typed key-value store with stackable transaction overlays
//!
//! Built on the ordered engine in `stackdb-core`.
//!
//! # Layers
//!
//! - **Store**: typed reads and writes over the engine; values are
//!   obfuscated with a per-store key, keys are stored as encoded
//! - **WriteBatch**: staged puts and deletes applied atomically
//! - **Overlay**: in-memory transaction over a store or another overlay,
//!   with a merged iterator and a destructive commit
//!
//! # Example
//!
//! ```no_run
//! use stackdb::{DbParams, Overlay, Store};
//!
//! let store = Store::open(DbParams::new("/tmp/stackdb").with_obfuscate(true))?;
//! let tx = Overlay::new(&store);
//! tx.write(&(b'h', 1u32), 100u64);
//! tx.commit()?;
//! assert_eq!(store.read::<_, u64>(&(b'h', 1u32)), Some(100));
//! # Ok::<(), stackdb::DbError>(())
//! ```

pub mod batch;
pub mod codec;
pub mod error;
pub mod iterator;
pub mod kv;
pub mod merge;
pub mod obfuscation;
pub mod overlay;
pub mod store;
pub mod value;

pub use batch::WriteBatch;
pub use codec::{Decode, DecodeError, Encode};
pub use error::{DbError, DbResult};
pub use iterator::StoreIterator;
pub use kv::{CommitTarget, KvIterator, KvRead, KvStore};
pub use merge::OverlayIterator;
pub use obfuscation::ObfuscateKey;
pub use overlay::Overlay;
pub use stackdb_core::Config;
pub use store::{DbParams, Store};
pub use value::{PendingChanges, PendingValue, Value};
