//! # rowsync
//!
//! A streaming table synchronization engine: converges the row content of
//! tables between two relational database endpoints over a framed binary
//! protocol, transferring raw rows only where range digests disagree.
//!
//! ## Architecture
//!
//! The destination drives. It issues verbs; the source protocol engine
//! answers them from its database; mismatching ranges come back as row
//! streams that the applier diffs into the destination:
//!
//! ```text
//! ┌───────────── "to" end ─────────────┐      ┌──────────── "from" end ────────────┐
//! │                                    │      │                                    │
//! │  convergence loop ──RANGE/HASH───────────▶│ SyncFromProtocol ──▶ RowHasher     │
//! │        │          ◀──digests──────────────│        │                           │
//! │        ▼              ROWS ───────────────▶        ▼                           │
//! │  RowApplier ◀─────row stream──────────────│ DatabaseClient (bounded batches)   │
//! │        │                           │      │                                    │
//! │        ▼                           │      └────────────────────────────────────┘
//! │  clearers + batched REPLACE/INSERT │
//! └────────────────────────────────────┘
//! ```
//!
//! Range arithmetic needs a total order over rows, so every table gets a
//! primary-key-equivalent assigned by [`keys::choose_primary_key_for`]
//! before any of this starts.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rowsync::{choose_primary_key_for, Database, SyncFromProtocol};
//! # use rowsync::{DatabaseClient, SessionHooks};
//! # async fn serve<C: DatabaseClient, H: SessionHooks>(
//! #     client: C,
//! #     hooks: H,
//! #     mut schema: Database,
//! #     socket: tokio::io::DuplexStream,
//! # ) -> rowsync::Result<()> {
//! for table in &mut schema.tables {
//!     choose_primary_key_for(table);
//! }
//!
//! let (reader, writer) = tokio::io::split(socket);
//! let mut engine = SyncFromProtocol::new(client, schema, hooks, reader, writer, 8);
//! engine.handle_commands().await
//! # }
//! ```

pub mod applier;
pub mod clearer;
pub mod client;
pub mod defaults;
pub mod error;
pub mod hash;
pub mod keys;
pub mod metrics;
pub mod protocol;
pub mod schema;
pub mod schema_format;
pub mod sql;
pub mod wire;

// Re-exports for convenience
pub use applier::{RowApplier, RowLoader};
pub use clearer::UniqueKeyClearer;
pub use client::{BoxFuture, DatabaseClient, RowConsumer, RowVec};
pub use defaults::{DEFAULT_HASH_ALGORITHM, LATEST_PROTOCOL_VERSION_SUPPORTED};
pub use error::{Result, SyncError};
pub use hash::{HashAlgorithm, RowHasher};
pub use keys::choose_primary_key_for;
pub use protocol::{SessionHooks, SyncFromProtocol, Verb};
pub use schema::{
    Column, ColumnValues, Database, Key, NullableRow, PrimaryKeyType, RowsByPrimaryKey, Table,
};
pub use wire::{Packer, Unpacker, Value};
