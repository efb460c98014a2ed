// Copyright (c) 2025-2026 the rowsync authors. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the sync engine.
//!
//! Errors are categorized by their source and by how far they propagate:
//! some kill the current table sync, others kill the whole connection.
//!
//! # Error Categories
//!
//! | Error Type | Fatal To | Description |
//! |------------|----------|-------------|
//! | `Command` | Connection | Unknown verb or malformed arguments |
//! | `Protocol` | Connection | Stream truncation or frame corruption |
//! | `Database` | Operation | Surfaced from the database client; retry policy is the worker's |
//! | `Sync` | Table | Data- or schema-level divergence the engine cannot reconcile |
//!
//! The engine does not catch database errors itself; the surrounding worker
//! bounds the blast radius and decides whether to wrap runs in a transaction.

use thiserror::Error;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while serving or applying a table sync.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Unknown verb or malformed verb arguments.
    ///
    /// The peer sent something we cannot even parse an intent from, so the
    /// connection state is unknowable. Fatal to the connection.
    #[error("Command error: {0}")]
    Command(String),

    /// Stream truncation or frame corruption.
    ///
    /// Includes unexpected EOF mid-frame and markers the wire format does
    /// not allow. Fatal to the connection.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Error surfaced from the database client.
    ///
    /// Fatal to the current operation; the worker owns any retry policy.
    #[error("Database error ({operation}): {message}")]
    Database { operation: String, message: String },

    /// Data- or schema-level divergence the engine cannot reconcile.
    ///
    /// For example a primary key column observed as NULL. Fatal to the
    /// current table; identifies the table in the message.
    #[error("Sync error on {table}: {message}")]
    Sync { table: String, message: String },
}

impl SyncError {
    /// Create a database error with the operation that failed.
    pub fn database(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Database {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a sync error scoped to a table.
    pub fn sync(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sync {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Check if this error poisons the whole connection.
    ///
    /// Command and protocol errors leave the stream at an unknown position,
    /// so nothing further can be read from it. Database and sync errors are
    /// scoped to the operation or table that hit them.
    pub fn is_fatal_to_connection(&self) -> bool {
        match self {
            Self::Command(_) => true,
            Self::Protocol(_) => true,
            Self::Database { .. } => false,
            Self::Sync { .. } => false,
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        Self::Protocol(e.to_string())
    }
}
