// Copyright (c) 2025-2026 the rowsync authors. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Database client capability trait.
//!
//! The engine and applier never talk to a database directly; they are
//! parameterized over this trait, which captures exactly what they need:
//! executing SQL, iterating a bounded key-range select, quoting identifiers,
//! escaping values, and describing how the engine replaces rows.
//!
//! This trait stays object-safe (boxed-future methods rather than async fns)
//! so callers can hold clients behind `dyn` and tests can swap in in-memory
//! implementations.

use crate::error::Result;
use crate::schema::{ColumnValues, Key, NullableRow, Table};
use std::future::Future;
use std::pin::Pin;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Consumes rows as a range select produces them.
///
/// Rows arrive in primary-key ascending order, one call per row, columns in
/// table-declared order. Consumers are synchronous on purpose: they run
/// inside the client's result iteration, between that client's own awaits.
pub trait RowConsumer: Send {
    fn row(&mut self, row: NullableRow) -> Result<()>;
}

/// What the sync core requires from a database endpoint.
pub trait DatabaseClient: Send + Sync {
    /// The character this engine quotes identifiers with (`"` or `` ` ``).
    fn quote_identifiers_with(&self) -> char;

    /// Escape a value for inclusion in a single-quoted SQL literal.
    ///
    /// The default doubles embedded single quotes, which suits engines
    /// without backslash escapes; clients override as needed.
    fn escape_value(&self, value: &str) -> String {
        value.replace('\'', "''")
    }

    /// Statement prefix used to insert rows: `REPLACE INTO ` on engines with
    /// an atomic replace, `INSERT INTO ` otherwise.
    fn replace_sql_prefix(&self) -> &str;

    /// True when the engine has no atomic REPLACE, so a row with a colliding
    /// primary key must be deleted before its replacement is inserted.
    fn need_primary_key_clearer_to_replace(&self) -> bool;

    /// The unique keys on `table` that inserting will not implicitly clear.
    ///
    /// Engines whose REPLACE covers all unique constraints return none;
    /// otherwise each returned key gets a pre-insert clearer of its own.
    fn replace_clearer_keys<'t>(&self, table: &'t Table) -> Vec<&'t Key>;

    /// Execute a mutation statement.
    fn execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, ()>;

    /// Stream the rows of `(prev_key, last_key]` to `consumer` in primary-key
    /// ascending order, stopping after `row_count_limit` rows when set.
    /// Empty `prev_key` means from the beginning; empty `last_key` means to
    /// the end. Returns the number of rows produced.
    fn retrieve_rows<'a>(
        &'a self,
        table: &'a Table,
        prev_key: &'a ColumnValues,
        last_key: &'a ColumnValues,
        row_count_limit: Option<usize>,
        consumer: &'a mut dyn RowConsumer,
    ) -> BoxFuture<'a, usize>;

    /// The primary key tuples of the least and greatest rows of the table,
    /// both empty when the table is empty.
    fn table_key_range<'a>(
        &'a self,
        table: &'a Table,
    ) -> BoxFuture<'a, (ColumnValues, ColumnValues)>;
}

/// Collects retrieved rows into a vector; handy for tests and small reads.
#[derive(Debug, Default)]
pub struct RowVec(pub Vec<NullableRow>);

impl RowConsumer for RowVec {
    fn row(&mut self, row: NullableRow) -> Result<()> {
        self.0.push(row);
        Ok(())
    }
}
