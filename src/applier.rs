// Copyright (c) 2025-2026 the rowsync authors. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Destination-side row application.
//!
//! A [`RowApplier`] converges one contiguous key range of one table to the
//! row stream the source sent for it. Destination rows in the range are
//! loaded into memory and diffed by primary key against the stream; the
//! difference becomes deletes, key clears, and batched inserts.
//!
//! # Flush ordering
//!
//! Pending work applies in a fixed order: primary-key clearer, then each
//! unique-key clearer, then the insert batch. Inserting before clearing
//! would collide with rows still in place.
//!
//! # Tail ranges
//!
//! When the range extends to the end of the table (`last_not_matching_key`
//! empty), there is nothing to diff against: the whole tail is deleted up
//! front and every incoming row is a fresh insert. No later rows exist to
//! collide with, so no clearers are scheduled either.

use crate::clearer::UniqueKeyClearer;
use crate::client::{DatabaseClient, RowConsumer};
use crate::error::Result;
use crate::metrics;
use crate::schema::{ColumnValues, NullableRow, RowsByPrimaryKey, Table};
use crate::sql::{columns_tuple, row_values_sql, where_sql, BatchedSql};
use crate::wire::Unpacker;
use tokio::io::AsyncRead;
use tracing::debug;

/// Loads a range select into a [`RowsByPrimaryKey`] map.
pub struct RowLoader<'t> {
    table: &'t Table,
    rows: &'t mut RowsByPrimaryKey,
}

impl<'t> RowLoader<'t> {
    pub fn new(table: &'t Table, rows: &'t mut RowsByPrimaryKey) -> Self {
        Self { table, rows }
    }
}

impl RowConsumer for RowLoader<'_> {
    fn row(&mut self, row: NullableRow) -> Result<()> {
        let primary_key = self.table.primary_key_of(&row)?;
        self.rows.insert(primary_key, row);
        Ok(())
    }
}

/// Applies one table's row stream for one key range.
///
/// Scoped to that range: create it, feed it the stream with
/// [`stream_from_input`](Self::stream_from_input), and it flushes all pending
/// work before returning. The flush also runs opportunistically whenever the
/// insert batch crosses its byte threshold.
pub struct RowApplier<'a, C: DatabaseClient> {
    client: &'a C,
    table: &'a Table,
    primary_key_columns_sql: String,
    primary_key_clearer: UniqueKeyClearer<'a, C>,
    unique_keys_clearers: Vec<UniqueKeyClearer<'a, C>>,
    insert_sql: BatchedSql,
    rows_changed: u64,
}

impl<'a, C: DatabaseClient> RowApplier<'a, C> {
    pub fn new(client: &'a C, table: &'a Table) -> Self {
        // if the client can't REPLACE, rows blocking our inserts have to be
        // cleared explicitly: same-primary-key rows, and rows elsewhere
        // holding unique key values we're about to insert
        let unique_keys_clearers = client
            .replace_clearer_keys(table)
            .into_iter()
            .map(|key| UniqueKeyClearer::new(client, table, &key.columns))
            .collect();

        Self {
            client,
            table,
            primary_key_columns_sql: columns_tuple(
                table,
                &table.primary_key_columns,
                client.quote_identifiers_with(),
            ),
            primary_key_clearer: UniqueKeyClearer::new(client, table, &table.primary_key_columns),
            unique_keys_clearers,
            insert_sql: BatchedSql::new(
                format!("{}{} VALUES\n(", client.replace_sql_prefix(), table.name),
                "),\n(",
                ")",
            ),
            rows_changed: 0,
        }
    }

    /// Replacements, insertions, and deletions performed so far.
    pub fn rows_changed(&self) -> u64 {
        self.rows_changed
    }

    /// Converge the range `(matched_up_to_key, last_not_matching_key]` to the
    /// row stream on `input`, which is terminated by an empty row frame.
    ///
    /// Returns the number of rows in the range: incoming rows plus rows
    /// deleted because the source didn't have them. The caller's convergence
    /// loop uses this to decide whether the range needs further splitting.
    pub async fn stream_from_input<R: AsyncRead + Unpin + Send>(
        &mut self,
        input: &mut Unpacker<R>,
        matched_up_to_key: &ColumnValues,
        last_not_matching_key: &ColumnValues,
    ) -> Result<u64> {
        let mut existing_rows = RowsByPrimaryKey::new();

        if last_not_matching_key.is_empty() {
            // the range runs to the end of the table: clear the whole tail
            // now and insert everything the source sends
            self.delete_range(matched_up_to_key, last_not_matching_key)
                .await?;
        } else {
            // otherwise, load our rows in the range so we can compare them
            let mut loader = RowLoader::new(self.table, &mut existing_rows);
            self.client
                .retrieve_rows(
                    self.table,
                    matched_up_to_key,
                    last_not_matching_key,
                    None,
                    &mut loader,
                )
                .await?;
        }

        let mut rows_in_range: u64 = 0;

        loop {
            // one frame per row, terminated by an empty row, which is not
            // valid data and so unambiguous
            let row = input.next_nullable_row().await?;
            if row.is_empty() {
                break;
            }
            rows_in_range += 1;

            if last_not_matching_key.is_empty() {
                self.add_to_insert(&row);
                self.rows_changed += 1;
            } else if self.consider_replace(&mut existing_rows, &row)? {
                self.rows_changed += 1;
            }

            if self.insert_sql.over_threshold() {
                self.apply().await?;
            }
        }

        // anything left in the map wasn't sent by the source, so it doesn't
        // exist there any more
        let leftover = existing_rows.len() as u64;
        for row in existing_rows.values() {
            self.primary_key_clearer.row(row);
        }
        self.rows_changed += leftover;
        rows_in_range += leftover;

        self.apply().await?;

        debug!(
            table = %self.table.name,
            rows_in_range,
            rows_changed = self.rows_changed,
            "applied row range"
        );
        metrics::record_rows_applied(&self.table.name, rows_in_range);

        Ok(rows_in_range)
    }

    /// Decide what an incoming row needs: nothing, an insert, or a full
    /// replace. Returns whether the destination changes.
    fn consider_replace(
        &mut self,
        existing_rows: &mut RowsByPrimaryKey,
        row: &NullableRow,
    ) -> Result<bool> {
        let primary_key = self.table.primary_key_of(row)?;

        if let Some(existing_row) = existing_rows.remove(&primary_key) {
            if existing_row == *row {
                return Ok(false);
            }
            // row is different, so it has to be deleted and reinserted
            if self.client.need_primary_key_clearer_to_replace() {
                self.primary_key_clearer.row(row);
            }
        }

        for unique_key_clearer in &mut self.unique_keys_clearers {
            unique_key_clearer.row(row);
        }
        self.add_to_insert(row);

        Ok(true)
    }

    fn add_to_insert(&mut self, row: &NullableRow) {
        self.insert_sql.add(&row_values_sql(self.client, row));
    }

    async fn delete_range(
        &mut self,
        matched_up_to_key: &ColumnValues,
        last_not_matching_key: &ColumnValues,
    ) -> Result<()> {
        let sql = format!(
            "DELETE FROM {}{}",
            self.table.name,
            where_sql(
                self.client,
                &self.primary_key_columns_sql,
                matched_up_to_key,
                last_not_matching_key,
            )
        );
        self.client.execute(&sql).await
    }

    /// Flush all pending work in collision-safe order: primary-key clearer,
    /// unique-key clearers, then the insert batch.
    pub async fn apply(&mut self) -> Result<()> {
        self.primary_key_clearer.apply().await?;

        for unique_key_clearer in &mut self.unique_keys_clearers {
            unique_key_clearer.apply().await?;
        }

        if let Some(sql) = self.insert_sql.take_statement() {
            metrics::record_insert_flush(&self.table.name, sql.len());
            self.client.execute(&sql).await?;
        }

        Ok(())
    }
}
