//! Pre-insert clearing of key collisions.
//!
//! Before a batch of rows can be inserted, any destination row occupying one
//! of their key tuples has to go: the row with the same primary key when the
//! engine cannot REPLACE atomically, and rows elsewhere in the table holding
//! the same unique-key values, which REPLACE on some engines does not cover.
//! Each clearer accumulates key tuples and deletes them in one batched
//! statement when applied.

use crate::client::DatabaseClient;
use crate::error::Result;
use crate::schema::{NullableRow, Table};
use crate::sql::{columns_tuple, values_tuple, BatchedSql};

/// Batches `DELETE FROM t WHERE (key columns) IN (...)` for one key.
pub struct UniqueKeyClearer<'a, C: DatabaseClient> {
    client: &'a C,
    columns: Vec<usize>,
    delete_sql: BatchedSql,
}

impl<'a, C: DatabaseClient> UniqueKeyClearer<'a, C> {
    pub fn new(client: &'a C, table: &Table, columns: &[usize]) -> Self {
        let columns_sql = columns_tuple(table, columns, client.quote_identifiers_with());
        Self {
            client,
            columns: columns.to_vec(),
            delete_sql: BatchedSql::new(
                format!("DELETE FROM {} WHERE {} IN (", table.name, columns_sql),
                ",".to_string(),
                ")".to_string(),
            ),
        }
    }

    /// Schedule deletion of whatever row holds this row's key tuple.
    ///
    /// A tuple containing NULL cannot collide (SQL unique constraints admit
    /// any number of NULLs), so such rows are skipped.
    pub fn row(&mut self, row: &NullableRow) {
        let mut key = Vec::with_capacity(self.columns.len());
        for &column in &self.columns {
            match row.get(column) {
                Some(Some(value)) => key.push(value.clone()),
                _ => return,
            }
        }
        self.delete_sql.add(&values_tuple(self.client, &key));
    }

    pub fn have_content(&self) -> bool {
        self.delete_sql.have_content()
    }

    /// Execute the batched delete, if any rows were scheduled.
    pub async fn apply(&mut self) -> Result<()> {
        if let Some(sql) = self.delete_sql.take_statement() {
            self.client.execute(&sql).await?;
        }
        Ok(())
    }
}
