//! Shared test support: an in-memory database client, table fixtures, and a
//! destination-side sync driver.
//!
//! [`MemoryClient`] implements the full [`DatabaseClient`] capability over a
//! BTreeMap and *interprets* the SQL the crate emits (batched REPLACE/INSERT,
//! range DELETE, tuple-IN DELETE). Primary and unique key collisions panic,
//! so a missing clearer fails a test exactly the way a real constraint
//! violation would fail a sync.
//!
//! Test row values must avoid commas and parentheses; the interpreter splits
//! on them.

#![allow(dead_code)]

use rowsync::{
    BoxFuture, ColumnValues, Column, Database, DatabaseClient, HashAlgorithm, Key, NullableRow,
    Packer, PrimaryKeyType, Result, RowApplier, RowConsumer, RowHasher, SessionHooks,
    SyncFromProtocol, Table, Unpacker, Value, Verb,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::io::{duplex, split, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

// ─────────────────────────────────────────────────────────────────────────────
// Table fixtures
// ─────────────────────────────────────────────────────────────────────────────

/// `(id INT PK, v TEXT NULL)`
pub fn two_column_table() -> Table {
    Table {
        name: "t".to_string(),
        columns: vec![Column::new("id", "INT"), Column::new("v", "TEXT").nullable()],
        keys: vec![],
        primary_key_columns: vec![0],
        primary_key_type: PrimaryKeyType::ExplicitPrimaryKey,
    }
}

/// `(id INT PK, email TEXT UNIQUE, v TEXT NULL)`
pub fn unique_key_table() -> Table {
    Table {
        name: "accounts".to_string(),
        columns: vec![
            Column::new("id", "INT"),
            Column::new("email", "TEXT"),
            Column::new("v", "TEXT").nullable(),
        ],
        keys: vec![Key {
            name: "email_unique".to_string(),
            unique: true,
            columns: vec![1],
        }],
        primary_key_columns: vec![0],
        primary_key_type: PrimaryKeyType::ExplicitPrimaryKey,
    }
}

pub fn row2(id: &str, v: Option<&str>) -> NullableRow {
    vec![Some(id.to_string()), v.map(str::to_string)]
}

pub fn row3(id: &str, email: &str, v: Option<&str>) -> NullableRow {
    vec![
        Some(id.to_string()),
        Some(email.to_string()),
        v.map(str::to_string),
    ]
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryClient
// ─────────────────────────────────────────────────────────────────────────────

struct MemoryInner {
    table: Table,
    rows: Mutex<BTreeMap<ColumnValues, NullableRow>>,
    executed: Mutex<Vec<String>>,
    supports_replace: bool,
}

/// An in-memory single-table database endpoint.
#[derive(Clone)]
pub struct MemoryClient {
    inner: Arc<MemoryInner>,
}

impl MemoryClient {
    pub fn new(table: Table, supports_replace: bool) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                table,
                rows: Mutex::new(BTreeMap::new()),
                executed: Mutex::new(Vec::new()),
                supports_replace,
            }),
        }
    }

    pub fn with_rows(table: Table, supports_replace: bool, rows: &[NullableRow]) -> Self {
        let client = Self::new(table, supports_replace);
        for row in rows {
            client.seed_row(row.clone());
        }
        client
    }

    /// Insert a row directly, bypassing SQL (test setup only).
    pub fn seed_row(&self, row: NullableRow) {
        let primary_key = self.inner.table.primary_key_of(&row).unwrap();
        let previous = self.inner.rows.lock().unwrap().insert(primary_key, row);
        assert!(previous.is_none(), "seeding duplicate primary key");
    }

    /// All rows in primary key order.
    pub fn rows(&self) -> Vec<NullableRow> {
        self.inner.rows.lock().unwrap().values().cloned().collect()
    }

    /// Every statement passed to `execute`, in order.
    pub fn executed(&self) -> Vec<String> {
        self.inner.executed.lock().unwrap().clone()
    }

    pub fn clear_executed(&self) {
        self.inner.executed.lock().unwrap().clear();
    }

    /// Digest of `(prev_key, last_key]` in primary key order, computed the
    /// same way the source's HASH verb computes it.
    pub async fn digest_range(
        &self,
        prev_key: &ColumnValues,
        last_key: &ColumnValues,
        algorithm: HashAlgorithm,
    ) -> Vec<u8> {
        let mut hasher = RowHasher::new(algorithm);
        let table = self.inner.table.clone();
        DatabaseClient::retrieve_rows(self, &table, prev_key, last_key, None, &mut hasher)
            .await
            .unwrap();
        hasher.finish()
    }

    fn non_primary_unique_keys(&self) -> Vec<Key> {
        let table = &self.inner.table;
        table
            .keys
            .iter()
            .filter(|k| k.unique && k.columns != table.primary_key_columns)
            .cloned()
            .collect()
    }

    // ── SQL interpretation ───────────────────────────────────────────────────

    fn apply_sql(&self, sql: &str) {
        if let Some(rest) = sql.strip_prefix("REPLACE INTO ") {
            self.apply_insert(rest, true);
        } else if let Some(rest) = sql.strip_prefix("INSERT INTO ") {
            self.apply_insert(rest, false);
        } else if let Some(rest) = sql.strip_prefix("DELETE FROM ") {
            self.apply_delete(rest);
        } else {
            panic!("unexpected SQL statement: {sql}");
        }
    }

    fn apply_insert(&self, rest: &str, replace: bool) {
        let table = &self.inner.table;
        let (name, values) = rest
            .split_once(" VALUES\n(")
            .unwrap_or_else(|| panic!("malformed insert: {rest}"));
        assert_eq!(name, table.name);
        let body = values.strip_suffix(')').expect("unterminated VALUES");

        for row_sql in body.split("),\n(") {
            let row = parse_row(row_sql);
            assert_eq!(row.len(), table.columns.len(), "column count mismatch");
            let primary_key = table.primary_key_of(&row).unwrap();

            let mut rows = self.inner.rows.lock().unwrap();
            if replace {
                rows.remove(&primary_key);
                // REPLACE on this engine also displaces unique collisions
                for key in self.non_primary_unique_keys() {
                    retain_unless_matching(&mut rows, &key.columns, &row);
                }
            } else {
                assert!(
                    !rows.contains_key(&primary_key),
                    "primary key collision on {primary_key:?}: missing clearer"
                );
                for key in self.non_primary_unique_keys() {
                    let colliding = rows
                        .values()
                        .any(|existing| tuples_match(existing, &key.columns, &row));
                    assert!(
                        !colliding,
                        "unique key {} collision inserting {row:?}: missing clearer",
                        key.name
                    );
                }
            }
            rows.insert(primary_key, row);
        }
    }

    fn apply_delete(&self, rest: &str) {
        let table = &self.inner.table;
        let (name, where_clause) = match rest.split_once(" WHERE ") {
            Some((name, clause)) => (name, Some(clause)),
            None => (rest, None),
        };
        assert_eq!(name, table.name);

        let mut rows = self.inner.rows.lock().unwrap();
        let Some(clause) = where_clause else {
            rows.clear();
            return;
        };

        if let Some((columns_sql, list)) = clause.split_once(" IN (") {
            let columns = self.parse_column_tuple(columns_sql);
            let list = list.strip_suffix(')').expect("unterminated IN list");
            for tuple_sql in split_tuples(list) {
                let values: ColumnValues = tuple_sql
                    .split(',')
                    .map(|token| unquote(token).expect("NULL in key tuple"))
                    .collect();
                rows.retain(|_, row| {
                    !columns
                        .iter()
                        .zip(&values)
                        .all(|(&c, v)| row[c].as_deref() == Some(v.as_str()))
                });
            }
        } else {
            let (prev_key, last_key) = self.parse_range_clause(clause);
            rows.retain(|key, _| {
                let above = prev_key.is_empty() || key > &prev_key;
                let below = last_key.is_empty() || key <= &last_key;
                !(above && below)
            });
        }
    }

    fn parse_column_tuple(&self, columns_sql: &str) -> Vec<usize> {
        let table = &self.inner.table;
        columns_sql
            .trim_start_matches('(')
            .trim_end_matches(')')
            .split(',')
            .map(|quoted| {
                let name = quoted.trim_matches('"');
                table
                    .columns
                    .iter()
                    .position(|c| c.name == name)
                    .unwrap_or_else(|| panic!("unknown column {name}"))
            })
            .collect()
    }

    fn parse_range_clause(&self, clause: &str) -> (ColumnValues, ColumnValues) {
        let mut prev_key = ColumnValues::new();
        let mut last_key = ColumnValues::new();
        for condition in clause.split(" AND ") {
            if let Some((_, values)) = condition.split_once(" > (") {
                prev_key = parse_value_tuple(values.trim_end_matches(')'));
            } else if let Some((_, values)) = condition.split_once(" <= (") {
                last_key = parse_value_tuple(values.trim_end_matches(')'));
            } else {
                panic!("unexpected range condition: {condition}");
            }
        }
        (prev_key, last_key)
    }
}

fn parse_row(row_sql: &str) -> NullableRow {
    row_sql.split(',').map(unquote).collect()
}

fn parse_value_tuple(values_sql: &str) -> ColumnValues {
    values_sql
        .split(',')
        .map(|token| unquote(token).expect("NULL in key tuple"))
        .collect()
}

fn unquote(token: &str) -> Option<String> {
    if token == "NULL" {
        return None;
    }
    let inner = token
        .strip_prefix('\'')
        .and_then(|t| t.strip_suffix('\''))
        .unwrap_or_else(|| panic!("malformed literal: {token}"));
    Some(inner.replace("''", "'"))
}

fn split_tuples(list: &str) -> Vec<&str> {
    list.trim_start_matches('(')
        .trim_end_matches(')')
        .split("),(")
        .collect()
}

fn tuples_match(existing: &NullableRow, columns: &[usize], incoming: &NullableRow) -> bool {
    columns.iter().all(|&c| {
        matches!((&existing[c], &incoming[c]), (Some(a), Some(b)) if a == b)
    })
}

fn retain_unless_matching(
    rows: &mut BTreeMap<ColumnValues, NullableRow>,
    columns: &[usize],
    incoming: &NullableRow,
) {
    rows.retain(|_, existing| !tuples_match(existing, columns, incoming));
}

impl DatabaseClient for MemoryClient {
    fn quote_identifiers_with(&self) -> char {
        '"'
    }

    fn replace_sql_prefix(&self) -> &str {
        if self.inner.supports_replace {
            "REPLACE INTO "
        } else {
            "INSERT INTO "
        }
    }

    fn need_primary_key_clearer_to_replace(&self) -> bool {
        !self.inner.supports_replace
    }

    fn replace_clearer_keys<'t>(&self, table: &'t Table) -> Vec<&'t Key> {
        if self.inner.supports_replace {
            vec![]
        } else {
            table
                .keys
                .iter()
                .filter(|k| k.unique && k.columns != table.primary_key_columns)
                .collect()
        }
    }

    fn execute<'a>(&'a self, sql: &'a str) -> BoxFuture<'a, ()> {
        self.inner.executed.lock().unwrap().push(sql.to_string());
        self.apply_sql(sql);
        Box::pin(async { Ok(()) })
    }

    fn retrieve_rows<'a>(
        &'a self,
        _table: &'a Table,
        prev_key: &'a ColumnValues,
        last_key: &'a ColumnValues,
        row_count_limit: Option<usize>,
        consumer: &'a mut dyn RowConsumer,
    ) -> BoxFuture<'a, usize> {
        Box::pin(async move {
            let rows = self.inner.rows.lock().unwrap();
            let mut count = 0;
            for (key, row) in rows.iter() {
                if !prev_key.is_empty() && key <= prev_key {
                    continue;
                }
                if !last_key.is_empty() && key > last_key {
                    break;
                }
                if let Some(limit) = row_count_limit {
                    if count == limit {
                        break;
                    }
                }
                consumer.row(row.clone())?;
                count += 1;
            }
            Ok(count)
        })
    }

    fn table_key_range<'a>(
        &'a self,
        _table: &'a Table,
    ) -> BoxFuture<'a, (ColumnValues, ColumnValues)> {
        Box::pin(async move {
            let rows = self.inner.rows.lock().unwrap();
            let first = rows.keys().next().cloned().unwrap_or_default();
            let last = rows.keys().next_back().cloned().unwrap_or_default();
            Ok((first, last))
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Hooks
// ─────────────────────────────────────────────────────────────────────────────

/// Records delegated verbs and status lines; replies with a canned value.
#[derive(Clone, Default)]
pub struct RecordingHooks {
    pub delegated: Arc<Mutex<Vec<(Verb, Vec<Value>)>>>,
    pub statuses: Arc<Mutex<Vec<String>>>,
}

impl SessionHooks for RecordingHooks {
    fn handle_command<'a>(&'a mut self, verb: Verb, args: Vec<Value>) -> BoxFuture<'a, Vec<Value>> {
        self.delegated.lock().unwrap().push((verb, args));
        Box::pin(async { Ok(vec![Value::Bool(true)]) })
    }

    fn show_status(&mut self, status: &str) {
        self.statuses.lock().unwrap().push(status.to_string());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Destination-side driver
// ─────────────────────────────────────────────────────────────────────────────

pub type DriverStream = tokio::io::DuplexStream;

/// The destination end of a protocol conversation.
pub struct SyncDriver {
    pub input: Unpacker<ReadHalf<DriverStream>>,
    pub output: Packer<WriteHalf<DriverStream>>,
    pub algorithm: HashAlgorithm,
}

/// Spawn a source protocol engine over an in-memory duplex stream and return
/// the driver for its destination end.
pub fn spawn_engine(
    source: MemoryClient,
    table: Table,
    hooks: RecordingHooks,
) -> (SyncDriver, JoinHandle<Result<()>>) {
    let (destination_side, source_side) = duplex(1 << 20);
    let (source_read, source_write) = split(source_side);
    let (destination_read, destination_write) = split(destination_side);

    let schema = Database::new(vec![table]);
    let handle = tokio::spawn(async move {
        let mut engine =
            SyncFromProtocol::new(source, schema, hooks, source_read, source_write, 8);
        engine.handle_commands().await
    });

    let driver = SyncDriver {
        input: Unpacker::new(destination_read),
        output: Packer::new(destination_write),
        algorithm: HashAlgorithm::Md5,
    };
    (driver, handle)
}

impl SyncDriver {
    pub async fn request_range(&mut self, table_name: &str) -> (ColumnValues, ColumnValues) {
        self.output.pack_array_len(2);
        self.output.pack_uint(Verb::Range.tag());
        self.output.pack_str(table_name);
        self.output.flush().await.unwrap();

        assert_eq!(self.input.next_array_len().await.unwrap(), 4);
        assert_eq!(self.input.next_uint().await.unwrap(), Verb::Range.tag());
        assert_eq!(self.input.next_str().await.unwrap(), table_name);
        let first_key = self.input.next_key().await.unwrap();
        let last_key = self.input.next_key().await.unwrap();
        (first_key, last_key)
    }

    pub async fn request_hash(
        &mut self,
        table_name: &str,
        prev_key: &ColumnValues,
        last_key: &ColumnValues,
        rows_to_hash: u64,
    ) -> (u64, Vec<u8>) {
        self.output.pack_array_len(5);
        self.output.pack_uint(Verb::Hash.tag());
        self.output.pack_str(table_name);
        self.output.pack_key(prev_key);
        self.output.pack_key(last_key);
        self.output.pack_uint(rows_to_hash);
        self.output.flush().await.unwrap();

        assert_eq!(self.input.next_array_len().await.unwrap(), 7);
        assert_eq!(self.input.next_uint().await.unwrap(), Verb::Hash.tag());
        assert_eq!(self.input.next_str().await.unwrap(), table_name);
        assert_eq!(&self.input.next_key().await.unwrap(), prev_key);
        assert_eq!(&self.input.next_key().await.unwrap(), last_key);
        assert_eq!(self.input.next_uint().await.unwrap(), rows_to_hash);
        let row_count = self.input.next_uint().await.unwrap();
        let digest = self.input.next_bin().await.unwrap();
        (row_count, digest)
    }

    /// Request ROWS for a range and feed the stream straight into an applier
    /// on `destination`. Returns `(rows_in_range, rows_changed)`.
    pub async fn request_rows_into_applier(
        &mut self,
        destination: &MemoryClient,
        table: &Table,
        prev_key: &ColumnValues,
        last_key: &ColumnValues,
    ) -> (u64, u64) {
        self.output.pack_array_len(4);
        self.output.pack_uint(Verb::Rows.tag());
        self.output.pack_str(&table.name);
        self.output.pack_key(prev_key);
        self.output.pack_key(last_key);
        self.output.flush().await.unwrap();

        assert_eq!(self.input.next_array_len().await.unwrap(), 4);
        assert_eq!(self.input.next_uint().await.unwrap(), Verb::Rows.tag());
        assert_eq!(self.input.next_str().await.unwrap(), table.name);
        assert_eq!(&self.input.next_key().await.unwrap(), prev_key);
        assert_eq!(&self.input.next_key().await.unwrap(), last_key);

        let mut applier = RowApplier::new(destination, table);
        let rows_in_range = applier
            .stream_from_input(&mut self.input, prev_key, last_key)
            .await
            .unwrap();
        (rows_in_range, applier.rows_changed())
    }

    pub async fn negotiate_hash_algorithm(&mut self, tag: u64) -> u64 {
        self.output.pack_array_len(2);
        self.output.pack_uint(Verb::HashAlgorithm.tag());
        self.output.pack_uint(tag);
        self.output.flush().await.unwrap();

        assert_eq!(self.input.next_array_len().await.unwrap(), 2);
        assert_eq!(
            self.input.next_uint().await.unwrap(),
            Verb::HashAlgorithm.tag()
        );
        self.input.next_uint().await.unwrap()
    }

    pub async fn quit(&mut self) {
        self.output.pack_array_len(1);
        self.output.pack_uint(Verb::Quit.tag());
        self.output.flush().await.unwrap();
    }

    /// One full convergence pass for a table: compare digests over the union
    /// of both ends' key ranges, transfer rows only on mismatch. Returns the
    /// destination's `rows_changed`.
    pub async fn sync_table(&mut self, destination: &MemoryClient, table: &Table) -> u64 {
        let (_, source_last) = self.request_range(&table.name).await;
        let (_, destination_last) =
            DatabaseClient::table_key_range(destination, table).await.unwrap();

        // every row on either end is <= the larger of the two last keys, so
        // one range covers everything that could differ
        let last = match (source_last.is_empty(), destination_last.is_empty()) {
            (true, true) => return 0,
            (false, true) => source_last,
            (true, false) => destination_last,
            (false, false) => source_last.max(destination_last),
        };

        let (_, source_digest) = self
            .request_hash(&table.name, &vec![], &last, 1 << 30)
            .await;
        let destination_digest = destination
            .digest_range(&vec![], &last, self.algorithm)
            .await;
        if source_digest == destination_digest {
            return 0;
        }

        let (_, rows_changed) = self
            .request_rows_into_applier(destination, table, &vec![], &last)
            .await;
        rows_changed
    }
}
