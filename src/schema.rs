//! Table, column, and key model.
//!
//! Schemas are loaded once per connection and read-only thereafter; the
//! derived `primary_key_type` / `primary_key_columns` fields (see
//! [`choose_primary_key_for`](crate::keys::choose_primary_key_for)) drive all
//! range arithmetic, so nothing here may change mid-sync.
//!
//! Row values travel as raw string encodings throughout. Byte-exact equality
//! of those encodings between the load query and the incoming stream is load
//! bearing: any normalization must happen symmetrically on both endpoints or
//! not at all.

use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An ordered key tuple (or range endpoint) of raw string-encoded values.
///
/// The empty sequence marks the "open" end of a range: before-first when used
/// as a lower bound, after-last when used as an upper bound.
pub type ColumnValues = Vec<String>;

/// One row, one entry per column in table-declared order; `None` is SQL NULL.
pub type NullableRow = Vec<Option<String>>;

/// Destination rows in a range, keyed by their primary key projection.
///
/// Iteration order is irrelevant to correctness; only membership and the
/// stored row matter.
pub type RowsByPrimaryKey = HashMap<ColumnValues, NullableRow>;

/// How a column's default is specified, if at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ColumnDefault {
    #[default]
    None,
    /// A literal default value.
    Value(String),
    /// A default expression evaluated by the database.
    Expression(String),
    /// Populated from a sequence; the payload is kept for forward
    /// compatibility but currently unused.
    Sequence(String),
}

/// Engine-specific column behavior flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ColumnFlags {
    #[serde(default)]
    pub mysql_timestamp: bool,
    #[serde(default)]
    pub mysql_on_update_timestamp: bool,
    #[serde(default)]
    pub time_zone: bool,
}

/// A table column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Logical type name (database-portable).
    pub column_type: String,
    #[serde(default)]
    pub size: u32,
    #[serde(default)]
    pub scale: u32,
    #[serde(default)]
    pub nullable: bool,
    /// Engine-specific type definition, when the logical type is not enough
    /// to recreate the column.
    #[serde(default)]
    pub db_type_def: String,
    #[serde(default)]
    pub default: ColumnDefault,
    /// When non-empty, this expression is substituted for the column at read
    /// time. Such columns cannot serve in a surrogate primary key.
    #[serde(default)]
    pub filter_expression: String,
    #[serde(default)]
    pub flags: ColumnFlags,
}

impl Column {
    /// A plain non-nullable column with no extras, mostly for tests.
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            size: 0,
            scale: 0,
            nullable: false,
            db_type_def: String::new(),
            default: ColumnDefault::None,
            filter_expression: String::new(),
            flags: ColumnFlags::default(),
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// A declared index on a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    pub name: String,
    pub unique: bool,
    /// Column indices into [`Table::columns`], in index order.
    pub columns: Vec<usize>,
}

/// The provenance of a table's effective primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PrimaryKeyType {
    /// The table declares a real primary key.
    ExplicitPrimaryKey,
    /// No declared primary key, but a unique key over non-nullable,
    /// unfiltered columns stands in for one.
    SuitableUniqueKey,
    /// No usable key at all, but every column is non-nullable, so the whole
    /// row identifies itself.
    EntireRowAsKey,
    /// At least one nullable column and no usable unique key. Range queries
    /// are disabled for such tables.
    #[default]
    NoAvailableKey,
}

/// A table with its derived range-query key.
///
/// `primary_key_columns` is non-empty for every `primary_key_type` except
/// `NoAvailableKey`, and only ever references non-nullable columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub columns: Vec<Column>,
    pub keys: Vec<Key>,
    #[serde(default)]
    pub primary_key_columns: Vec<usize>,
    #[serde(default)]
    pub primary_key_type: PrimaryKeyType,
}

impl Table {
    /// Project a row onto this table's primary key columns.
    ///
    /// Primary key columns cannot be null; observing one is a sync error
    /// (the endpoints disagree about the schema or the data is broken).
    pub fn primary_key_of(&self, row: &NullableRow) -> Result<ColumnValues> {
        let mut primary_key = Vec::with_capacity(self.primary_key_columns.len());
        for &column in &self.primary_key_columns {
            match row.get(column) {
                Some(Some(value)) => primary_key.push(value.clone()),
                Some(None) => {
                    return Err(SyncError::sync(
                        &self.name,
                        format!("primary key column `{}` is null", self.columns[column].name),
                    ))
                }
                None => {
                    return Err(SyncError::sync(
                        &self.name,
                        format!(
                            "row has {} columns but primary key references column {}",
                            row.len(),
                            column
                        ),
                    ))
                }
            }
        }
        Ok(primary_key)
    }
}

/// The schema of one endpoint: every table we may be asked to sync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Database {
    pub tables: Vec<Table>,
}

impl Database {
    pub fn new(tables: Vec<Table>) -> Self {
        Self { tables }
    }

    /// Look up a table by name. Unknown names are command errors: the peer
    /// asked for something our schema load never produced.
    pub fn table_by_name(&self, name: &str) -> Result<&Table> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| SyncError::Command(format!("Unknown table {name}")))
    }
}
