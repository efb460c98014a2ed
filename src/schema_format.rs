//! Schema serialization for the SCHEMA verb.
//!
//! The worker owns schema exchange, but the two map formats are protocol
//! contract, so they live here. Protocol versions up to
//! [`LAST_LEGACY_SCHEMA_FORMAT_VERSION`] use a deviation-only encoding:
//! column map keys are present only when the value differs from its default.
//! The current format packs every column field unconditionally.

use crate::defaults::LAST_LEGACY_SCHEMA_FORMAT_VERSION;
use crate::schema::{Column, ColumnDefault, Key, Table};
use crate::wire::Value;

fn entry(name: &str, value: Value) -> (Value, Value) {
    (Value::Str(name.to_string()), value)
}

/// Serialize a column under the given protocol version's format.
pub fn serialize_column(column: &Column, protocol_version: u32) -> Value {
    if protocol_version <= LAST_LEGACY_SCHEMA_FORMAT_VERSION {
        legacy_serialize_column(column)
    } else {
        current_serialize_column(column)
    }
}

/// Serialize a key. The key map predates the format split and is identical
/// in both.
pub fn serialize_key(key: &Key) -> Value {
    Value::Map(vec![
        entry("name", Value::Str(key.name.clone())),
        entry("unique", Value::Bool(key.unique)),
        entry(
            "columns",
            Value::Array(key.columns.iter().map(|&c| Value::Uint(c as u64)).collect()),
        ),
    ])
}

/// Serialize a table: name, columns, primary key, and declared keys.
pub fn serialize_table(table: &Table, protocol_version: u32) -> Value {
    Value::Map(vec![
        entry("name", Value::Str(table.name.clone())),
        entry(
            "columns",
            Value::Array(
                table
                    .columns
                    .iter()
                    .map(|c| serialize_column(c, protocol_version))
                    .collect(),
            ),
        ),
        entry(
            "primary_key_columns",
            Value::Array(
                table
                    .primary_key_columns
                    .iter()
                    .map(|&c| Value::Uint(c as u64))
                    .collect(),
            ),
        ),
        entry(
            "keys",
            Value::Array(table.keys.iter().map(serialize_key).collect()),
        ),
    ])
}

/// Version ≤7 column map: keys present only when they deviate from defaults.
fn legacy_serialize_column(column: &Column) -> Value {
    let mut pairs = vec![
        entry("name", Value::Str(column.name.clone())),
        entry("column_type", Value::Str(column.column_type.clone())),
    ];
    if column.size != 0 {
        pairs.push(entry("size", Value::Uint(u64::from(column.size))));
    }
    if column.scale != 0 {
        pairs.push(entry("scale", Value::Uint(u64::from(column.scale))));
    }
    if !column.nullable {
        pairs.push(entry("nullable", Value::Bool(false)));
    }
    if !column.db_type_def.is_empty() {
        pairs.push(entry("db_type_def", Value::Str(column.db_type_def.clone())));
    }
    match &column.default {
        ColumnDefault::None => {}
        // the sequence payload is currently unused, but allowed for forward
        // compatibility
        ColumnDefault::Sequence(value) => {
            pairs.push(entry("sequence", Value::Str(value.clone())));
        }
        ColumnDefault::Value(value) => {
            pairs.push(entry("default_value", Value::Str(value.clone())));
        }
        ColumnDefault::Expression(value) => {
            pairs.push(entry("default_function", Value::Str(value.clone())));
        }
    }
    if column.flags.mysql_timestamp {
        pairs.push(entry("mysql_timestamp", Value::Bool(true)));
    }
    if column.flags.mysql_on_update_timestamp {
        pairs.push(entry("mysql_on_update_timestamp", Value::Bool(true)));
    }
    if column.flags.time_zone {
        pairs.push(entry("time_zone", Value::Bool(true)));
    }
    Value::Map(pairs)
}

/// Version 8 column map: every field, unconditionally.
fn current_serialize_column(column: &Column) -> Value {
    let (default_key, default_value) = match &column.default {
        ColumnDefault::None => ("default_value", Value::Nil),
        ColumnDefault::Value(value) => ("default_value", Value::Str(value.clone())),
        ColumnDefault::Expression(value) => ("default_function", Value::Str(value.clone())),
        ColumnDefault::Sequence(value) => ("sequence", Value::Str(value.clone())),
    };
    Value::Map(vec![
        entry("name", Value::Str(column.name.clone())),
        entry("column_type", Value::Str(column.column_type.clone())),
        entry("size", Value::Uint(u64::from(column.size))),
        entry("scale", Value::Uint(u64::from(column.scale))),
        entry("nullable", Value::Bool(column.nullable)),
        entry("db_type_def", Value::Str(column.db_type_def.clone())),
        entry(default_key, default_value),
        entry("mysql_timestamp", Value::Bool(column.flags.mysql_timestamp)),
        entry(
            "mysql_on_update_timestamp",
            Value::Bool(column.flags.mysql_on_update_timestamp),
        ),
        entry("time_zone", Value::Bool(column.flags.time_zone)),
    ])
}
