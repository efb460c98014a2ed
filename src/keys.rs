//! Primary key selection for range queries.
//!
//! Hash-based range recursion needs a total order over rows, which needs a
//! key: non-nullable (NULL makes `>` / `<=` three-valued in SQL, so ranges
//! stop being well-defined) and unique (or the recursion cannot terminate on
//! a single row). Most tables declare a real primary key; this module decides
//! what to do for the ones that don't.

use crate::schema::{PrimaryKeyType, Table};

/// Check whether a column is unusable in a surrogate key: nullable, or
/// replaced by a filter expression at read time (its stored value never
/// reaches the wire, so it cannot identify a row).
fn column_nullable_or_replaced(table: &Table, column: usize) -> bool {
    table.columns[column].nullable || !table.columns[column].filter_expression.is_empty()
}

/// Assign `primary_key_type` and `primary_key_columns` for a table.
///
/// In order:
///
/// 1. A declared primary key is kept as-is.
/// 2. The first declared unique key whose columns are all non-nullable and
///    unfiltered becomes a surrogate primary key.
/// 3. If any column is nullable, the table gets `NoAvailableKey` and range
///    queries are disabled for it.
/// 4. Otherwise the entire row acts as the key: the first longest declared
///    key supplies the column order, extended by every missing column in
///    declared order, producing a permutation of all columns.
pub fn choose_primary_key_for(table: &mut Table) {
    // generally we expect most tables to have a real primary key
    if table.primary_key_type == PrimaryKeyType::ExplicitPrimaryKey {
        return;
    }

    // if not, we need a unique key with no nullable or filtered columns to
    // act as a surrogate primary key
    for key in &table.keys {
        if key.unique
            && !key
                .columns
                .iter()
                .any(|&column| column_nullable_or_replaced(table, column))
        {
            table.primary_key_columns = key.columns.clone();
            table.primary_key_type = PrimaryKeyType::SuitableUniqueKey;
            return;
        }
    }

    // nullable columns can't be compared with > and <= in SQL, so there's no
    // way to make range queries work
    if table.columns.iter().any(|column| column.nullable) {
        table.primary_key_columns.clear();
        table.primary_key_type = PrimaryKeyType::NoAvailableKey;
        return;
    }

    // every column is non-nullable, so the entire row can serve as its own
    // key. start from the first longest declared key so the ordering matches
    // an index where one exists, then append the remaining columns.
    let mut columns: Vec<usize> = Vec::new();
    for key in &table.keys {
        if key.columns.len() > columns.len() {
            columns = key.columns.clone();
        }
    }
    for column in 0..table.columns.len() {
        if !columns.contains(&column) {
            columns.push(column);
        }
    }
    table.primary_key_columns = columns;
    table.primary_key_type = PrimaryKeyType::EntireRowAsKey;
}
