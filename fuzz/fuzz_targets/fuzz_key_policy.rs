//! Fuzz the primary key policy with arbitrary table shapes.
//!
//! Whatever the columns and keys look like, the policy must terminate with a
//! consistent assignment: no key columns for `NoAvailableKey`, non-nullable
//! key columns otherwise, and a full permutation for `EntireRowAsKey`.

#![no_main]

use libfuzzer_sys::fuzz_target;
use rowsync::{choose_primary_key_for, Column, Key, PrimaryKeyType, Table};

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    let column_count = usize::from(data[0] % 8) + 1;
    let mut columns = Vec::with_capacity(column_count);
    for n in 0..column_count {
        let flags = data.get(1 + n).copied().unwrap_or(0);
        let mut column = Column::new(format!("c{n}"), "TEXT");
        column.nullable = flags & 1 != 0;
        if flags & 2 != 0 {
            column.filter_expression = "''".to_string();
        }
        columns.push(column);
    }

    let mut keys = Vec::new();
    let mut rest = data.get(1 + column_count..).unwrap_or(&[]);
    while rest.len() >= 2 && keys.len() < 6 {
        let unique = rest[0] & 1 != 0;
        let width = usize::from(rest[1] % 4) + 1;
        let mut key_columns = Vec::new();
        for byte in rest.iter().skip(2).take(width) {
            let column = usize::from(*byte) % column_count;
            if !key_columns.contains(&column) {
                key_columns.push(column);
            }
        }
        rest = rest.get(2 + width..).unwrap_or(&[]);
        if key_columns.is_empty() {
            continue;
        }
        keys.push(Key {
            name: format!("k{}", keys.len()),
            unique,
            columns: key_columns,
        });
    }

    let mut table = Table {
        name: "t".to_string(),
        columns,
        keys,
        primary_key_columns: vec![],
        primary_key_type: PrimaryKeyType::NoAvailableKey,
    };
    choose_primary_key_for(&mut table);

    match table.primary_key_type {
        PrimaryKeyType::NoAvailableKey => assert!(table.primary_key_columns.is_empty()),
        PrimaryKeyType::EntireRowAsKey => {
            let mut sorted = table.primary_key_columns.clone();
            sorted.sort_unstable();
            assert_eq!(sorted, (0..table.columns.len()).collect::<Vec<_>>());
        }
        _ => assert!(table
            .primary_key_columns
            .iter()
            .all(|&c| !table.columns[c].nullable)),
    }
});
