//! SQL assembly for range selects, range deletes, and batched inserts.
//!
//! Value escaping and identifier quoting are delegated to the database
//! client; everything else about the emitted SQL is fixed here. Composite
//! key ranges use tuple comparison, `(c1,c2) > (v1,v2) AND (c1,c2) <= (w1,w2)`,
//! which every supported engine evaluates lexicographically.

use crate::client::DatabaseClient;
use crate::defaults::MAX_SENSIBLE_INSERT_COMMAND_SIZE;
use crate::schema::{ColumnValues, NullableRow, Table};

/// Quote an identifier with the client's quote character, doubling any
/// embedded quote characters.
pub fn quote_ident(name: &str, quote: char) -> String {
    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push(quote);
    for c in name.chars() {
        quoted.push(c);
        if c == quote {
            quoted.push(c);
        }
    }
    quoted.push(quote);
    quoted
}

/// A parenthesized tuple of quoted column names, `("a","b")`.
pub fn columns_tuple(table: &Table, columns: &[usize], quote: char) -> String {
    let names: Vec<String> = columns
        .iter()
        .map(|&c| quote_ident(&table.columns[c].name, quote))
        .collect();
    format!("({})", names.join(","))
}

/// A parenthesized tuple of escaped value literals, `('1','a')`.
pub fn values_tuple<C: DatabaseClient + ?Sized>(client: &C, values: &ColumnValues) -> String {
    let literals: Vec<String> = values
        .iter()
        .map(|v| format!("'{}'", client.escape_value(v)))
        .collect();
    format!("({})", literals.join(","))
}

/// The comma-separated value list of one row for a VALUES clause, NULLs
/// included.
pub fn row_values_sql<C: DatabaseClient + ?Sized>(client: &C, row: &NullableRow) -> String {
    let mut sql = String::new();
    for (n, value) in row.iter().enumerate() {
        if n > 0 {
            sql.push(',');
        }
        match value {
            None => sql.push_str("NULL"),
            Some(v) => {
                sql.push('\'');
                sql.push_str(&client.escape_value(v));
                sql.push('\'');
            }
        }
    }
    sql
}

/// The WHERE clause bounding `(prev_key, last_key]`, with a leading space.
/// Open endpoints contribute no bound; a fully open range yields the empty
/// string (whole table).
pub fn where_sql<C: DatabaseClient + ?Sized>(
    client: &C,
    columns_sql: &str,
    prev_key: &ColumnValues,
    last_key: &ColumnValues,
) -> String {
    let mut conditions = Vec::with_capacity(2);
    if !prev_key.is_empty() {
        conditions.push(format!("{columns_sql} > {}", values_tuple(client, prev_key)));
    }
    if !last_key.is_empty() {
        conditions.push(format!("{columns_sql} <= {}", values_tuple(client, last_key)));
    }
    if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    }
}

/// The SELECT streaming `(prev_key, last_key]` in primary-key order.
///
/// Columns with a filter expression are read through it, aliased back to the
/// column name, so filtered values never leave the source.
pub fn retrieve_rows_sql<C: DatabaseClient + ?Sized>(
    client: &C,
    table: &Table,
    prev_key: &ColumnValues,
    last_key: &ColumnValues,
    row_count_limit: Option<usize>,
) -> String {
    let quote = client.quote_identifiers_with();

    let select_list: Vec<String> = table
        .columns
        .iter()
        .map(|column| {
            let quoted = quote_ident(&column.name, quote);
            if column.filter_expression.is_empty() {
                quoted
            } else {
                format!("{} AS {}", column.filter_expression, quoted)
            }
        })
        .collect();

    let mut sql = format!("SELECT {} FROM {}", select_list.join(", "), table.name);

    if !table.primary_key_columns.is_empty() {
        let columns_sql = columns_tuple(table, &table.primary_key_columns, quote);
        sql.push_str(&where_sql(client, &columns_sql, prev_key, last_key));
        sql.push_str(" ORDER BY ");
        sql.push_str(&order_by_list(table, quote, false));
    }

    if let Some(limit) = row_count_limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    sql
}

/// The SELECT producing the primary key tuple of the least row.
pub fn select_first_key_sql<C: DatabaseClient + ?Sized>(client: &C, table: &Table) -> String {
    select_boundary_key_sql(client, table, false)
}

/// The SELECT producing the primary key tuple of the greatest row.
pub fn select_last_key_sql<C: DatabaseClient + ?Sized>(client: &C, table: &Table) -> String {
    select_boundary_key_sql(client, table, true)
}

fn select_boundary_key_sql<C: DatabaseClient + ?Sized>(
    client: &C,
    table: &Table,
    descending: bool,
) -> String {
    let quote = client.quote_identifiers_with();
    let names: Vec<String> = table
        .primary_key_columns
        .iter()
        .map(|&c| quote_ident(&table.columns[c].name, quote))
        .collect();
    format!(
        "SELECT {} FROM {} ORDER BY {} LIMIT 1",
        names.join(", "),
        table.name,
        order_by_list(table, quote, descending)
    )
}

fn order_by_list(table: &Table, quote: char, descending: bool) -> String {
    table
        .primary_key_columns
        .iter()
        .map(|&c| {
            let quoted = quote_ident(&table.columns[c].name, quote);
            if descending {
                format!("{quoted} DESC")
            } else {
                quoted
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// A statement built up entry by entry and executed in batches.
///
/// Entries accumulate between a fixed prefix and suffix; once the statement
/// crosses the size threshold the caller takes it, executes it, and the
/// builder starts over. Building enormous strings is as wasteful as a round
/// trip per row, so the threshold bounds both.
#[derive(Debug)]
pub struct BatchedSql {
    prefix: String,
    separator: String,
    suffix: String,
    curr: String,
}

impl BatchedSql {
    pub fn new(
        prefix: impl Into<String>,
        separator: impl Into<String>,
        suffix: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            separator: separator.into(),
            suffix: suffix.into(),
            curr: String::new(),
        }
    }

    pub fn have_content(&self) -> bool {
        !self.curr.is_empty()
    }

    /// Append one entry, inserting the separator between entries.
    pub fn add(&mut self, entry: &str) {
        if self.curr.is_empty() {
            self.curr.push_str(&self.prefix);
        } else {
            self.curr.push_str(&self.separator);
        }
        self.curr.push_str(entry);
    }

    pub fn over_threshold(&self) -> bool {
        self.curr.len() > MAX_SENSIBLE_INSERT_COMMAND_SIZE
    }

    /// Take the completed statement, resetting the builder. `None` when
    /// nothing has been added since the last take.
    pub fn take_statement(&mut self) -> Option<String> {
        if self.curr.is_empty() {
            return None;
        }
        let mut statement = std::mem::take(&mut self.curr);
        statement.push_str(&self.suffix);
        Some(statement)
    }
}
