// Copyright (c) 2025-2026 the rowsync authors. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The source ("from") side protocol engine.
//!
//! Reads framed verbs from the input stream, consults the database client,
//! and writes framed replies. Exactly one verb is in flight per connection,
//! and the output is flushed after every verb, so no verb can ever observe a
//! partially written reply from another.
//!
//! ```text
//! peer ──verb frame──▶ SyncFromProtocol ──SQL──▶ DatabaseClient
//!      ◀─reply frame── (flush per verb) ◀─rows──
//! ```
//!
//! Schema, filter, and snapshot verbs belong to the surrounding worker; the
//! engine reads their arguments, hands them to [`SessionHooks`], and writes
//! the reply, keeping the framing contract in one place.

use crate::client::{BoxFuture, DatabaseClient, RowConsumer};
use crate::defaults::{DEFAULT_HASH_ALGORITHM, ROWS_QUERY_BATCH_SIZE};
use crate::error::{Result, SyncError};
use crate::hash::{HashAlgorithm, RowHasher};
use crate::metrics;
use crate::schema::{ColumnValues, Database, NullableRow, PrimaryKeyType, Table};
use crate::wire::{Packer, Unpacker, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace};

/// Protocol verbs with their stable wire tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Range = 1,
    Hash = 2,
    Rows = 3,
    ExportSnapshot = 4,
    ImportSnapshot = 5,
    UnholdSnapshot = 6,
    WithoutSnapshot = 7,
    Schema = 8,
    TargetBlockSize = 9,
    HashAlgorithm = 10,
    Filters = 11,
    Quit = 12,
}

impl Verb {
    pub fn tag(self) -> u64 {
        self as u64
    }

    pub fn from_tag(tag: u64) -> Option<Self> {
        match tag {
            1 => Some(Self::Range),
            2 => Some(Self::Hash),
            3 => Some(Self::Rows),
            4 => Some(Self::ExportSnapshot),
            5 => Some(Self::ImportSnapshot),
            6 => Some(Self::UnholdSnapshot),
            7 => Some(Self::WithoutSnapshot),
            8 => Some(Self::Schema),
            9 => Some(Self::TargetBlockSize),
            10 => Some(Self::HashAlgorithm),
            11 => Some(Self::Filters),
            12 => Some(Self::Quit),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Range => "range",
            Self::Hash => "hash",
            Self::Rows => "rows",
            Self::ExportSnapshot => "export_snapshot",
            Self::ImportSnapshot => "import_snapshot",
            Self::UnholdSnapshot => "unhold_snapshot",
            Self::WithoutSnapshot => "without_snapshot",
            Self::Schema => "schema",
            Self::TargetBlockSize => "target_block_size",
            Self::HashAlgorithm => "hash_algorithm",
            Self::Filters => "filters",
            Self::Quit => "quit",
        }
    }
}

/// The worker-side handlers for verbs outside the row sync core.
///
/// The engine reads the verb's arguments and writes its reply; the hook only
/// supplies the reply's content. Snapshot coordination, schema dumping, and
/// filter installation all live behind this seam.
pub trait SessionHooks: Send {
    /// Handle a delegated verb. The returned values are written back as the
    /// reply arguments under the same verb tag.
    fn handle_command<'a>(&'a mut self, verb: Verb, args: Vec<Value>) -> BoxFuture<'a, Vec<Value>>;

    /// Called as the engine switches between tables, with a human-readable
    /// status line.
    fn show_status(&mut self, _status: &str) {}
}

/// Packs rows onto the wire while remembering the key of the last one, so
/// the next query batch can chain from it.
struct RowPackerAndLastKey<'p, W> {
    packer: &'p mut Packer<W>,
    table: &'p Table,
    last_key: ColumnValues,
}

impl<W: AsyncWrite + Unpin + Send> RowConsumer for RowPackerAndLastKey<'_, W> {
    fn row(&mut self, row: NullableRow) -> Result<()> {
        self.last_key = self.table.primary_key_of(&row)?;
        self.packer.pack_nullable_row(&row);
        Ok(())
    }
}

/// Serves the sync protocol from the source database.
///
/// One instance per connection; owns its streams and its per-connection hash
/// algorithm state, which starts at the build-time default and only ever
/// moves through the negotiation rule.
pub struct SyncFromProtocol<C, H, R, W> {
    client: C,
    schema: Database,
    hooks: H,
    input: Unpacker<R>,
    output: Packer<W>,
    hash_algorithm: HashAlgorithm,
    protocol_version: u32,
}

impl<C, H, R, W> SyncFromProtocol<C, H, R, W>
where
    C: DatabaseClient,
    H: SessionHooks,
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(
        client: C,
        schema: Database,
        hooks: H,
        reader: R,
        writer: W,
        protocol_version: u32,
    ) -> Self {
        Self {
            client,
            schema,
            hooks,
            input: Unpacker::new(reader),
            output: Packer::new(writer),
            // until advised to use a different hash algorithm by the 'to' end
            hash_algorithm: DEFAULT_HASH_ALGORITHM,
            protocol_version,
        }
    }

    /// The hash algorithm currently in effect for this connection.
    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash_algorithm
    }

    /// Serve verbs until the peer sends QUIT.
    ///
    /// Returns `Err` on unknown verbs, malformed arguments, stream
    /// corruption, or database failures; all of those leave the connection
    /// unusable and the caller closes it.
    pub async fn handle_commands(&mut self) -> Result<()> {
        loop {
            let frame_len = self.input.next_array_len().await?;
            if frame_len == 0 {
                return Err(SyncError::Protocol("empty command frame".to_string()));
            }
            let tag = self.input.next_uint().await?;
            let argc = frame_len - 1;

            let verb = Verb::from_tag(tag)
                .ok_or_else(|| SyncError::Command(format!("Unknown command {tag}")))?;
            trace!(verb = verb.name(), argc, "dispatching verb");
            metrics::record_command(verb.name());

            match verb {
                Verb::Range => self.handle_range_command(argc).await?,
                Verb::Hash => self.handle_hash_command(argc).await?,
                Verb::Rows => self.handle_rows_command(argc).await?,
                Verb::HashAlgorithm => self.handle_hash_algorithm_command(argc).await?,
                Verb::TargetBlockSize => self.handle_target_block_size_command(argc).await?,
                Verb::Quit => {
                    self.drain_arguments(argc).await?;
                    debug!("peer finished, closing command loop");
                    return Ok(());
                }
                delegated => self.handle_delegated_command(delegated, argc).await?,
            }

            self.output.flush().await?;
        }
    }

    async fn handle_range_command(&mut self, argc: usize) -> Result<()> {
        check_argument_count(Verb::Range, argc, 1)?;
        let table_name = self.input.next_str().await?;
        self.hooks.show_status(&format!("syncing {table_name}"));

        let table = self.schema.table_by_name(&table_name)?;
        let (first_key, last_key) = self.client.table_key_range(table).await?;
        debug!(
            table = %table_name,
            empty = first_key.is_empty(),
            "serving table range"
        );

        self.output.pack_array_len(4);
        self.output.pack_uint(Verb::Range.tag());
        self.output.pack_str(&table_name);
        self.output.pack_key(&first_key);
        self.output.pack_key(&last_key);
        Ok(())
    }

    async fn handle_hash_command(&mut self, argc: usize) -> Result<()> {
        check_argument_count(Verb::Hash, argc, 4)?;
        let table_name = self.input.next_str().await?;
        let prev_key = self.input.next_key().await?;
        let last_key = self.input.next_key().await?;
        let rows_to_hash = self.input.next_uint().await?;
        self.hooks.show_status(&format!("syncing {table_name}"));

        let table = self.schema.table_by_name(&table_name)?;
        let mut hasher = RowHasher::new(self.hash_algorithm);
        let row_count = self
            .client
            .retrieve_rows(
                table,
                &prev_key,
                &last_key,
                Some(rows_to_hash as usize),
                &mut hasher,
            )
            .await?;
        metrics::record_rows_hashed(&table_name, row_count);

        self.output.pack_array_len(7);
        self.output.pack_uint(Verb::Hash.tag());
        self.output.pack_str(&table_name);
        self.output.pack_key(&prev_key);
        self.output.pack_key(&last_key);
        self.output.pack_uint(rows_to_hash);
        self.output.pack_uint(row_count as u64);
        self.output.pack_bin(&hasher.finish());
        Ok(())
    }

    async fn handle_rows_command(&mut self, argc: usize) -> Result<()> {
        check_argument_count(Verb::Rows, argc, 3)?;
        let table_name = self.input.next_str().await?;
        let prev_key = self.input.next_key().await?;
        let last_key = self.input.next_key().await?;
        self.hooks.show_status(&format!("syncing {table_name}"));

        self.output.pack_array_len(4);
        self.output.pack_uint(Verb::Rows.tag());
        self.output.pack_str(&table_name);
        self.output.pack_key(&prev_key);
        self.output.pack_key(&last_key);

        let sent = self.send_rows(&table_name, prev_key, &last_key).await?;
        metrics::record_rows_sent(&table_name, sent);

        // one frame per row, then an empty row; empty rows aren't valid
        // data, so the terminator is unambiguous
        self.output.pack_array_len(0);
        Ok(())
    }

    async fn send_rows(
        &mut self,
        table_name: &str,
        mut prev_key: ColumnValues,
        last_key: &ColumnValues,
    ) -> Result<usize> {
        let table = self.schema.table_by_name(table_name)?;

        // individual queries are capped to keep slow-query logging quiet on
        // the server and bound buffering; the batches chain on the last key
        // sent. that only works with a usable primary key, so keyless
        // tables are read in one unbounded query.
        let batch_size = if table.primary_key_type == PrimaryKeyType::NoAvailableKey {
            None
        } else {
            Some(ROWS_QUERY_BATCH_SIZE)
        };

        let mut total = 0usize;
        loop {
            let mut row_packer = RowPackerAndLastKey {
                packer: &mut self.output,
                table,
                last_key: ColumnValues::new(),
            };
            let row_count = self
                .client
                .retrieve_rows(table, &prev_key, last_key, batch_size, &mut row_packer)
                .await?;
            total += row_count;

            match batch_size {
                Some(batch) if row_count == batch => {
                    prev_key = std::mem::take(&mut row_packer.last_key);
                    self.output.flush().await?;
                }
                _ => break,
            }
        }
        Ok(total)
    }

    async fn handle_hash_algorithm_command(&mut self, argc: usize) -> Result<()> {
        check_argument_count(Verb::HashAlgorithm, argc, 1)?;
        let requested_tag = self.input.next_uint().await?;
        let requested = HashAlgorithm::from_tag(requested_tag, self.protocol_version)?;

        // sticky negotiation: a weak default can be upgraded, but once on a
        // strong algorithm nothing moves us off it mid-session
        if self.hash_algorithm.is_weak_default() {
            debug!(from = ?self.hash_algorithm, to = ?requested, "hash algorithm negotiated");
            self.hash_algorithm = requested;
        }

        self.output.pack_array_len(2);
        self.output.pack_uint(Verb::HashAlgorithm.tag());
        self.output
            .pack_uint(self.hash_algorithm.to_tag(self.protocol_version)?);
        Ok(())
    }

    // deprecated as not relevant under current protocol versions, but still
    // supported for backwards compatibility; older versions require that we
    // accept the requested size and send it back
    async fn handle_target_block_size_command(&mut self, argc: usize) -> Result<()> {
        check_argument_count(Verb::TargetBlockSize, argc, 1)?;
        let target_minimum_block_size = self.input.next_uint().await?;

        self.output.pack_array_len(2);
        self.output.pack_uint(Verb::TargetBlockSize.tag());
        self.output.pack_uint(target_minimum_block_size);
        Ok(())
    }

    async fn handle_delegated_command(&mut self, verb: Verb, argc: usize) -> Result<()> {
        let mut args = Vec::with_capacity(argc);
        for _ in 0..argc {
            args.push(self.input.next_value().await?);
        }

        let reply = self.hooks.handle_command(verb, args).await?;

        self.output.pack_array_len(1 + reply.len());
        self.output.pack_uint(verb.tag());
        for value in &reply {
            self.output.pack_value(value);
        }
        Ok(())
    }

    async fn drain_arguments(&mut self, argc: usize) -> Result<()> {
        for _ in 0..argc {
            self.input.next_value().await?;
        }
        Ok(())
    }
}

fn check_argument_count(verb: Verb, argc: usize, expected: usize) -> Result<()> {
    if argc != expected {
        return Err(SyncError::Command(format!(
            "Command {} takes {} arguments, got {}",
            verb.name(),
            expected,
            argc
        )));
    }
    Ok(())
}
