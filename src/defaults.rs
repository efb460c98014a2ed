//! Build-time defaults and protocol constants.
//!
//! These are process-wide constants; the protocol engine takes a copy of
//! [`DEFAULT_HASH_ALGORITHM`] at connection start and only the
//! HASH_ALGORITHM negotiation may move it from there.

use crate::hash::HashAlgorithm;

/// The hash algorithm a connection starts in, until the peer negotiates
/// another one.
pub const DEFAULT_HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Md5;

/// Cap on rows per SQL query while streaming a ROWS range.
///
/// Keeps individual queries from being logged as slow on the server and
/// bounds result-set buffering; the stream chains batches by last emitted
/// key, so the peer still observes one contiguous range. Tables without a
/// usable primary key cannot be chained and are read in a single query.
pub const ROWS_QUERY_BATCH_SIZE: usize = 10_000;

/// Byte threshold at which a batched INSERT/REPLACE statement is flushed.
///
/// Bounds peak statement size (servers cap packet sizes) while still
/// amortizing round trips across many rows.
pub const MAX_SENSIBLE_INSERT_COMMAND_SIZE: usize = 4 * 1024 * 1024;

pub const EARLIEST_PROTOCOL_VERSION_SUPPORTED: u32 = 7;
pub const LATEST_PROTOCOL_VERSION_SUPPORTED: u32 = 8;

/// Protocol versions up to this one order FILTERS after snapshot setup.
pub const LAST_FILTERS_AFTER_SNAPSHOT_PROTOCOL_VERSION: u32 = 7;

/// Protocol versions up to this one use the legacy schema serialization and
/// the historical hash algorithm tag layout.
pub const LAST_LEGACY_SCHEMA_FORMAT_VERSION: u32 = 7;
