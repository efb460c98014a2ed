// Copyright (c) 2025-2026 the rowsync authors. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Hash algorithms and the order-dependent row hasher.
//!
//! The two endpoints compare ranges by digest, so both must absorb exactly
//! the same bytes in exactly the same order. Each value is absorbed in its
//! framed wire encoding: a length-prefixed binary for non-null values and the
//! distinguished nil marker for NULL. This keeps NULL, the empty string, and
//! adjacent-value concatenation all distinguishable.
//!
//! # Tag layouts
//!
//! Two historical wire enumerations exist and the peers must agree, so the
//! layout is keyed off the negotiated protocol version rather than assumed:
//!
//! | Tag | Version 7 | Version 8 |
//! |-----|-----------|-----------|
//! | 0 | md5 | md5 |
//! | 1 | xxh64 | xxh64 |
//! | 2 | blake2b | sha224 |
//! | 3 | — | sha256 |
//! | 4 | — | sha384 |
//! | 5 | — | sha512 |

use crate::client::RowConsumer;
use crate::defaults::LAST_LEGACY_SCHEMA_FORMAT_VERSION;
use crate::error::{Result, SyncError};
use crate::schema::NullableRow;
use crate::wire;
use blake2::Blake2b512;
use md5::Md5;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use xxhash_rust::xxh64::Xxh64;

/// A range digest algorithm.
///
/// `Md5` and `Xxh64` are the weak defaults a session may start in; the
/// HASH_ALGORITHM negotiation can upgrade away from them but never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Md5,
    Xxh64,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Blake2b,
}

impl HashAlgorithm {
    /// Whether this algorithm is one of the weak defaults that negotiation
    /// is still allowed to replace.
    pub fn is_weak_default(self) -> bool {
        matches!(self, Self::Md5 | Self::Xxh64)
    }

    /// Decode a wire tag under the given protocol version's layout.
    pub fn from_tag(tag: u64, protocol_version: u32) -> Result<Self> {
        let legacy = protocol_version <= LAST_LEGACY_SCHEMA_FORMAT_VERSION;
        match (tag, legacy) {
            (0, _) => Ok(Self::Md5),
            (1, _) => Ok(Self::Xxh64),
            (2, true) => Ok(Self::Blake2b),
            (2, false) => Ok(Self::Sha224),
            (3, false) => Ok(Self::Sha256),
            (4, false) => Ok(Self::Sha384),
            (5, false) => Ok(Self::Sha512),
            _ => Err(SyncError::Command(format!(
                "Unknown hash algorithm {tag} for protocol version {protocol_version}"
            ))),
        }
    }

    /// Encode this algorithm under the given protocol version's layout.
    pub fn to_tag(self, protocol_version: u32) -> Result<u64> {
        let legacy = protocol_version <= LAST_LEGACY_SCHEMA_FORMAT_VERSION;
        match (self, legacy) {
            (Self::Md5, _) => Ok(0),
            (Self::Xxh64, _) => Ok(1),
            (Self::Blake2b, true) => Ok(2),
            (Self::Sha224, false) => Ok(2),
            (Self::Sha256, false) => Ok(3),
            (Self::Sha384, false) => Ok(4),
            (Self::Sha512, false) => Ok(5),
            _ => Err(SyncError::Command(format!(
                "Hash algorithm {self:?} has no tag under protocol version {protocol_version}"
            ))),
        }
    }
}

enum HasherState {
    Md5(Md5),
    Xxh64(Xxh64),
    Sha224(Sha224),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
    Blake2b(Blake2b512),
}

impl HasherState {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => Self::Md5(Md5::new()),
            HashAlgorithm::Xxh64 => Self::Xxh64(Xxh64::new(0)),
            HashAlgorithm::Sha224 => Self::Sha224(Sha224::new()),
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => Self::Sha384(Sha384::new()),
            HashAlgorithm::Sha512 => Self::Sha512(Sha512::new()),
            HashAlgorithm::Blake2b => Self::Blake2b(Blake2b512::new()),
        }
    }

    fn update(&mut self, bytes: &[u8]) {
        match self {
            Self::Md5(h) => h.update(bytes),
            Self::Xxh64(h) => h.update(bytes),
            Self::Sha224(h) => h.update(bytes),
            Self::Sha256(h) => h.update(bytes),
            Self::Sha384(h) => h.update(bytes),
            Self::Sha512(h) => h.update(bytes),
            Self::Blake2b(h) => h.update(bytes),
        }
    }

    fn finish(self) -> Vec<u8> {
        match self {
            Self::Md5(h) => h.finalize().to_vec(),
            Self::Xxh64(h) => h.digest().to_be_bytes().to_vec(),
            Self::Sha224(h) => h.finalize().to_vec(),
            Self::Sha256(h) => h.finalize().to_vec(),
            Self::Sha384(h) => h.finalize().to_vec(),
            Self::Sha512(h) => h.finalize().to_vec(),
            Self::Blake2b(h) => h.finalize().to_vec(),
        }
    }
}

/// Incrementally hashes a row range.
///
/// The digest depends on row order; feed rows in primary-key ascending order
/// or the two endpoints will disagree about identical data.
pub struct RowHasher {
    state: HasherState,
    scratch: Vec<u8>,
    rows_hashed: usize,
}

impl RowHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self {
            state: HasherState::new(algorithm),
            scratch: Vec::with_capacity(16),
            rows_hashed: 0,
        }
    }

    /// Number of rows absorbed so far.
    pub fn rows_hashed(&self) -> usize {
        self.rows_hashed
    }

    /// Consume the hasher and return the digest as an opaque byte string.
    pub fn finish(self) -> Vec<u8> {
        self.state.finish()
    }
}

impl RowConsumer for RowHasher {
    fn row(&mut self, row: NullableRow) -> Result<()> {
        for value in &row {
            self.scratch.clear();
            match value {
                None => wire::put_nil(&mut self.scratch),
                Some(v) => wire::put_bin_header(&mut self.scratch, v.len()),
            }
            self.state.update(&self.scratch);
            if let Some(v) = value {
                self.state.update(v.as_bytes());
            }
        }
        self.rows_hashed += 1;
        Ok(())
    }
}
