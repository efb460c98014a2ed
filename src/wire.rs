// Copyright (c) 2025-2026 the rowsync authors. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Wire framing: a MessagePack-subset packer/unpacker.
//!
//! Every verb round trip is built from length-prefixed array/map frames over
//! a duplex byte stream. The engine only ever needs nil, bool, unsigned
//! integers, strings, binary, arrays, and maps, so that is the whole format;
//! markers outside the subset are protocol errors rather than silently
//! skipped.
//!
//! [`Packer`] accumulates frames in an internal buffer and performs async I/O
//! only in [`flush()`](Packer::flush). That keeps packing synchronous (rows
//! are packed from inside a database result callback) and gives the engine
//! its flush-per-verb boundary for free.
//!
//! Decoded lengths are capped before allocation so a corrupt or hostile
//! header cannot request gigabytes.

use crate::error::{Result, SyncError};
use crate::schema::{ColumnValues, NullableRow};
use std::future::Future;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const NIL: u8 = 0xc0;
const FALSE: u8 = 0xc2;
const TRUE: u8 = 0xc3;
const BIN8: u8 = 0xc4;
const BIN16: u8 = 0xc5;
const BIN32: u8 = 0xc6;
const UINT8: u8 = 0xcc;
const UINT16: u8 = 0xcd;
const UINT32: u8 = 0xce;
const UINT64: u8 = 0xcf;
const STR8: u8 = 0xd9;
const STR16: u8 = 0xda;
const STR32: u8 = 0xdb;
const ARRAY16: u8 = 0xdc;
const ARRAY32: u8 = 0xdd;
const MAP16: u8 = 0xde;
const MAP32: u8 = 0xdf;

const FIXSTR_BASE: u8 = 0xa0;
const FIXARRAY_BASE: u8 = 0x90;
const FIXMAP_BASE: u8 = 0x80;

/// Maximum element count accepted for an array or map header.
const MAX_CONTAINER_ELEMENTS: u64 = 16 * 1024 * 1024;

/// Maximum byte length accepted for a string or binary header.
const MAX_BYTES_LENGTH: u64 = 256 * 1024 * 1024;

/// A decoded wire value, used where the frame shape is not known statically
/// (delegated verb arguments, schema payloads).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Nil,
    Bool(bool),
    Uint(u64),
    Str(String),
    Bin(Vec<u8>),
    Array(Vec<Value>),
    Map(Vec<(Value, Value)>),
}

// ─────────────────────────────────────────────────────────────────────────────
// Buffer-level encoders, shared with the row hasher (which absorbs the same
// framed encoding the wire would carry).
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) fn put_nil(buf: &mut Vec<u8>) {
    buf.push(NIL);
}

pub(crate) fn put_bool(buf: &mut Vec<u8>, b: bool) {
    buf.push(if b { TRUE } else { FALSE });
}

pub(crate) fn put_uint(buf: &mut Vec<u8>, n: u64) {
    if n < 0x80 {
        buf.push(n as u8);
    } else if n <= u64::from(u8::MAX) {
        buf.push(UINT8);
        buf.push(n as u8);
    } else if n <= u64::from(u16::MAX) {
        buf.push(UINT16);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= u64::from(u32::MAX) {
        buf.push(UINT32);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(UINT64);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

pub(crate) fn put_str(buf: &mut Vec<u8>, s: &str) {
    let len = s.len();
    if len < 32 {
        buf.push(FIXSTR_BASE | len as u8);
    } else if len <= usize::from(u8::MAX) {
        buf.push(STR8);
        buf.push(len as u8);
    } else if len <= usize::from(u16::MAX) {
        buf.push(STR16);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        buf.push(STR32);
        buf.extend_from_slice(&(len as u32).to_be_bytes());
    }
    buf.extend_from_slice(s.as_bytes());
}

pub(crate) fn put_bin_header(buf: &mut Vec<u8>, len: usize) {
    if len <= usize::from(u8::MAX) {
        buf.push(BIN8);
        buf.push(len as u8);
    } else if len <= usize::from(u16::MAX) {
        buf.push(BIN16);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        buf.push(BIN32);
        buf.extend_from_slice(&(len as u32).to_be_bytes());
    }
}

pub(crate) fn put_bin(buf: &mut Vec<u8>, bytes: &[u8]) {
    put_bin_header(buf, bytes.len());
    buf.extend_from_slice(bytes);
}

pub(crate) fn put_array_len(buf: &mut Vec<u8>, len: usize) {
    if len < 16 {
        buf.push(FIXARRAY_BASE | len as u8);
    } else if len <= usize::from(u16::MAX) {
        buf.push(ARRAY16);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        buf.push(ARRAY32);
        buf.extend_from_slice(&(len as u32).to_be_bytes());
    }
}

pub(crate) fn put_map_len(buf: &mut Vec<u8>, len: usize) {
    if len < 16 {
        buf.push(FIXMAP_BASE | len as u8);
    } else if len <= usize::from(u16::MAX) {
        buf.push(MAP16);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        buf.push(MAP32);
        buf.extend_from_slice(&(len as u32).to_be_bytes());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Packer
// ─────────────────────────────────────────────────────────────────────────────

/// Frame writer over an async byte stream.
pub struct Packer<W> {
    writer: W,
    buffer: Vec<u8>,
}

impl<W: AsyncWrite + Unpin + Send> Packer<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buffer: Vec::new(),
        }
    }

    pub fn pack_nil(&mut self) {
        put_nil(&mut self.buffer);
    }

    pub fn pack_bool(&mut self, b: bool) {
        put_bool(&mut self.buffer, b);
    }

    pub fn pack_uint(&mut self, n: u64) {
        put_uint(&mut self.buffer, n);
    }

    pub fn pack_str(&mut self, s: &str) {
        put_str(&mut self.buffer, s);
    }

    pub fn pack_bin(&mut self, bytes: &[u8]) {
        put_bin(&mut self.buffer, bytes);
    }

    pub fn pack_array_len(&mut self, len: usize) {
        put_array_len(&mut self.buffer, len);
    }

    pub fn pack_map_len(&mut self, len: usize) {
        put_map_len(&mut self.buffer, len);
    }

    /// Pack a key tuple as an array of strings. The empty tuple packs as an
    /// empty array, which is how open range endpoints travel.
    pub fn pack_key(&mut self, key: &ColumnValues) {
        self.pack_array_len(key.len());
        for value in key {
            self.pack_str(value);
        }
    }

    /// Pack a row as an array of nil-or-string values.
    ///
    /// Real rows always have at least one column, so the empty array is
    /// reserved as the end-of-rows terminator.
    pub fn pack_nullable_row(&mut self, row: &NullableRow) {
        self.pack_array_len(row.len());
        for value in row {
            match value {
                Some(v) => self.pack_str(v),
                None => self.pack_nil(),
            }
        }
    }

    pub fn pack_value(&mut self, value: &Value) {
        match value {
            Value::Nil => self.pack_nil(),
            Value::Bool(b) => self.pack_bool(*b),
            Value::Uint(n) => self.pack_uint(*n),
            Value::Str(s) => self.pack_str(s),
            Value::Bin(b) => self.pack_bin(b),
            Value::Array(items) => {
                self.pack_array_len(items.len());
                for item in items {
                    self.pack_value(item);
                }
            }
            Value::Map(pairs) => {
                self.pack_map_len(pairs.len());
                for (k, v) in pairs {
                    self.pack_value(k);
                    self.pack_value(v);
                }
            }
        }
    }

    /// Number of bytes packed but not yet flushed.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Consume the packer and return the underlying writer. Flush first or
    /// buffered frames are lost.
    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Write out and flush everything packed so far.
    pub async fn flush(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            self.writer.write_all(&self.buffer).await?;
            self.buffer.clear();
        }
        self.writer.flush().await?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Unpacker
// ─────────────────────────────────────────────────────────────────────────────

/// Frame reader over an async byte stream.
pub struct Unpacker<R> {
    reader: R,
}

impl<R: AsyncRead + Unpin + Send> Unpacker<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    async fn next_marker(&mut self) -> Result<u8> {
        Ok(self.reader.read_u8().await?)
    }

    async fn read_length(&mut self, bytes: usize) -> Result<u64> {
        match bytes {
            1 => Ok(u64::from(self.reader.read_u8().await?)),
            2 => Ok(u64::from(self.reader.read_u16().await?)),
            4 => Ok(u64::from(self.reader.read_u32().await?)),
            8 => Ok(self.reader.read_u64().await?),
            _ => unreachable!("length field is 1, 2, 4 or 8 bytes"),
        }
    }

    async fn read_payload(&mut self, len: u64) -> Result<Vec<u8>> {
        if len > MAX_BYTES_LENGTH {
            return Err(SyncError::Protocol(format!(
                "length {len} exceeds maximum payload size"
            )));
        }
        let mut payload = vec![0u8; len as usize];
        self.reader.read_exact(&mut payload).await?;
        Ok(payload)
    }

    fn check_container(len: u64) -> Result<usize> {
        if len > MAX_CONTAINER_ELEMENTS {
            return Err(SyncError::Protocol(format!(
                "container of {len} elements exceeds maximum"
            )));
        }
        Ok(len as usize)
    }

    pub async fn next_uint(&mut self) -> Result<u64> {
        let marker = self.next_marker().await?;
        match marker {
            0x00..=0x7f => Ok(u64::from(marker)),
            UINT8 => self.read_length(1).await,
            UINT16 => self.read_length(2).await,
            UINT32 => self.read_length(4).await,
            UINT64 => self.read_length(8).await,
            _ => Err(SyncError::Protocol(format!(
                "expected unsigned integer, found marker 0x{marker:02x}"
            ))),
        }
    }

    pub async fn next_bool(&mut self) -> Result<bool> {
        match self.next_marker().await? {
            TRUE => Ok(true),
            FALSE => Ok(false),
            marker => Err(SyncError::Protocol(format!(
                "expected bool, found marker 0x{marker:02x}"
            ))),
        }
    }

    pub async fn next_str(&mut self) -> Result<String> {
        let marker = self.next_marker().await?;
        let len = self.str_length(marker).await?;
        let payload = self.read_payload(len).await?;
        String::from_utf8(payload)
            .map_err(|e| SyncError::Protocol(format!("invalid UTF-8 in string: {e}")))
    }

    async fn str_length(&mut self, marker: u8) -> Result<u64> {
        match marker {
            0xa0..=0xbf => Ok(u64::from(marker & 0x1f)),
            STR8 => self.read_length(1).await,
            STR16 => self.read_length(2).await,
            STR32 => self.read_length(4).await,
            _ => Err(SyncError::Protocol(format!(
                "expected string, found marker 0x{marker:02x}"
            ))),
        }
    }

    pub async fn next_bin(&mut self) -> Result<Vec<u8>> {
        let marker = self.next_marker().await?;
        let len = match marker {
            BIN8 => self.read_length(1).await?,
            BIN16 => self.read_length(2).await?,
            BIN32 => self.read_length(4).await?,
            _ => {
                return Err(SyncError::Protocol(format!(
                    "expected binary, found marker 0x{marker:02x}"
                )))
            }
        };
        self.read_payload(len).await
    }

    pub async fn next_array_len(&mut self) -> Result<usize> {
        let marker = self.next_marker().await?;
        let len = match marker {
            0x90..=0x9f => u64::from(marker & 0x0f),
            ARRAY16 => self.read_length(2).await?,
            ARRAY32 => self.read_length(4).await?,
            _ => {
                return Err(SyncError::Protocol(format!(
                    "expected array, found marker 0x{marker:02x}"
                )))
            }
        };
        Self::check_container(len)
    }

    pub async fn next_map_len(&mut self) -> Result<usize> {
        let marker = self.next_marker().await?;
        let len = match marker {
            0x80..=0x8f => u64::from(marker & 0x0f),
            MAP16 => self.read_length(2).await?,
            MAP32 => self.read_length(4).await?,
            _ => {
                return Err(SyncError::Protocol(format!(
                    "expected map, found marker 0x{marker:02x}"
                )))
            }
        };
        Self::check_container(len)
    }

    /// Read a key tuple: an array of strings. Empty means an open endpoint.
    pub async fn next_key(&mut self) -> Result<ColumnValues> {
        let len = self.next_array_len().await?;
        let mut key = Vec::with_capacity(len.min(64));
        for _ in 0..len {
            key.push(self.next_str().await?);
        }
        Ok(key)
    }

    /// Read a row: an array of nil-or-string values. The empty array is the
    /// end-of-rows terminator, returned here as an empty row.
    pub async fn next_nullable_row(&mut self) -> Result<NullableRow> {
        let len = self.next_array_len().await?;
        let mut row = Vec::with_capacity(len.min(256));
        for _ in 0..len {
            let marker = self.next_marker().await?;
            if marker == NIL {
                row.push(None);
            } else {
                let str_len = self.str_length(marker).await?;
                let payload = self.read_payload(str_len).await?;
                let value = String::from_utf8(payload)
                    .map_err(|e| SyncError::Protocol(format!("invalid UTF-8 in row: {e}")))?;
                row.push(Some(value));
            }
        }
        Ok(row)
    }

    /// Read any value in the subset. Used for delegated verb arguments where
    /// the core does not know the shape.
    pub fn next_value(&mut self) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + '_>> {
        Box::pin(async move {
            let marker = self.next_marker().await?;
            match marker {
                NIL => Ok(Value::Nil),
                TRUE => Ok(Value::Bool(true)),
                FALSE => Ok(Value::Bool(false)),
                0x00..=0x7f => Ok(Value::Uint(u64::from(marker))),
                UINT8 => Ok(Value::Uint(self.read_length(1).await?)),
                UINT16 => Ok(Value::Uint(self.read_length(2).await?)),
                UINT32 => Ok(Value::Uint(self.read_length(4).await?)),
                UINT64 => Ok(Value::Uint(self.read_length(8).await?)),
                0xa0..=0xbf | STR8 | STR16 | STR32 => {
                    let len = self.str_length(marker).await?;
                    let payload = self.read_payload(len).await?;
                    let s = String::from_utf8(payload)
                        .map_err(|e| SyncError::Protocol(format!("invalid UTF-8: {e}")))?;
                    Ok(Value::Str(s))
                }
                BIN8 => {
                    let len = self.read_length(1).await?;
                    Ok(Value::Bin(self.read_payload(len).await?))
                }
                BIN16 => {
                    let len = self.read_length(2).await?;
                    Ok(Value::Bin(self.read_payload(len).await?))
                }
                BIN32 => {
                    let len = self.read_length(4).await?;
                    Ok(Value::Bin(self.read_payload(len).await?))
                }
                0x90..=0x9f | ARRAY16 | ARRAY32 => {
                    let len = match marker {
                        0x90..=0x9f => u64::from(marker & 0x0f),
                        ARRAY16 => self.read_length(2).await?,
                        _ => self.read_length(4).await?,
                    };
                    let len = Self::check_container(len)?;
                    let mut items = Vec::with_capacity(len.min(1024));
                    for _ in 0..len {
                        items.push(self.next_value().await?);
                    }
                    Ok(Value::Array(items))
                }
                0x80..=0x8f | MAP16 | MAP32 => {
                    let len = match marker {
                        0x80..=0x8f => u64::from(marker & 0x0f),
                        MAP16 => self.read_length(2).await?,
                        _ => self.read_length(4).await?,
                    };
                    let len = Self::check_container(len)?;
                    let mut pairs = Vec::with_capacity(len.min(1024));
                    for _ in 0..len {
                        let k = self.next_value().await?;
                        let v = self.next_value().await?;
                        pairs.push((k, v));
                    }
                    Ok(Value::Map(pairs))
                }
                _ => Err(SyncError::Protocol(format!(
                    "marker 0x{marker:02x} is outside the supported subset"
                ))),
            }
        })
    }
}
