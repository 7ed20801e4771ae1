//! Payload codecs for the entry kinds the eraser inspects.

use bytes::{Buf, BufMut, Bytes};

use crate::error::{EraserError, EraserResult};
use crate::lsn::Lsn;

/// Identifier of a database (one B-tree) in the environment.
pub type DatabaseId = u64;

const LN_FLAG_EMBEDDED: u8 = 0x01;
const NODE_FLAG_ROOT: u8 = 0x01;

fn truncated(lsn: Lsn, what: &str) -> EraserError {
    EraserError::CorruptEntry {
        lsn,
        reason: format!("payload truncated while reading {what}"),
    }
}

fn get_u64(buf: &mut Bytes, lsn: Lsn, what: &str) -> EraserResult<u64> {
    if buf.remaining() < 8 {
        return Err(truncated(lsn, what));
    }
    Ok(buf.get_u64_le())
}

fn get_u32(buf: &mut Bytes, lsn: Lsn, what: &str) -> EraserResult<u32> {
    if buf.remaining() < 4 {
        return Err(truncated(lsn, what));
    }
    Ok(buf.get_u32_le())
}

fn get_u16(buf: &mut Bytes, lsn: Lsn, what: &str) -> EraserResult<u16> {
    if buf.remaining() < 2 {
        return Err(truncated(lsn, what));
    }
    Ok(buf.get_u16_le())
}

fn get_u8(buf: &mut Bytes, lsn: Lsn, what: &str) -> EraserResult<u8> {
    if buf.remaining() < 1 {
        return Err(truncated(lsn, what));
    }
    Ok(buf.get_u8())
}

fn get_bytes(buf: &mut Bytes, lsn: Lsn, what: &str) -> EraserResult<Bytes> {
    let len = get_u32(buf, lsn, what)? as usize;
    if buf.remaining() < len {
        return Err(truncated(lsn, what));
    }
    Ok(buf.split_to(len))
}

/// First entry of every log file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileHeaderEntry {
    pub file_number: u32,
    /// Milliseconds since the Unix epoch.
    pub creation_time_ms: u64,
    pub log_version: u32,
}

impl FileHeaderEntry {
    pub fn encode(&self, out: &mut impl BufMut) {
        out.put_u32_le(self.file_number);
        out.put_u64_le(self.creation_time_ms);
        out.put_u32_le(self.log_version);
    }

    pub fn decode(mut payload: Bytes, lsn: Lsn) -> EraserResult<Self> {
        Ok(Self {
            file_number: get_u32(&mut payload, lsn, "file number")?,
            creation_time_ms: get_u64(&mut payload, lsn, "creation time")?,
            log_version: get_u32(&mut payload, lsn, "log version")?,
        })
    }
}

/// Leaf record: one key/value pair or its deletion marker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LnEntry {
    pub db_id: DatabaseId,
    /// Milliseconds since the Unix epoch; zero when the record never expires.
    pub expiration_ms: u64,
    /// The record is also stored in its leaf node, so this entry is obsolete as soon as it is written.
    pub embedded: bool,
    pub key: Bytes,
    pub data: Bytes,
}

impl LnEntry {
    pub fn new(db_id: DatabaseId, key: impl Into<Bytes>, data: impl Into<Bytes>) -> Self {
        Self {
            db_id,
            expiration_ms: 0,
            embedded: false,
            key: key.into(),
            data: data.into(),
        }
    }

    pub fn with_expiration(mut self, expiration_ms: u64) -> Self {
        self.expiration_ms = expiration_ms;
        self
    }

    pub fn embedded(mut self) -> Self {
        self.embedded = true;
        self
    }

    pub fn has_expiration(&self) -> bool {
        self.expiration_ms != 0
    }

    pub fn encode(&self, out: &mut impl BufMut) {
        out.put_u64_le(self.db_id);
        out.put_u64_le(self.expiration_ms);
        out.put_u8(if self.embedded { LN_FLAG_EMBEDDED } else { 0 });
        out.put_u32_le(self.key.len() as u32);
        out.put_slice(&self.key);
        out.put_u32_le(self.data.len() as u32);
        out.put_slice(&self.data);
    }

    pub fn decode(mut payload: Bytes, lsn: Lsn) -> EraserResult<Self> {
        let db_id = get_u64(&mut payload, lsn, "database id")?;
        let expiration_ms = get_u64(&mut payload, lsn, "expiration")?;
        let flags = get_u8(&mut payload, lsn, "record flags")?;
        let key = get_bytes(&mut payload, lsn, "key")?;
        let data = get_bytes(&mut payload, lsn, "data")?;
        Ok(Self {
            db_id,
            expiration_ms,
            embedded: flags & LN_FLAG_EMBEDDED != 0,
            key,
            data,
        })
    }
}

/// Internal node, full leaf node or leaf delta.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeEntry {
    pub db_id: DatabaseId,
    pub node_id: u64,
    pub level: u16,
    pub is_root: bool,
    /// Key used to locate the node's parent slot.
    pub identifier_key: Bytes,
    /// Serialized slots; opaque to the eraser.
    pub body: Bytes,
}

impl NodeEntry {
    pub fn encode(&self, out: &mut impl BufMut) {
        out.put_u64_le(self.db_id);
        out.put_u64_le(self.node_id);
        out.put_u16_le(self.level);
        out.put_u8(if self.is_root { NODE_FLAG_ROOT } else { 0 });
        out.put_u32_le(self.identifier_key.len() as u32);
        out.put_slice(&self.identifier_key);
        out.put_u32_le(self.body.len() as u32);
        out.put_slice(&self.body);
    }

    pub fn decode(mut payload: Bytes, lsn: Lsn) -> EraserResult<Self> {
        let db_id = get_u64(&mut payload, lsn, "database id")?;
        let node_id = get_u64(&mut payload, lsn, "node id")?;
        let level = get_u16(&mut payload, lsn, "level")?;
        let flags = get_u8(&mut payload, lsn, "node flags")?;
        let identifier_key = get_bytes(&mut payload, lsn, "identifier key")?;
        let body = get_bytes(&mut payload, lsn, "node body")?;
        Ok(Self {
            db_id,
            node_id,
            level,
            is_root: flags & NODE_FLAG_ROOT != 0,
            identifier_key,
            body,
        })
    }
}
