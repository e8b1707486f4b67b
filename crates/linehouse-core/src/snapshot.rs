//! Snapshot Codec
//!
//! Catalogs and line cursors are persisted through the key/value backend
//! as small binary snapshots. The encoding is deterministic and
//! self-describing so that snapshots written by one build remain
//! readable by later builds.
//!
//! ## Frame Format
//!
//! ```text
//! ┌───────────┬────────────────────┬──────────┐
//! │ Body Size │ Body (tagged       │ CRC32    │
//! │ (4 bytes) │ fields)            │ (4 bytes)│
//! └───────────┴────────────────────┴──────────┘
//! ```
//!
//! The CRC32 is computed over the body; a mismatch fails decoding
//! rather than returning a silently corrupt cursor.
//!
//! ## Field Format
//!
//! The body is a sequence of named, length-prefixed fields:
//!
//! ```text
//! ┌──────────┬──────────┬────────────┬───────────┐
//! │ Name Len │ Name     │ Value Size │ Value     │
//! │ (1 byte) │ (N bytes)│ (4 bytes)  │ (M bytes) │
//! └──────────┴──────────┴────────────┴───────────┘
//! ```
//!
//! Decoders match fields by name and skip names they do not recognize,
//! so fields can be added without breaking old snapshots.
//!
//! ## Snapshot Types
//!
//! - [`BrokerCatalog`]: the topic names known to the broker
//! - [`TopicCatalog`]: the line names attached to a topic
//! - [`LineSnapshot`]: a line cursor — `head`, `ihead`, and the ordered
//!   in-flight records with absolute expiry timestamps (unix millis)

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

const FIELD_TOPICS: &str = "topics";
const FIELD_LINES: &str = "lines";
const FIELD_HEAD: &str = "head";
const FIELD_IHEAD: &str = "ihead";
const FIELD_INFLIGHT: &str = "inflight";

/// Broker-level catalog: the set of topic names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrokerCatalog {
    pub topics: Vec<String>,
}

/// Topic-level catalog: the set of line names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicCatalog {
    pub lines: Vec<String>,
}

/// One in-flight delivery inside a [`LineSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InflightEntry {
    /// Message id awaiting confirmation.
    pub tid: u64,
    /// Absolute expiry, milliseconds since the unix epoch.
    pub expire_at_ms: u64,
}

/// Persisted state of a line cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineSnapshot {
    pub head: u64,
    pub ihead: u64,
    /// In-flight records in delivery order (front expires first).
    pub inflight: Vec<InflightEntry>,
}

impl BrokerCatalog {
    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::new();
        put_field(&mut body, FIELD_TOPICS, &encode_names(&self.topics));
        seal(body)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut catalog = BrokerCatalog::default();
        each_field(data, |name, value| {
            if name == FIELD_TOPICS {
                catalog.topics = decode_names(value)?;
            }
            Ok(())
        })?;
        Ok(catalog)
    }
}

impl TopicCatalog {
    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::new();
        put_field(&mut body, FIELD_LINES, &encode_names(&self.lines));
        seal(body)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut catalog = TopicCatalog::default();
        each_field(data, |name, value| {
            if name == FIELD_LINES {
                catalog.lines = decode_names(value)?;
            }
            Ok(())
        })?;
        Ok(catalog)
    }
}

impl LineSnapshot {
    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::new();
        put_field(&mut body, FIELD_HEAD, &self.head.to_le_bytes());
        put_field(&mut body, FIELD_IHEAD, &self.ihead.to_le_bytes());

        let mut records = BytesMut::with_capacity(4 + self.inflight.len() * 16);
        records.put_u32_le(self.inflight.len() as u32);
        for entry in &self.inflight {
            records.put_u64_le(entry.tid);
            records.put_u64_le(entry.expire_at_ms);
        }
        put_field(&mut body, FIELD_INFLIGHT, &records);
        seal(body)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut snapshot = LineSnapshot::default();
        each_field(data, |name, value| {
            match name {
                FIELD_HEAD => snapshot.head = decode_u64(value)?,
                FIELD_IHEAD => snapshot.ihead = decode_u64(value)?,
                FIELD_INFLIGHT => {
                    let mut buf = value;
                    let count = take_u32(&mut buf)? as usize;
                    let mut inflight = Vec::with_capacity(count.min(4096));
                    for _ in 0..count {
                        if buf.remaining() < 16 {
                            return Err(Error::Codec(
                                "truncated in-flight record".to_string(),
                            ));
                        }
                        inflight.push(InflightEntry {
                            tid: buf.get_u64_le(),
                            expire_at_ms: buf.get_u64_le(),
                        });
                    }
                    snapshot.inflight = inflight;
                }
                _ => {}
            }
            Ok(())
        })?;
        Ok(snapshot)
    }
}

/// Encode a u64 anchor value (topic head/tail) as stored in the backend.
pub fn encode_anchor(value: u64) -> Bytes {
    Bytes::copy_from_slice(&value.to_le_bytes())
}

/// Decode a u64 anchor value (topic head/tail).
pub fn decode_anchor(data: &[u8]) -> Result<u64> {
    decode_u64(data)
}

// ---------------------------------------------------------------
// Frame plumbing
// ---------------------------------------------------------------

fn seal(body: BytesMut) -> Bytes {
    let mut crc = crc32fast::Hasher::new();
    crc.update(&body);
    let checksum = crc.finalize();

    let mut frame = BytesMut::with_capacity(body.len() + 8);
    frame.put_u32_le(body.len() as u32);
    frame.put_slice(&body);
    frame.put_u32_le(checksum);
    frame.freeze()
}

fn unseal(data: &[u8]) -> Result<&[u8]> {
    if data.len() < 8 {
        return Err(Error::Codec("frame shorter than header".to_string()));
    }
    let body_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if data.len() != body_len + 8 {
        return Err(Error::Codec(format!(
            "frame length mismatch: header says {body_len}, have {}",
            data.len() - 8
        )));
    }
    let body = &data[4..4 + body_len];
    let stored = u32::from_le_bytes([
        data[4 + body_len],
        data[5 + body_len],
        data[6 + body_len],
        data[7 + body_len],
    ]);

    let mut crc = crc32fast::Hasher::new();
    crc.update(body);
    if crc.finalize() != stored {
        return Err(Error::Codec("crc mismatch".to_string()));
    }
    Ok(body)
}

fn put_field(body: &mut BytesMut, name: &str, value: &[u8]) {
    body.put_u8(name.len() as u8);
    body.put_slice(name.as_bytes());
    body.put_u32_le(value.len() as u32);
    body.put_slice(value);
}

fn each_field<F>(data: &[u8], mut visit: F) -> Result<()>
where
    F: FnMut(&str, &[u8]) -> Result<()>,
{
    let mut buf = unseal(data)?;
    while buf.has_remaining() {
        let name_len = buf.get_u8() as usize;
        if buf.remaining() < name_len {
            return Err(Error::Codec("truncated field name".to_string()));
        }
        let name = std::str::from_utf8(&buf[..name_len])
            .map_err(|_| Error::Codec("field name is not utf-8".to_string()))?
            .to_string();
        buf.advance(name_len);

        let value_len = take_u32(&mut buf)? as usize;
        if buf.remaining() < value_len {
            return Err(Error::Codec(format!("truncated field {name:?}")));
        }
        visit(&name, &buf[..value_len])?;
        buf.advance(value_len);
    }
    Ok(())
}

fn take_u32(buf: &mut &[u8]) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(Error::Codec("truncated length prefix".to_string()));
    }
    Ok(buf.get_u32_le())
}

fn decode_u64(value: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = value
        .try_into()
        .map_err(|_| Error::Codec(format!("expected 8-byte u64, got {}", value.len())))?;
    Ok(u64::from_le_bytes(bytes))
}

fn encode_names(names: &[String]) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u32_le(names.len() as u32);
    for name in names {
        buf.put_u16_le(name.len() as u16);
        buf.put_slice(name.as_bytes());
    }
    buf
}

fn decode_names(value: &[u8]) -> Result<Vec<String>> {
    let mut buf = value;
    let count = take_u32(&mut buf)? as usize;
    let mut names = Vec::with_capacity(count.min(4096));
    for _ in 0..count {
        if buf.remaining() < 2 {
            return Err(Error::Codec("truncated name length".to_string()));
        }
        let len = buf.get_u16_le() as usize;
        if buf.remaining() < len {
            return Err(Error::Codec("truncated name".to_string()));
        }
        let name = std::str::from_utf8(&buf[..len])
            .map_err(|_| Error::Codec("name is not utf-8".to_string()))?
            .to_string();
        buf.advance(len);
        names.push(name);
    }
    Ok(names)
}
