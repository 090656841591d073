//! Structured per-image record bodies.
//!
//! Records repeat until the buffer ends. Each carries, in order and only
//! when flagged: a little-endian `u32` id, a 32-byte hash, the tag blame
//! list and the attribute blame map. Counts, ids and string lengths use a
//! variable-length integer: a byte below `0xfd` is the value itself,
//! `0xfd`/`0xfe`/`0xff` prefix a little-endian `u16`/`u32`/`u64`.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::{SyncError, SyncResult};
use crate::types::{AttributeBlame, TagBlame};

use super::header::ResponseFlags;
use super::HASH_LEN;

/// One decoded image record. Fields absent from the response are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageRecord {
    pub id: Option<u32>,
    pub hash: Option<Bytes>,
    pub tags: Option<TagBlame>,
    pub attributes: Option<AttributeBlame>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordList {
    flags: ResponseFlags,
    records: Vec<ImageRecord>,
}

impl RecordList {
    pub fn flags(&self) -> ResponseFlags {
        self.flags
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ImageRecord> {
        self.records.iter()
    }

    pub fn into_records(self) -> Vec<ImageRecord> {
        self.records
    }
}

pub(crate) fn decode_records(flags: ResponseFlags, body: Bytes) -> SyncResult<RecordList> {
    let mut reader = Reader {
        buffer: &body,
        position: 0,
    };
    let mut records = Vec::new();

    while !reader.is_end() {
        let mut record = ImageRecord::default();

        if flags.contains(ResponseFlags::HAS_IDS) {
            record.id = Some(reader.read_u32()?);
        }
        if flags.contains(ResponseFlags::HAS_HASHES) {
            let start = reader.take(HASH_LEN)?;
            record.hash = Some(body.slice(start..start + HASH_LEN));
        }
        if flags.contains(ResponseFlags::HAS_TAGS) {
            let count = reader.read_count()?;
            let mut tags = TagBlame::with_capacity(count.min(1024));
            for _ in 0..count {
                let tag_id = reader.read_varint()?;
                let user_id = reader.read_varint()?;
                tags.insert(tag_id, user_id);
            }
            record.tags = Some(tags);
        }
        if flags.contains(ResponseFlags::HAS_ATTRIBUTES) {
            let key_count = reader.read_count()?;
            let mut attributes = AttributeBlame::new();
            for _ in 0..key_count {
                let key = reader.read_string()?;
                let value_count = reader.read_count()?;
                let mut values = HashMap::new();
                for _ in 0..value_count {
                    let value = reader.read_string()?;
                    let user_id = reader.read_varint()?;
                    values.insert(value, user_id);
                }
                attributes.insert(key, values);
            }
            record.attributes = Some(attributes);
        }

        records.push(record);
    }

    Ok(RecordList { flags, records })
}

struct Reader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl Reader<'_> {
    fn is_end(&self) -> bool {
        self.position >= self.buffer.len()
    }

    /// Advances past `len` bytes, returning their start offset.
    fn take(&mut self, len: usize) -> SyncResult<usize> {
        let start = self.position;
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.buffer.len())
            .ok_or_else(|| {
                SyncError::Protocol(format!(
                    "record truncated: need {len} bytes at offset {start}, {} available",
                    self.buffer.len() - start
                ))
            })?;
        self.position = end;
        Ok(start)
    }

    fn read_array<const N: usize>(&mut self) -> SyncResult<[u8; N]> {
        let start = self.take(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buffer[start..start + N]);
        Ok(out)
    }

    fn read_u32(&mut self) -> SyncResult<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    fn read_varint(&mut self) -> SyncResult<u64> {
        let [marker] = self.read_array::<1>()?;
        Ok(match marker {
            0xfd => u64::from(u16::from_le_bytes(self.read_array()?)),
            0xfe => u64::from(u32::from_le_bytes(self.read_array()?)),
            0xff => u64::from_le_bytes(self.read_array()?),
            byte => u64::from(byte),
        })
    }

    /// A varint used as a length; must fit in the remaining buffer space.
    fn read_count(&mut self) -> SyncResult<usize> {
        let value = self.read_varint()?;
        usize::try_from(value)
            .ok()
            .filter(|count| *count <= self.buffer.len() - self.position)
            .ok_or_else(|| SyncError::Protocol(format!("implausible record count {value}")))
    }

    fn read_string(&mut self) -> SyncResult<String> {
        let len = self.read_count()?;
        let start = self.take(len)?;
        String::from_utf8(self.buffer[start..start + len].to_vec())
            .map_err(|error| SyncError::Protocol(format!("invalid utf-8 in record string: {error}")))
    }
}

/// Encodes records in the layout [`decode_records`] reads.
pub fn encode_records(flags: ResponseFlags, records: &[ImageRecord]) -> SyncResult<Vec<u8>> {
    let mut out = flags.to_header().to_vec();

    for record in records {
        if flags.contains(ResponseFlags::HAS_IDS) {
            let id = record
                .id
                .ok_or_else(|| SyncError::InvalidInput("record is missing an id".to_string()))?;
            out.extend_from_slice(&id.to_le_bytes());
        }
        if flags.contains(ResponseFlags::HAS_HASHES) {
            let hash = record
                .hash
                .as_ref()
                .filter(|hash| hash.len() == HASH_LEN)
                .ok_or_else(|| SyncError::InvalidInput("record needs a 32-byte hash".to_string()))?;
            out.extend_from_slice(hash);
        }
        if flags.contains(ResponseFlags::HAS_TAGS) {
            let tags = record.tags.clone().unwrap_or_default();
            let mut sorted: Vec<_> = tags.into_iter().collect();
            sorted.sort_unstable();
            write_varint(&mut out, sorted.len() as u64);
            for (tag_id, user_id) in sorted {
                write_varint(&mut out, tag_id);
                write_varint(&mut out, user_id);
            }
        }
        if flags.contains(ResponseFlags::HAS_ATTRIBUTES) {
            let attributes = record.attributes.clone().unwrap_or_default();
            let mut keys: Vec<_> = attributes.into_iter().collect();
            keys.sort_by(|a, b| a.0.cmp(&b.0));
            write_varint(&mut out, keys.len() as u64);
            for (key, values) in keys {
                write_string(&mut out, &key);
                let mut values: Vec<_> = values.into_iter().collect();
                values.sort();
                write_varint(&mut out, values.len() as u64);
                for (value, user_id) in values {
                    write_string(&mut out, &value);
                    write_varint(&mut out, user_id);
                }
            }
        }
    }

    Ok(out)
}

fn write_varint(out: &mut Vec<u8>, value: u64) {
    if value < 0xfd {
        out.push(value as u8);
    } else if let Ok(small) = u16::try_from(value) {
        out.push(0xfd);
        out.extend_from_slice(&small.to_le_bytes());
    } else if let Ok(medium) = u32::try_from(value) {
        out.push(0xfe);
        out.extend_from_slice(&medium.to_le_bytes());
    } else {
        out.push(0xff);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

fn write_string(out: &mut Vec<u8>, value: &str) {
    write_varint(out, value.len() as u64);
    out.extend_from_slice(value.as_bytes());
}
