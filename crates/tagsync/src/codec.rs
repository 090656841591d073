//! Binary search response decoding.
//!
//! A response starts with a four byte header (see [`header`]). The body
//! layout depends on the flag byte:
//! - ids only: packed little-endian `u32` ids
//! - hashes only: packed 32-byte hashes
//! - anything else: structured per-image records (see [`records`])
//!
//! Id and hash lists are views over the response buffer; nothing is copied
//! element by element.

mod header;
mod records;

use bytes::Bytes;

use crate::error::{SyncError, SyncResult};

pub use header::{parse_header, ResponseFlags, HEADER_LEN, SEARCH_RESPONSE_MAGIC};
pub use records::{encode_records, ImageRecord, RecordList};

pub const HASH_LEN: usize = 32;
const ID_LEN: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchResponse {
    Ids(IdList),
    Hashes(HashList),
    Records(RecordList),
}

impl SearchResponse {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ids(_) => "id list",
            Self::Hashes(_) => "hash list",
            Self::Records(_) => "record list",
        }
    }

    /// Extracts the id list, failing for every other variant.
    pub fn into_ids(self) -> SyncResult<IdList> {
        match self {
            Self::Ids(ids) => Ok(ids),
            other => Err(SyncError::Protocol(format!(
                "expected an id list, got a {}",
                other.kind()
            ))),
        }
    }
}

/// Decodes a complete search response buffer.
pub fn decode(buffer: Bytes) -> SyncResult<SearchResponse> {
    let flags = parse_header(&buffer)?;
    let body = buffer.slice(HEADER_LEN..);

    if flags == ResponseFlags::HAS_IDS {
        return IdList::new(body).map(SearchResponse::Ids);
    }
    if flags == ResponseFlags::HAS_HASHES {
        return HashList::new(body).map(SearchResponse::Hashes);
    }
    if flags.is_empty() {
        return Err(SyncError::Protocol("unsupported combination".to_string()));
    }

    records::decode_records(flags, body).map(SearchResponse::Records)
}

/// Packed little-endian `u32` ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdList {
    body: Bytes,
}

impl IdList {
    fn new(body: Bytes) -> SyncResult<Self> {
        if body.len() % ID_LEN != 0 {
            return Err(SyncError::Protocol(format!(
                "id list body of {} bytes is not a multiple of {ID_LEN}",
                body.len()
            )));
        }
        Ok(Self { body })
    }

    pub fn len(&self) -> usize {
        self.body.len() / ID_LEN
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<u32> {
        let start = index.checked_mul(ID_LEN)?;
        let end = start.checked_add(ID_LEN)?;
        let chunk = self.body.get(start..end)?;
        Some(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = u32> + '_ {
        self.body
            .chunks_exact(ID_LEN)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
    }

    pub fn to_vec(&self) -> Vec<u32> {
        self.iter().collect()
    }
}

/// Packed 32-byte content hashes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashList {
    body: Bytes,
}

impl HashList {
    fn new(body: Bytes) -> SyncResult<Self> {
        if body.len() % HASH_LEN != 0 {
            return Err(SyncError::Protocol(format!(
                "hash list body of {} bytes is not a multiple of {HASH_LEN}",
                body.len()
            )));
        }
        Ok(Self { body })
    }

    pub fn len(&self) -> usize {
        self.body.len() / HASH_LEN
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// Borrowed view of the hash at `index`.
    pub fn get(&self, index: usize) -> Option<&[u8]> {
        let start = index.checked_mul(HASH_LEN)?;
        let end = start.checked_add(HASH_LEN)?;
        self.body.get(start..end)
    }

    /// Owned view sharing the response buffer.
    pub fn slice(&self, index: usize) -> Option<Bytes> {
        let start = index.checked_mul(HASH_LEN)?;
        let end = start.checked_add(HASH_LEN)?;
        (end <= self.body.len()).then(|| self.body.slice(start..end))
    }

    pub fn iter(&self) -> std::slice::ChunksExact<'_, u8> {
        self.body.chunks_exact(HASH_LEN)
    }
}

/// Lowercase hex rendering used for hash keys in the entity cache.
pub fn hash_to_hex(hash: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(hash.len() * 2);
    for byte in hash {
        let _ = write!(out, "{byte:02x}");
    }
    out
}

pub fn encode_ids(ids: &[u32]) -> Vec<u8> {
    let mut out = ResponseFlags::HAS_IDS.to_header().to_vec();
    out.reserve(ids.len() * ID_LEN);
    for id in ids {
        out.extend_from_slice(&id.to_le_bytes());
    }
    out
}

pub fn encode_hashes(hashes: &[[u8; HASH_LEN]]) -> Vec<u8> {
    let mut out = ResponseFlags::HAS_HASHES.to_header().to_vec();
    for hash in hashes {
        out.extend_from_slice(hash);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_list_round_trip() {
        let decoded = decode(Bytes::from(encode_ids(&[1, 2, 3])))
            .expect("decode")
            .into_ids()
            .expect("ids");
        assert_eq!(decoded.to_vec(), vec![1, 2, 3]);
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded.get(2), Some(3));
        assert_eq!(decoded.get(3), None);
    }

    #[test]
    fn id_list_shares_the_response_buffer() {
        let buffer = Bytes::from(encode_ids(&[10, 20]));
        let ids = decode(buffer.clone()).expect("decode").into_ids().expect("ids");
        assert_eq!(ids.body.as_ptr(), buffer[HEADER_LEN..].as_ptr());
    }

    #[test]
    fn empty_id_list() {
        let ids = decode(Bytes::from(encode_ids(&[])))
            .expect("decode")
            .into_ids()
            .expect("ids");
        assert!(ids.is_empty());
        assert_eq!(ids.iter().count(), 0);
    }

    #[test]
    fn corrupted_magic_fails_without_partial_result() {
        let mut raw = encode_ids(&[1, 2, 3]);
        raw[1] ^= 0xff;
        match decode(Bytes::from(raw)) {
            Err(SyncError::Protocol(message)) => assert!(message.contains("magic")),
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn misaligned_id_body_rejected() {
        let mut raw = encode_ids(&[1]);
        raw.push(0);
        assert!(matches!(decode(Bytes::from(raw)), Err(SyncError::Protocol(_))));
    }

    #[test]
    fn hash_list_views() {
        let first = [0x11; HASH_LEN];
        let second = [0x22; HASH_LEN];
        let response = decode(Bytes::from(encode_hashes(&[first, second]))).expect("decode");
        let SearchResponse::Hashes(hashes) = response else {
            panic!("expected hash list");
        };
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes.get(1), Some(&second[..]));
        assert_eq!(hashes.slice(0).as_deref(), Some(&first[..]));
        assert!(hashes.slice(2).is_none());
        assert_eq!(hashes.iter().count(), 2);
        assert_eq!(hash_to_hex(hashes.get(0).expect("hash")), "11".repeat(HASH_LEN));
    }

    #[test]
    fn far_out_of_range_lookups_are_none() {
        let ids = decode(Bytes::from(encode_ids(&[1, 2, 3])))
            .expect("decode")
            .into_ids()
            .expect("ids");
        assert_eq!(ids.get(usize::MAX / ID_LEN), None);
        assert_eq!(ids.get(usize::MAX), None);

        let response = decode(Bytes::from(encode_hashes(&[[0x33; HASH_LEN]]))).expect("decode");
        let SearchResponse::Hashes(hashes) = response else {
            panic!("expected hash list");
        };
        assert_eq!(hashes.get(usize::MAX / HASH_LEN), None);
        assert_eq!(hashes.slice(usize::MAX / HASH_LEN), None);
    }

    #[test]
    fn hash_list_is_not_an_id_list() {
        let response = decode(Bytes::from(encode_hashes(&[[0; HASH_LEN]]))).expect("decode");
        assert!(matches!(response.into_ids(), Err(SyncError::Protocol(_))));
    }

    #[test]
    fn empty_flags_unsupported() {
        let raw = ResponseFlags::empty().to_header();
        match decode(Bytes::copy_from_slice(&raw)) {
            Err(SyncError::Protocol(message)) => assert_eq!(message, "unsupported combination"),
            other => panic!("expected unsupported combination, got {other:?}"),
        }
    }

    #[test]
    fn ids_with_hashes_decode_as_records() {
        let flags = ResponseFlags::HAS_IDS | ResponseFlags::HAS_HASHES;
        let records = vec![ImageRecord {
            id: Some(9),
            hash: Some(Bytes::from(vec![0x0f; HASH_LEN])),
            ..ImageRecord::default()
        }];
        let encoded = encode_records(flags, &records).expect("encode");
        match decode(Bytes::from(encoded)).expect("decode") {
            SearchResponse::Records(list) => {
                assert_eq!(list.flags(), flags);
                assert_eq!(list.into_records(), records);
            }
            other => panic!("expected records, got {}", other.kind()),
        }
    }
}
