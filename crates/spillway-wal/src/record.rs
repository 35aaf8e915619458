// WAL record format and encoding/decoding
//
// Record format (binary):
// [length: u32 LE] [!length: u32 LE] [type: u8] [write_order_id: u64 LE]
// [transaction_id: u64 LE] [payload bytes] [crc32: u32 LE]
//
// length and crc32 both cover type..payload. The complemented copy of the
// length lets a reader reject a damaged length before trusting it.
//
// Types:
// - PUT (1): an event buffered by a transaction
// - TAKE (2): removal of a committed put, referenced by pointer
// - COMMIT (3): transaction commit marker
// - ROLLBACK (4): transaction rollback marker

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use spillway_core::{Error, Event, Pointer, Result};

/// Bytes covered by `length` before the payload: type + write order id + tx id
const FIXED_CONTENT_LEN: usize = 1 + 8 + 8;

/// Largest accepted `length` value
pub const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

/// Length field plus its complement
pub const FRAME_HEADER_LEN: usize = 8;

/// Smallest possible frame: header + fixed content + crc
pub const MIN_FRAME_SIZE: usize = FRAME_HEADER_LEN + FIXED_CONTENT_LEN + 4;

/// Validate a frame header and return the content length it announces.
///
/// Fails with `Error::Corruption` when the length disagrees with its
/// complement or is outside the accepted range.
pub fn frame_content_len(header: &[u8; FRAME_HEADER_LEN]) -> Result<usize> {
    let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let check = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if length != !check {
        return Err(Error::Corruption(format!(
            "Record length {:#010x} does not match its check {:#010x}",
            length, check
        )));
    }

    let length = length as usize;
    if !(FIXED_CONTENT_LEN..=MAX_RECORD_SIZE).contains(&length) {
        return Err(Error::Corruption(format!("Invalid record length: {}", length)));
    }
    Ok(length)
}

/// WAL record types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RecordType {
    Put = 1,
    Take = 2,
    Commit = 3,
    Rollback = 4,
}

impl TryFrom<u8> for RecordType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(RecordType::Put),
            2 => Ok(RecordType::Take),
            3 => Ok(RecordType::Commit),
            4 => Ok(RecordType::Rollback),
            _ => Err(Error::Corruption(format!(
                "Unknown WAL record type: {}",
                value
            ))),
        }
    }
}

/// WAL record payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordPayload {
    Put { event: Event },
    Take { pointer: Pointer },
    Commit,
    Rollback,
}

impl RecordPayload {
    fn record_type(&self) -> RecordType {
        match self {
            RecordPayload::Put { .. } => RecordType::Put,
            RecordPayload::Take { .. } => RecordType::Take,
            RecordPayload::Commit => RecordType::Commit,
            RecordPayload::Rollback => RecordType::Rollback,
        }
    }
}

/// A WAL record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    pub record_type: RecordType,
    /// Assigned when the record is appended; the only replay ordering key
    pub write_order_id: u64,
    pub transaction_id: u64,
    pub payload: RecordPayload,
}

impl WalRecord {
    fn with_payload(write_order_id: u64, transaction_id: u64, payload: RecordPayload) -> Self {
        Self {
            record_type: payload.record_type(),
            write_order_id,
            transaction_id,
            payload,
        }
    }

    /// Create a PUT record
    pub fn put(write_order_id: u64, transaction_id: u64, event: Event) -> Self {
        Self::with_payload(write_order_id, transaction_id, RecordPayload::Put { event })
    }

    /// Create a TAKE record
    pub fn take(write_order_id: u64, transaction_id: u64, pointer: Pointer) -> Self {
        Self::with_payload(write_order_id, transaction_id, RecordPayload::Take { pointer })
    }

    /// Create a COMMIT record
    pub fn commit(write_order_id: u64, transaction_id: u64) -> Self {
        Self::with_payload(write_order_id, transaction_id, RecordPayload::Commit)
    }

    /// Create a ROLLBACK record
    pub fn rollback(write_order_id: u64, transaction_id: u64) -> Self {
        Self::with_payload(write_order_id, transaction_id, RecordPayload::Rollback)
    }

    /// Encode record to bytes with framing and CRC
    pub fn encode(&self) -> Result<Vec<u8>> {
        let payload_bytes = bincode::serialize(&self.payload)
            .map_err(|e| Error::Serialization(format!("Failed to serialize payload: {}", e)))?;

        let content_len = FIXED_CONTENT_LEN + payload_bytes.len();
        if content_len > MAX_RECORD_SIZE {
            return Err(Error::Serialization(format!(
                "Record of {} bytes exceeds the {} byte limit",
                content_len, MAX_RECORD_SIZE
            )));
        }

        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + content_len + 4);
        frame.extend_from_slice(&(content_len as u32).to_le_bytes());
        frame.extend_from_slice(&(!(content_len as u32)).to_le_bytes());
        frame.push(self.record_type as u8);
        frame.extend_from_slice(&self.write_order_id.to_le_bytes());
        frame.extend_from_slice(&self.transaction_id.to_le_bytes());
        frame.extend_from_slice(&payload_bytes);

        let mut hasher = Hasher::new();
        hasher.update(&frame[FRAME_HEADER_LEN..]);
        let crc = hasher.finalize();
        frame.extend_from_slice(&crc.to_le_bytes());

        Ok(frame)
    }

    /// Decode record from bytes with validation.
    ///
    /// Returns `Error::Truncated` when `data` ends before the frame does and
    /// `Error::Corruption` when a complete frame fails validation.
    pub fn decode(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < FRAME_HEADER_LEN {
            return Err(Error::Truncated("Incomplete record header".to_string()));
        }

        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&data[..FRAME_HEADER_LEN]);
        let length = frame_content_len(&header)?;

        let total_size = FRAME_HEADER_LEN + length + 4;
        if data.len() < total_size {
            return Err(Error::Truncated(format!(
                "Incomplete record: expected {} bytes, got {}",
                total_size,
                data.len()
            )));
        }

        let content = &data[FRAME_HEADER_LEN..FRAME_HEADER_LEN + length];
        let crc_offset = FRAME_HEADER_LEN + length;
        let expected_crc = u32::from_le_bytes([
            data[crc_offset],
            data[crc_offset + 1],
            data[crc_offset + 2],
            data[crc_offset + 3],
        ]);

        let mut hasher = Hasher::new();
        hasher.update(content);
        let actual_crc = hasher.finalize();

        if actual_crc != expected_crc {
            return Err(Error::Corruption(format!(
                "CRC mismatch: expected {}, got {}",
                expected_crc, actual_crc
            )));
        }

        let record_type = RecordType::try_from(content[0])?;
        let write_order_id = u64::from_le_bytes(fixed_u64(&content[1..9]));
        let transaction_id = u64::from_le_bytes(fixed_u64(&content[9..17]));

        let payload: RecordPayload = bincode::deserialize(&content[FIXED_CONTENT_LEN..])
            .map_err(|e| Error::Corruption(format!("Failed to deserialize payload: {}", e)))?;

        if payload.record_type() != record_type {
            return Err(Error::Corruption(format!(
                "Record type {:?} does not match payload {:?}",
                record_type,
                payload.record_type()
            )));
        }

        Ok((
            WalRecord {
                record_type,
                write_order_id,
                transaction_id,
                payload,
            },
            total_size,
        ))
    }
}

fn fixed_u64(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&bytes[..8]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_type_conversion() {
        assert_eq!(RecordType::try_from(1).unwrap(), RecordType::Put);
        assert_eq!(RecordType::try_from(4).unwrap(), RecordType::Rollback);
        assert!(RecordType::try_from(99).is_err());
    }

    #[test]
    fn test_put_record_keeps_headers() {
        let event = Event::with_body("body").with_header("source", "tail");
        let record = WalRecord::put(17, 3, event);

        let encoded = record.encode().unwrap();
        assert!(encoded.len() > MIN_FRAME_SIZE);

        let (decoded, size) = WalRecord::decode(&encoded).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.write_order_id, 17);
        assert_eq!(decoded.transaction_id, 3);
        assert_eq!(size, encoded.len());
    }

    #[test]
    fn test_markers_decode_with_trailing_data() {
        let mut buf = WalRecord::commit(5, 2).encode().unwrap();
        let first_len = buf.len();
        buf.extend(WalRecord::take(6, 2, Pointer::new(1, 6)).encode().unwrap());

        let (first, consumed) = WalRecord::decode(&buf).unwrap();
        assert_eq!(first.record_type, RecordType::Commit);
        assert_eq!(consumed, first_len);

        let (second, _) = WalRecord::decode(&buf[consumed..]).unwrap();
        assert_eq!(
            second.payload,
            RecordPayload::Take {
                pointer: Pointer::new(1, 6)
            }
        );
    }

    #[test]
    fn test_crc_validation() {
        let record = WalRecord::put(1, 1, Event::with_body("value"));
        let mut encoded = record.encode().unwrap();

        encoded[10] ^= 0xFF;

        let result = WalRecord::decode(&encoded);
        assert!(matches!(result, Err(Error::Corruption(_))));
    }

    #[test]
    fn test_incomplete_record() {
        let record = WalRecord::put(1, 1, Event::with_body("value"));
        let encoded = record.encode().unwrap();

        assert!(matches!(
            WalRecord::decode(&encoded[..2]),
            Err(Error::Truncated(_))
        ));
        assert!(matches!(
            WalRecord::decode(&encoded[..encoded.len() - 1]),
            Err(Error::Truncated(_))
        ));
    }

    #[test]
    fn test_type_payload_mismatch() {
        let mut encoded = WalRecord::commit(9, 9).encode().unwrap();
        encoded[FRAME_HEADER_LEN] = RecordType::Rollback as u8;
        // recompute the CRC so only the type/payload disagreement remains
        let end = encoded.len() - 4;
        let mut hasher = Hasher::new();
        hasher.update(&encoded[FRAME_HEADER_LEN..end]);
        let crc = hasher.finalize().to_le_bytes();
        encoded[end..].copy_from_slice(&crc);

        assert!(matches!(
            WalRecord::decode(&encoded),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_damaged_length_is_corruption() {
        let mut encoded = WalRecord::put(1, 1, Event::with_body("value")).encode().unwrap();
        // a longer frame follows, so a grown length would still fit
        encoded.extend(vec![0u8; 64]);
        encoded[3] ^= 0x10;

        assert!(matches!(
            WalRecord::decode(&encoded),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_frame_header_range() {
        let header = |len: u32| {
            let mut h = [0u8; FRAME_HEADER_LEN];
            h[..4].copy_from_slice(&len.to_le_bytes());
            h[4..].copy_from_slice(&(!len).to_le_bytes());
            h
        };
        assert_eq!(frame_content_len(&header(20)).unwrap(), 20);
        assert!(frame_content_len(&header(3)).is_err());
        assert!(frame_content_len(&header(MAX_RECORD_SIZE as u32 + 1)).is_err());
    }
}
