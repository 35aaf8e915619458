// WAL reader module - reads log records back for replay and event lookup
//
// The reader handles:
// 1. Segment discovery - every segment across the data directories, by id
// 2. Record reading - iterating through records in each segment
// 3. Damage detection - telling a torn tail from corruption
//
// A torn tail is an incomplete or unverifiable record that ends exactly at
// the end of its segment: the process died mid-append. It ends the segment
// quietly. Anything unreadable with more data after it is corruption, and
// so is a length field that fails its complement check while a whole
// record could still follow it.

use crate::record::{self, WalRecord, FRAME_HEADER_LEN, MIN_FRAME_SIZE};
use crate::segment::{SegmentInfo, SegmentManager, SEGMENT_HEADER_LEN};
use spillway_core::format_version::{self, magic};
use spillway_core::{Error, Pointer, Result};
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::warn;

/// WAL reader for reading records from log segments
pub struct WalReader {
    /// Segments ordered by id
    segments: Vec<SegmentInfo>,
    /// Index of current segment being read
    current_segment_index: usize,
    /// Buffered reader for current segment
    reader: Option<BufReader<File>>,
    /// Current byte offset within segment
    current_offset: u64,
    /// Segments whose last record was torn
    torn_segments: usize,
}

impl WalReader {
    /// Create a reader over every segment the manager can see
    pub fn new(segments: &SegmentManager) -> Result<Self> {
        let mut reader = Self {
            segments: segments.list_segments()?,
            current_segment_index: 0,
            reader: None,
            current_offset: 0,
            torn_segments: 0,
        };

        if !reader.segments.is_empty() {
            reader.open_segment(0)?;
        }

        Ok(reader)
    }

    /// Open a segment file by index and validate its header
    fn open_segment(&mut self, index: usize) -> Result<()> {
        let info = &self.segments[index];
        self.current_segment_index = index;
        self.current_offset = 0;
        self.reader = None;

        // A crash while creating the segment can leave a partial header
        if info.size < SEGMENT_HEADER_LEN {
            return Ok(());
        }

        let file = File::open(&info.path)?;
        let mut reader = BufReader::new(file);

        let mut header = [0u8; SEGMENT_HEADER_LEN as usize];
        reader.read_exact(&mut header)?;

        let found_magic = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        if found_magic != magic::SEGMENT {
            return Err(Error::Corruption(format!(
                "Segment {} has bad magic {:#010x}",
                info.id, found_magic
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if !format_version::wal_version().can_read(version) {
            return Err(Error::Corruption(format!(
                "Segment {} has unsupported format version {}",
                info.id, version
            )));
        }

        self.reader = Some(reader);
        self.current_offset = SEGMENT_HEADER_LEN;
        Ok(())
    }

    /// Move to the next segment
    fn advance_segment(&mut self) -> Result<bool> {
        let next_index = self.current_segment_index + 1;
        if next_index >= self.segments.len() {
            self.reader = None;
            return Ok(false);
        }

        self.open_segment(next_index)?;
        Ok(true)
    }

    /// Read the next record from the WAL
    ///
    /// Returns `Ok(Some((pointer, record)))` if a record was read successfully,
    /// `Ok(None)` once every segment is exhausted,
    /// or `Error::Corruption` naming the segment and offset of damaged data.
    pub fn next_record(&mut self) -> Result<Option<(Pointer, WalRecord)>> {
        loop {
            let Some(reader) = self.reader.as_mut() else {
                if self.segments.is_empty() || !self.advance_segment()? {
                    return Ok(None);
                }
                continue;
            };

            let info = &self.segments[self.current_segment_index];
            let remaining = info.size - self.current_offset.min(info.size);
            let pointer = Pointer::new(info.id, self.current_offset);

            match Self::read_record(reader, remaining) {
                Ok(ReadOutcome::Record(record, bytes_read)) => {
                    self.current_offset += bytes_read as u64;
                    return Ok(Some((pointer, record)));
                }
                Ok(ReadOutcome::End) => {}
                Ok(ReadOutcome::Torn(reason)) => {
                    warn!(
                        segment_id = info.id,
                        offset = self.current_offset,
                        reason = %reason,
                        "ignoring torn record at end of segment"
                    );
                    self.torn_segments += 1;
                }
                Err(e) => {
                    return Err(Error::Corruption(format!(
                        "Segment {} offset {}: {}",
                        info.id, self.current_offset, e
                    )));
                }
            }

            if !self.advance_segment()? {
                return Ok(None);
            }
        }
    }

    /// Read a single record given the bytes left in the segment
    fn read_record(reader: &mut BufReader<File>, remaining: u64) -> Result<ReadOutcome> {
        if remaining == 0 {
            return Ok(ReadOutcome::End);
        }
        if remaining < FRAME_HEADER_LEN as u64 {
            return Ok(ReadOutcome::Torn("incomplete record header".to_string()));
        }

        let mut header = [0u8; FRAME_HEADER_LEN];
        reader.read_exact(&mut header)?;
        let content_len = match record::frame_content_len(&header) {
            Ok(len) => len as u64,
            Err(e) if remaining < MIN_FRAME_SIZE as u64 => return Ok(ReadOutcome::Torn(e.to_string())),
            Err(e) => return Err(e),
        };
        let frame_len = FRAME_HEADER_LEN as u64 + content_len + 4;

        // only a verified length may place the end of the record past EOF
        if frame_len > remaining {
            return Ok(ReadOutcome::Torn(format!(
                "record of {} bytes runs past end of segment ({} bytes left)",
                frame_len, remaining
            )));
        }

        let mut frame = vec![0u8; frame_len as usize];
        frame[..FRAME_HEADER_LEN].copy_from_slice(&header);
        reader.read_exact(&mut frame[FRAME_HEADER_LEN..])?;

        match WalRecord::decode(&frame) {
            Ok((record, consumed)) => Ok(ReadOutcome::Record(record, consumed)),
            // The last frame in the segment may have been partly written
            Err(e) if frame_len == remaining => Ok(ReadOutcome::Torn(e.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Get the number of segments discovered
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Number of segments that ended in a torn record so far
    pub fn torn_segments(&self) -> usize {
        self.torn_segments
    }

    /// Read all remaining records into a vector
    pub fn read_all(&mut self) -> Result<Vec<(Pointer, WalRecord)>> {
        let mut records = Vec::new();
        while let Some(entry) = self.next_record()? {
            records.push(entry);
        }
        Ok(records)
    }
}

enum ReadOutcome {
    Record(WalRecord, usize),
    End,
    Torn(String),
}

/// Iterator implementation for WalReader
impl Iterator for WalReader {
    type Item = Result<(Pointer, WalRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Read the single record starting at `offset` in a segment file
pub fn read_record_at(path: &Path, offset: u64) -> Result<WalRecord> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut reader = BufReader::new(file);

    let mut header = [0u8; FRAME_HEADER_LEN];
    reader.read_exact(&mut header)?;
    let content_len = record::frame_content_len(&header).map_err(|e| {
        Error::Corruption(format!("Record at {:?} offset {}: {}", path, offset, e))
    })?;

    let mut frame = vec![0u8; FRAME_HEADER_LEN + content_len + 4];
    frame[..FRAME_HEADER_LEN].copy_from_slice(&header);
    reader.read_exact(&mut frame[FRAME_HEADER_LEN..]).map_err(|e| {
        Error::Corruption(format!(
            "Record at {:?} offset {} is incomplete: {}",
            path, offset, e
        ))
    })?;

    match WalRecord::decode(&frame) {
        Ok((record, _)) => Ok(record),
        Err(Error::Truncated(msg)) => Err(Error::Corruption(msg)),
        Err(e) => Err(e),
    }
}
