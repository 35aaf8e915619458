// WAL writer module - appends records to the active segment
//
// A writer never appends to a segment left over from a previous run: it
// always starts a fresh segment one past the highest existing id, so a torn
// tail from a crash stays the last thing in its segment. The same holds
// after a failed write: the segment is abandoned with whatever it holds and
// the next append opens a new one.

use crate::record::WalRecord;
use crate::segment::{SegmentManager, SEGMENT_HEADER_LEN};
use crate::SyncMode;
use spillway_core::format_version::{magic, WAL_FORMAT_VERSION};
use spillway_core::{Error, Pointer, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub struct WalWriter {
    /// `None` once a write to the active segment has failed
    file: Option<BufWriter<File>>,
    segments: SegmentManager,
    current_segment: PathBuf,
    segment_id: u64,
    current_size: u64,
    max_segment_size: u64,
    sync_mode: SyncMode,
}

impl WalWriter {
    pub fn new(segments: SegmentManager, max_segment_size: u64, sync_mode: SyncMode) -> Result<Self> {
        segments.ensure_dirs()?;

        let segment_id = segments.max_segment_id()? + 1;
        let (file, current_segment) = Self::create_segment(&segments, segment_id)?;

        Ok(Self {
            file: Some(file),
            segments,
            current_segment,
            segment_id,
            current_size: SEGMENT_HEADER_LEN,
            max_segment_size,
            sync_mode,
        })
    }

    fn create_segment(segments: &SegmentManager, id: u64) -> Result<(BufWriter<File>, PathBuf)> {
        let path = segments.path_for(id);
        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .map_err(|e| Error::Durability(format!("Failed to create segment {:?}: {}", path, e)))?;

        let mut file = BufWriter::new(file);
        let mut header = Vec::with_capacity(SEGMENT_HEADER_LEN as usize);
        header.extend_from_slice(&magic::SEGMENT.to_le_bytes());
        header.extend_from_slice(&WAL_FORMAT_VERSION.to_le_bytes());
        file.write_all(&header)
            .and_then(|_| file.flush())
            .map_err(|e| Error::Durability(format!("Failed to write segment header: {}", e)))?;

        debug!(segment_id = id, path = ?path, "opened WAL segment");
        Ok((file, path))
    }

    /// Append one record and return where it was written.
    ///
    /// The record is flushed to the OS before returning; whether it is also
    /// fsynced depends on the sync mode.
    pub fn append(&mut self, record: &WalRecord) -> Result<Pointer> {
        let encoded = record.encode()?;
        let record_size = encoded.len() as u64;

        if self.file.is_none() {
            self.open_next_segment()?;
        } else if self.current_size + record_size > self.max_segment_size
            // A segment holds at least one record, however large
            && self.current_size > SEGMENT_HEADER_LEN
        {
            self.rotate_segment()?;
        }

        let pointer = Pointer::new(self.segment_id, self.current_size);

        let written = match self.file.as_mut() {
            Some(file) => file.write_all(&encoded).and_then(|_| file.flush()),
            None => return Err(Error::Durability("No active WAL segment".to_string())),
        };
        if let Err(e) = written {
            self.abandon_segment();
            return Err(Error::Durability(format!("Failed to write WAL record: {}", e)));
        }

        self.current_size += record_size;

        if matches!(self.sync_mode, SyncMode::Sync) {
            self.sync()?;
        }

        Ok(pointer)
    }

    /// Append several records with at most one fsync, after the last one
    pub fn append_batch(&mut self, records: &[WalRecord]) -> Result<Vec<Pointer>> {
        let sync_mode = self.sync_mode;
        // per-record syncs are skipped; rotation still syncs the old segment
        if matches!(sync_mode, SyncMode::Sync) {
            self.sync_mode = SyncMode::Async;
        }

        let result: Result<Vec<Pointer>> = records.iter().map(|r| self.append(r)).collect();
        self.sync_mode = sync_mode;

        let pointers = result?;
        if matches!(self.sync_mode, SyncMode::Sync) {
            self.sync()?;
        }
        Ok(pointers)
    }

    /// Flush buffered bytes and fsync the active segment
    pub fn sync(&mut self) -> Result<()> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };

        if let Err(e) = file.flush() {
            self.abandon_segment();
            return Err(Error::Durability(format!("Failed to flush WAL: {}", e)));
        }

        if matches!(self.sync_mode, SyncMode::None) {
            return Ok(());
        }

        if let Err(e) = file.get_ref().sync_all() {
            self.abandon_segment();
            return Err(Error::Durability(format!("Failed to sync WAL: {}", e)));
        }

        Ok(())
    }

    fn rotate_segment(&mut self) -> Result<()> {
        // Sync current segment before rotating
        self.sync()?;
        self.open_next_segment()
    }

    fn open_next_segment(&mut self) -> Result<()> {
        let next_id = self.segment_id + 1;
        let (file, path) = Self::create_segment(&self.segments, next_id)?;

        self.file = Some(file);
        self.current_segment = path;
        self.segment_id = next_id;
        self.current_size = SEGMENT_HEADER_LEN;

        Ok(())
    }

    /// Stop writing to the active segment without flushing what is buffered.
    ///
    /// The file size no longer matches `current_size`, so nothing more may
    /// be appended to it.
    fn abandon_segment(&mut self) {
        if let Some(file) = self.file.take() {
            let (_, unwritten) = file.into_parts();
            warn!(
                segment_id = self.segment_id,
                dropped_bytes = unwritten.map(|b| b.len()).unwrap_or(0),
                "abandoning WAL segment after failed write"
            );
        }
    }

    /// Whether a failed write left the writer without an active segment
    pub fn is_abandoned(&self) -> bool {
        self.file.is_none()
    }

    /// Get the current segment path
    pub fn current_segment_path(&self) -> &Path {
        &self.current_segment
    }

    /// Id of the segment records are appended to
    pub fn segment_id(&self) -> u64 {
        self.segment_id
    }

    /// Get the current segment size in bytes
    pub fn current_segment_size(&self) -> u64 {
        self.current_size
    }
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        // Best effort sync on drop
        let _ = self.sync();
    }
}
