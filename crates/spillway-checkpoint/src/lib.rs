//! # Spillway Checkpoint
//!
//! The checkpointed queue for spillway: the in-memory index of live event
//! pointers and its durable snapshot.
//!
//! ## ⚠️ Internal Implementation Detail
//!
//! Users should depend on the main `spillway` crate instead, which provides
//! the stable public API.
//!
//! ---
//!
//! A checkpoint records the queue contents, the pointers held by in-flight
//! takes, and the highest write-order id the snapshot reflects. Restart
//! loads the checkpoint and replays only log records with a higher
//! write-order id.
//!
//! The file is replaced atomically: the new snapshot is written to a
//! temporary file, synced, and renamed over the previous one.
//!
//! ```text
//! [magic: u32 LE] [version: u16 LE] [len: u32 LE] [bincode body] [crc32: u32 LE]
//! ```

use serde::{Deserialize, Serialize};
use spillway_core::format_version::{self, magic, CHECKPOINT_FORMAT_VERSION};
use spillway_core::{Error, Pointer, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

pub mod queue;

pub use queue::EventQueue;

/// Checkpoint file name
pub const CHECKPOINT_FILE: &str = "checkpoint";

/// Temporary name used while a checkpoint is being written
const CHECKPOINT_TMP_FILE: &str = "checkpoint.tmp";

/// magic + version + body length
const HEADER_LEN: usize = 4 + 2 + 4;

/// Durable snapshot of queue state
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Highest write-order id reflected by this snapshot
    pub write_order_id: u64,
    /// Highest transaction id issued when the snapshot was taken
    pub transaction_id: u64,
    /// Queued pointers, oldest first
    pub queue: Vec<Pointer>,
    /// Pointers held by takes that had not committed, with their counts
    pub reference_counts: Vec<(Pointer, u32)>,
}

impl Checkpoint {
    /// Encode with header and CRC
    pub fn encode(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize checkpoint: {}", e)))?;

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&body);
        let crc = hasher.finalize();

        let mut frame = Vec::with_capacity(HEADER_LEN + body.len() + 4);
        frame.extend_from_slice(&magic::CHECKPOINT.to_le_bytes());
        frame.extend_from_slice(&CHECKPOINT_FORMAT_VERSION.to_le_bytes());
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&body);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }

    /// Decode and validate an encoded checkpoint
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN + 4 {
            return Err(Error::Corruption(format!(
                "Checkpoint too short: {} bytes",
                data.len()
            )));
        }

        let found_magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        if found_magic != magic::CHECKPOINT {
            return Err(Error::Corruption(format!(
                "Bad checkpoint magic: {:#010x}",
                found_magic
            )));
        }

        let version = u16::from_le_bytes([data[4], data[5]]);
        if !format_version::checkpoint_version().can_read(version) {
            return Err(Error::Corruption(format!(
                "Unsupported checkpoint format version {}",
                version
            )));
        }

        let len = u32::from_le_bytes([data[6], data[7], data[8], data[9]]) as usize;
        if data.len() != HEADER_LEN + len + 4 {
            return Err(Error::Corruption(format!(
                "Checkpoint length mismatch: header says {} body bytes, file has {}",
                len,
                data.len().saturating_sub(HEADER_LEN + 4)
            )));
        }

        let body = &data[HEADER_LEN..HEADER_LEN + len];
        let crc_offset = HEADER_LEN + len;
        let expected_crc = u32::from_le_bytes([
            data[crc_offset],
            data[crc_offset + 1],
            data[crc_offset + 2],
            data[crc_offset + 3],
        ]);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(body);
        let actual_crc = hasher.finalize();
        if actual_crc != expected_crc {
            return Err(Error::Corruption(format!(
                "Checkpoint CRC mismatch: expected {}, got {}",
                expected_crc, actual_crc
            )));
        }

        bincode::deserialize(body)
            .map_err(|e| Error::Corruption(format!("Failed to decode checkpoint: {}", e)))
    }
}

/// Reads and atomically replaces the checkpoint file of one directory
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
}

impl CheckpointManager {
    /// Create a manager for the given checkpoint directory
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Path of the checkpoint file
    pub fn path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE)
    }

    /// Whether a checkpoint file exists
    pub fn exists(&self) -> bool {
        self.path().exists()
    }

    /// Load the current checkpoint.
    ///
    /// Returns `Ok(None)` when no checkpoint has been written yet and
    /// `Error::Corruption` when the file does not validate.
    pub fn load(&self) -> Result<Option<Checkpoint>> {
        let path = self.path();
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::Io(e)),
        };

        Checkpoint::decode(&contents).map(Some)
    }

    /// Write a checkpoint, replacing the previous one atomically
    pub fn write(&self, checkpoint: &Checkpoint) -> Result<()> {
        let encoded = checkpoint.encode()?;
        let tmp_path = self.dir.join(CHECKPOINT_TMP_FILE);

        {
            let mut file = File::create(&tmp_path).map_err(|e| {
                Error::Durability(format!("Failed to create {:?}: {}", tmp_path, e))
            })?;
            file.write_all(&encoded)
                .and_then(|_| file.sync_all())
                .map_err(|e| {
                    Error::Durability(format!("Failed to write {:?}: {}", tmp_path, e))
                })?;
        }

        fs::rename(&tmp_path, self.path())
            .map_err(|e| Error::Durability(format!("Failed to install checkpoint: {}", e)))?;

        // Persist the rename itself; not every platform can open a directory
        if let Ok(dir) = File::open(&self.dir) {
            let _ = dir.sync_all();
        }

        debug!(
            write_order_id = checkpoint.write_order_id,
            queue_size = checkpoint.queue.len(),
            bytes = encoded.len(),
            "checkpoint file replaced"
        );

        Ok(())
    }

    /// Delete the checkpoint file, if any
    pub fn remove(&self) -> Result<bool> {
        match fs::remove_file(self.path()) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Checkpoint {
        Checkpoint {
            write_order_id: 120,
            transaction_id: 9,
            queue: vec![Pointer::new(2, 6), Pointer::new(2, 90)],
            reference_counts: vec![(Pointer::new(1, 6), 1)],
        }
    }

    #[test]
    fn test_missing_checkpoint_is_none() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        assert!(manager.load().unwrap().is_none());
        assert!(!manager.exists());
        assert!(!manager.remove().unwrap());
    }

    #[test]
    fn test_write_replaces_previous() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());

        manager.write(&Checkpoint::default()).unwrap();
        let checkpoint = sample();
        manager.write(&checkpoint).unwrap();

        assert_eq!(manager.load().unwrap(), Some(checkpoint));
        assert!(!dir.path().join(CHECKPOINT_TMP_FILE).exists());
    }

    #[test]
    fn test_corrupt_checkpoint_rejected() {
        let dir = tempdir().unwrap();
        let manager = CheckpointManager::new(dir.path());
        manager.write(&sample()).unwrap();

        let mut bytes = fs::read(manager.path()).unwrap();
        let last_body_byte = bytes.len() - 5;
        bytes[last_body_byte] ^= 0xFF;
        fs::write(manager.path(), &bytes).unwrap();

        assert!(matches!(manager.load(), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_truncated_checkpoint_rejected() {
        let encoded = sample().encode().unwrap();
        let result = Checkpoint::decode(&encoded[..encoded.len() - 3]);
        assert!(matches!(result, Err(Error::Corruption(_))));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut encoded = sample().encode().unwrap();
        encoded[4] = 0xEE;
        let result = Checkpoint::decode(&encoded);
        assert!(matches!(result, Err(Error::Corruption(msg)) if msg.contains("version")));
    }
}
