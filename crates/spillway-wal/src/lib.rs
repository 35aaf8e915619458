//! # Spillway WAL (Write-Ahead Log)
//!
//! Write-Ahead Log for spillway: segmented, CRC-framed storage of event
//! puts, takes and transaction outcomes, plus the recovery that rebuilds
//! the queue from the last checkpoint and the log tail.
//!
//! ## ⚠️ Internal Implementation Detail
//!
//! **This crate is an internal implementation detail of spillway.**
//!
//! Users should depend on the main `spillway` crate instead, which provides
//! the stable public API. This crate's API may change without notice.

use fs2::available_space;
use serde::{Deserialize, Serialize};
use spillway_checkpoint::{CheckpointManager, EventQueue};
use spillway_core::{Error, Event, Pointer, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub mod lock;
pub mod reader;
pub mod record;
pub mod recovery;
pub mod segment;
pub mod writer;

pub use lock::DirectoryLock;
pub use reader::WalReader;
pub use record::{RecordPayload, RecordType, WalRecord};
pub use recovery::{Recovered, RecoveryManager, RecoveryStats};
pub use segment::{SegmentInfo, SegmentManager};
pub use writer::WalWriter;

/// WAL configuration options
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Directory holding the checkpoint file
    pub checkpoint_dir: PathBuf,
    /// Directories segments rotate across
    pub data_dirs: Vec<PathBuf>,
    /// Maximum segment size in bytes before rotation
    pub max_segment_size: u64,
    /// Sync mode: sync, async, or none
    pub sync_mode: SyncMode,
    /// Commits fail once a data directory has less free space than this
    pub minimum_required_space: u64,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("checkpoint"),
            data_dirs: vec![PathBuf::from("data")],
            max_segment_size: 64 * 1024 * 1024, // 64 MB
            sync_mode: SyncMode::Sync,
            minimum_required_space: 0,
        }
    }
}

/// Sync mode for WAL writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Call fsync before every commit returns (strongest durability)
    Sync,
    /// fsync on segment rotation, checkpoint and close (balanced)
    Async,
    /// No fsync (fastest, unsafe for power loss)
    None,
}

/// Mutable log state, guarded by one mutex so queue changes and the
/// records that justify them are ordered the same way
struct LogState {
    writer: Option<WalWriter>,
    queue: EventQueue,
    write_order_id: u64,
    /// Committed changes not yet covered by a checkpoint
    dirty: bool,
}

/// WAL manager coordinating log writes, the queue and checkpoints
pub struct WalManager {
    config: WalConfig,
    segments: SegmentManager,
    checkpoints: CheckpointManager,
    state: Mutex<LogState>,
    /// Signalled whenever pointers become available to take
    available: Condvar,
    /// Serializes checkpoint writers
    checkpoint_lock: Mutex<()>,
    dir_lock: Mutex<Option<DirectoryLock>>,
    closed: AtomicBool,
    transaction_id: AtomicU64,
    recovery_stats: RecoveryStats,
}

impl WalManager {
    /// Lock the directories, recover the queue and open a fresh segment.
    ///
    /// Fails with `Error::LockContention` if another manager holds any of
    /// the directories and `Error::Corruption` if the log cannot be replayed.
    pub fn open(config: WalConfig) -> Result<Self> {
        let segments = SegmentManager::new(config.data_dirs.clone())?;
        segments.ensure_dirs()?;
        std::fs::create_dir_all(&config.checkpoint_dir)?;

        let mut dirs = vec![config.checkpoint_dir.clone()];
        dirs.extend(config.data_dirs.iter().cloned());
        let dir_lock = DirectoryLock::acquire(&dirs)?;

        let checkpoints = CheckpointManager::new(&config.checkpoint_dir);
        let checkpoint = match checkpoints.load() {
            Ok(checkpoint) => checkpoint,
            Err(Error::Corruption(msg)) => {
                warn!(error = %msg, "checkpoint is unreadable, replaying the full log");
                None
            }
            Err(e) => return Err(e),
        };

        let recovered = RecoveryManager::new(segments.clone()).replay(checkpoint.as_ref())?;
        let dirty = recovered.stats.total_records > recovered.stats.skipped_records;

        let writer = WalWriter::new(segments.clone(), config.max_segment_size, config.sync_mode)?;
        info!(
            segment_id = writer.segment_id(),
            queue_size = recovered.queue.len(),
            "WAL opened"
        );

        Ok(Self {
            segments,
            checkpoints,
            state: Mutex::new(LogState {
                writer: Some(writer),
                queue: recovered.queue,
                write_order_id: recovered.write_order_id,
                dirty,
            }),
            available: Condvar::new(),
            checkpoint_lock: Mutex::new(()),
            dir_lock: Mutex::new(Some(dir_lock)),
            closed: AtomicBool::new(false),
            transaction_id: AtomicU64::new(recovered.transaction_id),
            recovery_stats: recovered.stats,
            config,
        })
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, LogState>> {
        self.state.lock().map_err(|_| Error::LockPoisoned)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ChannelClosed("WAL is closed".to_string()));
        }
        Ok(())
    }

    fn check_free_space(&self) -> Result<()> {
        let required = self.config.minimum_required_space;
        if required == 0 {
            return Ok(());
        }
        for dir in self.segments.data_dirs() {
            let free = available_space(dir)?;
            if free < required {
                return Err(Error::Durability(format!(
                    "{} has {} bytes free, {} required",
                    dir.display(),
                    free,
                    required
                )));
            }
        }
        Ok(())
    }

    /// Issue a transaction id, unique across restarts
    pub fn next_transaction_id(&self) -> u64 {
        self.transaction_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Make a transaction durable, then apply it to the queue.
    ///
    /// Writes a put record per event, a take record per taken pointer and
    /// a commit record. The queue changes only after all of them were
    /// written; on failure a rollback record is attempted and the queue is
    /// left as it was.
    pub fn commit(&self, tx_id: u64, puts: Vec<Event>, takes: &[Pointer]) -> Result<Vec<Pointer>> {
        self.ensure_open()?;
        let mut state = self.lock_state()?;
        self.check_free_space()?;

        let put_count = puts.len();
        let mut write_order_id = state.write_order_id;
        let mut records = Vec::with_capacity(put_count + takes.len() + 1);
        for event in puts {
            write_order_id += 1;
            records.push(WalRecord::put(write_order_id, tx_id, event));
        }
        for pointer in takes {
            write_order_id += 1;
            records.push(WalRecord::take(write_order_id, tx_id, *pointer));
        }
        write_order_id += 1;
        records.push(WalRecord::commit(write_order_id, tx_id));

        let LogState {
            writer,
            queue,
            write_order_id: last_write_order_id,
            dirty,
        } = &mut *state;
        let writer = writer
            .as_mut()
            .ok_or_else(|| Error::ChannelClosed("WAL is closed".to_string()))?;

        // ids are consumed even if the batch fails part way
        *last_write_order_id = write_order_id;

        let pointers = match writer.append_batch(&records) {
            Ok(pointers) => pointers,
            Err(e) => {
                *last_write_order_id += 1;
                let marker = WalRecord::rollback(*last_write_order_id, tx_id);
                if let Err(marker_err) = writer.append(&marker) {
                    warn!(transaction_id = tx_id, error = %marker_err, "failed to write rollback record");
                }
                return Err(Error::Durability(format!(
                    "commit of transaction {} failed: {}",
                    tx_id, e
                )));
            }
        };

        let put_pointers: Vec<Pointer> = pointers.into_iter().take(put_count).collect();
        for pointer in &put_pointers {
            queue.add(*pointer);
        }
        for pointer in takes {
            queue.release(pointer);
        }
        *dirty = true;
        drop(state);

        if put_count > 0 {
            self.available.notify_all();
        }
        debug!(
            transaction_id = tx_id,
            puts = put_count,
            takes = takes.len(),
            "transaction committed"
        );
        Ok(put_pointers)
    }

    /// Take the oldest queued pointer, waiting up to `timeout` for one.
    ///
    /// The pointer stays referenced until the take commits or rolls back.
    pub fn take(&self, timeout: Duration) -> Result<Option<Pointer>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock_state()?;
        loop {
            self.ensure_open()?;
            if let Some(pointer) = state.queue.take_next() {
                return Ok(Some(pointer));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (guard, _) = self
                .available
                .wait_timeout(state, deadline - now)
                .map_err(|_| Error::LockPoisoned)?;
            state = guard;
        }
    }

    /// Return uncommitted takes to the head of the queue.
    ///
    /// Pointers go back in reverse order so the oldest ends up first.
    /// `write_marker` appends a rollback record, which a failed commit needs
    /// so replay discards whatever part of it reached the log.
    pub fn rollback(&self, tx_id: u64, takes: &[Pointer], write_marker: bool) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut state = self.lock_state()?;
        for pointer in takes.iter().rev() {
            state.queue.restore(*pointer);
        }

        let mut result = Ok(());
        if write_marker {
            state.write_order_id += 1;
            let marker = WalRecord::rollback(state.write_order_id, tx_id);
            if let Some(writer) = state.writer.as_mut() {
                result = writer.append(&marker).map(|_| ());
            }
        }
        drop(state);

        if !takes.is_empty() {
            self.available.notify_all();
        }
        debug!(transaction_id = tx_id, takes = takes.len(), "transaction rolled back");
        result
    }

    /// Read the event a pointer refers to
    pub fn read_event(&self, pointer: Pointer) -> Result<Event> {
        let path = self.segments.locate(pointer.segment_id).ok_or_else(|| {
            Error::Corruption(format!("Segment {} of event {} is missing", pointer.segment_id, pointer))
        })?;

        match reader::read_record_at(&path, pointer.offset)?.payload {
            RecordPayload::Put { event } => Ok(event),
            other => Err(Error::Corruption(format!(
                "Pointer {} refers to a {:?} record, not a put",
                pointer, other
            ))),
        }
    }

    /// Write a checkpoint and reclaim segments it makes unnecessary.
    ///
    /// Without `force` this is a no-op returning false when another
    /// checkpoint is running or nothing committed since the last one.
    pub fn write_checkpoint(&self, force: bool) -> Result<bool> {
        self.ensure_open()?;
        let _guard = if force {
            self.checkpoint_lock.lock().map_err(|_| Error::LockPoisoned)?
        } else {
            match self.checkpoint_lock.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::WouldBlock) => return Ok(false),
                Err(TryLockError::Poisoned(_)) => return Err(Error::LockPoisoned),
            }
        };

        let started = Instant::now();
        let (checkpoint, active_segment, live_segments) = {
            let mut state = self.lock_state()?;
            if !force && !state.dirty {
                return Ok(false);
            }
            let writer = state
                .writer
                .as_mut()
                .ok_or_else(|| Error::ChannelClosed("WAL is closed".to_string()))?;
            writer.sync()?;
            let active_segment = writer.segment_id();

            state.dirty = false;
            let checkpoint = state.queue.to_checkpoint(
                state.write_order_id,
                self.transaction_id.load(Ordering::SeqCst),
            );
            (checkpoint, active_segment, state.queue.live_segments())
        };

        if let Err(e) = self.checkpoints.write(&checkpoint) {
            if let Ok(mut state) = self.lock_state() {
                state.dirty = true;
            }
            return Err(e);
        }

        // older segments only hold records the checkpoint covers
        let candidates: Vec<u64> = match self.segments.list_segments() {
            Ok(segments) => segments
                .into_iter()
                .map(|segment| segment.id)
                .filter(|id| *id < active_segment && !live_segments.contains(id))
                .collect(),
            Err(e) => {
                warn!(error = %e, "failed to list segments for reclamation");
                Vec::new()
            }
        };
        let reclaimed = reclaim_segments(candidates, |id| self.segments.remove_segment(id));

        info!(
            write_order_id = checkpoint.write_order_id,
            queue_size = checkpoint.queue.len(),
            in_flight = checkpoint.reference_counts.len(),
            reclaimed_segments = reclaimed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "checkpoint written"
        );
        Ok(true)
    }

    /// Stop accepting work, optionally checkpointing first.
    ///
    /// Waiting takes wake up and fail. Closing twice is a no-op.
    pub fn close(&self, checkpoint: bool) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(());
        }

        let mut result = if checkpoint {
            self.write_checkpoint(true).map(|_| ())
        } else {
            Ok(())
        };

        if self.closed.swap(true, Ordering::SeqCst) {
            return result;
        }

        match self.lock_state() {
            Ok(mut state) => {
                if let Some(mut writer) = state.writer.take() {
                    if let Err(e) = writer.sync() {
                        result = result.and(Err(e));
                    }
                }
            }
            Err(e) => result = result.and(Err(e)),
        }
        self.available.notify_all();

        if let Ok(mut dir_lock) = self.dir_lock.lock() {
            dir_lock.take();
        }

        info!(checkpointed = checkpoint, "WAL closed");
        result
    }

    /// Queued pointers, oldest first
    pub fn queue_snapshot(&self) -> Result<Vec<Pointer>> {
        Ok(self.lock_state()?.queue.iter().collect())
    }

    /// Number of queued pointers
    pub fn queue_len(&self) -> Result<usize> {
        Ok(self.lock_state()?.queue.len())
    }

    /// Number of pointers held by uncommitted takes
    pub fn in_flight_len(&self) -> Result<usize> {
        Ok(self.lock_state()?.queue.in_flight_len())
    }

    /// Highest write-order id issued so far
    pub fn last_write_order_id(&self) -> Result<u64> {
        Ok(self.lock_state()?.write_order_id)
    }

    /// What recovery found when the log was opened
    pub fn recovery_stats(&self) -> &RecoveryStats {
        &self.recovery_stats
    }

    /// Get a segment manager for the WAL
    pub fn segment_manager(&self) -> &SegmentManager {
        &self.segments
    }

    /// Path of the checkpoint file
    pub fn checkpoint_path(&self) -> PathBuf {
        self.checkpoints.path()
    }

    /// Get the current configuration
    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    /// Check if the WAL is open for writing
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    /// Directory of the checkpoint file
    pub fn checkpoint_dir(&self) -> &Path {
        &self.config.checkpoint_dir
    }
}

/// Delete each segment in `ids`, returning how many were removed.
///
/// The checkpoint is already on disk, so a segment that cannot be deleted
/// is only logged and left for the next checkpoint.
fn reclaim_segments<F>(ids: Vec<u64>, mut remove: F) -> usize
where
    F: FnMut(u64) -> Result<bool>,
{
    let mut reclaimed = 0;
    for segment_id in ids {
        match remove(segment_id) {
            Ok(true) => reclaimed += 1,
            Ok(false) => {}
            Err(e) => warn!(segment_id, error = %e, "failed to remove reclaimed segment"),
        }
    }
    reclaimed
}

impl Drop for WalManager {
    fn drop(&mut self) {
        // no checkpoint: dropping without close behaves like a crash
        let _ = self.close(false);
    }
}
