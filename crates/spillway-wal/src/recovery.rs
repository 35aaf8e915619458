// WAL recovery module - rebuilds the queue after a crash or restart
//
// Recovery is responsible for:
// 1. Starting from the checkpointed queue, if there is one
// 2. Reading every record newer than the checkpoint, in write order
// 3. Applying only transactions that reached a COMMIT record
// 4. Discarding rolled back and incomplete transactions
//
// A commit whose batch failed to sync is followed by a ROLLBACK for the
// same transaction. The rollback wins over the earlier commit.

use crate::reader::WalReader;
use crate::record::RecordPayload;
use crate::segment::SegmentManager;
use spillway_checkpoint::{Checkpoint, EventQueue};
use spillway_core::{Error, Pointer, Result};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// Manages WAL recovery after crash or restart
pub struct RecoveryManager {
    segments: SegmentManager,
}

/// Statistics about recovery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Number of WAL segments found
    pub segment_count: usize,
    /// Total records read from the log
    pub total_records: usize,
    /// Records already covered by the checkpoint
    pub skipped_records: usize,
    /// Put records newer than the checkpoint
    pub put_records: usize,
    /// Take records newer than the checkpoint
    pub take_records: usize,
    /// Transactions applied to the queue
    pub transactions_committed: usize,
    /// Transactions that ended in a rollback record
    pub transactions_rolled_back: usize,
    /// Transactions with no commit or rollback record
    pub transactions_incomplete: usize,
    /// Segments that ended in a torn record
    pub torn_segments: usize,
}

/// Queue state rebuilt by recovery
#[derive(Debug)]
pub struct Recovered {
    /// The queue with every committed transaction applied
    pub queue: EventQueue,
    /// Highest write-order id seen in the checkpoint or the log
    pub write_order_id: u64,
    /// Highest transaction id seen in the checkpoint or the log
    pub transaction_id: u64,
    pub stats: RecoveryStats,
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Put(Pointer),
    Take(Pointer),
    Commit,
    Rollback,
}

/// Puts and takes of one transaction, buffered until its outcome is known
#[derive(Debug, Default)]
struct PendingTransaction {
    puts: Vec<Pointer>,
    takes: Vec<Pointer>,
}

impl RecoveryManager {
    /// Create a recovery manager over the given segments
    pub fn new(segments: SegmentManager) -> Self {
        Self { segments }
    }

    /// Rebuild the queue from an optional checkpoint plus the log tail.
    ///
    /// Records with a write-order id at or below the checkpoint's are
    /// already reflected in it and are skipped. The rest are applied in
    /// write-order id order, regardless of which segment holds them.
    pub fn replay(&self, checkpoint: Option<&Checkpoint>) -> Result<Recovered> {
        let mut reader = WalReader::new(&self.segments)?;
        let mut stats = RecoveryStats {
            segment_count: reader.segment_count(),
            ..Default::default()
        };

        let (mut queue, base_write_order_id, mut transaction_id) = match checkpoint {
            Some(checkpoint) => (
                EventQueue::from_checkpoint(checkpoint),
                checkpoint.write_order_id,
                checkpoint.transaction_id,
            ),
            None => (EventQueue::new(), 0, 0),
        };
        let mut write_order_id = base_write_order_id;

        let mut operations: Vec<(u64, u64, Operation)> = Vec::new();
        while let Some((pointer, record)) = reader.next_record()? {
            stats.total_records += 1;
            write_order_id = write_order_id.max(record.write_order_id);
            transaction_id = transaction_id.max(record.transaction_id);

            if record.write_order_id <= base_write_order_id {
                stats.skipped_records += 1;
                continue;
            }

            let operation = match record.payload {
                RecordPayload::Put { .. } => {
                    stats.put_records += 1;
                    Operation::Put(pointer)
                }
                RecordPayload::Take { pointer } => {
                    stats.take_records += 1;
                    Operation::Take(pointer)
                }
                RecordPayload::Commit => Operation::Commit,
                RecordPayload::Rollback => Operation::Rollback,
            };
            operations.push((record.write_order_id, record.transaction_id, operation));
        }
        stats.torn_segments = reader.torn_segments();

        operations.sort_by_key(|(woid, _, _)| *woid);
        if let Some(pair) = operations.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(Error::Corruption(format!(
                "Write-order id {} appears more than once in the log",
                pair[0].0
            )));
        }

        let rolled_back: HashSet<u64> = operations
            .iter()
            .filter(|(_, _, operation)| matches!(operation, Operation::Rollback))
            .map(|(_, tx_id, _)| *tx_id)
            .collect();

        let mut pending: HashMap<u64, PendingTransaction> = HashMap::new();
        for (_, tx_id, operation) in operations {
            match operation {
                Operation::Put(pointer) => pending.entry(tx_id).or_default().puts.push(pointer),
                Operation::Take(pointer) => pending.entry(tx_id).or_default().takes.push(pointer),
                Operation::Commit if rolled_back.contains(&tx_id) => {
                    pending.remove(&tx_id);
                    debug!(transaction_id = tx_id, "commit superseded by a later rollback");
                }
                Operation::Commit => {
                    let tx = pending.remove(&tx_id).unwrap_or_default();
                    for pointer in tx.puts {
                        queue.add(pointer);
                    }
                    for pointer in tx.takes {
                        if !queue.remove(&pointer) {
                            warn!(
                                transaction_id = tx_id,
                                pointer = %pointer,
                                "committed take refers to an event that is not queued"
                            );
                        }
                    }
                    stats.transactions_committed += 1;
                }
                Operation::Rollback => {
                    pending.remove(&tx_id);
                    stats.transactions_rolled_back += 1;
                }
            }
        }

        if !pending.is_empty() {
            stats.transactions_incomplete = pending.len();
            warn!(
                count = pending.len(),
                "discarding transactions with no commit record"
            );
        }

        debug!(?stats, "replay finished");
        info!(
            queue_size = queue.len(),
            write_order_id,
            transaction_id,
            segments = stats.segment_count,
            "WAL recovery complete"
        );

        Ok(Recovered {
            queue,
            write_order_id,
            transaction_id,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::WalRecord;
    use crate::{SyncMode, WalWriter};
    use spillway_core::Event;
    use tempfile::TempDir;

    fn setup_test_wal() -> (TempDir, SegmentManager) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let manager = SegmentManager::new(vec![temp_dir.path().join("data")])
            .expect("Failed to create segment manager");
        (temp_dir, manager)
    }

    fn writer(manager: &SegmentManager) -> WalWriter {
        WalWriter::new(manager.clone(), 64 * 1024 * 1024, SyncMode::Sync)
            .expect("Failed to create writer")
    }

    #[test]
    fn test_recover_empty_wal() {
        let (_temp_dir, manager) = setup_test_wal();
        let recovered = RecoveryManager::new(manager).replay(None).unwrap();
        assert!(recovered.queue.is_empty());
        assert_eq!(recovered.write_order_id, 0);
        assert_eq!(recovered.stats, RecoveryStats::default());
    }

    #[test]
    fn test_only_committed_puts_are_queued() {
        let (_temp_dir, manager) = setup_test_wal();
        let committed;
        {
            let mut w = writer(&manager);
            committed = w.append(&WalRecord::put(1, 1, Event::with_body("a"))).unwrap();
            w.append(&WalRecord::commit(2, 1)).unwrap();
            w.append(&WalRecord::put(3, 2, Event::with_body("b"))).unwrap();
            w.append(&WalRecord::rollback(4, 2)).unwrap();
            w.append(&WalRecord::put(5, 3, Event::with_body("c"))).unwrap();
        }

        let recovered = RecoveryManager::new(manager).replay(None).unwrap();
        assert_eq!(recovered.queue.iter().collect::<Vec<_>>(), vec![committed]);
        assert_eq!(recovered.write_order_id, 5);
        assert_eq!(recovered.transaction_id, 3);
        assert_eq!(recovered.stats.transactions_committed, 1);
        assert_eq!(recovered.stats.transactions_rolled_back, 1);
        assert_eq!(recovered.stats.transactions_incomplete, 1);
        assert_eq!(recovered.stats.put_records, 3);
    }

    #[test]
    fn test_rollback_after_commit_discards_transaction() {
        let (_temp_dir, manager) = setup_test_wal();
        let kept;
        {
            let mut w = writer(&manager);
            kept = w.append(&WalRecord::put(1, 1, Event::with_body("a"))).unwrap();
            w.append(&WalRecord::commit(2, 1)).unwrap();
            // commit record reached the file but the sync after it failed
            w.append(&WalRecord::take(3, 7, kept)).unwrap();
            w.append(&WalRecord::put(4, 7, Event::with_body("b"))).unwrap();
            w.append(&WalRecord::commit(5, 7)).unwrap();
            w.append(&WalRecord::rollback(6, 7)).unwrap();
        }

        let recovered = RecoveryManager::new(manager).replay(None).unwrap();
        assert_eq!(recovered.queue.iter().collect::<Vec<_>>(), vec![kept]);
        assert_eq!(recovered.stats.transactions_committed, 1);
        assert_eq!(recovered.stats.transactions_rolled_back, 1);
        assert_eq!(recovered.stats.transactions_incomplete, 0);
    }

    #[test]
    fn test_committed_take_removes_event() {
        let (_temp_dir, manager) = setup_test_wal();
        let (first, second);
        {
            let mut w = writer(&manager);
            first = w.append(&WalRecord::put(1, 1, Event::with_body("a"))).unwrap();
            second = w.append(&WalRecord::put(2, 1, Event::with_body("b"))).unwrap();
            w.append(&WalRecord::commit(3, 1)).unwrap();
            w.append(&WalRecord::take(4, 2, first)).unwrap();
            w.append(&WalRecord::commit(5, 2)).unwrap();
            // take with no commit leaves the event queued
            w.append(&WalRecord::take(6, 3, second)).unwrap();
        }

        let recovered = RecoveryManager::new(manager).replay(None).unwrap();
        assert_eq!(recovered.queue.iter().collect::<Vec<_>>(), vec![second]);
        assert_eq!(recovered.stats.take_records, 2);
    }

    #[test]
    fn test_replay_orders_by_write_order_id() {
        let (_temp_dir, manager) = setup_test_wal();
        let (early, late);
        {
            // segment 1 carries the later write-order ids
            let mut w = writer(&manager);
            late = w.append(&WalRecord::put(3, 2, Event::with_body("late"))).unwrap();
            w.append(&WalRecord::commit(4, 2)).unwrap();
        }
        {
            let mut w = writer(&manager);
            early = w.append(&WalRecord::put(1, 1, Event::with_body("early"))).unwrap();
            w.append(&WalRecord::commit(2, 1)).unwrap();
        }

        let recovered = RecoveryManager::new(manager).replay(None).unwrap();
        assert_eq!(recovered.queue.iter().collect::<Vec<_>>(), vec![early, late]);
    }

    #[test]
    fn test_duplicate_write_order_id_is_corruption() {
        let (_temp_dir, manager) = setup_test_wal();
        {
            let mut w = writer(&manager);
            w.append(&WalRecord::put(1, 1, Event::with_body("a"))).unwrap();
            w.append(&WalRecord::commit(1, 1)).unwrap();
        }

        let result = RecoveryManager::new(manager).replay(None);
        assert!(matches!(result, Err(Error::Corruption(_))));
    }

    #[test]
    fn test_checkpoint_is_replay_base() {
        let (_temp_dir, manager) = setup_test_wal();
        let (a, b, c);
        {
            let mut w = writer(&manager);
            a = w.append(&WalRecord::put(1, 1, Event::with_body("a"))).unwrap();
            b = w.append(&WalRecord::put(2, 1, Event::with_body("b"))).unwrap();
            w.append(&WalRecord::commit(3, 1)).unwrap();
            c = w.append(&WalRecord::put(4, 2, Event::with_body("c"))).unwrap();
            w.append(&WalRecord::commit(5, 2)).unwrap();
            w.append(&WalRecord::take(6, 3, a)).unwrap();
            w.append(&WalRecord::commit(7, 3)).unwrap();
        }

        // snapshot taken after tx 1, with `a` being taken by tx 3
        let checkpoint = Checkpoint {
            write_order_id: 3,
            transaction_id: 1,
            queue: vec![b],
            reference_counts: vec![(a, 1)],
        };

        let recovered = RecoveryManager::new(manager)
            .replay(Some(&checkpoint))
            .unwrap();
        assert_eq!(recovered.queue.iter().collect::<Vec<_>>(), vec![b, c]);
        assert_eq!(recovered.stats.skipped_records, 3);
        assert_eq!(recovered.write_order_id, 7);
        assert_eq!(recovered.transaction_id, 3);
    }

    #[test]
    fn test_checkpoint_without_log() {
        let (_temp_dir, manager) = setup_test_wal();
        let checkpoint = Checkpoint {
            write_order_id: 40,
            transaction_id: 12,
            queue: vec![Pointer::new(3, 6)],
            reference_counts: vec![(Pointer::new(2, 6), 1)],
        };

        let recovered = RecoveryManager::new(manager)
            .replay(Some(&checkpoint))
            .unwrap();
        assert_eq!(
            recovered.queue.iter().collect::<Vec<_>>(),
            vec![Pointer::new(2, 6), Pointer::new(3, 6)]
        );
        assert_eq!(recovered.write_order_id, 40);
        assert_eq!(recovered.transaction_id, 12);
    }
}
