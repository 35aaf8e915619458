//! Thread-affine transactions over a [`FileChannel`](crate::FileChannel).
//!
//! Puts and takes are buffered in the transaction. Nothing reaches the log
//! until [`Transaction::commit`], which writes every buffered operation and
//! a commit record before the queue changes. A handle belongs to the thread
//! that obtained it from [`FileChannel::get_transaction`](crate::FileChannel::get_transaction);
//! calls from any other thread fail.

use crate::channel::ChannelCore;
use spillway_core::{Error, Event, Pointer, Result};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, ThreadId};
use tracing::{debug, error, warn};

/// Lifecycle of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Created, not yet begun
    Idle,
    /// Accepting puts and takes
    Open,
    /// Committed; only `close` is allowed
    Committed,
    /// Rolled back; only `close` is allowed
    RolledBack,
    /// Released; the thread gets a new transaction next time
    Closed,
}

#[derive(Debug)]
struct Buffers {
    state: TransactionState,
    puts: Vec<Event>,
    /// Capacity units held for buffered puts
    reserved: u64,
    takes: Vec<Pointer>,
    /// A commit failed part way; only rollback is allowed now
    commit_failed: bool,
}

pub(crate) struct TransactionInner {
    id: u64,
    owner: ThreadId,
    core: Arc<ChannelCore>,
    buffers: Mutex<Buffers>,
}

/// Handle to the calling thread's transaction
///
/// Clones refer to the same transaction.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl Transaction {
    pub(crate) fn new(id: u64, core: Arc<ChannelCore>) -> Self {
        Self {
            inner: Arc::new(TransactionInner {
                id,
                owner: thread::current().id(),
                core,
                buffers: Mutex::new(Buffers {
                    state: TransactionState::Idle,
                    puts: Vec::new(),
                    reserved: 0,
                    takes: Vec::new(),
                    commit_failed: false,
                }),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<TransactionInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<TransactionInner> {
        Arc::downgrade(&self.inner)
    }

    /// Transaction id, unique across restarts of the channel
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> Result<TransactionState> {
        Ok(self.lock()?.state)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Buffers>> {
        self.inner.buffers.lock().map_err(|_| Error::LockPoisoned)
    }

    /// Lock the buffers after checking the caller owns this transaction
    fn owned(&self) -> Result<MutexGuard<'_, Buffers>> {
        if thread::current().id() != self.inner.owner {
            return Err(Error::TransactionState(format!(
                "transaction {} belongs to another thread",
                self.inner.id
            )));
        }
        self.lock()
    }

    fn expect_state(&self, buffers: &Buffers, expected: TransactionState, op: &str) -> Result<()> {
        if buffers.state != expected {
            return Err(Error::TransactionState(format!(
                "cannot {} transaction {} in state {:?}",
                op, self.inner.id, buffers.state
            )));
        }
        Ok(())
    }

    fn transaction_full(&self) -> Error {
        Error::TransactionFull {
            channel: self.inner.core.name.clone(),
            capacity: self.inner.core.config.transaction_capacity,
        }
    }

    /// Start accepting operations
    pub fn begin(&self) -> Result<()> {
        let mut buffers = self.owned()?;
        self.expect_state(&buffers, TransactionState::Idle, "begin")?;
        buffers.state = TransactionState::Open;
        Ok(())
    }

    /// Buffer an event, reserving one unit of channel capacity.
    ///
    /// Waits up to the channel's keep-alive for capacity and fails with
    /// `Error::CapacityExceeded` if none frees up.
    pub fn put(&self, event: Event) -> Result<()> {
        {
            let buffers = self.owned()?;
            self.expect_state(&buffers, TransactionState::Open, "put in")?;
            if buffers.puts.len() as u64 >= self.inner.core.config.transaction_capacity {
                return Err(self.transaction_full());
            }
        }

        // only the owning thread reaches here, so the buffers cannot change
        // while the lock is released
        let core = &self.inner.core;
        core.capacity.acquire(1, core.config.keep_alive)?;

        let mut buffers = self.lock()?;
        buffers.puts.push(event);
        buffers.reserved += 1;
        Ok(())
    }

    /// Take the oldest event, waiting up to the keep-alive for one.
    ///
    /// Returns `Ok(None)` if the channel stayed empty.
    pub fn take(&self) -> Result<Option<Event>> {
        {
            let buffers = self.owned()?;
            self.expect_state(&buffers, TransactionState::Open, "take in")?;
            if buffers.takes.len() as u64 >= self.inner.core.config.transaction_capacity {
                return Err(self.transaction_full());
            }
        }

        let core = &self.inner.core;
        let Some(pointer) = core.log.take(core.config.keep_alive)? else {
            return Ok(None);
        };

        // recorded before the read so a rollback returns the pointer
        self.lock()?.takes.push(pointer);
        core.log.read_event(pointer).map(Some)
    }

    /// Make every buffered operation durable and visible.
    ///
    /// On failure the transaction stays open and must be rolled back.
    pub fn commit(&self) -> Result<()> {
        let mut buffers = self.owned()?;
        self.expect_state(&buffers, TransactionState::Open, "commit")?;
        if buffers.commit_failed {
            return Err(Error::TransactionState(format!(
                "transaction {} failed to commit and must be rolled back",
                self.inner.id
            )));
        }

        if buffers.puts.is_empty() && buffers.takes.is_empty() {
            buffers.state = TransactionState::Committed;
            return Ok(());
        }

        let core = &self.inner.core;
        let puts = std::mem::take(&mut buffers.puts);
        let put_count = puts.len();
        match core.log.commit(self.inner.id, puts, &buffers.takes) {
            Ok(_) => {
                core.capacity.release(buffers.takes.len() as u64)?;
                debug!(
                    channel = %core.name,
                    transaction_id = self.inner.id,
                    puts = put_count,
                    takes = buffers.takes.len(),
                    "commit"
                );
                buffers.takes.clear();
                buffers.reserved = 0;
                buffers.state = TransactionState::Committed;
                Ok(())
            }
            Err(e) => {
                error!(
                    channel = %core.name,
                    transaction_id = self.inner.id,
                    error = %e,
                    "commit failed"
                );
                buffers.commit_failed = true;
                Err(e)
            }
        }
    }

    /// Discard buffered puts and return buffered takes to the channel
    pub fn rollback(&self) -> Result<()> {
        let mut buffers = self.owned()?;
        self.expect_state(&buffers, TransactionState::Open, "roll back")?;
        self.inner.rollback_buffers(&mut buffers)
    }

    /// Release the transaction; the thread gets a fresh one afterwards.
    ///
    /// An open transaction must be committed or rolled back first.
    pub fn close(&self) -> Result<()> {
        {
            let mut buffers = self.owned()?;
            let state = buffers.state;
            match state {
                TransactionState::Open => {
                    return Err(Error::TransactionState(format!(
                        "transaction {} must be committed or rolled back before close",
                        self.inner.id
                    )))
                }
                TransactionState::Closed => {
                    return Err(Error::TransactionState(format!(
                        "transaction {} is already closed",
                        self.inner.id
                    )))
                }
                _ => buffers.state = TransactionState::Closed,
            }
        }
        self.inner.core.forget_transaction(self.inner.owner, &self.inner);
        Ok(())
    }
}

impl TransactionInner {
    fn rollback_buffers(&self, buffers: &mut Buffers) -> Result<()> {
        let core = &self.core;
        buffers.puts.clear();
        core.capacity.release(buffers.reserved)?;
        buffers.reserved = 0;

        let result = core
            .log
            .rollback(self.id, &buffers.takes, buffers.commit_failed);
        buffers.takes.clear();
        buffers.state = TransactionState::RolledBack;
        result
    }
}

impl Drop for TransactionInner {
    fn drop(&mut self) {
        let Ok(mut buffers) = self.buffers.lock() else {
            return;
        };
        if buffers.state != TransactionState::Open {
            return;
        }

        warn!(
            channel = %self.core.name,
            transaction_id = self.id,
            puts = buffers.puts.len(),
            takes = buffers.takes.len(),
            "open transaction abandoned, rolling back"
        );
        if let Err(e) = self.rollback_buffers(&mut buffers) {
            warn!(transaction_id = self.id, error = %e, "rollback of abandoned transaction failed");
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("owner", &self.inner.owner)
            .field("channel", &self.inner.core.name)
            .finish()
    }
}
