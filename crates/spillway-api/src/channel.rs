//! The file-backed channel and its lifecycle.

use crate::capacity::CapacityController;
use crate::config::ChannelConfig;
use crate::transaction::{Transaction, TransactionInner, TransactionState};
use spillway_core::{Error, Event, Pointer, Result};
use spillway_wal::{RecoveryStats, WalManager};
use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// State shared by a started channel and its transactions
pub(crate) struct ChannelCore {
    pub(crate) name: String,
    pub(crate) config: ChannelConfig,
    pub(crate) log: WalManager,
    pub(crate) capacity: CapacityController,
    transactions: Mutex<HashMap<ThreadId, Weak<TransactionInner>>>,
}

impl ChannelCore {
    /// The calling thread's live transaction, or a new one
    fn transaction(self: &Arc<Self>) -> Result<Transaction> {
        let mut transactions = self.transactions.lock().map_err(|_| Error::LockPoisoned)?;
        let current = thread::current().id();

        if let Some(inner) = transactions.get(&current).and_then(Weak::upgrade) {
            let existing = Transaction::from_inner(inner);
            if existing.state()? != TransactionState::Closed {
                return Ok(existing);
            }
        }

        let transaction = Transaction::new(self.log.next_transaction_id(), Arc::clone(self));
        transactions.insert(current, transaction.downgrade());
        Ok(transaction)
    }

    /// Drop the registry entry of a closed transaction
    pub(crate) fn forget_transaction(&self, owner: ThreadId, inner: &Arc<TransactionInner>) {
        if let Ok(mut transactions) = self.transactions.lock() {
            let same = transactions
                .get(&owner)
                .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(inner)));
            if same {
                transactions.remove(&owner);
            }
        }
    }
}

/// Background thread writing periodic non-forced checkpoints
struct CheckpointWorker {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CheckpointWorker {
    fn start(core: Arc<ChannelCore>, interval: Duration) -> Result<Self> {
        let (shutdown, signal) = mpsc::channel::<()>();
        let name = format!("spillway-checkpoint-{}", core.name);

        let handle = thread::Builder::new().name(name).spawn(move || {
            debug!(channel = %core.name, interval_ms = interval.as_millis() as u64, "checkpoint worker started");
            loop {
                match signal.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {}
                    // a message or a dropped sender both mean stop
                    _ => break,
                }
                match core.log.write_checkpoint(false) {
                    Ok(_) => {}
                    Err(Error::ChannelClosed(_)) => break,
                    Err(e) => error!(channel = %core.name, error = %e, "background checkpoint failed"),
                }
            }
            debug!(channel = %core.name, "checkpoint worker stopped");
        })?;

        Ok(Self {
            shutdown: Some(shutdown),
            handle: Some(handle),
        })
    }

    /// Signal the worker to stop and wait for it to finish
    fn stop(&mut self) {
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("checkpoint worker panicked");
            }
        }
    }
}

impl Drop for CheckpointWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Running {
    core: Arc<ChannelCore>,
    checkpointer: CheckpointWorker,
}

/// A durable, transactional event channel backed by a write-ahead log.
///
/// Events are put and taken inside thread-affine [`Transaction`]s. A
/// committed put survives a crash; an uncommitted one never reappears.
///
/// # Examples
///
/// ```rust,no_run
/// use spillway::{ChannelConfig, Event, FileChannel};
///
/// let channel = FileChannel::new("events", ChannelConfig::in_dir("./spillway"))?;
/// channel.start()?;
///
/// let tx = channel.get_transaction()?;
/// tx.begin()?;
/// tx.put(Event::with_body("hello"))?;
/// tx.commit()?;
/// tx.close()?;
///
/// channel.stop()?;
/// # Ok::<(), spillway::Error>(())
/// ```
pub struct FileChannel {
    name: String,
    config: ChannelConfig,
    running: RwLock<Option<Running>>,
}

impl FileChannel {
    /// Create a stopped channel with a validated configuration
    pub fn new(name: impl Into<String>, config: ChannelConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config,
            running: RwLock::new(None),
        })
    }

    /// Lock the directories, recover the queue and start checkpointing.
    ///
    /// On failure the error is returned and the channel stays closed;
    /// `is_open()` reports false. Starting an open channel is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut running = self.running.write().map_err(|_| Error::LockPoisoned)?;
        if running.is_some() {
            return Ok(());
        }

        info!(channel = %self.name, dirs = ?self.config.data_dirs, "starting channel");
        let log = match WalManager::open(self.config.wal_config()) {
            Ok(log) => log,
            Err(e) => {
                error!(channel = %self.name, error = %e, "failed to start channel");
                return Err(e);
            }
        };

        let in_use = (log.queue_len()? + log.in_flight_len()?) as u64;
        if in_use > self.config.capacity {
            warn!(
                channel = %self.name,
                stored = in_use,
                capacity = self.config.capacity,
                "channel holds more events than its capacity"
            );
        }

        let core = Arc::new(ChannelCore {
            name: self.name.clone(),
            config: self.config.clone(),
            capacity: CapacityController::new(self.name.clone(), self.config.capacity, in_use),
            log,
            transactions: Mutex::new(HashMap::new()),
        });

        let checkpointer = match CheckpointWorker::start(Arc::clone(&core), self.config.checkpoint_interval) {
            Ok(worker) => worker,
            Err(e) => {
                let _ = core.log.close(false);
                return Err(e);
            }
        };

        info!(channel = %self.name, queue_size = in_use, "channel started");
        *running = Some(Running { core, checkpointer });
        Ok(())
    }

    /// Stop checkpointing, write a final checkpoint and release the directories
    pub fn stop(&self) -> Result<()> {
        let Some(mut running) = self
            .running
            .write()
            .map_err(|_| Error::LockPoisoned)?
            .take()
        else {
            return Ok(());
        };

        running.checkpointer.stop();
        let result = running.core.log.close(true);
        match &result {
            Ok(()) => info!(channel = %self.name, "channel stopped"),
            Err(e) => error!(channel = %self.name, error = %e, "channel stopped without a final checkpoint"),
        }
        result
    }

    /// Whether the channel is started and its log is usable
    pub fn is_open(&self) -> bool {
        self.running
            .read()
            .map(|running| running.as_ref().is_some_and(|r| r.core.log.is_open()))
            .unwrap_or(false)
    }

    fn core(&self) -> Result<Arc<ChannelCore>> {
        let running = self.running.read().map_err(|_| Error::LockPoisoned)?;
        running
            .as_ref()
            .map(|r| Arc::clone(&r.core))
            .ok_or_else(|| Error::ChannelClosed(format!("channel {} is not open", self.name)))
    }

    /// The calling thread's transaction, created if it has none or its
    /// previous one was closed
    pub fn get_transaction(&self) -> Result<Transaction> {
        self.core()?.transaction()
    }

    /// Put an event in the calling thread's open transaction
    pub fn put(&self, event: Event) -> Result<()> {
        self.get_transaction()?.put(event)
    }

    /// Take an event in the calling thread's open transaction
    pub fn take(&self) -> Result<Option<Event>> {
        self.get_transaction()?.take()
    }

    /// Write a checkpoint now, waiting for one in progress to finish
    pub fn force_checkpoint(&self) -> Result<bool> {
        self.core()?.log.write_checkpoint(true)
    }

    /// Channel name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Channel configuration
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Number of committed events waiting to be taken
    pub fn size(&self) -> Result<usize> {
        self.core()?.log.queue_len()
    }

    /// Number of events taken by transactions that have not committed
    pub fn in_flight(&self) -> Result<usize> {
        self.core()?.log.in_flight_len()
    }

    /// Capacity units free right now
    pub fn remaining_capacity(&self) -> Result<u64> {
        self.core()?.capacity.available()
    }

    /// Queued pointers, oldest first
    pub fn queue_snapshot(&self) -> Result<Vec<Pointer>> {
        self.core()?.log.queue_snapshot()
    }

    /// What recovery found when the channel started
    pub fn recovery_stats(&self) -> Result<RecoveryStats> {
        Ok(self.core()?.log.recovery_stats().clone())
    }
}

impl Drop for FileChannel {
    fn drop(&mut self) {
        // no final checkpoint: dropping a started channel is a crash
        let running = match self.running.get_mut() {
            Ok(running) => running.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(mut running) = running {
            running.checkpointer.stop();
            if let Err(e) = running.core.log.close(false) {
                warn!(channel = %self.name, error = %e, "failed to close log on drop");
            }
        }
    }
}

impl std::fmt::Debug for FileChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileChannel")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .finish()
    }
}
