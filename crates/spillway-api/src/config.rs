//! Channel configuration.
//!
//! A [`ChannelConfig`] is built by the caller and handed to
//! [`FileChannel::new`](crate::FileChannel::new), which validates it.

use spillway_core::{Error, Result};
use spillway_wal::{SyncMode, WalConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Default total capacity, in events
pub const DEFAULT_CAPACITY: u64 = 1_000_000;

/// Default per-transaction capacity, in events
pub const DEFAULT_TRANSACTION_CAPACITY: u64 = 10_000;

/// Default segment rotation threshold (64 MB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Configuration of a [`FileChannel`](crate::FileChannel)
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Directory holding the checkpoint file
    pub checkpoint_dir: PathBuf,
    /// Directories log segments are striped across
    pub data_dirs: Vec<PathBuf>,
    /// Events the channel may hold, counting uncommitted puts
    pub capacity: u64,
    /// Puts (and, separately, takes) one transaction may buffer
    pub transaction_capacity: u64,
    /// How long a put waits for capacity and a take waits for an event
    pub keep_alive: Duration,
    /// Period of the background checkpoint
    pub checkpoint_interval: Duration,
    /// Segment size that triggers rotation
    pub max_file_size: u64,
    /// Free bytes each data directory must keep; 0 disables the check
    pub minimum_required_space: u64,
    /// When appended records are fsynced
    pub sync_mode: SyncMode,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("./spillway/checkpoint"),
            data_dirs: vec![PathBuf::from("./spillway/data")],
            capacity: DEFAULT_CAPACITY,
            transaction_capacity: DEFAULT_TRANSACTION_CAPACITY,
            keep_alive: Duration::from_secs(3),
            checkpoint_interval: Duration::from_secs(30),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            minimum_required_space: 0,
            sync_mode: SyncMode::Sync,
        }
    }
}

impl ChannelConfig {
    /// Default configuration rooted at `dir`: `dir/checkpoint` and `dir/data`
    pub fn in_dir<P: Into<PathBuf>>(dir: P) -> Self {
        let dir = dir.into();
        Self {
            checkpoint_dir: dir.join("checkpoint"),
            data_dirs: vec![dir.join("data")],
            ..Default::default()
        }
    }

    /// Set the checkpoint directory
    pub fn with_checkpoint_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.checkpoint_dir = dir.into();
        self
    }

    /// Replace the data directories
    pub fn with_data_dirs<I, P>(mut self, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.data_dirs = dirs.into_iter().map(Into::into).collect();
        self
    }

    /// Set the total capacity
    pub fn with_capacity(mut self, capacity: u64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the per-transaction capacity
    pub fn with_transaction_capacity(mut self, capacity: u64) -> Self {
        self.transaction_capacity = capacity;
        self
    }

    /// Set the put/take wait bound
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Set the background checkpoint period
    pub fn with_checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Set the segment rotation threshold
    pub fn with_max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    /// Set the free space each data directory must keep
    pub fn with_minimum_required_space(mut self, bytes: u64) -> Self {
        self.minimum_required_space = bytes;
        self
    }

    /// Set the sync mode
    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    /// Check the configuration is internally consistent
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidConfig(msg.to_string()));

        if self.capacity == 0 {
            return invalid("capacity must be greater than zero");
        }
        if self.transaction_capacity == 0 {
            return invalid("transaction capacity must be greater than zero");
        }
        if self.transaction_capacity > self.capacity {
            return Err(Error::InvalidConfig(format!(
                "transaction capacity {} exceeds capacity {}",
                self.transaction_capacity, self.capacity
            )));
        }
        if self.data_dirs.is_empty() {
            return invalid("at least one data directory is required");
        }
        for (i, dir) in self.data_dirs.iter().enumerate() {
            if self.data_dirs[..i].contains(dir) {
                return Err(Error::InvalidConfig(format!(
                    "data directory {} is listed twice",
                    dir.display()
                )));
            }
            if *dir == self.checkpoint_dir {
                return Err(Error::InvalidConfig(format!(
                    "data directory {} is also the checkpoint directory",
                    dir.display()
                )));
            }
        }
        if self.keep_alive.is_zero() {
            return invalid("keep-alive must be greater than zero");
        }
        if self.checkpoint_interval.is_zero() {
            return invalid("checkpoint interval must be greater than zero");
        }
        if self.max_file_size == 0 {
            return invalid("max file size must be greater than zero");
        }
        Ok(())
    }

    /// The log configuration this channel configuration implies
    pub fn wal_config(&self) -> WalConfig {
        WalConfig {
            checkpoint_dir: self.checkpoint_dir.clone(),
            data_dirs: self.data_dirs.clone(),
            max_segment_size: self.max_file_size,
            sync_mode: self.sync_mode,
            minimum_required_space: self.minimum_required_space,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ChannelConfig::default();
        assert_eq!(config.capacity, 1_000_000);
        assert_eq!(config.transaction_capacity, 10_000);
        assert_eq!(config.keep_alive, Duration::from_secs(3));
        assert_eq!(config.checkpoint_interval, Duration::from_secs(30));
        assert_eq!(config.sync_mode, SyncMode::Sync);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let config = ChannelConfig::in_dir("/tmp/ch")
            .with_capacity(10)
            .with_transaction_capacity(5)
            .with_data_dirs(["/tmp/a", "/tmp/b"])
            .with_keep_alive(Duration::from_millis(100))
            .with_max_file_size(1024);

        assert_eq!(config.checkpoint_dir, PathBuf::from("/tmp/ch/checkpoint"));
        assert_eq!(config.data_dirs.len(), 2);
        assert!(config.validate().is_ok());

        let wal = config.wal_config();
        assert_eq!(wal.max_segment_size, 1024);
        assert_eq!(wal.data_dirs, config.data_dirs);
    }

    #[test]
    fn test_validation_failures() {
        let base = ChannelConfig::in_dir("/tmp/ch");
        let cases = vec![
            base.clone().with_capacity(0),
            base.clone().with_transaction_capacity(0),
            base.clone().with_capacity(5).with_transaction_capacity(6),
            base.clone().with_data_dirs(Vec::<PathBuf>::new()),
            base.clone().with_data_dirs(["/tmp/x", "/tmp/x"]),
            base.clone().with_data_dirs(["/tmp/ch/checkpoint"]),
            base.clone().with_keep_alive(Duration::ZERO),
            base.clone().with_checkpoint_interval(Duration::ZERO),
            base.clone().with_max_file_size(0),
        ];

        for config in cases {
            assert!(
                matches!(config.validate(), Err(Error::InvalidConfig(_))),
                "expected rejection of {:?}",
                config
            );
        }
    }
}
