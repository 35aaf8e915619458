// Common test utilities for channel integration tests

use spillway::{ChannelConfig, Event, FileChannel};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

/// Short wait so capacity and empty-queue timeouts keep tests fast
pub const KEEP_ALIVE: Duration = Duration::from_millis(100);

/// Channel directories under a temporary root
pub struct ChannelFixture {
    pub temp_dir: TempDir,
}

impl ChannelFixture {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    #[allow(dead_code)]
    pub fn root(&self) -> PathBuf {
        self.temp_dir.path().to_path_buf()
    }

    pub fn config(&self) -> ChannelConfig {
        ChannelConfig::in_dir(self.temp_dir.path())
            .with_capacity(100)
            .with_transaction_capacity(100)
            .with_keep_alive(KEEP_ALIVE)
            // long enough that only explicit checkpoints run in tests
            .with_checkpoint_interval(Duration::from_secs(3600))
    }

    /// A started channel using `config`
    pub fn start(&self, config: ChannelConfig) -> FileChannel {
        let channel = FileChannel::new("test-channel", config).expect("Failed to create channel");
        channel.start().expect("Failed to start channel");
        channel
    }

    /// A started channel using the default test configuration
    #[allow(dead_code)]
    pub fn open(&self) -> FileChannel {
        self.start(self.config())
    }
}

impl Default for ChannelFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Put each body in one committed transaction
#[allow(dead_code)]
pub fn put_all(channel: &FileChannel, bodies: &[&str]) {
    let tx = channel.get_transaction().expect("Failed to get transaction");
    tx.begin().expect("Failed to begin");
    for body in bodies {
        tx.put(Event::with_body(*body)).expect("Failed to put");
    }
    tx.commit().expect("Failed to commit");
    tx.close().expect("Failed to close");
}

/// Take up to `n` events in one committed transaction
#[allow(dead_code)]
pub fn take_n(channel: &FileChannel, n: usize) -> Vec<String> {
    let tx = channel.get_transaction().expect("Failed to get transaction");
    tx.begin().expect("Failed to begin");
    let mut bodies = Vec::new();
    for _ in 0..n {
        match tx.take().expect("Failed to take") {
            Some(event) => bodies.push(body_of(event)),
            None => break,
        }
    }
    tx.commit().expect("Failed to commit");
    tx.close().expect("Failed to close");
    bodies
}

/// Take and commit every event currently in the channel
#[allow(dead_code)]
pub fn drain(channel: &FileChannel) -> Vec<String> {
    let mut all = Vec::new();
    loop {
        let batch = take_n(channel, 10);
        if batch.is_empty() {
            return all;
        }
        all.extend(batch);
    }
}

#[allow(dead_code)]
pub fn body_of(event: Event) -> String {
    String::from_utf8(event.into_body()).expect("Event body is not UTF-8")
}
