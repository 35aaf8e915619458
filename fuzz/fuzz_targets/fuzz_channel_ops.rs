#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use spillway::{ChannelConfig, Event, FileChannel, TransactionState};
use std::time::Duration;

#[derive(Arbitrary, Debug)]
enum ChannelOp {
    Begin,
    Put { body: Vec<u8> },
    Take,
    Commit,
    Rollback,
    Close,
    Checkpoint,
    Restart,
}

fn open(config: &ChannelConfig) -> Option<FileChannel> {
    let channel = FileChannel::new("fuzz", config.clone()).ok()?;
    channel.start().ok()?;
    Some(channel)
}

fuzz_target!(|ops: Vec<ChannelOp>| {
    let Ok(dir) = tempfile::tempdir() else {
        return;
    };
    let config = ChannelConfig::in_dir(dir.path())
        .with_capacity(16)
        .with_transaction_capacity(8)
        .with_keep_alive(Duration::from_millis(1))
        .with_max_file_size(512);
    let Some(mut channel) = open(&config) else {
        return;
    };

    for op in ops.iter().take(100) { // Limit operations to prevent timeout
        let Ok(tx) = channel.get_transaction() else {
            return;
        };
        match op {
            ChannelOp::Begin => {
                let _ = tx.begin();
            }
            ChannelOp::Put { body } => {
                if body.len() <= 1024 {
                    let _ = tx.put(Event::with_body(body.clone()));
                }
            }
            ChannelOp::Take => {
                let _ = tx.take();
            }
            ChannelOp::Commit => {
                let _ = tx.commit();
            }
            ChannelOp::Rollback => {
                let _ = tx.rollback();
            }
            ChannelOp::Close => {
                let _ = tx.close();
            }
            ChannelOp::Checkpoint => {
                let _ = channel.force_checkpoint();
            }
            ChannelOp::Restart => {
                if tx.state().ok() == Some(TransactionState::Open) {
                    let _ = tx.rollback();
                }
                drop(tx);
                drop(channel);
                channel = match open(&config) {
                    Some(channel) => channel,
                    None => return,
                };
                continue;
            }
        }
        // stored events never exceed capacity
        if let Ok(size) = channel.size() {
            assert!(size <= 16);
        }
    }
});
