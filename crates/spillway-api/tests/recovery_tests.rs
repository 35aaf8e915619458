//! Restart and crash recovery of a channel
//!
//! `stop()` is a clean shutdown with a final checkpoint. Dropping a started
//! channel closes the log without one, which is what a crash leaves behind.

mod common;

use common::{body_of, drain, put_all, take_n, ChannelFixture};
use spillway::{Event, FileChannel};

fn crash(channel: FileChannel) {
    drop(channel);
}

#[test]
fn test_restart_after_clean_stop() {
    let fixture = ChannelFixture::new();

    {
        let channel = fixture.open();
        put_all(&channel, &["a", "b", "c"]);
        assert_eq!(take_n(&channel, 1), vec!["a"]);
        channel.stop().expect("Failed to stop channel");
    }

    let channel = fixture.open();
    let stats = channel.recovery_stats().unwrap();
    // the final checkpoint covers every record
    assert_eq!(stats.total_records, stats.skipped_records);
    assert_eq!(drain(&channel), vec!["b", "c"]);
}

#[test]
fn test_restart_after_crash_without_checkpoint() {
    let fixture = ChannelFixture::new();

    {
        let channel = fixture.open();
        put_all(&channel, &["a", "b", "c"]);
        assert_eq!(take_n(&channel, 1), vec!["a"]);
        put_all(&channel, &["d"]);
        crash(channel);
    }

    let channel = fixture.open();
    let stats = channel.recovery_stats().unwrap();
    assert_eq!(stats.transactions_committed, 3);
    assert_eq!(drain(&channel), vec!["b", "c", "d"]);
}

#[test]
fn test_repeated_restarts_are_idempotent() {
    let fixture = ChannelFixture::new();

    {
        let channel = fixture.open();
        put_all(&channel, &["1", "2", "3", "4"]);
        take_n(&channel, 2);
        crash(channel);
    }

    let first = {
        let channel = fixture.open();
        let snapshot = channel.queue_snapshot().unwrap();
        crash(channel);
        snapshot
    };
    let second = {
        let channel = fixture.open();
        let snapshot = channel.queue_snapshot().unwrap();
        channel.stop().unwrap();
        snapshot
    };
    let third = fixture.open().queue_snapshot().unwrap();

    assert_eq!(first.len(), 2);
    assert_eq!(first, second);
    assert_eq!(second, third);
}

#[test]
fn test_take_before_checkpoint_committed_after() {
    let fixture = ChannelFixture::new();

    {
        let channel = fixture.open();
        put_all(&channel, &["a", "b"]);

        let tx = channel.get_transaction().unwrap();
        tx.begin().unwrap();
        assert_eq!(body_of(tx.take().unwrap().unwrap()), "a");
        assert!(channel.force_checkpoint().unwrap());
        tx.commit().unwrap();
        tx.close().unwrap();

        crash(channel);
    }

    let channel = fixture.open();
    assert_eq!(channel.size().unwrap(), 1);
    assert_eq!(drain(&channel), vec!["b"]);
}

#[test]
fn test_take_before_checkpoint_never_committed() {
    let fixture = ChannelFixture::new();

    {
        let channel = fixture.open();
        put_all(&channel, &["a", "b"]);

        let tx = channel.get_transaction().unwrap();
        tx.begin().unwrap();
        assert_eq!(body_of(tx.take().unwrap().unwrap()), "a");
        assert!(channel.force_checkpoint().unwrap());

        // the crash happens while the take is still open
        std::mem::forget(tx);
        crash(channel);
    }

    let channel = fixture.open();
    assert_eq!(channel.in_flight().unwrap(), 0);
    assert_eq!(drain(&channel), vec!["a", "b"]);
}

#[test]
fn test_put_before_checkpoint_committed_after() {
    let fixture = ChannelFixture::new();

    {
        let channel = fixture.open();
        put_all(&channel, &["early"]);

        let tx = channel.get_transaction().unwrap();
        tx.begin().unwrap();
        tx.put(Event::with_body("late")).unwrap();
        assert!(channel.force_checkpoint().unwrap());
        tx.commit().unwrap();
        tx.close().unwrap();

        crash(channel);
    }

    let channel = fixture.open();
    assert_eq!(drain(&channel), vec!["early", "late"]);
}

#[test]
fn test_put_spanning_two_checkpoints() {
    let fixture = ChannelFixture::new();

    {
        let channel = fixture.open();
        let tx = channel.get_transaction().unwrap();
        tx.begin().unwrap();
        tx.put(Event::with_body("x")).unwrap();
        assert!(channel.force_checkpoint().unwrap());
        tx.put(Event::with_body("y")).unwrap();
        assert!(channel.force_checkpoint().unwrap());
        tx.commit().unwrap();
        tx.close().unwrap();

        crash(channel);
    }

    let channel = fixture.open();
    assert_eq!(drain(&channel), vec!["x", "y"]);
}

#[test]
fn test_uncommitted_and_rolled_back_puts_do_not_survive() {
    let fixture = ChannelFixture::new();

    {
        let channel = fixture.open();
        put_all(&channel, &["kept"]);

        let tx = channel.get_transaction().unwrap();
        tx.begin().unwrap();
        tx.put(Event::with_body("rolled back")).unwrap();
        tx.rollback().unwrap();
        tx.close().unwrap();

        let tx = channel.get_transaction().unwrap();
        tx.begin().unwrap();
        tx.put(Event::with_body("never committed")).unwrap();
        std::mem::forget(tx);

        crash(channel);
    }

    let channel = fixture.open();
    assert_eq!(drain(&channel), vec!["kept"]);
}

#[test]
fn test_in_flight_takes_keep_segments_alive() {
    let fixture = ChannelFixture::new();
    // every record rotates into a segment of its own
    let config = fixture.config().with_max_file_size(1);

    {
        let channel = fixture.start(config.clone());
        for body in ["s1", "s2", "s3", "s4"] {
            put_all(&channel, &[body]);
        }

        let tx = channel.get_transaction().unwrap();
        tx.begin().unwrap();
        assert_eq!(body_of(tx.take().unwrap().unwrap()), "s1");
        assert_eq!(body_of(tx.take().unwrap().unwrap()), "s2");
        assert!(channel.force_checkpoint().unwrap());
        assert!(channel.force_checkpoint().unwrap());

        std::mem::forget(tx);
        crash(channel);
    }

    let channel = fixture.start(config);
    assert_eq!(drain(&channel), vec!["s1", "s2", "s3", "s4"]);
}

#[test]
fn test_capacity_restored_after_restart() {
    let fixture = ChannelFixture::new();
    let config = fixture.config().with_capacity(10).with_transaction_capacity(10);

    {
        let channel = fixture.start(config.clone());
        put_all(&channel, &["a", "b", "c", "d"]);
        take_n(&channel, 1);

        // reservations of an open put do not outlive the process
        let tx = channel.get_transaction().unwrap();
        tx.begin().unwrap();
        tx.put(Event::with_body("pending")).unwrap();
        assert_eq!(channel.remaining_capacity().unwrap(), 6);
        std::mem::forget(tx);

        crash(channel);
    }

    let channel = fixture.start(config);
    assert_eq!(channel.size().unwrap(), 3);
    assert_eq!(channel.remaining_capacity().unwrap(), 7);
}

#[test]
fn test_transaction_ids_not_reused_after_restart() {
    let fixture = ChannelFixture::new();

    let before = {
        let channel = fixture.open();
        let tx = channel.get_transaction().unwrap();
        tx.begin().unwrap();
        tx.put(Event::with_body("a")).unwrap();
        tx.commit().unwrap();
        let id = tx.id();
        tx.close().unwrap();
        crash(channel);
        id
    };

    let channel = fixture.open();
    let tx = channel.get_transaction().unwrap();
    assert!(tx.id() > before);
}

#[test]
fn test_restart_with_striped_data_dirs() {
    let fixture = ChannelFixture::new();
    let root = fixture.root();
    let config = fixture
        .config()
        .with_data_dirs([root.join("disk0"), root.join("disk1"), root.join("disk2")])
        .with_max_file_size(1);

    {
        let channel = fixture.start(config.clone());
        for body in ["1", "2", "3", "4", "5", "6"] {
            put_all(&channel, &[body]);
        }
        crash(channel);
    }

    for disk in ["disk0", "disk1", "disk2"] {
        let segments = std::fs::read_dir(root.join(disk))
            .expect("Failed to read data directory")
            .count();
        assert!(segments > 0, "{} holds no segments", disk);
    }

    let channel = fixture.start(config);
    assert_eq!(drain(&channel), vec!["1", "2", "3", "4", "5", "6"]);
}
