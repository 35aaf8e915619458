//! Channel Demo
//!
//! Shows the main guarantees of a file channel:
//! - Puts and takes inside transactions
//! - Rollback returning taken events
//! - Capacity limits rejecting puts
//! - Committed events surviving a crash

use spillway::{ChannelConfig, Error, Event, FileChannel};
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Spillway Channel Demo ===\n");

    let dir = tempfile::tempdir()?;
    let config = ChannelConfig::in_dir(dir.path())
        .with_capacity(3)
        .with_transaction_capacity(3)
        .with_keep_alive(Duration::from_millis(200));

    // Demo 1: put and take
    println!("1. Put and take:");
    {
        let channel = FileChannel::new("orders", config.clone())?;
        channel.start()?;

        let tx = channel.get_transaction()?;
        tx.begin()?;
        tx.put(Event::with_body("order-1").with_header("region", "eu"))?;
        tx.put(Event::with_body("order-2").with_header("region", "us"))?;
        tx.commit()?;
        tx.close()?;
        println!("   ✓ Committed 2 events, channel size {}", channel.size()?);

        let tx = channel.get_transaction()?;
        tx.begin()?;
        if let Some(event) = tx.take()? {
            println!(
                "   ✓ Took {} from region {:?}",
                String::from_utf8_lossy(event.body()),
                event.header("region")
            );
        }
        tx.commit()?;
        tx.close()?;

        channel.stop()?;
    }

    // Demo 2: rollback
    println!("\n2. Rollback:");
    {
        let channel = FileChannel::new("orders", config.clone())?;
        channel.start()?;

        let tx = channel.get_transaction()?;
        tx.begin()?;
        tx.take()?;
        println!("   ✓ Took one event, {} in flight", channel.in_flight()?);
        tx.rollback()?;
        tx.close()?;
        println!("   ✓ Rolled back, channel size {}", channel.size()?);

        channel.stop()?;
    }

    // Demo 3: capacity
    println!("\n3. Capacity:");
    {
        let channel = FileChannel::new("orders", config.clone())?;
        channel.start()?;

        let tx = channel.get_transaction()?;
        tx.begin()?;
        tx.put(Event::with_body("order-3"))?;
        tx.put(Event::with_body("order-4"))?;
        match tx.put(Event::with_body("order-5")) {
            Err(e @ Error::CapacityExceeded { .. }) => println!("   ✓ Rejected: {}", e),
            other => println!("   ✗ Unexpected: {:?}", other),
        }
        tx.commit()?;
        tx.close()?;

        // Demo 4: crash without a final checkpoint
        println!("\n4. Crash and recover:");
        drop(channel);
    }

    let channel = FileChannel::new("orders", config)?;
    channel.start()?;
    let stats = channel.recovery_stats()?;
    println!(
        "   ✓ Replayed {} records from {} segments",
        stats.total_records - stats.skipped_records,
        stats.segment_count
    );

    let tx = channel.get_transaction()?;
    tx.begin()?;
    while let Some(event) = tx.take()? {
        println!("   ✓ Recovered {}", String::from_utf8_lossy(event.body()));
    }
    tx.commit()?;
    tx.close()?;
    channel.stop()?;

    println!("\n=== Demo Complete ===");
    Ok(())
}
