use spillway::logging::LogConfig;
use spillway::{ChannelConfig, Event, FileChannel};
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Debug level shows commits and checkpoints as they happen
    let _guard = LogConfig::debug().init();

    println!("=== Spillway Logging Demo ===\n");

    let dir = tempfile::tempdir()?;
    let config = ChannelConfig::in_dir(dir.path())
        .with_keep_alive(Duration::from_millis(200))
        .with_checkpoint_interval(Duration::from_millis(500));

    // Logs "starting channel" and recovery statistics
    let channel = FileChannel::new("demo", config)?;
    channel.start()?;

    println!("\n1. Committing puts...");
    let tx = channel.get_transaction()?;
    tx.begin()?;
    for i in 0..3 {
        tx.put(Event::with_body(format!("event {}", i)))?;
    }
    tx.commit()?;
    tx.close()?;

    println!("\n2. Waiting for the background checkpoint...");
    std::thread::sleep(Duration::from_secs(1));

    println!("\n3. Rolling back a take...");
    let tx = channel.get_transaction()?;
    tx.begin()?;
    tx.take()?;
    tx.rollback()?;
    tx.close()?;

    println!("\n4. Stopping...");
    channel.stop()?;

    println!("\n=== Demo Complete ===");
    println!("Check the logs above to see tracing output!");

    Ok(())
}
