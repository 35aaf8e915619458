//! # Spillway
//!
//! A durable, transactional event channel backed by a write-ahead log.
//!
//! Producers and consumers move opaque events through a [`FileChannel`]
//! inside thread-affine [`Transaction`]s. Committed events survive a crash;
//! uncommitted puts never reappear and uncommitted takes are undone.
//! Capacity bounds how many events the channel holds.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use spillway::{ChannelConfig, Event, FileChannel};
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ChannelConfig::in_dir("./spillway")
//!         .with_capacity(10_000)
//!         .with_keep_alive(Duration::from_secs(1));
//!     let channel = FileChannel::new("ingest", config)?;
//!     channel.start()?;
//!
//!     // Producer
//!     let tx = channel.get_transaction()?;
//!     tx.begin()?;
//!     tx.put(Event::with_body("line 1").with_header("host", "web-1"))?;
//!     tx.commit()?;
//!     tx.close()?;
//!
//!     // Consumer
//!     let tx = channel.get_transaction()?;
//!     tx.begin()?;
//!     if let Some(event) = tx.take()? {
//!         println!("{}", String::from_utf8_lossy(event.body()));
//!     }
//!     tx.commit()?;
//!     tx.close()?;
//!
//!     channel.stop()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Durability model
//!
//! Every commit appends put, take and commit records to the log, each
//! tagged with a write-order id, and fsyncs before returning (see
//! [`SyncMode`]). A background checkpoint snapshots the queue so restart
//! only replays records newer than the snapshot.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod capacity;
mod channel;
pub mod config;
pub mod logging;
pub mod transaction;

pub use capacity::CapacityController;
pub use channel::FileChannel;
pub use config::ChannelConfig;
pub use transaction::{Transaction, TransactionState};

// Re-export core types
pub use spillway_core::{Error, Event, Pointer, Result};

// WAL components
pub use spillway_wal::{RecoveryStats, SyncMode};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
