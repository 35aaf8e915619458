//! Error types for spillway.

use std::fmt;

/// The main error type for spillway operations.
#[derive(Debug)]
pub enum Error {
    /// A lock was poisoned (internal error)
    LockPoisoned,

    /// I/O error
    Io(std::io::Error),

    /// Serialization/deserialization error
    Serialization(String),

    /// No admission unit became available within the keep-alive
    CapacityExceeded {
        /// Name of the channel that rejected the put
        channel: String,
    },

    /// A transaction buffered more operations than it may hold
    TransactionFull {
        /// Name of the channel owning the transaction
        channel: String,
        /// Configured per-transaction capacity
        capacity: u64,
    },

    /// A transaction was used from the wrong thread or in the wrong state
    TransactionState(String),

    /// A record or checkpoint could not be made durable
    Durability(String),

    /// On-disk data failed validation
    Corruption(String),

    /// An incomplete frame was found
    Truncated(String),

    /// Another instance already owns the directories
    LockContention(String),

    /// The channel configuration is inconsistent
    InvalidConfig(String),

    /// The channel is not open
    ChannelClosed(String),
}

impl Error {
    /// Returns true for errors a caller can recover from at the transaction boundary.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::CapacityExceeded { .. } | Error::TransactionFull { .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::LockPoisoned => write!(f, "Lock poisoned"),
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            Error::CapacityExceeded { channel } => {
                write!(f, "Cannot acquire capacity. [channel={}]", channel)
            }
            Error::TransactionFull { channel, capacity } => write!(
                f,
                "Transaction of capacity {} full, consider committing more frequently. [channel={}]",
                capacity, channel
            ),
            Error::TransactionState(msg) => write!(f, "Transaction state error: {}", msg),
            Error::Durability(msg) => write!(f, "Durability error: {}", msg),
            Error::Corruption(msg) => write!(f, "Corruption detected: {}", msg),
            Error::Truncated(msg) => write!(f, "Truncated data: {}", msg),
            Error::LockContention(msg) => write!(f, "Lock contention: {}", msg),
            Error::InvalidConfig(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::ChannelClosed(name) => write!(f, "Channel is not open. [channel={}]", name),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

/// A specialized `Result` type for spillway operations.
pub type Result<T> = std::result::Result<T, Error>;
