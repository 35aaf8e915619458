//! File format versions for spillway
//!
//! There is exactly one readable version of each on-disk format. Files
//! carrying any other version are rejected as corrupt.

/// WAL segment format version
pub const WAL_FORMAT_VERSION: u16 = 1;

/// Checkpoint format version
pub const CHECKPOINT_FORMAT_VERSION: u16 = 1;

/// Magic numbers for file validation
pub mod magic {
    /// Segment magic: "SPWL" (SPillway WaL)
    pub const SEGMENT: u32 = 0x5350_574C;

    /// Checkpoint magic: "SPCK" (SPillway ChecKpoint)
    pub const CHECKPOINT: u32 = 0x5350_434B;
}

/// Version compatibility information
pub struct FormatVersion {
    /// Current version of this format
    pub current: u16,
    /// Minimum supported version for reading
    pub min_read: u16,
}

impl FormatVersion {
    /// Check if a version can be read
    pub fn can_read(&self, version: u16) -> bool {
        version >= self.min_read && version <= self.current
    }
}

/// WAL segment format version info
pub fn wal_version() -> FormatVersion {
    FormatVersion {
        current: WAL_FORMAT_VERSION,
        min_read: WAL_FORMAT_VERSION,
    }
}

/// Checkpoint format version info
pub fn checkpoint_version() -> FormatVersion {
    FormatVersion {
        current: CHECKPOINT_FORMAT_VERSION,
        min_read: CHECKPOINT_FORMAT_VERSION,
    }
}
