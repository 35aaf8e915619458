// Common test utilities for WAL integration tests

use spillway_wal::{SyncMode, WalConfig};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Test fixture with temporary checkpoint and data directories
pub struct WalTestFixture {
    #[allow(dead_code)]
    pub temp_dir: TempDir,
    pub checkpoint_dir: PathBuf,
    pub data_dirs: Vec<PathBuf>,
}

impl WalTestFixture {
    pub fn new() -> Self {
        Self::with_data_dirs(1)
    }

    pub fn with_data_dirs(count: usize) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let checkpoint_dir = temp_dir.path().join("checkpoint");
        let data_dirs = (0..count)
            .map(|i| temp_dir.path().join(format!("data{}", i)))
            .collect();

        Self {
            temp_dir,
            checkpoint_dir,
            data_dirs,
        }
    }

    pub fn config(&self) -> WalConfig {
        WalConfig {
            checkpoint_dir: self.checkpoint_dir.clone(),
            data_dirs: self.data_dirs.clone(),
            max_segment_size: 64 * 1024 * 1024,
            sync_mode: SyncMode::Sync,
            minimum_required_space: 0,
        }
    }

    #[allow(dead_code)]
    pub fn small_segments(&self, max_segment_size: u64) -> WalConfig {
        WalConfig {
            max_segment_size,
            ..self.config()
        }
    }

    /// Segment file names in one data directory
    #[allow(dead_code)]
    pub fn list_segments(&self, dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .expect("Failed to read data directory")
            .filter_map(|entry| {
                entry
                    .ok()
                    .and_then(|e| e.file_name().to_str().map(String::from))
            })
            .filter(|name| name.starts_with("wal-"))
            .collect();
        names.sort();
        names
    }
}

impl Default for WalTestFixture {
    fn default() -> Self {
        Self::new()
    }
}
