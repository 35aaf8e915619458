// WAL segment management - segment naming, placement across data
// directories, discovery and reclamation
//
// Segments are named: wal-{id:016x}.log
// Segment `id` lives in data_dirs[id % data_dirs.len()], so consecutive
// segments spread over the configured directories.
//
// Every segment starts with a header: [magic: u32 LE] [version: u16 LE]

use spillway_core::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Segment header length: magic + format version
pub const SEGMENT_HEADER_LEN: u64 = 4 + 2;

/// Manages WAL segment files across one or more data directories
#[derive(Debug, Clone)]
pub struct SegmentManager {
    data_dirs: Vec<PathBuf>,
}

/// Information about a WAL segment file
#[derive(Debug, Clone)]
pub struct SegmentInfo {
    /// Path to the segment file
    pub path: PathBuf,
    /// Segment id extracted from filename
    pub id: u64,
    /// File size in bytes
    pub size: u64,
}

impl SegmentManager {
    /// Create a segment manager over the given data directories
    pub fn new(data_dirs: Vec<PathBuf>) -> Result<Self> {
        if data_dirs.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one data directory is required".to_string(),
            ));
        }
        Ok(Self { data_dirs })
    }

    /// File name of segment `id`
    pub fn segment_file_name(id: u64) -> String {
        format!("wal-{:016x}.log", id)
    }

    /// Parse a segment id from a file name
    pub fn parse_segment_id(name: &str) -> Option<u64> {
        let hex = name.strip_prefix("wal-")?.strip_suffix(".log")?;
        u64::from_str_radix(hex, 16).ok()
    }

    /// The data directories, in configured order
    pub fn data_dirs(&self) -> &[PathBuf] {
        &self.data_dirs
    }

    /// Directory a new segment with this id is created in
    pub fn dir_for(&self, id: u64) -> &Path {
        let index = (id % self.data_dirs.len() as u64) as usize;
        &self.data_dirs[index]
    }

    /// Path a new segment with this id is created at
    pub fn path_for(&self, id: u64) -> PathBuf {
        self.dir_for(id).join(Self::segment_file_name(id))
    }

    /// Find the existing file of segment `id`.
    ///
    /// Looks at the preferred directory first, then the others, so a
    /// directory list that was reordered between runs still resolves.
    pub fn locate(&self, id: u64) -> Option<PathBuf> {
        let preferred = self.path_for(id);
        if preferred.exists() {
            return Some(preferred);
        }
        let name = Self::segment_file_name(id);
        self.data_dirs
            .iter()
            .map(|dir| dir.join(&name))
            .find(|path| path.exists())
    }

    /// Create any missing data directory
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in &self.data_dirs {
            fs::create_dir_all(dir).map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create data directory {:?}: {}", dir, e),
                ))
            })?;
        }
        Ok(())
    }

    /// List all segment files, ordered by id.
    ///
    /// The same id in two directories is reported as corruption.
    pub fn list_segments(&self) -> Result<Vec<SegmentInfo>> {
        let mut found: BTreeMap<u64, SegmentInfo> = BTreeMap::new();

        for dir in &self.data_dirs {
            if !dir.exists() {
                continue;
            }
            for entry in fs::read_dir(dir)?.filter_map(|entry| entry.ok()) {
                let Some(info) = Self::parse_segment_info(&entry.path()) else {
                    continue;
                };
                if let Some(existing) = found.get(&info.id) {
                    return Err(Error::Corruption(format!(
                        "Segment {} exists in both {:?} and {:?}",
                        info.id, existing.path, info.path
                    )));
                }
                found.insert(info.id, info);
            }
        }

        Ok(found.into_values().collect())
    }

    fn parse_segment_info(path: &Path) -> Option<SegmentInfo> {
        let name = path.file_name()?.to_str()?;
        let id = Self::parse_segment_id(name)?;
        let metadata = fs::metadata(path).ok()?;
        if !metadata.is_file() {
            return None;
        }

        Some(SegmentInfo {
            path: path.to_path_buf(),
            id,
            size: metadata.len(),
        })
    }

    /// Highest existing segment id, or 0 when there are none
    pub fn max_segment_id(&self) -> Result<u64> {
        Ok(self.list_segments()?.last().map(|s| s.id).unwrap_or(0))
    }

    /// Get the total size of all segments
    pub fn total_size(&self) -> Result<u64> {
        Ok(self.list_segments()?.iter().map(|s| s.size).sum())
    }

    /// Get the number of segment files
    pub fn segment_count(&self) -> Result<usize> {
        Ok(self.list_segments()?.len())
    }

    /// Delete one segment file. Returns false if it did not exist.
    pub fn remove_segment(&self, id: u64) -> Result<bool> {
        let Some(path) = self.locate(id) else {
            return Ok(false);
        };
        fs::remove_file(&path).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to delete segment {:?}: {}", path, e),
            ))
        })?;
        Ok(true)
    }

    /// Get the latest (highest id) segment
    pub fn latest_segment(&self) -> Result<Option<SegmentInfo>> {
        Ok(self.list_segments()?.into_iter().last())
    }

    /// Get the oldest (lowest id) segment
    pub fn oldest_segment(&self) -> Result<Option<SegmentInfo>> {
        Ok(self.list_segments()?.into_iter().next())
    }
}
