use crate::transform::UnresolvedPolicy;
use std::path::PathBuf;

/// Records per chunk (one transaction per chunk)
pub const DEFAULT_CHUNK_SIZE: usize = 10;

/// Registry snapshot format version (bump when `RegistrySnapshot` changes)
pub const SNAPSHOT_VERSION: u32 = 1;

/// Default snapshot file name inside the target directory
pub const SNAPSHOT_FILE: &str = "registry.snapshot";

/// Commit journal file name inside the target directory
pub const JOURNAL_FILE: &str = "commits.journal";

/// Journal rows below which a commit never triggers compaction
pub const JOURNAL_COMPACT_MIN_ROWS: usize = 10_000;

/// Buffer size for reading source collection files
pub const SOURCE_BUFFER_SIZE: usize = 128 * 1024;

#[derive(Debug, Clone)]
pub struct MigrationConfig {
    pub chunk_size: usize,
    pub unresolved_policy: UnresolvedPolicy,
    /// Skip comments whose (book, text) pair already exists in the target
    pub dedupe_comments: bool,
    pub snapshot_path: Option<PathBuf>,
    pub show_progress: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            unresolved_policy: UnresolvedPolicy::default(),
            dedupe_comments: false,
            snapshot_path: None,
            show_progress: false,
        }
    }
}
