//! Append-only log of committed change sets.
//!
//! One JSON line per commit. A line is durable once `append` returns; a
//! trailing line without its newline is a torn write and is dropped on open.

use crate::config::JOURNAL_FILE;
use crate::target::ChangeSet;
use anyhow::{bail, Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub fn journal_path(dir: &Path) -> PathBuf {
    dir.join(JOURNAL_FILE)
}

#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    entries: usize,
    rows: usize,
}

impl Journal {
    /// Opens the journal in `dir` and returns the change sets it holds,
    /// oldest first.
    pub fn open(dir: &Path) -> Result<(Self, Vec<ChangeSet>)> {
        let path = journal_path(dir);
        let mut journal = Self {
            path,
            entries: 0,
            rows: 0,
        };
        if !journal.path.exists() {
            return Ok((journal, Vec::new()));
        }

        let bytes = fs::read(&journal.path)
            .with_context(|| format!("Failed to read journal: {}", journal.path.display()))?;
        let complete = bytes.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);

        let mut changes = Vec::new();
        for (line_no, line) in bytes[..complete].split(|&b| b == b'\n').enumerate() {
            if line.is_empty() {
                continue;
            }
            let change: ChangeSet = match serde_json::from_slice(line) {
                Ok(c) => c,
                Err(e) => bail!(
                    "Corrupt journal entry at line {} of {}: {}",
                    line_no + 1,
                    journal.path.display(),
                    e
                ),
            };
            journal.rows += change.rows();
            changes.push(change);
        }
        journal.entries = changes.len();

        if complete < bytes.len() {
            warn!(
                path = %journal.path.display(),
                bytes = bytes.len() - complete,
                "Dropping torn journal entry"
            );
            let file = OpenOptions::new()
                .write(true)
                .open(&journal.path)
                .with_context(|| format!("Failed to open journal: {}", journal.path.display()))?;
            file.set_len(complete as u64)
                .context("Failed to truncate torn journal entry")?;
            file.sync_all().context("Failed to sync journal")?;
        }

        Ok((journal, changes))
    }

    /// Appends one change set and syncs it to disk. On failure the file is
    /// cut back to its previous length.
    pub fn append(&mut self, changes: &ChangeSet) -> Result<()> {
        let mut line = serde_json::to_vec(changes).context("Failed to encode journal entry")?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open journal: {}", self.path.display()))?;
        let start = file
            .metadata()
            .with_context(|| format!("Failed to stat journal: {}", self.path.display()))?
            .len();

        if let Err(e) = write_synced(&mut file, &line) {
            if let Err(cut) = file.set_len(start) {
                warn!(error = %cut, path = %self.path.display(), "Failed to cut back journal");
            }
            return Err(e)
                .with_context(|| format!("Failed to append to journal: {}", self.path.display()));
        }

        self.entries += 1;
        self.rows += changes.rows();
        debug!(entries = self.entries, rows = self.rows, "Journal entry appended");
        Ok(())
    }

    /// Removes the journal file once its changes live in the table files.
    pub fn clear(&mut self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("Failed to remove journal: {}", self.path.display()))?;
        }
        self.entries = 0;
        self.rows = 0;
        Ok(())
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Rows across every entry.
    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_synced(file: &mut File, bytes: &[u8]) -> std::io::Result<()> {
    file.write_all(bytes)?;
    file.sync_data()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TargetAuthor;
    use tempfile::TempDir;

    fn authors(ids: &[i64]) -> ChangeSet {
        ChangeSet {
            authors: ids
                .iter()
                .map(|&id| TargetAuthor {
                    id,
                    full_name: format!("Author {id}"),
                })
                .collect(),
            ..ChangeSet::default()
        }
    }

    #[test]
    fn missing_journal_opens_empty() {
        let dir = TempDir::new().unwrap();
        let (journal, changes) = Journal::open(dir.path()).unwrap();
        assert!(journal.is_empty());
        assert!(changes.is_empty());
        assert!(!journal.path().exists());
    }

    #[test]
    fn appended_entries_reload_in_order() {
        let dir = TempDir::new().unwrap();
        let (mut journal, _) = Journal::open(dir.path()).unwrap();
        journal.append(&authors(&[1, 2])).unwrap();
        journal.append(&authors(&[3])).unwrap();
        assert_eq!(journal.rows(), 3);

        let (reopened, changes) = Journal::open(dir.path()).unwrap();
        assert_eq!(reopened.entries(), 2);
        assert_eq!(reopened.rows(), 3);
        assert_eq!(changes, vec![authors(&[1, 2]), authors(&[3])]);
    }

    #[test]
    fn torn_trailing_entry_is_dropped() {
        let dir = TempDir::new().unwrap();
        let (mut journal, _) = Journal::open(dir.path()).unwrap();
        journal.append(&authors(&[1])).unwrap();
        let intact = fs::metadata(journal.path()).unwrap().len();

        let mut file = OpenOptions::new().append(true).open(journal.path()).unwrap();
        file.write_all(br#"{"authors":[{"id":2,"fu"#).unwrap();
        drop(file);

        let (reopened, changes) = Journal::open(dir.path()).unwrap();
        assert_eq!(changes, vec![authors(&[1])]);
        assert_eq!(reopened.entries(), 1);
        assert_eq!(fs::metadata(reopened.path()).unwrap().len(), intact);
    }

    #[test]
    fn corrupt_complete_entry_is_an_error() {
        let dir = TempDir::new().unwrap();
        fs::write(journal_path(dir.path()), b"not json\n").unwrap();
        let err = Journal::open(dir.path()).unwrap_err();
        assert!(err.to_string().contains("Corrupt journal entry at line 1"));
    }

    #[test]
    fn clear_removes_the_file() {
        let dir = TempDir::new().unwrap();
        let (mut journal, _) = Journal::open(dir.path()).unwrap();
        journal.append(&authors(&[1])).unwrap();
        journal.clear().unwrap();
        assert!(journal.is_empty());
        assert!(!journal_path(dir.path()).exists());
    }
}
