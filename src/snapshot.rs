use crate::config::SNAPSHOT_VERSION;
use crate::models::EntityKind;
use crate::pipeline::Stage;
use crate::registry::IdRegistry;
use anyhow::{Context, Result};
use bincode::Options;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct KindSnapshot {
    pub kind: EntityKind,
    pub next_id: i64,
    pub ids: FxHashMap<String, i64>,
}

/// Registry state plus the stages that completed against it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RegistrySnapshot {
    pub version: u32,
    pub kinds: Vec<KindSnapshot>,
    pub completed_stages: BTreeSet<Stage>,
}

impl RegistrySnapshot {
    pub fn capture(registry: &IdRegistry, completed_stages: &BTreeSet<Stage>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            kinds: EntityKind::ALL
                .iter()
                .map(|&kind| KindSnapshot {
                    kind,
                    next_id: registry.next_id(kind),
                    ids: registry.export(kind),
                })
                .collect(),
            completed_stages: completed_stages.clone(),
        }
    }

    /// Loads the mappings into `registry` (replacing what it held) and
    /// returns the completed stages.
    pub fn restore_into(self, registry: &IdRegistry) -> BTreeSet<Stage> {
        registry.clear();
        for kind in self.kinds {
            registry.restore(kind.kind, kind.ids, kind.next_id);
        }
        self.completed_stages
    }

    pub fn mappings(&self, kind: EntityKind) -> usize {
        self.kinds
            .iter()
            .find(|k| k.kind == kind)
            .map_or(0, |k| k.ids.len())
    }
}

/// Returns `Ok(Some(snapshot))` if the file is present and readable,
/// `Ok(None)` if it is missing, corrupt or from another format version.
pub fn load_if_valid(path: &Path) -> Result<Option<RegistrySnapshot>> {
    if !path.exists() {
        return Ok(None);
    }

    let file_size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let file = File::open(path)
        .with_context(|| format!("Failed to open registry snapshot: {}", path.display()))?;
    let reader = BufReader::new(file);

    let options = bincode::options().with_limit(file_size.saturating_add(1024));

    let snapshot: RegistrySnapshot = match options.deserialize_from(reader) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, path = %path.display(), "Registry snapshot is corrupt or unreadable");
            return Ok(None);
        }
    };

    if snapshot.version != SNAPSHOT_VERSION {
        info!(
            cached = snapshot.version,
            current = SNAPSHOT_VERSION,
            "Registry snapshot version mismatch"
        );
        return Ok(None);
    }

    info!(
        authors = snapshot.mappings(EntityKind::Author),
        genres = snapshot.mappings(EntityKind::Genre),
        books = snapshot.mappings(EntityKind::Book),
        stages = snapshot.completed_stages.len(),
        "Loaded registry snapshot"
    );

    Ok(Some(snapshot))
}

/// Writes the snapshot to a temp file and renames it into place.
pub fn save(path: &Path, snapshot: &RegistrySnapshot) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    let tmp_path = path.with_extension("snapshot.tmp");
    let file = File::create(&tmp_path)
        .with_context(|| format!("Failed to create temp snapshot file: {:?}", tmp_path))?;
    let writer = BufWriter::new(file);

    bincode::options()
        .serialize_into(writer, snapshot)
        .context("Failed to serialize registry snapshot")?;

    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to rename temp snapshot: {:?}", path))?;

    debug!(path = %path.display(), "Registry snapshot saved");
    Ok(())
}

pub fn clear(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path)
            .with_context(|| format!("Failed to remove registry snapshot: {:?}", path))?;
        info!("Registry snapshot cleared");
    }
    Ok(())
}
