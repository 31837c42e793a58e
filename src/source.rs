use crate::config::SOURCE_BUFFER_SIZE;
use crate::error::MigrationError;
use crate::models::Collection;
use anyhow::{Context, Result};
use bzip2::read::BzDecoder;
use bzip2::write::BzEncoder;
use bzip2::Compression;
use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// Read-only, whole-collection access to the document store.
pub trait SourceStore {
    /// Returns every document of `collection` in store enumeration order.
    fn find_all(&self, collection: Collection) -> Result<Vec<Value>>;
}

/// A directory of JSON-lines exports, one file per collection
/// (`authors.jsonl`, ... or their `.jsonl.bz2` compressed form).
pub struct JsonlSourceStore {
    dir: PathBuf,
}

impl JsonlSourceStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            anyhow::bail!("Source directory does not exist: {}", dir.display());
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn plain_path(dir: &Path, collection: Collection) -> PathBuf {
        dir.join(format!("{}.jsonl", collection.name()))
    }

    pub fn compressed_path(dir: &Path, collection: Collection) -> PathBuf {
        dir.join(format!("{}.jsonl.bz2", collection.name()))
    }

    /// Writes `docs` as the export of `collection`, replacing any previous
    /// export (plain or compressed).
    pub fn write_collection<T: Serialize>(
        dir: &Path,
        collection: Collection,
        docs: &[T],
        compress: bool,
    ) -> Result<PathBuf> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create source directory: {}", dir.display()))?;

        let plain = Self::plain_path(dir, collection);
        let compressed = Self::compressed_path(dir, collection);
        for stale in [&plain, &compressed] {
            if stale.exists() {
                fs::remove_file(stale)
                    .with_context(|| format!("Failed to remove {}", stale.display()))?;
            }
        }

        let path = if compress { compressed } else { plain };
        let file = File::create(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;

        if compress {
            let mut encoder = BzEncoder::new(BufWriter::new(file), Compression::best());
            write_lines(&mut encoder, docs)?;
            encoder
                .finish()
                .with_context(|| format!("Failed to finish {}", path.display()))?
                .flush()?;
        } else {
            let mut writer = BufWriter::new(file);
            write_lines(&mut writer, docs)?;
            writer.flush()?;
        }

        debug!(collection = %collection, documents = docs.len(), path = %path.display(), "Wrote collection");
        Ok(path)
    }

    fn open_collection(&self, collection: Collection) -> Result<Option<Box<dyn BufRead>>> {
        let compressed = Self::compressed_path(&self.dir, collection);
        if compressed.exists() {
            let file = File::open(&compressed)
                .with_context(|| format!("Failed to open {}", compressed.display()))?;
            let decoder: Box<dyn Read> = Box::new(BzDecoder::new(file));
            let reader: Box<dyn BufRead> =
                Box::new(BufReader::with_capacity(SOURCE_BUFFER_SIZE, decoder));
            return Ok(Some(reader));
        }

        let plain = Self::plain_path(&self.dir, collection);
        if plain.exists() {
            let file =
                File::open(&plain).with_context(|| format!("Failed to open {}", plain.display()))?;
            let reader: Box<dyn BufRead> =
                Box::new(BufReader::with_capacity(SOURCE_BUFFER_SIZE, file));
            return Ok(Some(reader));
        }

        Ok(None)
    }
}

fn write_lines<W: Write, T: Serialize>(writer: &mut W, docs: &[T]) -> Result<()> {
    for doc in docs {
        serde_json::to_writer(&mut *writer, doc).context("Failed to serialize document")?;
        writer.write_all(b"\n")?;
    }
    Ok(())
}

impl SourceStore for JsonlSourceStore {
    fn find_all(&self, collection: Collection) -> Result<Vec<Value>> {
        let Some(reader) = self.open_collection(collection)? else {
            info!(collection = %collection, "Collection export not found, treating as empty");
            return Ok(Vec::new());
        };

        let mut docs = Vec::new();
        for (line_num, line) in reader.lines().enumerate() {
            let line = line.with_context(|| {
                format!("Failed to read {collection} export at line {}", line_num + 1)
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let doc = serde_json::from_str(&line).map_err(|source| {
                MigrationError::MalformedDocument {
                    collection,
                    position: line_num + 1,
                    source,
                }
            })?;
            docs.push(doc);
        }

        debug!(collection = %collection, documents = docs.len(), "Scanned collection");
        Ok(docs)
    }
}

/// In-memory document store.
#[derive(Default)]
pub struct MemorySourceStore {
    collections: FxHashMap<Collection, Vec<Value>>,
    queries: AtomicUsize,
}

impl MemorySourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Serialize>(&mut self, collection: Collection, doc: &T) -> Result<()> {
        let value = serde_json::to_value(doc)
            .with_context(|| format!("Failed to serialize {collection} document"))?;
        self.collections.entry(collection).or_default().push(value);
        Ok(())
    }

    pub fn insert_raw(&mut self, collection: Collection, doc: Value) {
        self.collections.entry(collection).or_default().push(doc);
    }

    pub fn drop_collection(&mut self, collection: Collection) {
        self.collections.remove(&collection);
    }

    /// Number of `find_all` calls served so far.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }
}

impl SourceStore for MemorySourceStore {
    fn find_all(&self, collection: Collection) -> Result<Vec<Value>> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .collections
            .get(&collection)
            .cloned()
            .unwrap_or_default())
    }
}
