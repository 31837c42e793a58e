use crate::error::MigrationError;
use crate::models::Collection;
use crate::source::SourceStore;
use anyhow::Result;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::iter::{self, Fuse};
use std::marker::PhantomData;
use tracing::debug;

type Documents<'s> = Fuse<Box<dyn Iterator<Item = Result<Value>> + 's>>;

/// Documents of one collection; the query runs on the first `next`.
fn open_scan<'s>(source: &'s dyn SourceStore, collection: Collection) -> Documents<'s> {
    let scan = iter::once_with(move || source.find_all(collection)).flat_map(move |found| {
        let (docs, error) = match found {
            Ok(docs) => {
                debug!(%collection, documents = docs.len(), "Reader opened scan");
                (docs, None)
            }
            Err(e) => (Vec::new(), Some(e)),
        };
        error.map(Err).into_iter().chain(docs.into_iter().map(Ok))
    });
    let scan: Box<dyn Iterator<Item = Result<Value>> + 's> = Box::new(scan);
    scan.fuse()
}

/// Single-pass enumerator over one source collection.
///
/// The collection is queried in full on the first read; documents are
/// decoded one at a time as they are handed out. Once exhausted the reader
/// stays exhausted until [`StageReader::reset`], which makes the next read
/// start a fresh full scan.
pub struct StageReader<'s, T> {
    source: &'s dyn SourceStore,
    collection: Collection,
    docs: Documents<'s>,
    position: usize,
    _record: PhantomData<fn() -> T>,
}

impl<'s, T: DeserializeOwned> StageReader<'s, T> {
    pub fn new(source: &'s dyn SourceStore, collection: Collection) -> Self {
        Self {
            source,
            collection,
            docs: open_scan(source, collection),
            position: 0,
            _record: PhantomData,
        }
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    /// Next record, or `None` once the scan is exhausted.
    pub fn read(&mut self) -> Result<Option<T>> {
        self.next().transpose()
    }

    /// Up to `size` records; an empty chunk means the scan is exhausted.
    pub fn read_chunk(&mut self, size: usize) -> Result<Vec<T>> {
        self.by_ref().take(size).collect()
    }

    /// Drops the current scan; the next read re-queries the collection.
    pub fn reset(&mut self) {
        self.docs = open_scan(self.source, self.collection);
        self.position = 0;
    }
}

impl<T: DeserializeOwned> Iterator for StageReader<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Result<T>> {
        let doc = match self.docs.next()? {
            Ok(doc) => doc,
            Err(e) => return Some(Err(e)),
        };
        self.position += 1;
        let record: Result<T> = serde_json::from_value(doc).map_err(|source| {
            MigrationError::MalformedDocument {
                collection: self.collection,
                position: self.position,
                source,
            }
            .into()
        });
        Some(record)
    }
}
