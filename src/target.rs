use crate::config::JOURNAL_COMPACT_MIN_ROWS;
use crate::error::MigrationError;
use crate::journal::{journal_path, Journal};
use crate::models::{
    BookGenreRow, BookRow, CommentRow, Table, TargetAuthor, TargetBook, TargetComment,
    TargetGenre,
};
use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Write side of the relational store.
///
/// `save_*` and `exists` run inside a transaction opened with
/// [`TargetStore::begin`]; nothing is visible outside it until
/// [`TargetStore::commit`]. Foreign keys are checked against the
/// transaction's view: a book's author and genres, and a comment's book,
/// must already be present.
pub trait TargetStore {
    fn begin(&mut self) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self);

    fn exists(&self, table: Table, id: i64) -> Result<bool>;

    /// Insert or update by id.
    fn save_author(&mut self, author: &TargetAuthor) -> Result<TargetAuthor>;
    fn save_genre(&mut self, genre: &TargetGenre) -> Result<TargetGenre>;
    /// Insert or update by id; replaces the book's genre links.
    fn save_book(&mut self, book: &TargetBook) -> Result<TargetBook>;
    /// Inserts with a store-assigned id when `comment.id` is `None`.
    fn save_comment(&mut self, comment: &TargetComment) -> Result<TargetComment>;

    /// Id of a comment with the given natural key, if any.
    fn find_comment(&self, book_id: Option<i64>, text: &str) -> Result<Option<i64>>;

    /// Committed rows.
    fn count(&self, table: Table) -> Result<usize>;

    /// Brings long-term storage up to date with every committed change.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A book row with its complete set of genre links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookChange {
    pub row: BookRow,
    pub genre_ids: Vec<i64>,
}

/// Rows written by one transaction. Every entry is an upsert by id, so
/// applying a change set twice leaves the tables as applying it once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<TargetAuthor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub genres: Vec<TargetGenre>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub books: Vec<BookChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<CommentRow>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.authors.is_empty()
            && self.genres.is_empty()
            && self.books.is_empty()
            && self.comments.is_empty()
    }

    /// Table rows touched, genre links included.
    pub fn rows(&self) -> usize {
        self.authors.len()
            + self.genres.len()
            + self.books.iter().map(|b| 1 + b.genre_ids.len()).sum::<usize>()
            + self.comments.len()
    }
}

/// Rows of every table, ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSet {
    pub authors: BTreeMap<i64, TargetAuthor>,
    pub genres: BTreeMap<i64, TargetGenre>,
    pub books: BTreeMap<i64, BookRow>,
    pub book_genres: BTreeSet<BookGenreRow>,
    pub comments: BTreeMap<i64, CommentRow>,
    /// Lowest comment id per (book, text).
    comment_keys: FxHashMap<(Option<i64>, String), i64>,
}

fn links_of(book_id: i64) -> RangeInclusive<BookGenreRow> {
    BookGenreRow {
        book_id,
        genre_id: i64::MIN,
    }..=BookGenreRow {
        book_id,
        genre_id: i64::MAX,
    }
}

impl TableSet {
    pub fn count(&self, table: Table) -> usize {
        match table {
            Table::Authors => self.authors.len(),
            Table::Genres => self.genres.len(),
            Table::Books => self.books.len(),
            Table::BookGenres => self.book_genres.len(),
            Table::Comments => self.comments.len(),
        }
    }

    /// Rows across every table.
    pub fn rows(&self) -> usize {
        Table::ALL.iter().map(|&table| self.count(table)).sum()
    }

    pub fn contains(&self, table: Table, id: i64) -> bool {
        match table {
            Table::Authors => self.authors.contains_key(&id),
            Table::Genres => self.genres.contains_key(&id),
            Table::Books => self.books.contains_key(&id),
            Table::BookGenres => self.book_genres.range(links_of(id)).next().is_some(),
            Table::Comments => self.comments.contains_key(&id),
        }
    }

    /// Genre ids linked to `book_id`, ascending.
    pub fn genres_of(&self, book_id: i64) -> Vec<i64> {
        self.book_genres
            .range(links_of(book_id))
            .map(|link| link.genre_id)
            .collect()
    }

    pub fn find_comment(&self, book_id: Option<i64>, text: &str) -> Option<i64> {
        self.comment_keys.get(&(book_id, text.to_string())).copied()
    }

    pub fn last_comment_id(&self) -> Option<i64> {
        self.comments.last_key_value().map(|(&id, _)| id)
    }

    pub fn upsert_author(&mut self, author: TargetAuthor) {
        self.authors.insert(author.id, author);
    }

    pub fn upsert_genre(&mut self, genre: TargetGenre) {
        self.genres.insert(genre.id, genre);
    }

    pub fn upsert_book(&mut self, row: BookRow, genre_ids: &[i64]) {
        let book_id = row.id;
        let stale: Vec<BookGenreRow> = self.book_genres.range(links_of(book_id)).copied().collect();
        for link in stale {
            self.book_genres.remove(&link);
        }
        self.book_genres
            .extend(genre_ids.iter().map(|&genre_id| BookGenreRow { book_id, genre_id }));
        self.books.insert(book_id, row);
    }

    pub fn upsert_comment(&mut self, row: CommentRow) {
        let id = row.id;
        let key = (row.book_id, row.text.clone());
        if let Some(old) = self.comments.insert(id, row) {
            let old_key = (old.book_id, old.text);
            if old_key != key && self.comment_keys.get(&old_key) == Some(&id) {
                self.comment_keys.remove(&old_key);
            }
        }
        self.comment_keys
            .entry(key)
            .and_modify(|first| *first = (*first).min(id))
            .or_insert(id);
    }

    pub fn apply(&mut self, changes: &ChangeSet) {
        for author in &changes.authors {
            self.upsert_author(author.clone());
        }
        for genre in &changes.genres {
            self.upsert_genre(genre.clone());
        }
        for book in &changes.books {
            self.upsert_book(book.row.clone(), &book.genre_ids);
        }
        for comment in &changes.comments {
            self.upsert_comment(comment.clone());
        }
    }

    /// Every row held, as one change set.
    pub fn changes(&self) -> ChangeSet {
        ChangeSet {
            authors: self.authors.values().cloned().collect(),
            genres: self.genres.values().cloned().collect(),
            books: self
                .books
                .values()
                .map(|row| BookChange {
                    row: row.clone(),
                    genre_ids: self.genres_of(row.id),
                })
                .collect(),
            comments: self.comments.values().cloned().collect(),
        }
    }

    fn reindex_comments(&mut self) {
        self.comment_keys.clear();
        for row in self.comments.values() {
            self.comment_keys
                .entry((row.book_id, row.text.clone()))
                .or_insert(row.id);
        }
    }
}

/// In-memory relational store. A transaction holds only the rows it wrote;
/// reads see those over the committed tables.
#[derive(Debug, Default)]
pub struct MemoryTargetStore {
    committed: TableSet,
    pending: Option<TableSet>,
    commits: usize,
}

impl MemoryTargetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tables(mut tables: TableSet) -> Self {
        tables.reindex_comments();
        Self {
            committed: tables,
            ..Self::default()
        }
    }

    /// Committed state.
    pub fn tables(&self) -> &TableSet {
        &self.committed
    }

    pub fn commits(&self) -> usize {
        self.commits
    }

    pub fn in_transaction(&self) -> bool {
        self.pending.is_some()
    }

    /// Rows written by the open transaction.
    pub fn pending_changes(&self) -> Result<ChangeSet> {
        Ok(self.pending()?.changes())
    }

    fn pending(&self) -> Result<&TableSet> {
        self.pending
            .as_ref()
            .ok_or_else(|| MigrationError::NoTransaction.into())
    }

    fn pending_mut(&mut self) -> Result<&mut TableSet> {
        self.pending
            .as_mut()
            .ok_or_else(|| MigrationError::NoTransaction.into())
    }

    fn visible(&self, table: Table, id: i64) -> Result<bool> {
        let pending = self.pending()?;
        Ok(match table {
            // a book saved in this transaction replaced its links
            Table::BookGenres if pending.books.contains_key(&id) => {
                pending.contains(table, id)
            }
            _ => pending.contains(table, id) || self.committed.contains(table, id),
        })
    }

    fn require(&self, table: Table, id: i64, referenced: Table, referenced_id: i64) -> Result<()> {
        if self.visible(referenced, referenced_id)? {
            Ok(())
        } else {
            Err(MigrationError::ForeignKeyViolation {
                table,
                id,
                referenced,
                referenced_id,
            }
            .into())
        }
    }

    fn next_comment_id(&self) -> Result<i64> {
        let last = self
            .committed
            .last_comment_id()
            .max(self.pending()?.last_comment_id());
        Ok(last.map_or(1, |id| id + 1))
    }
}

impl TargetStore for MemoryTargetStore {
    fn begin(&mut self) -> Result<()> {
        if self.pending.is_some() {
            return Err(MigrationError::TransactionOpen.into());
        }
        self.pending = Some(TableSet::default());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let pending = self.pending.take().ok_or(MigrationError::NoTransaction)?;
        self.committed.apply(&pending.changes());
        self.commits += 1;
        Ok(())
    }

    fn rollback(&mut self) {
        if self.pending.take().is_some() {
            debug!("Transaction rolled back");
        }
    }

    fn exists(&self, table: Table, id: i64) -> Result<bool> {
        self.visible(table, id)
    }

    fn save_author(&mut self, author: &TargetAuthor) -> Result<TargetAuthor> {
        self.pending_mut()?.upsert_author(author.clone());
        Ok(author.clone())
    }

    fn save_genre(&mut self, genre: &TargetGenre) -> Result<TargetGenre> {
        self.pending_mut()?.upsert_genre(genre.clone());
        Ok(genre.clone())
    }

    fn save_book(&mut self, book: &TargetBook) -> Result<TargetBook> {
        if let Some(author) = &book.author {
            self.require(Table::Books, book.id, Table::Authors, author.id)?;
        }
        for genre in &book.genres {
            self.require(Table::BookGenres, book.id, Table::Genres, genre.id)?;
        }

        let genre_ids: Vec<i64> = book.genres.iter().map(|g| g.id).collect();
        self.pending_mut()?.upsert_book(
            BookRow {
                id: book.id,
                title: book.title.clone(),
                author_id: book.author.as_ref().map(|a| a.id),
            },
            &genre_ids,
        );
        Ok(book.clone())
    }

    fn save_comment(&mut self, comment: &TargetComment) -> Result<TargetComment> {
        let id = match comment.id {
            Some(id) => id,
            None => self.next_comment_id()?,
        };
        if let Some(book) = comment.book {
            self.require(Table::Comments, id, Table::Books, book.id)?;
        }

        self.pending_mut()?.upsert_comment(CommentRow {
            id,
            text: comment.text.clone(),
            book_id: comment.book.map(|b| b.id),
        });
        Ok(TargetComment {
            id: Some(id),
            text: comment.text.clone(),
            book: comment.book,
        })
    }

    fn find_comment(&self, book_id: Option<i64>, text: &str) -> Result<Option<i64>> {
        let pending = self.pending()?;
        Ok(self
            .committed
            .find_comment(book_id, text)
            .or_else(|| pending.find_comment(book_id, text)))
    }

    fn count(&self, table: Table) -> Result<usize> {
        Ok(self.committed.count(table))
    }
}

/// Relational store kept as one CSV file per table plus a commit journal.
///
/// A commit appends its change set to the journal and syncs it; the table
/// files are rewritten only on [`TargetStore::flush`] or when the journal
/// outgrows the tables. Opening loads the tables and replays the journal,
/// so a commit is all-or-nothing across tables.
pub struct CsvTargetStore {
    dir: PathBuf,
    inner: MemoryTargetStore,
    journal: Journal,
    compact_floor: usize,
}

impl CsvTargetStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create target directory: {}", dir.display()))?;

        let mut tables = read_tables(dir)?;
        let (journal, replay) = Journal::open(dir)?;
        for changes in &replay {
            tables.apply(changes);
        }

        info!(
            dir = %dir.display(),
            authors = tables.authors.len(),
            genres = tables.genres.len(),
            books = tables.books.len(),
            comments = tables.comments.len(),
            replayed = replay.len(),
            "Opened target tables"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            inner: MemoryTargetStore::from_tables(tables),
            journal,
            compact_floor: JOURNAL_COMPACT_MIN_ROWS,
        })
    }

    /// Journal rows below which a commit never rewrites the tables.
    pub fn with_compact_floor(mut self, rows: usize) -> Self {
        self.compact_floor = rows;
        self
    }

    /// Removes every table file and the journal under `dir`.
    pub fn clean(dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        let mut paths = vec![journal_path(dir)];
        for table in Table::ALL {
            let path = table_path(dir, table);
            paths.push(temp_path(&path));
            paths.push(path);
        }
        for path in paths {
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
        }
        Ok(())
    }

    pub fn tables(&self) -> &TableSet {
        self.inner.tables()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Rewrites every table from committed state and empties the journal.
    ///
    /// All tables are staged as temp files before any is renamed into
    /// place. The journal is cleared last, so an interruption at any point
    /// is recovered by replay on the next open.
    pub fn compact(&mut self) -> Result<()> {
        if self.journal.is_empty() {
            return Ok(());
        }
        let entries = self.journal.entries();
        write_tables(&self.dir, self.inner.tables())?;
        self.journal.clear()?;
        info!(dir = %self.dir.display(), entries, "Journal compacted into tables");
        Ok(())
    }

    fn journal_outgrew_tables(&self) -> bool {
        self.journal.rows() >= self.compact_floor.max(self.inner.tables().rows())
    }
}

impl TargetStore for CsvTargetStore {
    fn begin(&mut self) -> Result<()> {
        self.inner.begin()
    }

    fn commit(&mut self) -> Result<()> {
        let changes = self.inner.pending_changes()?;
        if !changes.is_empty() {
            self.journal.append(&changes)?;
        }
        self.inner.commit()?;

        if self.journal_outgrew_tables() {
            if let Err(e) = self.compact() {
                warn!(error = %format!("{e:#}"), "Compaction failed; changes remain in the journal");
            }
        }
        Ok(())
    }

    fn rollback(&mut self) {
        self.inner.rollback();
    }

    fn exists(&self, table: Table, id: i64) -> Result<bool> {
        self.inner.exists(table, id)
    }

    fn save_author(&mut self, author: &TargetAuthor) -> Result<TargetAuthor> {
        self.inner.save_author(author)
    }

    fn save_genre(&mut self, genre: &TargetGenre) -> Result<TargetGenre> {
        self.inner.save_genre(genre)
    }

    fn save_book(&mut self, book: &TargetBook) -> Result<TargetBook> {
        self.inner.save_book(book)
    }

    fn save_comment(&mut self, comment: &TargetComment) -> Result<TargetComment> {
        self.inner.save_comment(comment)
    }

    fn find_comment(&self, book_id: Option<i64>, text: &str) -> Result<Option<i64>> {
        self.inner.find_comment(book_id, text)
    }

    fn count(&self, table: Table) -> Result<usize> {
        self.inner.count(table)
    }

    fn flush(&mut self) -> Result<()> {
        self.compact()
    }
}

pub fn table_path(dir: &Path, table: Table) -> PathBuf {
    dir.join(format!("{}.csv", table.name()))
}

fn temp_path(path: &Path) -> PathBuf {
    path.with_extension("csv.tmp")
}

fn read_table<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open table: {}", path.display()))?;
    let mut rows = Vec::new();
    for row in reader.deserialize() {
        rows.push(row.with_context(|| format!("Failed to parse row in {}", path.display()))?);
    }
    Ok(rows)
}

fn read_tables(dir: &Path) -> Result<TableSet> {
    let mut tables = TableSet::default();
    for author in read_table::<TargetAuthor>(&table_path(dir, Table::Authors))? {
        tables.upsert_author(author);
    }
    for genre in read_table::<TargetGenre>(&table_path(dir, Table::Genres))? {
        tables.upsert_genre(genre);
    }
    for book in read_table::<BookRow>(&table_path(dir, Table::Books))? {
        tables.books.insert(book.id, book);
    }
    tables
        .book_genres
        .extend(read_table::<BookGenreRow>(&table_path(dir, Table::BookGenres))?);
    for comment in read_table::<CommentRow>(&table_path(dir, Table::Comments))? {
        tables.upsert_comment(comment);
    }
    Ok(tables)
}

/// Writes `rows` to the temp file beside `path` and syncs it.
fn stage_table<'a, T, I>(path: &Path, rows: I) -> Result<PathBuf>
where
    T: Serialize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let tmp_path = temp_path(path);
    let file = File::create(&tmp_path)
        .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
    let mut written = 0usize;
    {
        let mut writer = csv::Writer::from_writer(&file);
        for row in rows {
            writer
                .serialize(row)
                .with_context(|| format!("Failed to write row to {}", tmp_path.display()))?;
            written += 1;
        }
        writer
            .flush()
            .with_context(|| format!("Failed to flush {}", tmp_path.display()))?;
    }
    file.sync_all()
        .with_context(|| format!("Failed to sync {}", tmp_path.display()))?;
    debug!(path = %path.display(), rows = written, "Table staged");
    Ok(tmp_path)
}

fn stage_tables(dir: &Path, tables: &TableSet) -> Result<Vec<(PathBuf, PathBuf)>> {
    let mut staged = Vec::with_capacity(Table::ALL.len());
    for table in Table::ALL {
        let path = table_path(dir, table);
        let result = match table {
            Table::Authors => stage_table(&path, tables.authors.values()),
            Table::Genres => stage_table(&path, tables.genres.values()),
            Table::Books => stage_table(&path, tables.books.values()),
            Table::BookGenres => stage_table(&path, tables.book_genres.iter()),
            Table::Comments => stage_table(&path, tables.comments.values()),
        };
        match result {
            Ok(tmp_path) => staged.push((tmp_path, path)),
            Err(e) => {
                remove_temps(&staged);
                let _ = fs::remove_file(temp_path(&path));
                return Err(e);
            }
        }
    }
    Ok(staged)
}

fn write_tables(dir: &Path, tables: &TableSet) -> Result<()> {
    let staged = stage_tables(dir, tables)?;
    for (i, (tmp_path, path)) in staged.iter().enumerate() {
        if let Err(e) = fs::rename(tmp_path, path) {
            remove_temps(&staged[i..]);
            return Err(e)
                .with_context(|| format!("Failed to rename temp table: {}", path.display()));
        }
    }
    Ok(())
}

fn remove_temps(staged: &[(PathBuf, PathBuf)]) {
    for (tmp_path, _) in staged {
        if let Err(e) = fs::remove_file(tmp_path) {
            warn!(error = %e, path = %tmp_path.display(), "Failed to remove temp table");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BookRef;
    use tempfile::TempDir;

    fn author(id: i64) -> TargetAuthor {
        TargetAuthor {
            id,
            full_name: format!("Author {id}"),
        }
    }

    fn genre(id: i64) -> TargetGenre {
        TargetGenre {
            id,
            name: format!("Genre {id}"),
        }
    }

    fn book(id: i64, author_id: Option<i64>, genre_ids: &[i64]) -> TargetBook {
        TargetBook {
            id,
            title: format!("Book {id}"),
            author: author_id.map(author),
            genres: genre_ids.iter().copied().map(genre).collect(),
        }
    }

    fn comment(text: &str, book_id: Option<i64>) -> TargetComment {
        TargetComment {
            id: None,
            text: text.to_string(),
            book: book_id.map(|id| BookRef { id }),
        }
    }

    fn commit_author_and_book(store: &mut CsvTargetStore) {
        store.begin().unwrap();
        store.save_author(&author(1)).unwrap();
        store.save_book(&book(1, Some(1), &[])).unwrap();
        store.commit().unwrap();
    }

    #[test]
    fn writes_require_a_transaction() {
        let mut store = MemoryTargetStore::new();
        let err = store.save_author(&author(1)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MigrationError>(),
            Some(MigrationError::NoTransaction)
        ));
        assert!(store.commit().is_err());
    }

    #[test]
    fn nested_begin_is_rejected() {
        let mut store = MemoryTargetStore::new();
        store.begin().unwrap();
        let err = store.begin().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MigrationError>(),
            Some(MigrationError::TransactionOpen)
        ));
    }

    #[test]
    fn commit_publishes_and_rollback_discards() {
        let mut store = MemoryTargetStore::new();
        store.begin().unwrap();
        store.save_author(&author(1)).unwrap();
        assert!(store.exists(Table::Authors, 1).unwrap());
        assert_eq!(store.tables().count(Table::Authors), 0);
        store.commit().unwrap();
        assert_eq!(store.tables().count(Table::Authors), 1);

        store.begin().unwrap();
        store.save_author(&author(2)).unwrap();
        store.rollback();
        assert!(!store.in_transaction());
        assert_eq!(store.count(Table::Authors).unwrap(), 1);
        assert_eq!(store.commits(), 1);
    }

    #[test]
    fn transaction_holds_only_its_own_rows() {
        let mut store = MemoryTargetStore::new();
        store.begin().unwrap();
        for id in 1..=3 {
            store.save_author(&author(id)).unwrap();
        }
        store.commit().unwrap();

        store.begin().unwrap();
        store.save_author(&author(4)).unwrap();
        assert!(store.exists(Table::Authors, 2).unwrap());
        let changes = store.pending_changes().unwrap();
        assert_eq!(changes.authors, vec![author(4)]);
        assert_eq!(changes.rows(), 1);
    }

    #[test]
    fn book_requires_author_and_genres() {
        let mut store = MemoryTargetStore::new();
        store.begin().unwrap();
        let err = store.save_book(&book(1, Some(7), &[])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MigrationError>(),
            Some(MigrationError::ForeignKeyViolation {
                referenced: Table::Authors,
                referenced_id: 7,
                ..
            })
        ));

        store.save_author(&author(7)).unwrap();
        assert!(store.save_book(&book(1, Some(7), &[3])).is_err());
        store.save_genre(&genre(3)).unwrap();
        store.save_book(&book(1, Some(7), &[3])).unwrap();
        store.commit().unwrap();
        assert_eq!(store.tables().genres_of(1), vec![3]);
    }

    #[test]
    fn foreign_keys_resolve_against_committed_rows() {
        let mut store = MemoryTargetStore::new();
        store.begin().unwrap();
        store.save_author(&author(1)).unwrap();
        store.save_genre(&genre(1)).unwrap();
        store.commit().unwrap();

        store.begin().unwrap();
        store.save_book(&book(1, Some(1), &[1])).unwrap();
        store.commit().unwrap();
        assert_eq!(store.tables().books[&1].author_id, Some(1));
    }

    #[test]
    fn saving_book_again_replaces_genre_links() {
        let mut store = MemoryTargetStore::new();
        store.begin().unwrap();
        for id in 1..=3 {
            store.save_genre(&genre(id)).unwrap();
        }
        store.save_book(&book(1, None, &[1, 2])).unwrap();
        store.save_book(&book(1, None, &[3])).unwrap();
        store.commit().unwrap();
        assert_eq!(store.tables().count(Table::Books), 1);
        assert_eq!(store.tables().genres_of(1), vec![3]);

        store.begin().unwrap();
        store.save_book(&book(1, None, &[2])).unwrap();
        store.commit().unwrap();
        assert_eq!(store.tables().genres_of(1), vec![2]);
        assert_eq!(store.tables().count(Table::BookGenres), 1);
    }

    #[test]
    fn comments_get_sequential_ids_and_need_their_book() {
        let mut store = MemoryTargetStore::new();
        store.begin().unwrap();
        assert!(store.save_comment(&comment("orphan ref", Some(1))).is_err());

        store.save_book(&book(1, None, &[])).unwrap();
        let first = store.save_comment(&comment("a", Some(1))).unwrap();
        let second = store.save_comment(&comment("b", None)).unwrap();
        assert_eq!(first.id, Some(1));
        assert_eq!(second.id, Some(2));
        assert_eq!(store.find_comment(Some(1), "a").unwrap(), Some(1));
        assert_eq!(store.find_comment(None, "a").unwrap(), None);
        store.commit().unwrap();

        store.begin().unwrap();
        let third = store.save_comment(&comment("a", Some(1))).unwrap();
        assert_eq!(third.id, Some(3));
        assert_eq!(store.find_comment(Some(1), "a").unwrap(), Some(1));
        assert_eq!(store.find_comment(None, "b").unwrap(), Some(2));
    }

    #[test]
    fn csv_store_persists_committed_tables() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = CsvTargetStore::open(dir.path()).unwrap();
            store.begin().unwrap();
            store.save_author(&author(1)).unwrap();
            store.save_genre(&genre(1)).unwrap();
            store.save_genre(&genre(2)).unwrap();
            store.save_book(&book(1, Some(1), &[1, 2])).unwrap();
            store.save_book(&book(2, None, &[])).unwrap();
            store.save_comment(&comment("with, comma", Some(1))).unwrap();
            store.save_comment(&comment("detached", None)).unwrap();
            store.commit().unwrap();
            store.flush().unwrap();
        }
        assert!(!journal_path(dir.path()).exists());

        let store = CsvTargetStore::open(dir.path()).unwrap();
        let tables = store.tables();
        assert_eq!(tables.count(Table::Authors), 1);
        assert_eq!(tables.count(Table::Genres), 2);
        assert_eq!(tables.books[&1].author_id, Some(1));
        assert_eq!(tables.books[&2].author_id, None);
        assert_eq!(tables.genres_of(1), vec![1, 2]);
        assert_eq!(tables.comments[&1].text, "with, comma");
        assert_eq!(tables.comments[&2].book_id, None);
        assert_eq!(tables.find_comment(Some(1), "with, comma"), Some(1));
    }

    #[test]
    fn commit_appends_to_journal_without_rewriting_tables() {
        let dir = TempDir::new().unwrap();
        let mut store = CsvTargetStore::open(dir.path()).unwrap();
        commit_author_and_book(&mut store);

        assert!(!table_path(dir.path(), Table::Authors).exists());
        assert!(!table_path(dir.path(), Table::Books).exists());
        assert_eq!(store.journal().entries(), 1);

        let reopened = CsvTargetStore::open(dir.path()).unwrap();
        assert_eq!(reopened.tables().count(Table::Authors), 1);
        assert_eq!(reopened.tables().books[&1].author_id, Some(1));
    }

    #[test]
    fn failed_journal_append_commits_nothing() {
        let dir = TempDir::new().unwrap();
        let mut store = CsvTargetStore::open(dir.path()).unwrap();
        fs::create_dir(journal_path(dir.path())).unwrap();

        store.begin().unwrap();
        store.save_author(&author(1)).unwrap();
        store.save_book(&book(1, Some(1), &[])).unwrap();
        assert!(store.commit().is_err());
        store.rollback();
        assert_eq!(store.tables().count(Table::Authors), 0);
        assert_eq!(store.tables().count(Table::Books), 0);

        fs::remove_dir(journal_path(dir.path())).unwrap();
        let reopened = CsvTargetStore::open(dir.path()).unwrap();
        assert_eq!(reopened.tables().rows(), 0);
    }

    #[test]
    fn interrupted_flush_is_recovered_from_the_journal() {
        let dir = TempDir::new().unwrap();
        let mut store = CsvTargetStore::open(dir.path()).unwrap();
        commit_author_and_book(&mut store);

        // books.csv cannot be replaced while a non-empty directory sits there
        let blocker = table_path(dir.path(), Table::Books);
        fs::create_dir(&blocker).unwrap();
        fs::write(blocker.join("keep"), b"x").unwrap();
        assert!(store.flush().is_err());
        assert!(table_path(dir.path(), Table::Authors).exists());
        assert!(journal_path(dir.path()).exists());
        assert!(!temp_path(&table_path(dir.path(), Table::Comments)).exists());
        drop(store);

        fs::remove_dir_all(&blocker).unwrap();
        let mut reopened = CsvTargetStore::open(dir.path()).unwrap();
        assert_eq!(reopened.tables().count(Table::Authors), 1);
        assert_eq!(reopened.tables().books[&1].author_id, Some(1));

        reopened.flush().unwrap();
        assert!(!journal_path(dir.path()).exists());
        let flushed = CsvTargetStore::open(dir.path()).unwrap();
        assert_eq!(flushed.tables().count(Table::Books), 1);
    }

    #[test]
    fn journal_is_compacted_once_it_outgrows_the_tables() {
        let dir = TempDir::new().unwrap();
        let mut store = CsvTargetStore::open(dir.path()).unwrap().with_compact_floor(0);
        store.begin().unwrap();
        store.save_genre(&genre(1)).unwrap();
        store.commit().unwrap();

        assert!(table_path(dir.path(), Table::Genres).exists());
        assert!(store.journal().is_empty());
        assert!(!journal_path(dir.path()).exists());
    }

    #[test]
    fn csv_store_rollback_leaves_files_untouched() {
        let dir = TempDir::new().unwrap();
        let mut store = CsvTargetStore::open(dir.path()).unwrap();
        store.begin().unwrap();
        store.save_author(&author(1)).unwrap();
        store.rollback();

        assert!(!table_path(dir.path(), Table::Authors).exists());
        assert!(!journal_path(dir.path()).exists());
        let reopened = CsvTargetStore::open(dir.path()).unwrap();
        assert_eq!(reopened.tables().count(Table::Authors), 0);
    }

    #[test]
    fn clean_removes_tables_and_journal() {
        let dir = TempDir::new().unwrap();
        let mut store = CsvTargetStore::open(dir.path()).unwrap();
        store.begin().unwrap();
        store.save_genre(&genre(1)).unwrap();
        store.commit().unwrap();
        store.flush().unwrap();
        store.begin().unwrap();
        store.save_genre(&genre(2)).unwrap();
        store.commit().unwrap();
        assert!(table_path(dir.path(), Table::Genres).exists());
        assert!(journal_path(dir.path()).exists());

        CsvTargetStore::clean(dir.path()).unwrap();
        assert!(!table_path(dir.path(), Table::Genres).exists());
        assert!(!journal_path(dir.path()).exists());
        assert_eq!(CsvTargetStore::open(dir.path()).unwrap().tables().rows(), 0);
    }
}
