use crate::models::{Table, TargetAuthor, TargetBook, TargetComment, TargetGenre};
use crate::stats::SweepStats;
use crate::target::TargetStore;
use anyhow::Result;
use tracing::debug;

/// What a writer did with one chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkCounts {
    pub written: u64,
    pub skipped: u64,
}

/// Applies one transformed chunk to the target store.
///
/// Writers run inside a transaction the caller opened; they never commit
/// or roll back themselves. See [`write_in_transaction`].
pub trait ChunkWriter<T> {
    fn write(&self, target: &mut dyn TargetStore, chunk: &[T]) -> Result<ChunkCounts>;
}

/// Writes `chunk` in a single transaction: all of it is committed, or none.
/// Counters are only updated for committed chunks.
pub fn write_in_transaction<T, W: ChunkWriter<T> + ?Sized>(
    writer: &W,
    target: &mut dyn TargetStore,
    chunk: &[T],
    stats: &SweepStats,
) -> Result<ChunkCounts> {
    target.begin()?;
    let counts = match writer.write(target, chunk) {
        Ok(counts) => counts,
        Err(e) => {
            target.rollback();
            return Err(e);
        }
    };
    if let Err(e) = target.commit() {
        target.rollback();
        return Err(e);
    }
    stats.add_written(counts.written);
    stats.add_skipped(counts.skipped);
    stats.inc_chunks();
    debug!(
        records = chunk.len(),
        written = counts.written,
        skipped = counts.skipped,
        "Chunk committed"
    );
    Ok(counts)
}

fn save_author_if_missing(
    target: &mut dyn TargetStore,
    author: &TargetAuthor,
    counts: &mut ChunkCounts,
) -> Result<bool> {
    if target.exists(Table::Authors, author.id)? {
        counts.skipped += 1;
        return Ok(false);
    }
    target.save_author(author)?;
    Ok(true)
}

fn save_genre_if_missing(
    target: &mut dyn TargetStore,
    genre: &TargetGenre,
    counts: &mut ChunkCounts,
) -> Result<bool> {
    if target.exists(Table::Genres, genre.id)? {
        counts.skipped += 1;
        return Ok(false);
    }
    target.save_genre(genre)?;
    Ok(true)
}

/// Shared entity: an author already present in the target is left alone.
pub struct AuthorWriter;

impl ChunkWriter<TargetAuthor> for AuthorWriter {
    fn write(&self, target: &mut dyn TargetStore, chunk: &[TargetAuthor]) -> Result<ChunkCounts> {
        let mut counts = ChunkCounts::default();
        for author in chunk {
            if save_author_if_missing(target, author, &mut counts)? {
                counts.written += 1;
            }
        }
        Ok(counts)
    }
}

/// Shared entity: a genre already present in the target is left alone.
pub struct GenreWriter;

impl ChunkWriter<TargetGenre> for GenreWriter {
    fn write(&self, target: &mut dyn TargetStore, chunk: &[TargetGenre]) -> Result<ChunkCounts> {
        let mut counts = ChunkCounts::default();
        for genre in chunk {
            if save_genre_if_missing(target, genre, &mut counts)? {
                counts.written += 1;
            }
        }
        Ok(counts)
    }
}

/// Writes the embedded author and genres of each book when missing, then
/// always writes the book itself. `written` counts books only.
pub struct BookWriter;

impl ChunkWriter<TargetBook> for BookWriter {
    fn write(&self, target: &mut dyn TargetStore, chunk: &[TargetBook]) -> Result<ChunkCounts> {
        let mut counts = ChunkCounts::default();
        for book in chunk {
            if let Some(author) = &book.author {
                if save_author_if_missing(target, author, &mut counts)? {
                    debug!(author = author.id, book = book.id, "Wrote embedded author");
                }
            }
            for genre in &book.genres {
                if save_genre_if_missing(target, genre, &mut counts)? {
                    debug!(genre = genre.id, book = book.id, "Wrote embedded genre");
                }
            }
            target.save_book(book)?;
            counts.written += 1;
        }
        Ok(counts)
    }
}

/// Always inserts, unless `dedupe` is set and a comment with the same book
/// and text is already stored.
pub struct CommentWriter {
    pub dedupe: bool,
}

impl ChunkWriter<TargetComment> for CommentWriter {
    fn write(&self, target: &mut dyn TargetStore, chunk: &[TargetComment]) -> Result<ChunkCounts> {
        let mut counts = ChunkCounts::default();
        for comment in chunk {
            let book_id = comment.book.map(|b| b.id);
            if self.dedupe {
                if let Some(existing) = target.find_comment(book_id, &comment.text)? {
                    debug!(comment = existing, book = ?book_id, "Comment already migrated");
                    counts.skipped += 1;
                    continue;
                }
            }
            let saved = target.save_comment(comment)?;
            debug!(comment = ?saved.id, book = ?book_id, "Saved comment");
            counts.written += 1;
        }
        Ok(counts)
    }
}
