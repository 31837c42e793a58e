//! Relational tables back to document exports.
//!
//! Surrogate keys become string ids (`7` becomes `"7"`). Books embed their
//! author and genres; comments reference their book by id and title. The
//! output is a source directory the migration can read again.

use crate::models::{
    Collection, SourceAuthor, SourceBook, SourceBookRef, SourceComment, SourceGenre,
};
use crate::seed::Library;
use crate::target::TableSet;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Collections in the order they are exported.
pub const EXPORT_ORDER: [Collection; 4] = [
    Collection::Genres,
    Collection::Authors,
    Collection::Books,
    Collection::Comments,
];

fn document_id(id: i64) -> String {
    id.to_string()
}

fn author_doc(tables: &TableSet, id: i64) -> Option<SourceAuthor> {
    tables.authors.get(&id).map(|author| SourceAuthor {
        id: document_id(author.id),
        full_name: author.full_name.clone(),
    })
}

fn genre_doc(tables: &TableSet, id: i64) -> Option<SourceGenre> {
    tables.genres.get(&id).map(|genre| SourceGenre {
        id: document_id(genre.id),
        name: genre.name.clone(),
    })
}

/// Builds the document form of every table row.
///
/// Fails when a row points at a row that is not in `tables`.
pub fn library_from_tables(tables: &TableSet) -> Result<Library> {
    let genres = tables
        .genres
        .keys()
        .filter_map(|&id| genre_doc(tables, id))
        .collect();
    let authors = tables
        .authors
        .keys()
        .filter_map(|&id| author_doc(tables, id))
        .collect();

    let mut books = Vec::with_capacity(tables.books.len());
    for row in tables.books.values() {
        let author = match row.author_id {
            Some(author_id) => Some(author_doc(tables, author_id).with_context(|| {
                format!("Book {} references missing author {}", row.id, author_id)
            })?),
            None => None,
        };
        let mut book_genres = Vec::new();
        for genre_id in tables.genres_of(row.id) {
            book_genres.push(genre_doc(tables, genre_id).with_context(|| {
                format!("Book {} references missing genre {}", row.id, genre_id)
            })?);
        }
        debug!(book_id = row.id, genres = book_genres.len(), "Book exported");
        books.push(SourceBook {
            id: document_id(row.id),
            title: row.title.clone(),
            author,
            genres: Some(book_genres),
        });
    }

    let mut comments = Vec::with_capacity(tables.comments.len());
    for row in tables.comments.values() {
        let book = match row.book_id {
            Some(book_id) => {
                let book = tables.books.get(&book_id).with_context(|| {
                    format!("Comment {} references missing book {}", row.id, book_id)
                })?;
                Some(SourceBookRef {
                    id: document_id(book.id),
                    title: Some(book.title.clone()),
                })
            }
            None => None,
        };
        comments.push(SourceComment {
            id: document_id(row.id),
            text: row.text.clone(),
            book,
        });
    }

    Ok(Library {
        authors,
        genres,
        books,
        comments,
    })
}

/// Writes one export file per collection into `dir`.
pub fn export_tables(tables: &TableSet, dir: &Path, compress: bool) -> Result<Vec<PathBuf>> {
    let library = library_from_tables(tables)?;
    let mut paths = Vec::with_capacity(EXPORT_ORDER.len());
    for collection in EXPORT_ORDER {
        let path = library.write_collection(dir, collection, compress)?;
        info!(%collection, documents = library.len(collection), path = %path.display(), "Collection exported");
        paths.push(path);
    }
    Ok(paths)
}
