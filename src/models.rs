use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity kinds that receive registry-assigned surrogate keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Author,
    Genre,
    Book,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Author, EntityKind::Genre, EntityKind::Book];

    pub fn index(self) -> usize {
        match self {
            EntityKind::Author => 0,
            EntityKind::Genre => 1,
            EntityKind::Book => 2,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Author => "author",
            EntityKind::Genre => "genre",
            EntityKind::Book => "book",
        };
        f.write_str(name)
    }
}

/// Source-store collections, in the order a full migration sweeps them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Authors,
    Genres,
    Books,
    Comments,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Authors,
        Collection::Genres,
        Collection::Books,
        Collection::Comments,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Collection::Authors => "authors",
            Collection::Genres => "genres",
            Collection::Books => "books",
            Collection::Comments => "comments",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Target-store tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Authors,
    Genres,
    Books,
    BookGenres,
    Comments,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Table::Authors,
        Table::Genres,
        Table::Books,
        Table::BookGenres,
        Table::Comments,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Table::Authors => "authors",
            Table::Genres => "genres",
            Table::Books => "books",
            Table::BookGenres => "book_genres",
            Table::Comments => "comments",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// Source documents. Field names follow the document store (`_id`, camelCase).

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceAuthor {
    #[serde(rename = "_id")]
    pub id: String,
    pub full_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceGenre {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceBook {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<SourceAuthor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genres: Option<Vec<SourceGenre>>,
}

/// Reference from a comment to its book. Only `_id` is guaranteed; an
/// exported reference may or may not carry the title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceBookRef {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceComment {
    #[serde(rename = "_id")]
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book: Option<SourceBookRef>,
}

// Target records. Ids are surrogate keys handed out by the registry, except
// comment ids, which the target store assigns on insert.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetAuthor {
    pub id: i64,
    pub full_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGenre {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetBook {
    pub id: i64,
    pub title: String,
    pub author: Option<TargetAuthor>,
    pub genres: Vec<TargetGenre>,
}

/// Book reference held by a comment (by id only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookRef {
    pub id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetComment {
    /// `None` until the target store has inserted the row.
    pub id: Option<i64>,
    pub text: String,
    pub book: Option<BookRef>,
}

// Flat rows as stored in the target tables.

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookRow {
    pub id: i64,
    pub title: String,
    pub author_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BookGenreRow {
    pub book_id: i64,
    pub genre_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRow {
    pub id: i64,
    pub text: String,
    pub book_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn source_book_decodes_document_field_names() {
        let doc = serde_json::json!({
            "_id": "book1",
            "title": "War and Peace",
            "author": {"_id": "author1", "fullName": "Leo Tolstoy"},
            "genres": [{"_id": "genre1", "name": "Classic Literature"}]
        });
        let book: SourceBook = serde_json::from_value(doc).unwrap();
        assert_eq!(book.id, "book1");
        assert_eq!(book.author.unwrap().full_name, "Leo Tolstoy");
        assert_eq!(book.genres.unwrap().len(), 1);
    }

    #[test]
    fn comment_book_reference_decodes_with_title() {
        let doc = serde_json::json!({
            "_id": "comment1",
            "text": "Excellent",
            "book": {"_id": "book1", "title": "War and Peace"}
        });
        let comment: SourceComment = serde_json::from_value(doc).unwrap();
        let book = comment.book.unwrap();
        assert_eq!(book.id, "book1");
        assert_eq!(book.title.as_deref(), Some("War and Peace"));
    }

    #[test]
    fn comment_without_book_decodes() {
        let doc = serde_json::json!({"_id": "c", "text": "orphan"});
        let comment: SourceComment = serde_json::from_value(doc).unwrap();
        assert!(comment.book.is_none());
    }

    #[test]
    fn entity_kind_indices_are_distinct() {
        let seen: HashSet<usize> = EntityKind::ALL.iter().map(|k| k.index()).collect();
        assert_eq!(seen.len(), EntityKind::ALL.len());
        assert!(seen.iter().all(|&i| i < EntityKind::ALL.len()));
    }

    #[test]
    fn comment_book_reference_may_carry_only_an_id() {
        let doc = serde_json::json!({"_id": "c1", "text": "hi", "book": {"_id": "b1"}});
        let comment: SourceComment = serde_json::from_value(doc).unwrap();
        let book = comment.book.unwrap();
        assert_eq!(book.id, "b1");
        assert!(book.title.is_none());
    }
}
