use crate::error::MigrationError;
use crate::models::{
    BookRef, EntityKind, SourceAuthor, SourceBook, SourceComment, SourceGenre, TargetAuthor,
    TargetBook, TargetComment, TargetGenre,
};
use crate::registry::IdRegistry;
use anyhow::{bail, Result};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// What to do with a comment whose book was never migrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnresolvedPolicy {
    /// Fail the stage (and the job).
    #[default]
    Fail,
    /// Drop the comment and count it.
    Skip,
    /// Write the comment with no book and count it.
    Detach,
}

impl fmt::Display for UnresolvedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnresolvedPolicy::Fail => "fail",
            UnresolvedPolicy::Skip => "skip",
            UnresolvedPolicy::Detach => "detach",
        };
        f.write_str(name)
    }
}

impl FromStr for UnresolvedPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fail" => Ok(UnresolvedPolicy::Fail),
            "skip" => Ok(UnresolvedPolicy::Skip),
            "detach" => Ok(UnresolvedPolicy::Detach),
            other => bail!("Unknown unresolved-reference policy: {other} (expected fail, skip or detach)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentOutcome {
    Mapped(TargetComment),
    /// Book reference could not be resolved; written without a book.
    Detached(TargetComment),
    /// Book reference could not be resolved; not written.
    Skipped,
}

/// Converts source documents into target records, resolving embedded
/// relationships through the registry. Authors, genres and books allocate
/// ids; comments only ever look book ids up.
pub struct RecordTransformer<'r> {
    registry: &'r IdRegistry,
    policy: UnresolvedPolicy,
}

impl<'r> RecordTransformer<'r> {
    pub fn new(registry: &'r IdRegistry, policy: UnresolvedPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn map_author(&self, source: Option<&SourceAuthor>) -> Option<TargetAuthor> {
        let source = source?;
        Some(TargetAuthor {
            id: self.registry.get_or_create(EntityKind::Author, &source.id),
            full_name: source.full_name.clone(),
        })
    }

    pub fn map_genre(&self, source: Option<&SourceGenre>) -> Option<TargetGenre> {
        let source = source?;
        Some(TargetGenre {
            id: self.registry.get_or_create(EntityKind::Genre, &source.id),
            name: source.name.clone(),
        })
    }

    /// The book's own id is allocated before its author's and genres'.
    pub fn map_book(&self, source: Option<&SourceBook>) -> Option<TargetBook> {
        let source = source?;
        let id = self.registry.get_or_create(EntityKind::Book, &source.id);
        let author = self.map_author(source.author.as_ref());
        let genres = source
            .genres
            .iter()
            .flatten()
            .filter_map(|genre| self.map_genre(Some(genre)))
            .collect();

        debug!(source_id = %source.id, target_id = id, title = %source.title, "Mapped book");

        Some(TargetBook {
            id,
            title: source.title.clone(),
            author,
            genres,
        })
    }

    pub fn map_comment(&self, source: &SourceComment) -> Result<CommentOutcome> {
        let Some(book_ref) = source.book.as_ref() else {
            return Ok(CommentOutcome::Mapped(TargetComment {
                id: None,
                text: source.text.clone(),
                book: None,
            }));
        };

        match self.registry.get(EntityKind::Book, &book_ref.id) {
            Some(book_id) => {
                debug!(comment = %source.id, source_book = %book_ref.id, book_id, "Resolved comment book");
                Ok(CommentOutcome::Mapped(TargetComment {
                    id: None,
                    text: source.text.clone(),
                    book: Some(BookRef { id: book_id }),
                }))
            }
            None => match self.policy {
                UnresolvedPolicy::Fail => Err(MigrationError::UnresolvedReference {
                    comment_id: source.id.clone(),
                    book_id: book_ref.id.clone(),
                }
                .into()),
                UnresolvedPolicy::Skip => {
                    warn!(comment = %source.id, source_book = %book_ref.id, "Skipping comment with unresolved book");
                    Ok(CommentOutcome::Skipped)
                }
                UnresolvedPolicy::Detach => {
                    warn!(comment = %source.id, source_book = %book_ref.id, "Detaching comment from unresolved book");
                    Ok(CommentOutcome::Detached(TargetComment {
                        id: None,
                        text: source.text.clone(),
                        book: None,
                    }))
                }
            },
        }
    }
}
