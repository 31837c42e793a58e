//! Source document sets: the sample library for demos and local runs, and
//! the shape the export job produces.

use crate::models::{
    Collection, SourceAuthor, SourceBook, SourceBookRef, SourceComment, SourceGenre,
};
use crate::source::{JsonlSourceStore, MemorySourceStore};
use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::info;

/// A complete set of source documents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Library {
    pub authors: Vec<SourceAuthor>,
    pub genres: Vec<SourceGenre>,
    pub books: Vec<SourceBook>,
    pub comments: Vec<SourceComment>,
}

fn author(id: &str, full_name: &str) -> SourceAuthor {
    SourceAuthor {
        id: id.to_string(),
        full_name: full_name.to_string(),
    }
}

fn genre(id: &str, name: &str) -> SourceGenre {
    SourceGenre {
        id: id.to_string(),
        name: name.to_string(),
    }
}

fn book(id: &str, title: &str, author: &SourceAuthor, genres: &[&SourceGenre]) -> SourceBook {
    SourceBook {
        id: id.to_string(),
        title: title.to_string(),
        author: Some(author.clone()),
        genres: Some(genres.iter().map(|&g| g.clone()).collect()),
    }
}

/// Comments reference their book by id and title only.
fn comment(id: &str, text: &str, book: &SourceBook) -> SourceComment {
    SourceComment {
        id: id.to_string(),
        text: text.to_string(),
        book: Some(SourceBookRef {
            id: book.id.clone(),
            title: Some(book.title.clone()),
        }),
    }
}

impl Library {
    /// Three authors, four genres, four books and five comments.
    pub fn classics() -> Self {
        let tolstoy = author("author1", "Leo Tolstoy");
        let dostoevsky = author("author2", "Fyodor Dostoevsky");
        let pushkin = author("author3", "Alexander Pushkin");

        let classic = genre("genre1", "Classic Literature");
        let philosophy = genre("genre2", "Philosophy");
        let romance = genre("genre3", "Romance");
        let drama = genre("genre4", "Drama");

        let war_and_peace = book("book1", "War and Peace", &tolstoy, &[&classic, &drama]);
        let crime = book(
            "book2",
            "Crime and Punishment",
            &dostoevsky,
            &[&classic, &philosophy],
        );
        let onegin = book("book3", "Eugene Onegin", &pushkin, &[&classic, &romance]);
        let karenina = book(
            "book4",
            "Anna Karenina",
            &tolstoy,
            &[&classic, &romance, &drama],
        );

        let comments = vec![
            comment("comment1", "Excellent masterpiece of Russian literature", &war_and_peace),
            comment("comment2", "Deep psychological analysis", &crime),
            comment("comment3", "Beautiful poetry and prose", &onegin),
            comment("comment4", "Tragic love story", &karenina),
            comment("comment5", "Another great work by Tolstoy", &karenina),
        ];

        Self {
            authors: vec![tolstoy, dostoevsky, pushkin],
            genres: vec![classic, philosophy, romance, drama],
            books: vec![war_and_peace, crime, onegin, karenina],
            comments,
        }
    }

    pub fn len(&self, collection: Collection) -> usize {
        match collection {
            Collection::Authors => self.authors.len(),
            Collection::Genres => self.genres.len(),
            Collection::Books => self.books.len(),
            Collection::Comments => self.comments.len(),
        }
    }

    pub fn load_into(&self, store: &mut MemorySourceStore) -> Result<()> {
        for doc in &self.authors {
            store.insert(Collection::Authors, doc)?;
        }
        for doc in &self.genres {
            store.insert(Collection::Genres, doc)?;
        }
        for doc in &self.books {
            store.insert(Collection::Books, doc)?;
        }
        for doc in &self.comments {
            store.insert(Collection::Comments, doc)?;
        }
        Ok(())
    }

    pub fn to_memory_store(&self) -> Result<MemorySourceStore> {
        let mut store = MemorySourceStore::new();
        self.load_into(&mut store)?;
        Ok(store)
    }

    /// Writes the export file of one collection into `dir`.
    pub fn write_collection(
        &self,
        dir: &Path,
        collection: Collection,
        compress: bool,
    ) -> Result<PathBuf> {
        match collection {
            Collection::Authors => {
                JsonlSourceStore::write_collection(dir, collection, &self.authors, compress)
            }
            Collection::Genres => {
                JsonlSourceStore::write_collection(dir, collection, &self.genres, compress)
            }
            Collection::Books => {
                JsonlSourceStore::write_collection(dir, collection, &self.books, compress)
            }
            Collection::Comments => {
                JsonlSourceStore::write_collection(dir, collection, &self.comments, compress)
            }
        }
    }

    /// Writes one export file per collection into `dir`.
    pub fn write_to(&self, dir: &Path, compress: bool) -> Result<Vec<PathBuf>> {
        let paths = Collection::ALL
            .into_iter()
            .map(|collection| self.write_collection(dir, collection, compress))
            .collect::<Result<Vec<_>>>()?;
        info!(
            dir = %dir.display(),
            authors = self.authors.len(),
            genres = self.genres.len(),
            books = self.books.len(),
            comments = self.comments.len(),
            compress,
            "Seeded source store"
        );
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceStore;
    use tempfile::TempDir;

    #[test]
    fn classics_has_expected_shape() {
        let library = Library::classics();
        assert_eq!(library.len(Collection::Authors), 3);
        assert_eq!(library.len(Collection::Genres), 4);
        assert_eq!(library.len(Collection::Books), 4);
        assert_eq!(library.len(Collection::Comments), 5);

        let karenina = &library.books[3];
        assert_eq!(karenina.author.as_ref().unwrap().id, "author1");
        assert_eq!(karenina.genres.as_ref().unwrap().len(), 3);
    }

    #[test]
    fn comments_reference_their_book() {
        let library = Library::classics();
        let book = library.comments[4].book.as_ref().unwrap();
        assert_eq!(book.id, "book4");
        assert_eq!(book.title.as_deref(), Some("Anna Karenina"));
    }

    #[test]
    fn written_exports_read_back() {
        let dir = TempDir::new().unwrap();
        let library = Library::classics();
        let paths = library.write_to(dir.path(), true).unwrap();
        assert_eq!(paths.len(), 4);

        let store = JsonlSourceStore::open(dir.path()).unwrap();
        for collection in Collection::ALL {
            assert_eq!(store.find_all(collection).unwrap().len(), library.len(collection));
        }
    }
}
