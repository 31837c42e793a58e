use crate::models::{Collection, Table};
use crate::pipeline::Stage;
use thiserror::Error;

/// Failures a caller may want to tell apart. Everything else travels as a
/// plain `anyhow::Error` with context attached.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("comment {comment_id} references book {book_id}, which has not been migrated")]
    UnresolvedReference { comment_id: String, book_id: String },

    #[error("stage '{stage}' requires stage '{requires}' to complete first")]
    MissingPrerequisite { stage: Stage, requires: Stage },

    #[error("{table} row {id} references missing {referenced} row {referenced_id}")]
    ForeignKeyViolation {
        table: Table,
        id: i64,
        referenced: Table,
        referenced_id: i64,
    },

    #[error("no transaction is open on the target store")]
    NoTransaction,

    #[error("a transaction is already open on the target store")]
    TransactionOpen,

    #[error("malformed {collection} document at position {position}: {source}")]
    MalformedDocument {
        collection: Collection,
        position: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("migration cancelled")]
    Cancelled,
}
