//! Bookshift: document-store to relational-store library migration
//!
//! This crate moves a small library catalogue out of a document store, where
//! records are keyed by opaque strings and embed their related records, into a
//! relational store keyed by integers with foreign keys and a join table:
//!
//! 1. **Parent stage** -- Sweep `authors`, `genres` and `books`; every source
//!    id is given a surrogate key the first time it is seen
//! 2. **Dependent stage** -- Sweep `comments`; book references are resolved
//!    through the keys the parent stage allocated
//!
//! # Architecture
//!
//! - **Identifier registry** -- Per-kind concurrent maps with atomic counters
//!   starting at 1; one registry per job, persisted between runs as a snapshot
//! - **Chunked transactions** -- Each sweep reads `chunk_size` records, maps
//!   them and writes them in one target transaction; a failed chunk rolls back
//! - **Pluggable stores** -- [`source::SourceStore`] and
//!   [`target::TargetStore`] traits with in-memory and file-backed
//!   implementations (JSON-lines exports in, CSV tables out)
//! - **Commit journal** -- CSV commits append one synced journal line; table
//!   files are rewritten at stage end and replayed from the journal on open
//!
//! # Key Modules
//!
//! - [`registry`] -- Source id to surrogate key mapping
//! - [`transform`] -- Source document to target record mapping
//! - [`reader`] -- Lazy, resettable, single-pass collection reader
//! - [`writer`] -- Per-entity chunk writers and the transaction wrapper
//! - [`pipeline`] -- Stage graph, job launch and report
//! - [`snapshot`] -- Registry persistence
//! - [`source`] / [`target`] -- Store traits and implementations
//! - [`journal`] -- Append-only log of committed change sets
//! - [`export`] -- Tables back to document exports
//! - [`seed`] -- Sample library
//! - [`stats`] -- Atomic counters per sweep
//! - [`config`] -- Constants and job configuration
//!
//! # Example Usage
//!
//! ```bash
//! # Write the sample library as JSON-lines exports
//! bookshift seed --source data/source
//!
//! # Run both stages into CSV tables
//! bookshift -v migrate --source data/source --target data/target
//!
//! # Show what the target and snapshot hold
//! bookshift status --target data/target
//!
//! # Write the tables back out as documents
//! bookshift export --target data/target --output data/export
//! ```

pub mod config;
pub mod error;
pub mod export;
pub mod journal;
pub mod models;
pub mod pipeline;
pub mod reader;
pub mod registry;
pub mod seed;
pub mod snapshot;
pub mod source;
pub mod stats;
pub mod target;
pub mod transform;
pub mod writer;
