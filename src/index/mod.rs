//src/index/mod.rs

//! Positional inverted index over k-mer terms.
//!
//! - [`store`]: append-only document log plus index metadata
//! - [`query`]: boolean queries made of term and two-term phrase clauses
//! - [`similarity`]: TF-IDF and BM25 scoring
//! - [`searcher`]: in-memory postings and top-N search
//!
//! Documents are written once by [`store::IndexWriter`] and read back by
//! [`searcher::IndexSearcher`]; the two are never open on the same
//! directory at the same time.

pub mod query;
pub mod searcher;
pub mod similarity;
pub mod store;

use std::path::PathBuf;
use thiserror::Error;

pub use query::{BooleanQuery, Clause};
pub use searcher::{IndexSearcher, ScoreDoc, TopDocs};
pub use similarity::Similarity;
pub use store::{IndexMeta, IndexWriter, StoredDocument, StoredFields};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode document: {0}")]
    Encode(#[from] bincode::Error),

    #[error("Failed to read index metadata: {0}")]
    Meta(#[from] serde_json::Error),

    #[error("No index found at {0}")]
    Missing(PathBuf),
}
