//src/classify/mod.rs

pub mod classifier;
pub mod consensus;
pub mod local;
pub mod query_builder;
pub mod retrieval;

use thiserror::Error;

use crate::config::ConfigError;
use crate::index::IndexError;
use crate::kmer::KmerError;

pub use classifier::Classifier;
pub use consensus::resolve;
pub use local::LocalClassifier;
pub use query_builder::QueryBuilder;
pub use retrieval::{Phase, Retrieval};

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("sequence is empty")]
    EmptySequence,

    #[error(transparent)]
    Kmer(#[from] KmerError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("query needs {count} clauses, more than the limit of {max}")]
    TooManyClauses { count: usize, max: usize },

    #[error("index was built with {index}, configuration asks for {config}")]
    IndexMismatch { index: String, config: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}
