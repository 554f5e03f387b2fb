//src/lib.rs

//! Taxonomic classification of DNA reads against an inverted index of
//! reference k-mers.
//!
//! References are split into k-mer tokens and stored forward and reverse
//! complemented with their lineage. A read becomes a boolean query over its
//! own k-mers; the best scoring references are reconciled into a verdict by
//! walking their shared lineage.

pub mod broker;
pub mod classifications_stats;
pub mod classify;
pub mod config;
pub mod fasta;
pub mod index;
pub mod indexer;
pub mod kmer;
pub mod lineage;
pub mod pool;
pub mod server;
pub mod taxdb;
pub mod types;

use std::path::{Path, PathBuf};

pub use classifications_stats::ClassificationSummary;
pub use classify::{Classifier, ClassifyError, LocalClassifier};
pub use config::{ClientConfiguration, Configuration, ServerConfiguration};
pub use indexer::{IndexSummary, Indexer, IndexerError};
pub use server::{ClassifierClient, ClassifierServer};
pub use taxdb::TaxonDb;
pub use types::{ClassificationResult, Hit, ResultType, Strand};

/// Build the index at `conf.index_path` from every FASTA file under
/// `references`. Lineages come from sidecar files, or from `taxdb` (plus an
/// optional accession map) when given.
pub fn build_index(
    conf: &Configuration,
    references: &[PathBuf],
    taxdb: Option<&Path>,
    accessions: Option<&Path>,
) -> Result<IndexSummary, Box<dyn std::error::Error>> {
    let mut indexer = Indexer::new(conf)?;
    if let Some(path) = taxdb {
        let mut db = TaxonDb::open(path)?;
        if let Some(acc) = accessions {
            db.load_accessions(acc)?;
        }
        indexer = indexer.with_taxonomy(db);
    }

    let mut files = 0;
    for path in references {
        files += indexer.index_path(path)?;
    }
    let summary = indexer.close()?;
    log::info!(
        "Indexed {} records from {} files into {} documents ({} failed)",
        summary.records,
        files,
        summary.meta.doc_count,
        summary.failed
    );
    Ok(summary)
}

/// Classify `input` (a FASTA file or a directory of them) in-process. A file
/// goes to `output` with its summary next to it; a directory fills `output`
/// with one result file per input.
pub fn classify_reads(
    conf: &Configuration,
    input: &Path,
    output: &Path,
) -> Result<Vec<ClassificationSummary>, Box<dyn std::error::Error>> {
    let local = LocalClassifier::open(conf)?;
    if input.is_dir() {
        return Ok(local.classify_path(input, output)?);
    }
    let summary_path = classifications_stats::summary_path_for(output);
    Ok(vec![local.classify_file(input, output, Some(&summary_path))?])
}
