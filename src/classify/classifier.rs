//src/classify/classifier.rs

use std::sync::Arc;

use super::query_builder::QueryBuilder;
use super::retrieval::{Outcome, Retrieval};
use super::ClassifyError;
use crate::config::Configuration;
use crate::index::IndexSearcher;
use crate::kmer::KmerAnalyzer;
use crate::types::ClassificationResult;

/// `classify(header, sequence)` over one opened index.
///
/// Cheap to share between threads; searches only read the index.
pub struct Classifier {
    retrieval: Retrieval,
}

impl Classifier {
    /// Open the index named by `conf.index_path`.
    pub fn open(conf: &Configuration) -> Result<Self, ClassifyError> {
        conf.validate()?;
        let searcher = IndexSearcher::open(&conf.index_path, conf.similarity())?;
        Self::with_searcher(Arc::new(searcher), conf)
    }

    /// Classifier over an already loaded index. Fails when the index was built
    /// with a different k or canonicalization than `conf` asks for.
    pub fn with_searcher(
        searcher: Arc<IndexSearcher>,
        conf: &Configuration,
    ) -> Result<Self, ClassifyError> {
        let meta = searcher.meta();
        if meta.kmer_size != conf.kmer_size || meta.canonical != conf.canonical_kmers {
            return Err(ClassifyError::IndexMismatch {
                index: format!("k={} canonical={}", meta.kmer_size, meta.canonical),
                config: format!("k={} canonical={}", conf.kmer_size, conf.canonical_kmers),
            });
        }

        let mut analyzer = KmerAnalyzer::new(conf.kmer_size, conf.kmer_skips, conf.canonical_kmers);
        analyzer.compress = meta.compressed;
        let builder = QueryBuilder::new(
            conf.query_generation_algorithm,
            conf.query_min_should_match,
            conf.max_clause_count,
        );
        log::info!(
            "Classifier ready: k={} skip={} strategy={:?} min_should_match={}",
            conf.kmer_size,
            conf.kmer_skips,
            conf.query_generation_algorithm,
            conf.query_min_should_match
        );

        Ok(Self {
            retrieval: Retrieval::new(
                searcher,
                analyzer,
                builder,
                conf.hits_per_page,
                conf.tie_tolerance,
            ),
        })
    }

    /// Search and resolve, keeping which pass decided.
    pub fn classify_detailed(&self, sequence: &str) -> Result<Outcome, ClassifyError> {
        if sequence.trim().is_empty() {
            return Err(ClassifyError::EmptySequence);
        }
        let normalized = sequence.trim().to_ascii_uppercase();
        self.retrieval.run(&normalized)
    }

    pub fn classify(&self, header: &str, sequence: &str) -> Result<ClassificationResult, ClassifyError> {
        let outcome = self.classify_detailed(sequence)?;
        Ok(ClassificationResult {
            query_header: header.to_string(),
            query: sequence.to_string(),
            result: outcome.hits,
            result_type: outcome.verdict.result_type,
            taxon_rank: outcome.verdict.rank,
            taxon_name: outcome.verdict.name,
            error: None,
        })
    }

    /// Like [`Classifier::classify`], folding errors into a FAILED result.
    pub fn classify_or_fail(&self, header: &str, sequence: &str) -> ClassificationResult {
        match self.classify(header, sequence) {
            Ok(res) => res,
            Err(e) => {
                log::warn!("Classification of '{}' failed: {}", header, e);
                ClassificationResult::failed(header, sequence, e)
            }
        }
    }
}
