//src/classify/retrieval.rs

use std::sync::Arc;

use super::consensus::{resolve, Verdict};
use super::query_builder::QueryBuilder;
use super::ClassifyError;
use crate::index::{IndexSearcher, TopDocs};
use crate::kmer::KmerAnalyzer;
use crate::types::{Hit, ResultType};

/// Which pass produced a set of hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Query tokenized with the configured skip
    Quick,
    /// Re-run with every k-mer of the query
    Detailed,
}

/// Tie set of one search plus whether it can be trusted.
#[derive(Debug, Clone)]
pub struct TieSet {
    pub hits: Vec<Hit>,
    /// False when nothing matched or the page came back full, meaning more
    /// equally good hits may exist beyond it.
    pub conclusive: bool,
}

#[derive(Debug, Clone)]
pub struct Outcome {
    pub phase: Phase,
    pub hits: Vec<Hit>,
    pub verdict: Verdict,
}

/// Query construction, ranked search and the quick/detailed fallback.
pub struct Retrieval {
    searcher: Arc<IndexSearcher>,
    analyzer: KmerAnalyzer,
    builder: QueryBuilder,
    hits_per_page: usize,
    tie_tolerance: f32,
}

impl Retrieval {
    pub fn new(
        searcher: Arc<IndexSearcher>,
        analyzer: KmerAnalyzer,
        builder: QueryBuilder,
        hits_per_page: usize,
        tie_tolerance: f32,
    ) -> Self {
        Self {
            searcher,
            analyzer,
            builder,
            hits_per_page: hits_per_page.max(1),
            tie_tolerance,
        }
    }

    pub fn skip(&self) -> usize {
        self.analyzer.skip
    }

    /// Search once with the given stride and cut the page down to its ties.
    pub fn search(&self, sequence: &str, skip: usize) -> Result<TieSet, ClassifyError> {
        let analyzer = self.analyzer.with_skip(skip);
        let terms = analyzer.analyze(sequence)?;
        let Some(query) = self.builder.build(&terms, skip)? else {
            return Ok(TieSet {
                hits: Vec::new(),
                conclusive: false,
            });
        };

        let top = self.searcher.search(&query, self.hits_per_page);
        let conclusive = !top.score_docs.is_empty() && top.score_docs.len() < self.hits_per_page;
        Ok(TieSet {
            hits: self.tie_hits(&top),
            conclusive,
        })
    }

    fn tie_hits(&self, top: &TopDocs) -> Vec<Hit> {
        top.score_docs
            .iter()
            .enumerate()
            .take_while(|(_, sd)| top.max_score - sd.score <= self.tie_tolerance)
            .filter_map(|(rank, sd)| {
                let fields = self.searcher.doc(sd.doc)?;
                Some(Hit {
                    doc_id: sd.doc,
                    rank,
                    score: sd.score,
                    filename: fields.filename.clone(),
                    header: fields.header.clone(),
                    strand: fields.strand,
                    lineage: fields.lineage.clone(),
                })
            })
            .collect()
    }

    /// Quick pass with the configured skip; when that is inconclusive or does
    /// not classify, and skip > 0, a detailed pass replaces it.
    pub fn run(&self, sequence: &str) -> Result<Outcome, ClassifyError> {
        let skip = self.skip();
        let quick = self.search(sequence, skip)?;
        let verdict = resolve(&quick.hits);

        let settled = quick.conclusive && verdict.result_type == ResultType::Classified;
        if skip == 0 || settled {
            return Ok(Outcome {
                phase: Phase::Quick,
                hits: quick.hits,
                verdict,
            });
        }

        log::debug!(
            "Quick pass gave {} ({} hits), retrying with every k-mer",
            verdict.result_type,
            quick.hits.len()
        );
        let detailed = self.search(sequence, 0)?;
        let verdict = resolve(&detailed.hits);
        Ok(Outcome {
            phase: Phase::Detailed,
            hits: detailed.hits,
            verdict,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueryGeneration;
    use crate::index::{IndexMeta, Similarity, StoredDocument, StoredFields};
    use crate::types::Strand;

    const REF_A: &str = "ACGTTGCATGCCATGATCGATCGGCTAGCTAGGCTTACGATCGATGCTAGCATCGACTG";
    const REF_B: &str = "TTGACCGTAGGCATCCAGTTACGGATCAGGTCCATAGGACTTAGCCTAGGATCCATTAC";

    fn lineage(species: &str, taxid: u32) -> String {
        format!(
            r#"[{{"taxid": 2, "name": "Bacteria", "parent": 1, "rank": "superkingdom"}},
                {{"taxid": {taxid}, "name": "{species}", "parent": 2, "rank": "species"}}]"#
        )
    }

    fn searcher(refs: &[(&str, String)], k: usize) -> Arc<IndexSearcher> {
        let analyzer = KmerAnalyzer::new(k, 0, false);
        let docs = refs
            .iter()
            .enumerate()
            .map(|(i, (seq, lin))| StoredDocument {
                fields: StoredFields {
                    filename: format!("ref{i}.fna"),
                    header: format!("ref{i}"),
                    strand: Strand::Forward,
                    lineage: lin.clone(),
                },
                body: analyzer.analyze(seq).unwrap().into_iter().map(|t| t.text).collect(),
            })
            .collect();
        Arc::new(IndexSearcher::from_documents(
            IndexMeta::new(k, false),
            docs,
            Similarity::Classic,
        ))
    }

    fn retrieval(searcher: Arc<IndexSearcher>, skip: usize, hits: usize) -> Retrieval {
        Retrieval::new(
            searcher,
            KmerAnalyzer::new(8, skip, false),
            QueryBuilder::new(QueryGeneration::PairedProximity, 0.5, 10_000),
            hits,
            1.0,
        )
    }

    #[test]
    fn test_quick_pass_classifies() {
        let s = searcher(&[(REF_A, lineage("A", 10)), (REF_B, lineage("B", 20))], 8);
        let r = retrieval(s, 2, 10);
        let out = r.run(&REF_A[5..45]).unwrap();
        assert_eq!(out.phase, Phase::Quick);
        assert_eq!(out.verdict.result_type, ResultType::Classified);
        assert_eq!(out.verdict.name, "A");
        assert_eq!(out.hits[0].header, "ref0");
    }

    #[test]
    fn test_full_page_forces_detailed_pass() {
        let s = searcher(&[(REF_A, lineage("A", 10)), (REF_A, lineage("A", 10))], 8);
        // page of 2 is filled by the two copies
        let r = retrieval(s, 2, 2);
        let out = r.run(&REF_A[5..45]).unwrap();
        assert_eq!(out.phase, Phase::Detailed);
        assert_eq!(out.hits.len(), 2);
        assert_eq!(out.verdict.name, "A");
    }

    #[test]
    fn test_conclusive_but_vague_quick_pass_goes_detailed() {
        let lone = |name: &str, taxid: u32| {
            format!(r#"[{{"taxid": {taxid}, "name": "{name}", "parent": 1, "rank": "species"}}]"#)
        };
        let s = searcher(&[(REF_A, lone("A", 10)), (REF_A, lone("B", 20))], 8);
        let r = retrieval(s, 2, 10);

        let quick = r.search(&REF_A[5..45], 2).unwrap();
        assert!(quick.conclusive);
        assert_eq!(quick.hits.len(), 2);
        assert_eq!(resolve(&quick.hits).result_type, ResultType::Vague);

        let out = r.run(&REF_A[5..45]).unwrap();
        assert_eq!(out.phase, Phase::Detailed);
        assert_eq!(out.hits.len(), 2);
        assert_eq!(out.verdict.result_type, ResultType::Vague);
    }

    #[test]
    fn test_no_match_is_unknown_after_detailed_pass() {
        let s = searcher(&[(REF_A, lineage("A", 10))], 8);
        let r = retrieval(s, 3, 10);
        let out = r.run("GGGGGGGGGGGGGGGGGGGGGGGG").unwrap();
        assert_eq!(out.phase, Phase::Detailed);
        assert!(out.hits.is_empty());
        assert_eq!(out.verdict.result_type, ResultType::Unknown);
    }

    #[test]
    fn test_zero_skip_never_retries() {
        let s = searcher(&[(REF_A, lineage("A", 10))], 8);
        let r = retrieval(s, 0, 10);
        let out = r.run("GGGGGGGGGGGGGGGGGGGGGGGG").unwrap();
        assert_eq!(out.phase, Phase::Quick);
    }

    #[test]
    fn test_short_query_has_no_terms() {
        let s = searcher(&[(REF_A, lineage("A", 10))], 8);
        let r = retrieval(s, 0, 10);
        let ties = r.search("ACGT", 0).unwrap();
        assert!(ties.hits.is_empty());
        assert!(!ties.conclusive);
    }
}
