//src/index/searcher.rs

use ahash::AHashMap;
use std::path::Path;

use super::query::{BooleanQuery, Clause};
use super::similarity::Similarity;
use super::store::{self, IndexMeta, StoredDocument, StoredFields};
use super::IndexError;

#[derive(Debug, Clone)]
struct Posting {
    doc: u32,
    /// Token ordinals, ascending
    positions: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreDoc {
    pub doc: u32,
    pub score: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopDocs {
    /// Documents that satisfied the query, before truncation to `n`.
    pub total_hits: usize,
    pub max_score: f32,
    pub score_docs: Vec<ScoreDoc>,
}

/// Read-only view over a committed index, held fully in memory.
pub struct IndexSearcher {
    meta: IndexMeta,
    fields: Vec<StoredFields>,
    doc_lens: Vec<u32>,
    avg_doc_len: f32,
    postings: AHashMap<String, Vec<Posting>>,
    similarity: Similarity,
}

impl IndexSearcher {
    pub fn open<P: AsRef<Path>>(dir: P, similarity: Similarity) -> Result<Self, IndexError> {
        let meta = store::read_meta(&dir)?;
        let docs = store::read_documents(&dir)?;
        if meta.doc_count != docs.len() as u64 {
            log::warn!(
                "Index metadata lists {} documents but {} were loaded",
                meta.doc_count,
                docs.len()
            );
        }
        let searcher = Self::from_documents(meta, docs, similarity);
        log::info!(
            "Loaded index from {}: {} documents, {} distinct terms",
            dir.as_ref().display(),
            searcher.num_docs(),
            searcher.postings.len()
        );
        Ok(searcher)
    }

    /// Build postings for `docs`, assigning ids in order.
    pub fn from_documents(
        meta: IndexMeta,
        docs: Vec<StoredDocument>,
        similarity: Similarity,
    ) -> Self {
        let mut postings: AHashMap<String, Vec<Posting>> = AHashMap::new();
        let mut fields = Vec::with_capacity(docs.len());
        let mut doc_lens = Vec::with_capacity(docs.len());
        let mut total_len = 0u64;

        for (id, doc) in docs.into_iter().enumerate() {
            let id = id as u32;
            let mut local: AHashMap<String, Vec<u32>> = AHashMap::new();
            for (pos, term) in doc.body.into_iter().enumerate() {
                local.entry(term).or_default().push(pos as u32);
            }
            let len = local.values().map(Vec::len).sum::<usize>() as u32;
            for (term, positions) in local {
                postings
                    .entry(term)
                    .or_default()
                    .push(Posting { doc: id, positions });
            }
            total_len += len as u64;
            doc_lens.push(len);
            fields.push(doc.fields);
        }

        let avg_doc_len = if fields.is_empty() {
            0.0
        } else {
            total_len as f32 / fields.len() as f32
        };

        Self {
            meta,
            fields,
            doc_lens,
            avg_doc_len,
            postings,
            similarity,
        }
    }

    pub fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub fn similarity(&self) -> Similarity {
        self.similarity
    }

    pub fn num_docs(&self) -> usize {
        self.fields.len()
    }

    pub fn doc(&self, id: u32) -> Option<&StoredFields> {
        self.fields.get(id as usize)
    }

    pub fn doc_freq(&self, term: &str) -> usize {
        self.postings.get(term).map_or(0, Vec::len)
    }

    fn idf(&self, term: &str) -> f32 {
        self.similarity.idf(self.num_docs(), self.doc_freq(term))
    }

    /// Score every document matching at least
    /// `max(minimum_should_match, 1)` clauses and return the best `n`.
    pub fn search(&self, query: &BooleanQuery, n: usize) -> TopDocs {
        let total_clauses = query.clauses.len();
        if total_clauses == 0 || n == 0 {
            return TopDocs::default();
        }

        // doc -> (summed clause score, clauses matched)
        let mut acc: AHashMap<u32, (f32, usize)> = AHashMap::new();
        for clause in &query.clauses {
            match clause {
                Clause::Term(term) => {
                    let Some(list) = self.postings.get(term) else {
                        continue;
                    };
                    let idf = self.idf(term);
                    for p in list {
                        let s = self.score_clause(p.doc, p.positions.len() as f32, idf);
                        let e = acc.entry(p.doc).or_insert((0.0, 0));
                        e.0 += s;
                        e.1 += 1;
                    }
                }
                Clause::Phrase {
                    first,
                    second,
                    slop,
                } => {
                    let (Some(a), Some(b)) = (self.postings.get(first), self.postings.get(second))
                    else {
                        continue;
                    };
                    let idf = self.idf(first) + self.idf(second);
                    for_each_common_doc(a, b, |doc, pa, pb| {
                        let freq = sloppy_freq(pa, pb, *slop);
                        if freq > 0.0 {
                            let s = self.score_clause(doc, freq, idf);
                            let e = acc.entry(doc).or_insert((0.0, 0));
                            e.0 += s;
                            e.1 += 1;
                        }
                    });
                }
            }
        }

        let required = query.minimum_should_match.max(1);
        let mut hits: Vec<ScoreDoc> = acc
            .into_iter()
            .filter(|(_, (_, matched))| *matched >= required)
            .map(|(doc, (score, matched))| ScoreDoc {
                doc,
                score: score * self.similarity.coord(matched, total_clauses),
            })
            .collect();

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.doc.cmp(&b.doc)));
        let total_hits = hits.len();
        hits.truncate(n);
        let max_score = hits.first().map_or(0.0, |h| h.score);

        TopDocs {
            total_hits,
            max_score,
            score_docs: hits,
        }
    }

    fn score_clause(&self, doc: u32, freq: f32, idf: f32) -> f32 {
        let len = self.doc_lens.get(doc as usize).copied().unwrap_or(0) as usize;
        self.similarity.clause_score(freq, idf, len, self.avg_doc_len)
    }
}

/// Walk two doc-sorted posting lists and call `f` for each shared document.
fn for_each_common_doc<F>(a: &[Posting], b: &[Posting], mut f: F)
where
    F: FnMut(u32, &[u32], &[u32]),
{
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].doc.cmp(&b[j].doc) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                f(a[i].doc, &a[i].positions, &b[j].positions);
                i += 1;
                j += 1;
            }
        }
    }
}

/// Sum of `1 / (distance + 1)` over position pairs where `second` sits
/// within `slop` of directly following `first`.
fn sloppy_freq(first: &[u32], second: &[u32], slop: u32) -> f32 {
    let slop = slop as i64;
    let mut freq = 0.0f32;
    for &p1 in first {
        let expected = p1 as i64 + 1;
        let lo = (expected - slop).max(0);
        let hi = expected + slop;
        let start = second.partition_point(|&p| (p as i64) < lo);
        for &p2 in &second[start..] {
            let p2 = p2 as i64;
            if p2 > hi {
                break;
            }
            if p2 == p1 as i64 {
                continue;
            }
            let dist = (p2 - expected).abs();
            freq += 1.0 / (dist as f32 + 1.0);
        }
    }
    freq
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Strand;

    fn doc(header: &str, body: &[&str]) -> StoredDocument {
        StoredDocument {
            fields: StoredFields {
                filename: "x.fna".into(),
                header: header.into(),
                strand: Strand::Forward,
                lineage: String::new(),
            },
            body: body.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn searcher(sim: Similarity) -> IndexSearcher {
        IndexSearcher::from_documents(
            IndexMeta::new(2, false),
            vec![
                doc("d0", &["a", "b", "c", "d"]),
                doc("d1", &["a", "x", "b", "y"]),
                doc("d2", &["z", "z", "z", "z"]),
            ],
            sim,
        )
    }

    #[test]
    fn test_term_clause_counts_matches() {
        let s = searcher(Similarity::Classic);
        let mut q = BooleanQuery::new();
        q.add(Clause::Term("a".into()));
        q.add(Clause::Term("c".into()));
        q.minimum_should_match = 1;
        let top = s.search(&q, 10);
        assert_eq!(top.total_hits, 2);
        // d0 matches both clauses
        assert_eq!(top.score_docs[0].doc, 0);
        assert_eq!(top.max_score, top.score_docs[0].score);
    }

    #[test]
    fn test_minimum_should_match_filters() {
        let s = searcher(Similarity::Classic);
        let mut q = BooleanQuery::new();
        q.add(Clause::Term("a".into()));
        q.add(Clause::Term("c".into()));
        q.minimum_should_match = 2;
        let top = s.search(&q, 10);
        assert_eq!(top.total_hits, 1);
        assert_eq!(top.score_docs[0].doc, 0);
    }

    #[test]
    fn test_phrase_respects_slop() {
        let s = searcher(Similarity::Classic);
        let exact = BooleanQuery {
            clauses: vec![Clause::Phrase {
                first: "a".into(),
                second: "b".into(),
                slop: 0,
            }],
            minimum_should_match: 1,
        };
        let top = s.search(&exact, 10);
        assert_eq!(top.score_docs.iter().map(|d| d.doc).collect::<Vec<_>>(), vec![0]);

        let loose = BooleanQuery {
            clauses: vec![Clause::Phrase {
                first: "a".into(),
                second: "b".into(),
                slop: 1,
            }],
            minimum_should_match: 1,
        };
        let top = s.search(&loose, 10);
        assert_eq!(top.total_hits, 2);
        // closer match scores higher
        assert_eq!(top.score_docs[0].doc, 0);
    }

    #[test]
    fn test_phrase_order_within_slop() {
        let s = searcher(Similarity::Classic);
        let q = BooleanQuery {
            clauses: vec![Clause::Phrase {
                first: "b".into(),
                second: "a".into(),
                slop: 2,
            }],
            minimum_should_match: 1,
        };
        // reversed order needs |0 - 1 - 1| = 2 <= slop
        assert_eq!(s.search(&q, 10).total_hits, 1);
    }

    #[test]
    fn test_sloppy_freq_skips_same_position() {
        assert_eq!(sloppy_freq(&[3], &[3], 5), 0.0);
        assert_eq!(sloppy_freq(&[3], &[3, 4], 5), 1.0);
        assert_eq!(sloppy_freq(&[3], &[4], 0), 1.0);
        assert_eq!(sloppy_freq(&[3], &[6], 1), 0.0);
    }

    #[test]
    fn test_truncates_and_ties_break_by_doc() {
        let s = IndexSearcher::from_documents(
            IndexMeta::new(2, false),
            vec![doc("a", &["q"]), doc("b", &["q"]), doc("c", &["q"])],
            Similarity::Classic,
        );
        let top = s.search(&BooleanQuery::term("q"), 2);
        assert_eq!(top.total_hits, 3);
        assert_eq!(top.score_docs.len(), 2);
        assert_eq!(top.score_docs[0].doc, 0);
        assert_eq!(top.score_docs[1].doc, 1);
    }

    #[test]
    fn test_bm25_ranks_matching_doc() {
        let s = searcher(Similarity::Bm25);
        let top = s.search(&BooleanQuery::term("z"), 10);
        assert_eq!(top.score_docs.len(), 1);
        assert_eq!(top.score_docs[0].doc, 2);
        assert!(top.max_score > 0.0);
    }

    #[test]
    fn test_empty_query_and_unknown_terms() {
        let s = searcher(Similarity::Classic);
        assert_eq!(s.search(&BooleanQuery::new(), 10), TopDocs::default());
        assert_eq!(s.search(&BooleanQuery::term("nope"), 10).total_hits, 0);
    }

    #[test]
    fn test_open_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let writer = store::IndexWriter::create(dir.path(), IndexMeta::new(2, true)).unwrap();
        writer
            .add_documents(&[doc("d0", &["a", "b"]), doc("d1", &["c"])])
            .unwrap();
        writer.close().unwrap();

        let s = IndexSearcher::open(dir.path(), Similarity::Classic).unwrap();
        assert_eq!(s.num_docs(), 2);
        assert!(s.meta().canonical);
        assert_eq!(s.doc(1).unwrap().header, "d1");
        assert_eq!(s.doc_freq("a"), 1);
    }
}
