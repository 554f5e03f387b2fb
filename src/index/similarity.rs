//src/index/similarity.rs

/// Scoring function used by the searcher.
///
/// The classic model scores roughly on the scale of `sqrt(freq) * idf` per
/// clause, which is what the default tie tolerance of 1.0 is calibrated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Similarity {
    /// TF-IDF vector space scoring with coord
    #[default]
    Classic,
    /// Okapi BM25 with k1 = 1.2, b = 0.75
    Bm25,
}

const BM25_K1: f32 = 1.2;
const BM25_B: f32 = 0.75;

impl Similarity {
    /// Map a configured scoring name. Unknown names give `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "default" | "tfidf" | "vectorspace" => Some(Similarity::Classic),
            "bm25" => Some(Similarity::Bm25),
            _ => None,
        }
    }

    pub fn idf(&self, num_docs: usize, doc_freq: usize) -> f32 {
        let n = num_docs as f32;
        let df = doc_freq as f32;
        match self {
            Similarity::Classic => 1.0 + (n / (df + 1.0)).ln(),
            Similarity::Bm25 => (1.0 + (n - df + 0.5) / (df + 0.5)).ln(),
        }
    }

    /// Weight of one clause given its (possibly sloppy) frequency in a
    /// document, the summed idf of its terms, and the document length.
    pub fn clause_score(&self, freq: f32, idf: f32, doc_len: usize, avg_doc_len: f32) -> f32 {
        if freq <= 0.0 {
            return 0.0;
        }
        match self {
            Similarity::Classic => freq.sqrt() * idf,
            Similarity::Bm25 => {
                let norm = if avg_doc_len > 0.0 {
                    1.0 - BM25_B + BM25_B * doc_len as f32 / avg_doc_len
                } else {
                    1.0
                };
                idf * freq * (BM25_K1 + 1.0) / (freq + BM25_K1 * norm)
            }
        }
    }

    /// Multiplier for matching `matched` of `total` clauses.
    pub fn coord(&self, matched: usize, total: usize) -> f32 {
        match self {
            Similarity::Classic if total > 0 => matched as f32 / total as f32,
            _ => 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name() {
        assert_eq!(Similarity::from_name("default"), Some(Similarity::Classic));
        assert_eq!(Similarity::from_name("TFIDF"), Some(Similarity::Classic));
        assert_eq!(Similarity::from_name("vectorspace"), Some(Similarity::Classic));
        assert_eq!(Similarity::from_name("bm25"), Some(Similarity::Bm25));
        assert_eq!(Similarity::from_name("lm"), None);
    }

    #[test]
    fn test_rare_terms_weigh_more() {
        for sim in [Similarity::Classic, Similarity::Bm25] {
            assert!(sim.idf(100, 1) > sim.idf(100, 50));
        }
    }

    #[test]
    fn test_classic_clause_and_coord() {
        let s = Similarity::Classic;
        assert!((s.clause_score(4.0, 1.5, 10, 10.0) - 3.0).abs() < 1e-6);
        assert_eq!(s.clause_score(0.0, 1.5, 10, 10.0), 0.0);
        assert!((s.coord(1, 4) - 0.25).abs() < 1e-6);
        assert_eq!(Similarity::Bm25.coord(1, 4), 1.0);
    }

    #[test]
    fn test_bm25_saturates() {
        let s = Similarity::Bm25;
        let one = s.clause_score(1.0, 1.0, 10, 10.0);
        let many = s.clause_score(100.0, 1.0, 10, 10.0);
        assert!(many > one);
        assert!(many < 1.0 + BM25_K1 + 1e-3);
    }
}
