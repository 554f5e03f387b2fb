//src/lineage.rs

use serde::{Deserialize, Serialize};

use crate::taxdb::Taxon;

/// Rank string that marks an unranked node.
pub const NO_RANK: &str = "no rank";

/// Taxonomic path, root first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Lineage {
    pub tree: Vec<Taxon>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LineageJson {
    Bare(Vec<Taxon>),
    Wrapped { tree: Vec<Taxon> },
}

/// Whether a node carries a usable rank.
pub fn is_classifiable(taxon: &Taxon) -> bool {
    let rank = taxon.rank.trim();
    !rank.is_empty() && !rank.eq_ignore_ascii_case(NO_RANK)
}

impl Lineage {
    pub fn new(tree: Vec<Taxon>) -> Self {
        Self { tree }
    }

    /// Parse a stored lineage: a JSON array of nodes, or an object holding
    /// them under `tree`.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let tree = match serde_json::from_str::<LineageJson>(text.trim())? {
            LineageJson::Bare(tree) => tree,
            LineageJson::Wrapped { tree } => tree,
        };
        Ok(Self { tree })
    }

    /// Compact JSON array form as stored in the index.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.tree)
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Ranked nodes, root first.
    pub fn classifiable(&self) -> impl DoubleEndedIterator<Item = &Taxon> {
        self.tree.iter().filter(|t| is_classifiable(t))
    }

    /// Deepest ranked node.
    pub fn deepest_classifiable(&self) -> Option<&Taxon> {
        self.classifiable().next_back()
    }

    pub fn contains_classifiable(&self, taxid: u32) -> bool {
        self.classifiable().any(|t| t.taxid == taxid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
        {"taxid": 1, "name": "root", "parent": 1, "rank": "no rank"},
        {"taxid": 2, "name": "Bacteria", "parent": 1, "rank": "superkingdom"},
        {"taxid": 1224, "name": "Proteobacteria", "parent": 2, "rank": "phylum"},
        {"taxid": 99, "name": "strain x", "parent": 1224, "rank": ""}
    ]"#;

    #[test]
    fn test_parse_array_and_wrapped() {
        let a = Lineage::parse(SAMPLE).unwrap();
        let b = Lineage::parse(&format!(r#"{{"tree": {SAMPLE}}}"#)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.tree.len(), 4);
    }

    #[test]
    fn test_classifiable_skips_unranked() {
        let l = Lineage::parse(SAMPLE).unwrap();
        let ids: Vec<u32> = l.classifiable().map(|t| t.taxid).collect();
        assert_eq!(ids, vec![2, 1224]);
        assert_eq!(l.deepest_classifiable().unwrap().rank, "phylum");
        assert!(l.contains_classifiable(2));
        assert!(!l.contains_classifiable(1));
    }

    #[test]
    fn test_roundtrip_through_json() {
        let l = Lineage::parse(SAMPLE).unwrap();
        assert_eq!(Lineage::parse(&l.to_json().unwrap()).unwrap(), l);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(Lineage::parse("not json").is_err());
        assert!(Lineage::parse("\"string\"").is_err());
        assert!(Lineage::parse("").is_err());
    }

    #[test]
    fn test_no_rank_is_case_insensitive() {
        let t = Taxon {
            taxid: 5,
            name: "x".into(),
            parent: 1,
            rank: "No Rank".into(),
        };
        assert!(!is_classifiable(&t));
    }
}
