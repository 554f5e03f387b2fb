//src/classify/consensus.rs

use crate::lineage::Lineage;
use crate::types::{Hit, ResultType, UNKNOWN_RANK};

/// Outcome of resolving a tie set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub result_type: ResultType,
    pub rank: String,
    pub name: String,
}

impl Verdict {
    fn new(result_type: ResultType, rank: &str, name: &str) -> Self {
        Self {
            result_type,
            rank: rank.to_string(),
            name: name.to_string(),
        }
    }

    fn unknown() -> Self {
        Self::new(ResultType::Unknown, UNKNOWN_RANK, "")
    }

    fn vague() -> Self {
        Self::new(ResultType::Vague, UNKNOWN_RANK, "")
    }

    fn classified_unranked() -> Self {
        Self::new(ResultType::Classified, UNKNOWN_RANK, "")
    }
}

fn parse_lineage(hit: &Hit) -> Option<Lineage> {
    if hit.lineage.trim().is_empty() {
        return None;
    }
    match Lineage::parse(&hit.lineage) {
        Ok(l) => Some(l),
        Err(e) => {
            log::debug!("Unparseable lineage on document {}: {}", hit.doc_id, e);
            None
        }
    }
}

/// Decide the taxon shared by every hit of a tie set.
///
/// One hit classifies at its deepest ranked node. Several hits classify at the
/// deepest ranked node of the first hit that every other hit also carries, and
/// are vague when there is none or when any of them lacks a usable lineage.
pub fn resolve(hits: &[Hit]) -> Verdict {
    match hits {
        [] => Verdict::unknown(),
        [single] => match parse_lineage(single).as_ref().and_then(Lineage::deepest_classifiable) {
            Some(tax) => Verdict::new(ResultType::Classified, &tax.rank, &tax.name),
            None => Verdict::classified_unranked(),
        },
        _ => {
            let mut lineages = Vec::with_capacity(hits.len());
            for hit in hits {
                match parse_lineage(hit) {
                    Some(l) if !l.is_empty() => lineages.push(l),
                    _ => return Verdict::vague(),
                }
            }

            let (first, others) = match lineages.split_first() {
                Some(split) => split,
                None => return Verdict::vague(),
            };
            let verdict = first
                .classifiable()
                .rev()
                .find(|tax| others.iter().all(|l| l.contains_classifiable(tax.taxid)))
                .map(|tax| Verdict::new(ResultType::Classified, &tax.rank, &tax.name))
                .unwrap_or_else(Verdict::vague);
            verdict
        }
    }
}
