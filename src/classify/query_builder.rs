//src/classify/query_builder.rs

use super::ClassifyError;
use crate::config::QueryGeneration;
use crate::index::{BooleanQuery, Clause};
use crate::kmer::Term;

/// Number of clauses that must match: `floor(fraction * clauses)`.
pub fn required_clauses(fraction: f64, clauses: usize) -> usize {
    (fraction * clauses as f64).floor() as usize
}

/// Turns analyzed query terms into one boolean query.
#[derive(Debug, Clone, Copy)]
pub struct QueryBuilder {
    pub strategy: QueryGeneration,
    pub min_should_match: f64,
    pub max_clause_count: usize,
}

impl QueryBuilder {
    pub fn new(strategy: QueryGeneration, min_should_match: f64, max_clause_count: usize) -> Self {
        Self {
            strategy,
            min_should_match,
            max_clause_count,
        }
    }

    /// `None` when there is nothing to search for. A single term becomes a
    /// query that requires it. `skip` is the stride the terms were produced
    /// with; the paired strategy sizes its slop from it.
    pub fn build(&self, terms: &[Term], skip: usize) -> Result<Option<BooleanQuery>, ClassifyError> {
        match terms {
            [] => return Ok(None),
            [only] => return Ok(Some(BooleanQuery::term(only.text.clone()))),
            _ => {}
        }

        let clauses = match self.strategy {
            QueryGeneration::NaiveKmer => naive_clauses(terms),
            QueryGeneration::ChainProximity => chain_clauses(terms),
            QueryGeneration::PairedProximity => paired_clauses(terms, skip),
        };

        if clauses.len() > self.max_clause_count {
            return Err(ClassifyError::TooManyClauses {
                count: clauses.len(),
                max: self.max_clause_count,
            });
        }

        let minimum_should_match = required_clauses(self.min_should_match, clauses.len());
        Ok(Some(BooleanQuery {
            clauses,
            minimum_should_match,
        }))
    }
}

fn naive_clauses(terms: &[Term]) -> Vec<Clause> {
    terms.iter().map(|t| Clause::Term(t.text.clone())).collect()
}

/// Every overlapping neighbour pair, slop = offset gap + 1.
fn chain_clauses(terms: &[Term]) -> Vec<Clause> {
    terms
        .windows(2)
        .filter(|w| w[1].offset > w[0].offset)
        .map(|w| Clause::Phrase {
            first: w[0].text.clone(),
            second: w[1].text.clone(),
            slop: (w[1].offset - w[0].offset + 1) as u32,
        })
        .collect()
}

/// Disjoint pairs (0,1), (2,3), ... with slop = 2 * skip; an odd one out
/// becomes a term clause.
fn paired_clauses(terms: &[Term], skip: usize) -> Vec<Clause> {
    let slop = (2 * skip) as u32;
    terms
        .chunks(2)
        .map(|pair| match pair {
            [a, b] => Clause::Phrase {
                first: a.text.clone(),
                second: b.text.clone(),
                slop,
            },
            _ => Clause::Term(pair[0].text.clone()),
        })
        .collect()
}
