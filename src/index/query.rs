//src/index/query.rs

/// One optional clause of a [`BooleanQuery`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    /// A single term anywhere in the body.
    Term(String),
    /// Two terms in order, `second` starting within `slop` positions of
    /// directly after `first`.
    Phrase {
        first: String,
        second: String,
        slop: u32,
    },
}

impl Clause {
    pub fn terms(&self) -> impl Iterator<Item = &str> {
        let (a, b) = match self {
            Clause::Term(t) => (t.as_str(), None),
            Clause::Phrase { first, second, .. } => (first.as_str(), Some(second.as_str())),
        };
        std::iter::once(a).chain(b)
    }
}

/// "Match at least `minimum_should_match` of these clauses."
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BooleanQuery {
    pub clauses: Vec<Clause>,
    pub minimum_should_match: usize,
}

impl BooleanQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-term query that requires the term.
    pub fn term(text: impl Into<String>) -> Self {
        Self {
            clauses: vec![Clause::Term(text.into())],
            minimum_should_match: 1,
        }
    }

    pub fn add(&mut self, clause: Clause) {
        self.clauses.push(clause);
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clause_terms() {
        let t = Clause::Term("AA".into());
        assert_eq!(t.terms().collect::<Vec<_>>(), vec!["AA"]);
        let p = Clause::Phrase {
            first: "AA".into(),
            second: "CC".into(),
            slop: 2,
        };
        assert_eq!(p.terms().collect::<Vec<_>>(), vec!["AA", "CC"]);
    }

    #[test]
    fn test_term_query_requires_its_term() {
        let q = BooleanQuery::term("AA");
        assert_eq!(q.len(), 1);
        assert_eq!(q.minimum_should_match, 1);
    }
}
