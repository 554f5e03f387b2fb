//src/types.rs

use serde::{Deserialize, Serialize};
use std::fmt;

/// A reference or query sequence read from FASTA.
#[derive(Debug, Clone)]
pub struct SequenceRecord {
    /// Header line without the leading '>'
    pub header: String,
    /// Upper-cased nucleotides
    pub sequence: String,
    /// File name (no directories) the record came from
    pub filename: String,
    /// Serialized lineage, empty when unknown
    pub lineage: String,
}

/// Which strand of a reference an indexed document carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strand {
    Forward,
    Reverse,
}

impl Strand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strand::Forward => "forward",
            Strand::Reverse => "reverse",
        }
    }
}

impl fmt::Display for Strand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scored document returned for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    #[serde(rename = "docid")]
    pub doc_id: u32,
    /// Position in the ranked page (0 = best)
    pub rank: usize,
    pub score: f32,
    pub filename: String,
    pub header: String,
    #[serde(rename = "sequence_direction")]
    pub strand: Strand,
    #[serde(rename = "taxon_hierarchy")]
    pub lineage: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultType {
    Unknown,
    Vague,
    Classified,
    /// The query could not be processed; `error` on the result says why.
    Failed,
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResultType::Unknown => "UNKNOWN",
            ResultType::Vague => "VAGUE",
            ResultType::Classified => "CLASSIFIED",
            ResultType::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Rank reported when nothing could be resolved.
pub const UNKNOWN_RANK: &str = "unknown";

/// Verdict for one query sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub query_header: String,
    pub query: String,
    pub result: Vec<Hit>,
    #[serde(rename = "type")]
    pub result_type: ResultType,
    pub taxon_rank: String,
    pub taxon_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClassificationResult {
    pub fn unknown(header: &str, sequence: &str) -> Self {
        Self {
            query_header: header.to_string(),
            query: sequence.to_string(),
            result: Vec::new(),
            result_type: ResultType::Unknown,
            taxon_rank: UNKNOWN_RANK.to_string(),
            taxon_name: String::new(),
            error: None,
        }
    }

    pub fn failed(header: &str, sequence: &str, error: impl fmt::Display) -> Self {
        Self {
            result_type: ResultType::Failed,
            error: Some(error.to_string()),
            ..Self::unknown(header, sequence)
        }
    }

    pub fn is_classified(&self) -> bool {
        self.result_type == ResultType::Classified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_json_field_names() {
        let mut res = ClassificationResult::unknown("read1", "ACGT");
        res.result.push(Hit {
            doc_id: 3,
            rank: 0,
            score: 2.5,
            filename: "ref.fna".into(),
            header: "NC_1".into(),
            strand: Strand::Reverse,
            lineage: "[]".into(),
        });
        let json = serde_json::to_value(&res).unwrap();
        assert_eq!(json["type"], "UNKNOWN");
        assert_eq!(json["query_header"], "read1");
        assert_eq!(json["result"][0]["docid"], 3);
        assert_eq!(json["result"][0]["sequence_direction"], "reverse");
        assert_eq!(json["result"][0]["taxon_hierarchy"], "[]");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_failed_carries_error() {
        let res = ClassificationResult::failed("h", "", "sequence is empty");
        assert_eq!(res.result_type, ResultType::Failed);
        assert_eq!(res.error.as_deref(), Some("sequence is empty"));
        let back: ClassificationResult =
            serde_json::from_str(&serde_json::to_string(&res).unwrap()).unwrap();
        assert_eq!(back, res);
    }
}
