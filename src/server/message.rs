//src/server/message.rs

use serde::{Deserialize, Serialize};

use crate::types::{ClassificationResult, Hit, ResultType};

/// Body of a message on the request queue. The query header stays with the
/// client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationRequestMessage {
    pub req_id: u64,
    pub sequence: String,
}

impl ClassificationRequestMessage {
    pub fn new(req_id: u64, sequence: impl Into<String>) -> Self {
        Self {
            req_id,
            sequence: sequence.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Body of a message on a client's reply queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResponseMessage {
    pub req_id: u64,
    #[serde(default)]
    pub result: Vec<Hit>,
    #[serde(rename = "type")]
    pub result_type: ResultType,
    #[serde(default)]
    pub taxon_rank: String,
    #[serde(default)]
    pub taxon_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClassificationResponseMessage {
    pub fn from_result(req_id: u64, result: ClassificationResult) -> Self {
        Self {
            req_id,
            result: result.result,
            result_type: result.result_type,
            taxon_rank: result.taxon_rank,
            taxon_name: result.taxon_name,
            error: result.error,
        }
    }

    /// Rebuild the full result from the query the client kept.
    pub fn into_result(self, header: &str, sequence: &str) -> ClassificationResult {
        ClassificationResult {
            query_header: header.to_string(),
            query: sequence.to_string(),
            result: self.result,
            result_type: self.result_type,
            taxon_rank: self.taxon_rank,
            taxon_name: self.taxon_name,
            error: self.error,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let msg = ClassificationRequestMessage::new(7, "ACGT");
        let v: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(v["req_id"], 7);
        assert_eq!(v["sequence"], "ACGT");
        assert_eq!(v.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_response_restores_header() {
        let mut res = ClassificationResult::unknown("srv", "ACGT");
        res.result_type = ResultType::Classified;
        res.taxon_rank = "species".into();
        res.taxon_name = "E. coli".into();

        let json = ClassificationResponseMessage::from_result(3, res).to_json().unwrap();
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["type"], "CLASSIFIED");
        assert!(v.get("query_header").is_none());

        let back = ClassificationResponseMessage::from_json(&json)
            .unwrap()
            .into_result("read-1", "ACGT");
        assert_eq!(back.query_header, "read-1");
        assert_eq!(back.taxon_name, "E. coli");
        assert!(back.is_classified());
    }

    #[test]
    fn test_response_tolerates_missing_optional_fields() {
        let msg = ClassificationResponseMessage::from_json(r#"{"req_id":1,"type":"UNKNOWN"}"#).unwrap();
        assert!(msg.result.is_empty());
        assert_eq!(msg.error, None);
    }
}
