//! Row shapes the Store returns and the HTTP envelope serializes.

use serde::{Deserialize, Serialize};

/// Outcome of a single mutating statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
}

/// Result rows for a single query statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_rows_serialize_in_wire_shape() {
        let rows = QueryRows {
            columns: vec!["1".into()],
            types: vec!["integer".into()],
            values: vec![vec![serde_json::json!(1)]],
            ..Default::default()
        };
        let json = serde_json::to_value(&rows).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"columns": ["1"], "types": ["integer"], "values": [[1]]})
        );
    }

    #[test]
    fn execute_result_omits_absent_fields() {
        let res = ExecuteResult {
            rows_affected: Some(1),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_string(&res).unwrap(),
            r#"{"rows_affected":1}"#
        );
    }
}
