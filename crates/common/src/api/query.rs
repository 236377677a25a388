use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A column as declared by the client that uploaded the data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

/// POST /query request.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub prompt: String,
    /// CSV text with a header row.
    #[serde(default)]
    pub sample_data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns_info: Option<Vec<ColumnInfo>>,
}

/// POST /query response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryResponse {
    pub response: String,
    /// Validated chart specification, or `{}` when no chart was produced.
    #[serde(rename = "vegaSpec")]
    pub vega_spec: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cols: Option<Vec<String>>,
}

impl QueryResponse {
    /// A text-only answer carrying an empty chart.
    pub fn text_only(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            vega_spec: Value::Object(serde_json::Map::new()),
            cols: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_accepts_missing_optional_fields() {
        let req: QueryRequest =
            serde_json::from_str(r#"{"prompt": "show sales", "sample_data": "a,b\n1,2"}"#)
                .unwrap();
        assert_eq!(req.prompt, "show sales");
        assert!(req.columns_info.is_none());

        let empty: QueryRequest = serde_json::from_str("{}").unwrap();
        assert!(empty.sample_data.is_empty());
    }

    #[test]
    fn test_column_info_uses_type_key() {
        let req: QueryRequest = serde_json::from_str(
            r#"{"prompt": "p", "sample_data": "", "columns_info": [{"name": "sales", "type": "number"}]}"#,
        )
        .unwrap();
        let cols = req.columns_info.unwrap();
        assert_eq!(cols[0].column_type, "number");
    }

    #[test]
    fn test_response_wire_shape() {
        let resp = QueryResponse::text_only("Please provide data.");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["response"], "Please provide data.");
        assert_eq!(json["vegaSpec"], serde_json::json!({}));
        assert!(json.get("cols").is_none());
    }
}
