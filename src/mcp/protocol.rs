use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Parameters of an MCP call
pub type Params = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Request,
    Response,
    Notification,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpRequest {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub method: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub id: Option<String>,
}

impl McpRequest {
    /// New request with a fresh UUID id
    pub fn new(method: impl Into<String>, params: Params) -> Self {
        Self {
            message_type: MessageType::Request,
            method: method.into(),
            params,
            id: Some(Uuid::new_v4().to_string()),
        }
    }
}

/// Reply envelope. Carries either `result` or `error`; a bare protocol
/// error has type `error` and no id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpResponse {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl McpResponse {
    pub fn success(id: Option<String>, result: Value) -> Self {
        Self {
            message_type: MessageType::Response,
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<String>, error: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Response,
            id,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn protocol_error(error: impl Into<String>) -> Self {
        Self {
            message_type: MessageType::Error,
            id: None,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.message_type == MessageType::Response
    }

    /// Turn the envelope into its result, or its error message
    pub fn into_result(self) -> anyhow::Result<Value> {
        match self.error {
            Some(error) => Err(anyhow::anyhow!(error)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let mut params = Params::new();
        params.insert("query".to_string(), json!("SELECT 1"));
        let request = McpRequest::new("query_database", params);

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "request");
        assert_eq!(value["method"], "query_database");
        assert_eq!(value["params"]["query"], "SELECT 1");
        assert_eq!(value["id"].as_str().unwrap().len(), 36);
    }

    #[test]
    fn test_request_defaults() {
        let request: McpRequest =
            serde_json::from_str(r#"{"type":"request","method":"get_schema"}"#).unwrap();
        assert!(request.params.is_empty());
        assert!(request.id.is_none());
    }

    #[test]
    fn test_response_wire_format() {
        let ok = McpResponse::success(Some("1".to_string()), json!({"success": true}));
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"type": "response", "id": "1", "result": {"success": true}})
        );

        let failed = McpResponse::failure(Some("2".to_string()), "Method 'x' not found");
        assert_eq!(
            serde_json::to_value(&failed).unwrap(),
            json!({"type": "response", "id": "2", "error": "Method 'x' not found"})
        );

        let invalid = McpResponse::protocol_error("Invalid request format");
        assert_eq!(
            serde_json::to_value(&invalid).unwrap(),
            json!({"type": "error", "error": "Invalid request format"})
        );
        assert!(!invalid.is_success());
        assert_eq!(
            invalid.into_result().unwrap_err().to_string(),
            "Invalid request format"
        );
    }
}
