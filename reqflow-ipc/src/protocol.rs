//! Wire protocol definitions and message types
//!
//! Every message is one JSON object on one `\n`-terminated line, in both
//! directions:
//!
//! - request: `{"id": <any>, "method": <string>, "params": <object>}`
//! - response: `{"id": <same id or null>, "response": {"ok": true, ...} | {"error": <string>, "trace"?: <string>}}`
//! - startup: `{"capabilities": [<method names>], "name": <worker identity>}`

use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

/// Result fields of a successful call
pub type JsonMap = serde_json::Map<String, JsonValue>;

/// A request sent from the orchestrator to a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Caller-chosen, opaque; echoed back verbatim in the response
    pub id: JsonValue,
    pub method: String,
    #[serde(default = "empty_params")]
    pub params: JsonValue,
}

impl Request {
    pub fn new(id: impl Into<JsonValue>, method: impl Into<String>, params: JsonValue) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

fn empty_params() -> JsonValue {
    JsonValue::Object(JsonMap::new())
}

/// A response written by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// The request id, or null when the request carried none
    #[serde(default)]
    pub id: JsonValue,
    pub response: ResponseBody,
}

/// Either an error envelope or the result fields of a successful call.
///
/// Any object with an `error` key is a failure; everything else must carry
/// `"ok": true`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Failure {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        trace: Option<String>,
    },
    Success(JsonMap),
}

impl<'de> Deserialize<'de> for ResponseBody {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut fields = JsonMap::deserialize(deserializer)?;

        if let Some(error) = fields.remove("error") {
            let trace = match fields.remove("trace") {
                None | Some(JsonValue::Null) => None,
                Some(trace) => Some(text_of(trace)),
            };
            return Ok(ResponseBody::Failure {
                error: text_of(error),
                trace,
            });
        }

        match fields.get("ok") {
            Some(JsonValue::Bool(true)) => Ok(ResponseBody::Success(fields)),
            Some(other) => Err(de::Error::custom(format!(
                "response has \"ok\": {} and no error",
                other
            ))),
            None => Err(de::Error::custom(
                "response carries neither \"ok\": true nor an error",
            )),
        }
    }
}

/// Strings as-is, any other value as its JSON text
fn text_of(value: JsonValue) -> String {
    match value {
        JsonValue::String(text) => text,
        other => other.to_string(),
    }
}

impl ResponseBody {
    /// Successful result; always carries `ok: true`
    pub fn success(mut fields: JsonMap) -> Self {
        fields.insert("ok".to_string(), JsonValue::Bool(true));
        ResponseBody::Success(fields)
    }

    pub fn failure(error: impl Into<String>, trace: Option<String>) -> Self {
        ResponseBody::Failure {
            error: error.into(),
            trace,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ResponseBody::Success(_))
    }
}

/// The one-time startup message a worker emits before reading any request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub capabilities: Vec<String>,
    pub name: String,
}

impl Capabilities {
    pub fn supports(&self, method: &str) -> bool {
        self.capabilities.iter().any(|m| m == method)
    }
}

/// One line received from a child process
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// The line parsed as JSON
    Message(JsonValue),
    /// The line did not parse; the text is kept as-is
    Unparsed { raw: String },
}

/// Classify a single non-blank line
pub fn decode_line(line: &str) -> Inbound {
    match serde_json::from_str(line) {
        Ok(value) => Inbound::Message(value),
        Err(_) => Inbound::Unparsed {
            raw: line.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_params_default_to_empty_object() {
        let request: Request = serde_json::from_str(r#"{"id": "a", "method": "normalize"}"#).unwrap();
        assert_eq!(request.id, json!("a"));
        assert_eq!(request.params, json!({}));
    }

    #[test]
    fn test_response_body_classification() {
        let ok: Response =
            serde_json::from_value(json!({"id": 3, "response": {"ok": true, "count": 2}})).unwrap();
        match ok.response {
            ResponseBody::Success(fields) => assert_eq!(fields["count"], json!(2)),
            other => panic!("expected success, got {:?}", other),
        }

        let failed: Response = serde_json::from_value(
            json!({"id": null, "response": {"error": "unknown method frobnicate"}}),
        )
        .unwrap();
        assert_eq!(failed.id, JsonValue::Null);
        assert_eq!(
            failed.response,
            ResponseBody::failure("unknown method frobnicate", None)
        );
    }

    #[test]
    fn test_error_key_always_means_failure() {
        let body: ResponseBody = serde_json::from_value(json!({"error": 42})).unwrap();
        assert_eq!(body, ResponseBody::failure("42", None));

        let body: ResponseBody =
            serde_json::from_value(json!({"error": null, "trace": "x"})).unwrap();
        assert_eq!(body, ResponseBody::failure("null", Some("x".to_string())));

        let body: ResponseBody =
            serde_json::from_value(json!({"ok": true, "error": "late failure"})).unwrap();
        assert!(!body.is_success());
    }

    #[test]
    fn test_success_requires_ok_true() {
        for body in [json!({"ok": false}), json!({}), json!({"ok": "yes", "count": 1})] {
            let decoded = serde_json::from_value::<Response>(json!({"id": 1, "response": body}));
            assert!(decoded.is_err(), "{} decoded as a response", body);
        }
    }

    #[test]
    fn test_success_sets_ok_flag() {
        let mut fields = JsonMap::new();
        fields.insert("chunks".to_string(), json!(["a"]));
        let body = ResponseBody::success(fields);

        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value, json!({"chunks": ["a"], "ok": true}));
    }

    #[test]
    fn test_failure_omits_missing_trace() {
        let value = serde_json::to_value(ResponseBody::failure("boom", None)).unwrap();
        assert_eq!(value, json!({"error": "boom"}));
    }

    #[test]
    fn test_decode_line() {
        assert_eq!(decode_line("null"), Inbound::Message(JsonValue::Null));
        assert_eq!(
            decode_line("Traceback (most recent call last):"),
            Inbound::Unparsed {
                raw: "Traceback (most recent call last):".to_string()
            }
        );
    }
}
