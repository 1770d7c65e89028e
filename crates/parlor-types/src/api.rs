use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Uniform wrapper returned by every action: `{"success": bool, ...}`.
///
/// Payload fields sit next to `success` rather than under a nested key, which
/// is the shape polling clients already expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl Envelope {
    pub fn ok() -> Self {
        Self {
            success: true,
            body: Map::new(),
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        let mut body = Map::new();
        body.insert("error".into(), Value::String(reason.into()));
        Self {
            success: false,
            body,
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.body.insert(key.to_string(), value.into());
        self
    }

    pub fn error(&self) -> Option<&str> {
        self.body.get("error").and_then(Value::as_str)
    }
}
