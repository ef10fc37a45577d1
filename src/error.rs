use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

pub const GENERIC_FAILURE: &str = "API request failed";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Session expired. Please login again.")]
    SessionExpired,

    #[error("{message}")]
    Request { status: StatusCode, message: String },

    #[error("{0}")]
    Validation(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    pub fn validation(msg: impl Into<String>) -> Self {
        ClientError::Validation(msg.into())
    }

    /// Builds a request failure from a non-2xx status and whatever body came with it.
    pub fn from_response(status: StatusCode, body: &[u8]) -> Self {
        let message = serde_json::from_slice::<Value>(body)
            .ok()
            .and_then(|v| server_message(&v))
            .unwrap_or_else(|| GENERIC_FAILURE.to_string());

        ClientError::Request { status, message }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Request { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, ClientError::SessionExpired)
    }
}

// `detail` is what the backend sends for most failures; `error` covers plain
// JSON error bodies and the rest are per-field validation lists.
fn server_message(body: &Value) -> Option<String> {
    let obj = body.as_object()?;

    for key in ["detail", "error"] {
        if let Some(msg) = obj.get(key).and_then(Value::as_str) {
            return Some(msg.to_string());
        }
    }

    if let Some(msg) = first_string(obj.get("non_field_errors")) {
        return Some(msg);
    }

    obj.iter()
        .find_map(|(field, value)| first_string(Some(value)).map(|msg| format!("{field}: {msg}")))
}

fn first_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(|v| v.as_str().map(str::to_string)),
        _ => None,
    }
}
