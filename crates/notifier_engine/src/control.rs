use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
#[error("malformed control message: {0}")]
pub struct ControlError(String);

/// Requests from the control surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ControlMessage {
    Toggle { enabled: bool },
    QueryCount,
    /// The browsing context moved to `url`.
    Navigate { url: String },
}

impl ControlMessage {
    pub fn from_json(line: &str) -> Result<Self, ControlError> {
        serde_json::from_str(line).map_err(|err| ControlError(err.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlReply {
    Count { count: usize },
    Ack { ok: bool },
}

impl ControlReply {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
