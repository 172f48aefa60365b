//! The uniform `{code, message, data}` body returned by the gateway and,
//! where relevant, the orchestrator's secondary proxy (spec.md §4.9, §6).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub code: i64,
    pub message: String,
    pub data: Value,
}

impl Envelope {
    pub fn ok(data: Value) -> Self {
        Self {
            code: 0,
            message: "ok".to_string(),
            data,
        }
    }

    pub fn upstream_error(status: u16, data: Value) -> Self {
        Self {
            code: status as i64,
            message: "upstream_error".to_string(),
            data,
        }
    }

    pub fn error(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: Value::Null,
        }
    }
}
