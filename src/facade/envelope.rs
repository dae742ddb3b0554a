use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BridgeError;

pub const STATUS_OK: i32 = 0;
pub const STATUS_FAILED: i32 = -1;

/// Incoming façade call, one JSON object per line.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "endpoint", rename_all = "snake_case")]
pub enum Request {
    Ping {
        #[serde(default)]
        value: Value,
    },
    InterruptExecutingMethods,
    InvokeModuleMethod {
        module: String,
        method: String,
        /// JSON text of `{"arguments": [...] | {...}}`.
        json: String,
    },
}

/// Reply to a façade call.
///
/// `{"status": 0, "result": v}`, `{"status": 0, "phase": n}` or
/// `{"status": -1, "error": "<Kind>: <message>"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub status: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn success(result: Value) -> Self {
        Self {
            status: STATUS_OK,
            result: Some(result),
            phase: None,
            error: None,
        }
    }

    pub fn phase(phase: u64) -> Self {
        Self {
            status: STATUS_OK,
            result: None,
            phase: Some(phase),
            error: None,
        }
    }

    pub fn failure(kind: &str, message: impl std::fmt::Display) -> Self {
        Self {
            status: STATUS_FAILED,
            result: None,
            phase: None,
            error: Some(format!("{}: {}", kind, message)),
        }
    }

    pub fn from_error(error: &BridgeError) -> Self {
        Self::failure(error.kind(), error)
    }

    pub fn is_success(&self) -> bool {
        self.status == STATUS_OK
    }
}

impl From<crate::error::Result<Value>> for Envelope {
    fn from(outcome: crate::error::Result<Value>) -> Self {
        match outcome {
            Ok(value) => Envelope::success(value),
            Err(e) => Envelope::from_error(&e),
        }
    }
}
