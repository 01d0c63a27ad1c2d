//! Core type definitions shared by the Xcatcher client crates

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Tool names exposed by the Xcatcher MCP endpoint
pub mod tool_names {
    pub const CREATE_CRAWL_TASK: &str = "create_crawl_task";
    pub const X402_TOPUP: &str = "x402_topup";
    pub const GET_TASK_STATUS: &str = "get_task_status";
    pub const GET_RESULT_DOWNLOAD_URL: &str = "get_result_download_url";
    pub const CANCEL_TASK: &str = "cancel_task";

    /// Tools the client is willing to use; everything else is filtered out
    pub const TOOL_FILTER: [&str; 5] = [
        CREATE_CRAWL_TASK,
        X402_TOPUP,
        GET_TASK_STATUS,
        GET_RESULT_DOWNLOAD_URL,
        CANCEL_TASK,
    ];

    /// Tools the payment/task handshake cannot run without
    pub const HANDSHAKE_TOOLS: [&str; 4] = [
        CREATE_CRAWL_TASK,
        X402_TOPUP,
        GET_TASK_STATUS,
        GET_RESULT_DOWNLOAD_URL,
    ];
}

/// Error code the service uses to request a top-up
pub const PAYMENT_REQUIRED: &str = "PAYMENT_REQUIRED";

/// Error code used when a response has no recognizable result shape
pub const UNRECOGNIZED_RESPONSE: &str = "UNRECOGNIZED_RESPONSE";

/// Error code used when a failed result carries no error object
pub const UNKNOWN_ERROR: &str = "UNKNOWN";

/// Remote task identifier
///
/// The service may hand it back as an integer or a numeric string; tool
/// arguments always send it as an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl TaskId {
    /// Extract a task id from a `task_id` field value
    ///
    /// Returns `None` for absent, empty, zero or non-numeric values.
    pub fn from_value(value: &Value) -> Option<Self> {
        let id = match value {
            Value::Number(n) => match n.as_i64() {
                Some(id) => id,
                None => integral(n.as_f64()?)?,
            },
            Value::String(s) => s.trim().parse::<i64>().ok()?,
            _ => return None,
        };
        (id != 0).then_some(Self(id))
    }

    /// File name the downloaded result is saved under
    pub fn result_file_name(&self) -> String {
        format!("task_{}.xlsx", self.0)
    }
}

/// `42.0` is a valid id, `42.5` is not
fn integral(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_value(&Value::String(s.to_string()))
            .ok_or_else(|| format!("Invalid task id: {}", s))
    }
}

/// Token that lets the service deduplicate a repeated task creation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Generate a fresh key of the form `xcat-e2e-<16 hex chars>`
    pub fn generate() -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self(format!("xcat-e2e-{}", &hex[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Settlement network a top-up is paid on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Base,
    Solana,
}

impl Network {
    /// CAIP-2 chain id used in the payment proof
    pub fn chain_id(&self) -> &'static str {
        match self {
            Network::Base => "eip155:8453",
            Network::Solana => "solana:mainnet",
        }
    }

    /// Payload key that carries the proof evidence
    pub fn evidence_key(&self) -> &'static str {
        match self {
            Network::Base => "txHash",
            Network::Solana => "signature",
        }
    }

    /// Prompt shown when the evidence must be entered interactively
    pub fn evidence_prompt(&self) -> &'static str {
        match self {
            Network::Base => "Enter Base txHash (0x...): ",
            Network::Solana => "Enter Solana signature: ",
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Network::Base => write!(f, "base"),
            Network::Solana => write!(f, "solana"),
        }
    }
}

impl std::str::FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "base" => Ok(Network::Base),
            "solana" => Ok(Network::Solana),
            _ => Err(format!("Invalid network: {}. Use base or solana.", s)),
        }
    }
}

/// Error object of a failed tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Map<String, Value>,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: None,
            details: Map::new(),
        }
    }

    fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::new(UNKNOWN_ERROR);
        };
        Self {
            code: obj
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or(UNKNOWN_ERROR)
                .to_string(),
            message: obj.get("message").and_then(Value::as_str).map(str::to_string),
            details: obj
                .get("details")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        }
    }
}

/// Canonical result of a tool call, read from a normalized payload
///
/// `ok == true` implies `error.is_none()`, `ok == false` implies `error.is_some()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_result: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl ToolCallResult {
    /// Successful result with no payload fields
    pub fn success() -> Self {
        Self {
            ok: true,
            task_id: None,
            download_url: None,
            has_result: None,
            error: None,
        }
    }

    /// Failed result with the given error
    pub fn failure(error: ErrorInfo) -> Self {
        Self {
            ok: false,
            task_id: None,
            download_url: None,
            has_result: None,
            error: Some(error),
        }
    }

    /// Read a canonical result out of a normalized payload
    ///
    /// Anything that is not a mapping with a boolean `ok` becomes a failure
    /// with code `UNRECOGNIZED_RESPONSE`. Fields of the wrong type are
    /// treated as absent.
    pub fn from_value(value: &Value) -> Self {
        let Some(ok) = value.get("ok").and_then(Value::as_bool) else {
            let mut error = ErrorInfo::new(UNRECOGNIZED_RESPONSE);
            error.details.insert("raw".to_string(), value.clone());
            return Self::failure(error);
        };

        let error = if ok {
            None
        } else {
            Some(
                value
                    .get("error")
                    .map(ErrorInfo::from_value)
                    .unwrap_or_else(|| ErrorInfo::new(UNKNOWN_ERROR)),
            )
        };

        Self {
            ok,
            task_id: value.get("task_id").and_then(TaskId::from_value),
            download_url: value
                .get("download_url")
                .and_then(Value::as_str)
                .map(str::to_string),
            has_result: value.get("has_result").and_then(Value::as_bool),
            error,
        }
    }

    /// Error code of a failed result
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }

    /// Whether the service asked for a top-up
    pub fn is_payment_required(&self) -> bool {
        !self.ok && self.error_code() == Some(PAYMENT_REQUIRED)
    }

    /// Whether a status poll reports a finished result
    pub fn is_ready(&self) -> bool {
        self.ok && self.has_result == Some(true)
    }
}

/// A tool advertised by the remote `tools/list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}
