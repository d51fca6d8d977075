use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::oneshot;
use uuid::Uuid;

/// The single OS capability every write operation depends on.
pub const WRITE_CALL_LOG: &str = "android.permission.WRITE_CALL_LOG";

/// Direction of a call. Codes outside the three published ones pass through untouched.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum CallType {
    Incoming,
    Outgoing,
    Missed,
    Other(i32),
}

impl CallType {
    pub fn code(self) -> i32 {
        match self {
            CallType::Incoming => 1,
            CallType::Outgoing => 2,
            CallType::Missed => 3,
            CallType::Other(code) => code,
        }
    }
}

impl From<i32> for CallType {
    fn from(code: i32) -> Self {
        match code {
            1 => CallType::Incoming,
            2 => CallType::Outgoing,
            3 => CallType::Missed,
            other => CallType::Other(other),
        }
    }
}

impl From<CallType> for i32 {
    fn from(t: CallType) -> Self {
        t.code()
    }
}

/// A validated call-history record, ready for the store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallLogEntry {
    pub number: String,
    #[serde(rename = "date")]
    pub timestamp_millis: i64,
    #[serde(rename = "duration")]
    pub duration_seconds: i64,
    #[serde(rename = "type")]
    pub call_type: CallType,
    #[serde(rename = "new")]
    pub is_new: bool,
    pub is_read: bool,
}

/// Caller-claimed vs. OS-confirmed access, evaluated once per request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PermissionState {
    pub declared_by_caller: bool,
    pub granted_by_os: bool,
}

#[derive(Debug, Error)]
#[error("unknown action: {0}")]
pub struct UnknownAction(pub String);

/// Command identifiers accepted from the script bridge.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Action {
    WriteBulk,
    Clear,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::WriteBulk => "writeBulk",
            Action::Clear => "clear",
        }
    }
}

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "writeBulk" => Ok(Action::WriteBulk),
            "clear" => Ok(Action::Clear),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work a request asks the store to do.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteOperation {
    /// Raw batch exactly as received; decoded on the worker.
    WriteBulk { records: Value },
    Clear,
}

impl WriteOperation {
    pub fn action(&self) -> Action {
        match self {
            WriteOperation::WriteBulk { .. } => Action::WriteBulk,
            WriteOperation::Clear => Action::Clear,
        }
    }
}

/// Terminal outcome of one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteResult {
    Ok(usize),
    DecodingError(String),
    OperationError(String),
    PermissionDenied,
    InvalidAction,
}

impl WriteResult {
    /// Status tag as seen by the script side.
    pub fn tag(&self) -> &'static str {
        match self {
            WriteResult::Ok(_) => "ok",
            WriteResult::DecodingError(_) => "json-error",
            WriteResult::OperationError(_) => "error",
            WriteResult::PermissionDenied => "permission-access",
            WriteResult::InvalidAction => "action-invalid",
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, WriteResult::Ok(_))
    }

    /// `{"status": tag, "value": count | message}`
    pub fn to_wire(&self) -> Value {
        let value = match self {
            WriteResult::Ok(count) => Value::from(*count),
            WriteResult::DecodingError(msg) | WriteResult::OperationError(msg) => {
                Value::from(msg.as_str())
            }
            WriteResult::PermissionDenied | WriteResult::InvalidAction => Value::from(self.tag()),
        };
        serde_json::json!({ "status": self.tag(), "value": value })
    }
}

pub type PendingResult = oneshot::Receiver<WriteResult>;

/// Single-fire result sink. Consumed on delivery, so a request can complete only once.
#[derive(Debug)]
pub struct ResultSink {
    request_id: Uuid,
    tx: oneshot::Sender<WriteResult>,
}

impl ResultSink {
    pub fn channel(request_id: Uuid) -> (Self, PendingResult) {
        let (tx, rx) = oneshot::channel();
        (Self { request_id, tx }, rx)
    }

    pub fn deliver(self, result: WriteResult) {
        if self.tx.send(result).is_err() {
            tracing::debug!(
                request_id = %self.request_id,
                "result receiver dropped before delivery"
            );
        }
    }
}

/// One invocation, threaded from the dispatcher through the gate to the executor.
#[derive(Debug)]
pub struct WriteRequest {
    pub id: Uuid,
    pub operation: WriteOperation,
    pub declared_permission: bool,
    pub sink: ResultSink,
}

impl WriteRequest {
    pub fn new(operation: WriteOperation, declared_permission: bool) -> (Self, PendingResult) {
        let id = Uuid::new_v4();
        let (sink, rx) = ResultSink::channel(id);
        (
            Self {
                id,
                operation,
                declared_permission,
                sink,
            },
            rx,
        )
    }

    pub fn action(&self) -> Action {
        self.operation.action()
    }

    /// Completes the request, consuming it.
    pub fn complete(self, result: WriteResult) {
        self.sink.deliver(result);
    }
}
