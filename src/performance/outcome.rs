use crate::error::CallError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// A status as returned by a target. Numeric codes and textual codes are both
/// seen in the wild, so both are kept as-is until normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StatusValue {
    Number(i64),
    Text(String),
}

impl fmt::Display for StatusValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusValue::Number(n) => write!(f, "{}", n),
            StatusValue::Text(s) => write!(f, "\"{}\"", s),
        }
    }
}

/// What came back from one call that reached the target.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: Option<StatusValue>,
    pub message: Option<String>,
}

impl Reply {
    pub fn ok() -> Self {
        Self {
            status: Some(StatusValue::Number(0)),
            message: None,
        }
    }

    pub fn with_status(status: StatusValue) -> Self {
        Self {
            status: Some(status),
            message: None,
        }
    }
}

/// Whether a status denotes success.
///
/// Accepted: numeric `0`, the string `"0"`, and `"ok"` in any letter case.
/// Everything else is a failure, including an absent status.
pub fn is_success_status(status: Option<&StatusValue>) -> bool {
    match status {
        Some(StatusValue::Number(code)) => *code == 0,
        Some(StatusValue::Text(text)) => text == "0" || text.eq_ignore_ascii_case("ok"),
        None => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Connection,
    Timeout,
    Status,
    Malformed,
}

impl FailureKind {
    pub const ALL: [FailureKind; 4] = [
        FailureKind::Connection,
        FailureKind::Timeout,
        FailureKind::Status,
        FailureKind::Malformed,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::Connection => "connection failure",
            FailureKind::Timeout => "timeout",
            FailureKind::Status => "non-success status",
            FailureKind::Malformed => "malformed response",
        }
    }
}

impl From<&CallError> for FailureKind {
    fn from(err: &CallError) -> Self {
        match err {
            CallError::Connection(_) => FailureKind::Connection,
            CallError::Timeout(_) => FailureKind::Timeout,
            CallError::Status { .. } => FailureKind::Status,
            CallError::Malformed(_) => FailureKind::Malformed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Ok,
    Fail { kind: FailureKind, detail: String },
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok)
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Outcome::Ok => None,
            Outcome::Fail { kind, .. } => Some(*kind),
        }
    }
}

/// Classify the result of one call into a tagged outcome.
pub fn classify(result: &Result<Reply, CallError>) -> Outcome {
    match result {
        Ok(reply) => match &reply.status {
            None => Outcome::Fail {
                kind: FailureKind::Malformed,
                detail: "response carried no status".to_string(),
            },
            Some(status) if is_success_status(Some(status)) => Outcome::Ok,
            Some(status) => Outcome::Fail {
                kind: FailureKind::Status,
                detail: match &reply.message {
                    Some(message) if !message.is_empty() => {
                        format!("status {}: {}", status, message)
                    }
                    _ => format!("status {}", status),
                },
            },
        },
        Err(err) => Outcome::Fail {
            kind: FailureKind::from(err),
            detail: err.to_string(),
        },
    }
}

/// One recorded call.
#[derive(Debug, Clone)]
pub struct InvocationResult {
    pub duration: Duration,
    pub outcome: Outcome,
    pub completed_at: Instant,
}

impl InvocationResult {
    pub fn new(duration: Duration, outcome: Outcome) -> Self {
        Self {
            duration,
            outcome,
            completed_at: Instant::now(),
        }
    }

    pub fn duration_ms(&self) -> f64 {
        crate::performance::metrics::duration_to_millis(self.duration)
    }
}
