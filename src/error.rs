use thiserror::Error;

/// Invalid run configuration. Always fatal: the run never starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid duration '{0}' (use e.g. 100ms, 30s, 1m, 1h)")]
    InvalidDuration(String),

    #[error("no stages defined")]
    NoStages,

    #[error("stage {index} has zero duration")]
    ZeroDurationStage { index: usize },

    #[error("invalid threshold '{expression}' on metric '{metric}': {reason}")]
    InvalidThreshold {
        metric: String,
        expression: String,
        reason: String,
    },

    #[error("unknown metric '{0}' (use call_duration, call_failed or calls)")]
    UnknownMetric(String),

    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("invalid method '{0}', expected 'package.Service/Method'")]
    InvalidMethod(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("identifier pool: {0}")]
    Pool(String),

    #[error("{0}")]
    Invalid(String),
}

/// Why a single call failed. Recorded against the iteration; never aborts the run.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("non-success status {code}: {message}")]
    Status { code: String, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}
