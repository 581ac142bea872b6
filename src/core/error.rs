use thiserror::Error;

/// Errors produced while bridging Cloud Monitoring data to Prometheus.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("credentials error: {0}")]
    Auth(String),

    #[error("upstream API returned status {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("upstream request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("malformed {field}: {message}")]
    Malformed { field: String, message: String },

    #[error("unsupported input: {0}")]
    Unsupported(String),

    #[error("{failed} of {total} metric descriptors failed to collect")]
    PartialScrape { failed: usize, total: usize },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    /// Creates a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new credentials error.
    pub fn auth<S: Into<String>>(msg: S) -> Self {
        Self::Auth(msg.into())
    }

    /// Creates a new malformed-input error for a named field.
    pub fn malformed<F: Into<String>, S: Into<String>>(field: F, msg: S) -> Self {
        Self::Malformed {
            field: field.into(),
            message: msg.into(),
        }
    }

    /// Creates a new unsupported-input error.
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Self::Unsupported(msg.into())
    }

    /// The upstream HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Upstream { status, .. } => Some(*status),
            Self::Transport(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Whether a retry against the upstream may succeed, given the set of
    /// HTTP statuses configured as retryable.
    pub fn is_retryable(&self, retry_statuses: &[u16]) -> bool {
        match self.status() {
            Some(status) => retry_statuses.contains(&status),
            None => false,
        }
    }

    /// Coarse error category used in logs and internal metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Auth(_) => "auth",
            Self::Upstream { .. } => "upstream",
            Self::Timeout { .. } => "timeout",
            Self::Malformed { .. } => "malformed",
            Self::Unsupported(_) => "unsupported",
            Self::PartialScrape { .. } => "partial",
            Self::Transport(_) => "transport",
            Self::Metrics(_) => "metrics",
            Self::Io(_) => "io",
            Self::Serialization(_) => "serialization",
            Self::Join(_) => "async",
        }
    }
}
