use std::fmt;

#[derive(Debug)]
pub enum ReconError {
    /// TOML parse / deserialization error.
    ConfigParse(String),
    /// Config validation error (bad threshold, duplicate alias, etc.).
    ConfigValidation(String),
    /// A feed record failed validation at the ingestion boundary.
    InvalidRecord { kind: &'static str, record_id: String, reason: String },
    /// Repository failure.
    Store(StoreError),
}

impl fmt::Display for ReconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigParse(msg) => write!(f, "config parse error: {msg}"),
            Self::ConfigValidation(msg) => write!(f, "config validation error: {msg}"),
            Self::InvalidRecord { kind, record_id, reason } => {
                write!(f, "{kind} '{record_id}': {reason}")
            }
            Self::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for ReconError {}

impl From<StoreError> for ReconError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

/// Errors raised by a [`crate::store::ReconStore`] backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backend rejected or failed the operation.
    Backend(String),
    /// Stored data does not fit the expected shape (column drift, bad enum text).
    Schema(String),
    /// Injected write failure (test stores) or a commit that was rolled back.
    WriteFailed(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(msg) => write!(f, "backend: {msg}"),
            Self::Schema(msg) => write!(f, "schema: {msg}"),
            Self::WriteFailed(msg) => write!(f, "write failed: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}
