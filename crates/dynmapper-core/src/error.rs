//! Error types for mapping evaluation.
//!
//! Only structural problems surface as [`MapperError`]: a malformed raw payload,
//! a target template that is not JSON, an invalid mapping definition, or a
//! device identifier that cannot be resolved. Per-substitution and per-request
//! failures are recorded in the processing data instead (IGNORE values and
//! error-carrying request records).

/// Result type for mapping operations.
pub type Result<T> = std::result::Result<T, MapperError>;

/// Top-level mapping error.
#[derive(Debug, thiserror::Error)]
pub enum MapperError {
    /// Raw payload could not be turned into a JSON document.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] DeserializationError),

    /// A path expression failed to evaluate.
    #[error("Expression evaluation error: {0}")]
    ExpressionEvaluation(#[from] ExpressionError),

    /// External device identifier has no platform id and auto-creation is off.
    #[error("External id {external_id} for type {external_id_type} not found")]
    UnresolvedIdentifier {
        external_id: String,
        external_id_type: String,
    },

    /// Sending a composed object to the platform failed.
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Target template is not valid JSON.
    #[error("Target template is not a valid JSON object: {0}")]
    InvalidTargetTemplate(String),

    /// Mapping definition is inconsistent.
    #[error("Invalid mapping: {0}")]
    InvalidMapping(String),

    /// Configuration could not be loaded or is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MapperError {
    /// Whether this error aborts a whole evaluation.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::ExpressionEvaluation(_) | Self::Dispatch(_)
        )
    }
}

/// Malformed raw payload.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeserializationError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Malformed flat-file row: {0}")]
    MalformedRow(String),

    #[error("Invalid hex payload: {0}")]
    InvalidHex(String),

    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("Empty payload")]
    Empty,
}

/// Failure of the injected expression evaluator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("expression '{expression}' failed: {reason}")]
pub struct ExpressionError {
    pub expression: String,
    pub reason: String,
}

impl ExpressionError {
    pub fn new(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            reason: reason.into(),
        }
    }
}

/// Failure reported by the platform API client.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DispatchError {
    /// The platform answered with a non-success status.
    #[error("Request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The platform could not be reached.
    #[error("Platform unavailable: {0}")]
    Unavailable(String),

    /// A preceding step in the request chain failed.
    #[error("Predecessor request #{0} failed")]
    PredecessorFailed(usize),

    /// Deadline imposed by the caller expired.
    #[error("Operation timeout after {0}ms")]
    Timeout(u64),
}

/// Failure reported by the identity client.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IdentityError {
    #[error("Identity lookup failed: {0}")]
    Lookup(String),

    #[error("Device creation failed: {0}")]
    Create(String),
}

impl From<IdentityError> for DispatchError {
    fn from(err: IdentityError) -> Self {
        DispatchError::Unavailable(err.to_string())
    }
}

/// Invalid target path.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PathError {
    #[error("Empty path")]
    Empty,

    #[error("Invalid array index '{0}'")]
    InvalidIndex(String),

    #[error("Unbalanced bracket in path '{0}'")]
    UnbalancedBracket(String),

    #[error("Cannot set '{path}': segment '{segment}' is not a container")]
    NotAContainer { path: String, segment: String },
}
