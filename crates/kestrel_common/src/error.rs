use thiserror::Error;

/// Convenience alias for `Result<T, KestrelError>`.
pub type KestrelResult<T> = Result<T, KestrelError>;

/// Error classification for retry/escalation decisions.
///
/// - `UserError`  : bad rule config, unroutable statement, unsupported query shape
/// - `Retryable`  : a shard query failed; the whole statement MAY be re-issued
/// - `Transient`  : resource exhaustion (group-by memory bound)
/// - `InternalBug`: contract violation inside the middleware; should never happen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserError,
    Retryable,
    Transient,
    InternalBug,
}

/// Top-level error type that all crate-specific errors convert into.
#[derive(Error, Debug)]
pub enum KestrelError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Route error: {0}")]
    Route(#[from] RouteError),

    #[error("Rewrite error: {0}")]
    Rewrite(#[from] RewriteError),

    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    /// A physical query failed on one data source. The merge aborts and the
    /// first such failure is surfaced.
    #[error("Shard failure on data source '{data_source}': {reason}")]
    ShardFailure { data_source: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),

    /// Contract violation inside the middleware.
    /// Always carries a unique `error_code` and `debug_context` for post-mortem.
    #[error("InternalBug [{error_code}]: {message} | context: {debug_context}")]
    InternalBug {
        error_code: &'static str,
        message: String,
        debug_context: String,
    },
}

/// Rule configuration and rule-model build errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Duplicate logic table: {0}")]
    DuplicateTable(String),

    #[error("Invalid data node '{0}': expected <data_source>.<table>")]
    InvalidDataNode(String),

    #[error("Table '{table}' references unknown data source '{data_source}'")]
    UnknownDataSource { table: String, data_source: String },

    #[error("Invalid inline expression '{expression}': {reason}")]
    InvalidInlineExpression { expression: String, reason: String },

    #[error("Unknown sharding algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("Unknown sharding algorithm type: {0}")]
    UnknownAlgorithmType(String),

    #[error("Invalid properties for algorithm '{algorithm}': {reason}")]
    InvalidAlgorithmProps { algorithm: String, reason: String },

    #[error("Algorithm '{algorithm}' does not support {strategy} strategies")]
    AlgorithmKindMismatch {
        algorithm: String,
        strategy: &'static str,
    },

    #[error("Binding table not found: {0}")]
    BindingTableNotFound(String),

    #[error("Binding tables '{first}' and '{second}' are incompatible: {reason}")]
    BindingTableMismatch {
        first: String,
        second: String,
        reason: String,
    },
}

/// Routing errors.
#[derive(Error, Debug)]
pub enum RouteError {
    /// The strategy algorithm produced no target for the extracted values.
    #[error("No route found for logic table '{logic_table}' with sharding values {values}")]
    NoRouteFound { logic_table: String, values: String },

    #[error("Tables {tables} share no data source")]
    NoCommonDataSource { tables: String },

    #[error("Parameter index {index} out of range ({count} parameters bound)")]
    ParameterOutOfRange { index: usize, count: usize },

    #[error("Sharding algorithm '{algorithm}' failed: {reason}")]
    AlgorithmFailure { algorithm: String, reason: String },

    #[error("Hinted data source '{0}' is not configured")]
    UnknownDataSource(String),
}

/// SQL rewrite errors. Token ordering violations are programming errors
/// detected when the token set is built.
#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("Tokens not sorted: token at {start} follows token at {previous_start}")]
    UnsortedTokens { previous_start: usize, start: usize },

    #[error("Overlapping tokens: token at {start} begins before previous token ends at {previous_stop}")]
    OverlappingTokens { previous_stop: usize, start: usize },

    #[error("Token range [{start}, {stop}) out of bounds for SQL of length {len}")]
    TokenOutOfBounds { start: usize, stop: usize, len: usize },

    #[error("Token boundary {0} is not on a character boundary")]
    NotCharBoundary(usize),

    #[error("Invalid pagination value: {0}")]
    InvalidPagination(String),

    #[error("Parameter index {index} out of range ({count} parameters bound)")]
    ParameterOutOfRange { index: usize, count: usize },
}

/// Result merge errors.
#[derive(Error, Debug)]
pub enum MergeError {
    #[error("Cursor not positioned: value() called without a preceding successful next()")]
    CursorNotPositioned,

    #[error("Column index {index} out of range ({count} columns)")]
    ColumnOutOfRange { index: usize, count: usize },

    #[error("Group-by merge exhausted its budget: {groups} groups exceeds limit {limit}")]
    ResourceExhausted { groups: usize, limit: usize },

    #[error("Unsupported aggregation: {0}")]
    UnsupportedAggregation(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("No shard results to merge")]
    NoResults,
}

impl KestrelError {
    /// Classify this error for retry/escalation decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            KestrelError::Config(_) => ErrorKind::UserError,
            KestrelError::Route(_) => ErrorKind::UserError,
            KestrelError::Rewrite(RewriteError::InvalidPagination(_)) => ErrorKind::UserError,
            KestrelError::Rewrite(RewriteError::ParameterOutOfRange { .. }) => {
                ErrorKind::UserError
            }
            KestrelError::Merge(MergeError::UnsupportedAggregation(_)) => ErrorKind::UserError,
            KestrelError::Merge(MergeError::TypeMismatch(_)) => ErrorKind::UserError,

            KestrelError::ShardFailure { .. } => ErrorKind::Retryable,

            KestrelError::Merge(MergeError::ResourceExhausted { .. }) => ErrorKind::Transient,

            // Token ordering, cursor misuse and everything else
            _ => ErrorKind::InternalBug,
        }
    }

    /// Returns true if the client should retry this statement.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Retryable)
    }

    /// Returns true if this is a user/input error.
    pub fn is_user_error(&self) -> bool {
        matches!(self.kind(), ErrorKind::UserError)
    }

    pub fn shard_failure(data_source: impl Into<String>, reason: impl Into<String>) -> Self {
        KestrelError::ShardFailure {
            data_source: data_source.into(),
            reason: reason.into(),
        }
    }

    pub fn internal_bug(
        error_code: &'static str,
        message: impl Into<String>,
        debug_context: impl Into<String>,
    ) -> Self {
        KestrelError::InternalBug {
            error_code,
            message: message.into(),
            debug_context: debug_context.into(),
        }
    }
}
