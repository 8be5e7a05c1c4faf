//! Error types for the conduit runtime

/// Error produced by application handlers.
///
/// Kept opaque so callers can surface their own error types; the
/// [`non_retryable`](crate::config::RetryPolicy::non_retryable) predicate
/// inspects it to short-circuit the retry ladder.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for conduit operations
#[derive(Debug, thiserror::Error)]
pub enum ConduitError {
    /// Invalid configuration rejected at construction time
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// No factory registered under the requested name
    #[error("kafka backend not found: {name}")]
    BackendNotFound { name: String },

    /// Error surfaced by the underlying client library
    #[error("backend error: {message}")]
    Backend { message: String },

    /// Producer-specific errors
    #[error("producer error: {message}")]
    Producer { message: String },

    /// Send attempted on a closed producer
    #[error("producer is closed")]
    ProducerClosed,

    /// Consumer-specific errors
    #[error("consumer error: {message}")]
    Consumer { message: String },

    /// A bounded send did not complete in time
    #[error("send timed out after {timeout_ms}ms")]
    SendTimeout { timeout_ms: u64 },

    /// Serialization errors (DLQ envelope encoding)
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// Drain did not finish before the close deadline
    #[error("shutdown incomplete: {message}")]
    ShutdownIncomplete { message: String },

    /// Several sub-operations failed during close
    #[error("{}", join_errors(.0))]
    Multiple(Vec<ConduitError>),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConduitError {
    /// Create a new invalid config error
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Create a new backend error
    pub fn backend<S: Into<String>>(message: S) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Create a new producer error
    pub fn producer<S: Into<String>>(message: S) -> Self {
        Self::Producer {
            message: message.into(),
        }
    }

    /// Create a new consumer error
    pub fn consumer<S: Into<String>>(message: S) -> Self {
        Self::Consumer {
            message: message.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn send_timeout(timeout_ms: u64) -> Self {
        Self::SendTimeout { timeout_ms }
    }

    /// Join a list of failures into a single error.
    ///
    /// Returns `Ok(())` for an empty list and unwraps a single-element list
    /// so callers never see a one-element `Multiple`.
    pub fn join(mut errors: Vec<ConduitError>) -> Result<(), ConduitError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConduitError::Multiple(errors)),
        }
    }
}

fn join_errors(errors: &[ConduitError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
