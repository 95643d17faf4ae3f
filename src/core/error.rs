use thiserror::Error;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Every failure the driver hands back to the orchestrator.
#[derive(Error, Debug)]
pub enum DriverError {
    /// Referenced network/endpoint is absent, or the switch is unreachable.
    #[error("Not found: {message}")]
    NotFound {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("Not implemented: {message}")]
    NotImplemented { message: String },

    /// Transient failure, the orchestrator is expected to retry.
    #[error("Retry: {message}")]
    Retryable {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// The datastore could not be read or written. Never fatal for a request.
    #[error("Persistence warning: {message}")]
    PersistenceWarning {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },
}

impl DriverError {
    pub fn not_found(message: impl Into<String>) -> Self {
        DriverError::NotFound {
            message: message.into(),
            source: None,
        }
    }

    pub fn unreachable(message: impl Into<String>, source: anyhow::Error) -> Self {
        DriverError::NotFound {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        DriverError::BadRequest {
            message: message.into(),
        }
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        DriverError::NotImplemented {
            message: message.into(),
        }
    }

    pub fn retryable(message: impl Into<String>, source: Option<anyhow::Error>) -> Self {
        DriverError::Retryable {
            message: message.into(),
            source: source.map(Into::into),
        }
    }

    pub fn persistence(message: impl Into<String>, source: Option<BoxedSource>) -> Self {
        DriverError::PersistenceWarning {
            message: message.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DriverError::NotFound { .. })
    }

    pub fn is_bad_request(&self) -> bool {
        matches!(self, DriverError::BadRequest { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DriverError::Retryable { .. })
    }

    /// Message including the chain of sources, as sent back in `Err`.
    pub fn report(&self) -> String {
        let mut msg = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            msg.push_str(": ");
            msg.push_str(&err.to_string());
            source = err.source();
        }
        msg
    }
}

pub type DriverResult<T> = Result<T, DriverError>;
