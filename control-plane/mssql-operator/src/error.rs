use thiserror::Error;

/// Failures surfaced by one reconciliation pass.
///
/// The controller never gives up on a resource: every variant is reported to
/// the scheduler, which requeues with the delay configured for its
/// [`FailureClass`].
#[derive(Error, Debug)]
pub enum Error {
    /// Ownership fingerprint mismatch or optimistic-concurrency collision.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed or incomplete user input.
    #[error("validation error: {0}")]
    Validation(String),

    /// A user-referenced object does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("kubernetes error: {0}")]
    Kube(#[source] kube::Error),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Conflict,
    Validation,
    Transient,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureClass::Conflict => write!(f, "conflict"),
            FailureClass::Validation => write!(f, "validation"),
            FailureClass::Transient => write!(f, "transient"),
        }
    }
}

impl Error {
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Missing user-referenced objects will not appear on their own, so they
    /// are retried on the validation cadence.
    pub fn class(&self) -> FailureClass {
        match self {
            Error::Conflict(_) => FailureClass::Conflict,
            Error::Validation(_) | Error::NotFound(_) => {
                FailureClass::Validation
            }
            Error::Kube(_) | Error::Timeout(_) | Error::Serialization(_) => {
                FailureClass::Transient
            }
        }
    }
}

impl From<kube::Error> for Error {
    fn from(e: kube::Error) -> Self {
        match &e {
            kube::Error::Api(resp) if resp.code == 409 => {
                Error::Conflict(resp.message.clone())
            }
            _ => Error::Kube(e),
        }
    }
}

/// True when the remote store answered 404.
pub fn is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(resp) if resp.code == 404)
}
