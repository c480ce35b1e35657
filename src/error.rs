//! Error types for the egress gateway operator

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// An optimistic-concurrency update kept conflicting after exhausting the
    /// retry budget
    #[error("update of {kind} {name:?} still conflicting after {attempts} attempts")]
    ConflictExhausted {
        kind: &'static str,
        name: String,
        attempts: u32,
    },

    /// Invalid operator configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A controller task exited unexpectedly
    #[error("Controller error: {0}")]
    ControllerError(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// True when the underlying failure is a 404 from the API server, e.g. the
    /// object vanished between list and get.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KubeError(err) if is_not_found(err))
    }

    /// Errors worth retrying on a short interval.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::KubeError(_) | Error::ConflictExhausted { .. }
        )
    }
}

/// True for a 409 Conflict response: the stored object's resourceVersion
/// advanced since it was read.
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 409)
}

/// True for a 404 NotFound response.
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(resp) if resp.code == 404)
}
