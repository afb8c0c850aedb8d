use strum::{AsRefStr, Display};
use thiserror::Error as TError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Stable, machine readable classification of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
pub enum ErrorKind {
    InvalidConfig,
    UnsupportedProtocol,
    UnsupportedConfig,
    NotFound,
    TransientError,
    WorkRequestFailed,
    CertificateUnavailable,
    InvalidCertificate,
    Timeout,
    Cancelled,
    IncompleteState,
}

#[derive(Debug, TError)]
pub enum Error {
    #[error("InvalidConfig: {0}")]
    InvalidConfig(String),

    #[error("UnsupportedProtocol: {0}")]
    UnsupportedProtocol(String),

    #[error("UnsupportedConfig: {0}")]
    UnsupportedConfig(String),

    #[error("NotFound: {kind} {name:?}")]
    NotFound { kind: &'static str, name: String },

    #[error("TransientError: {0}")]
    Transient(String),

    #[error("WorkRequestFailed: work request {id} failed with {code}: {message}")]
    WorkRequestFailed {
        id: String,
        code: String,
        message: String,
    },

    #[error("CertificateUnavailable: {0}")]
    CertificateUnavailable(String),

    #[error("InvalidCertificate: {0}")]
    InvalidCertificate(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled: reconciliation was cancelled")]
    Cancelled,

    #[error("IncompleteState: {0}")]
    IncompleteState(String),

    #[error(transparent)]
    Kube(#[from] kube::Error),
}

impl Error {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::UnsupportedProtocol(_) => ErrorKind::UnsupportedProtocol,
            Self::UnsupportedConfig(_) => ErrorKind::UnsupportedConfig,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Transient(_) => ErrorKind::TransientError,
            Self::WorkRequestFailed { .. } => ErrorKind::WorkRequestFailed,
            Self::CertificateUnavailable(_) => ErrorKind::CertificateUnavailable,
            Self::InvalidCertificate(_) => ErrorKind::InvalidCertificate,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::IncompleteState(_) => ErrorKind::IncompleteState,
            Self::Kube(kube::Error::Api(resp)) if resp.code == 404 => ErrorKind::NotFound,
            Self::Kube(_) => ErrorKind::TransientError,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::TransientError
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn kind_is_stable_text() {
        let err = Error::WorkRequestFailed {
            id: "wr-1".into(),
            code: "InternalError".into(),
            message: "boom".into(),
        };

        assert_eq!(err.kind().as_ref(), "WorkRequestFailed");
        assert_eq!(
            err.to_string(),
            "WorkRequestFailed: work request wr-1 failed with InternalError: boom"
        );
    }

    #[test]
    fn not_found_helper() {
        let err = Error::not_found("load balancer", "svc-1234");

        assert!(err.is_not_found());
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "NotFound: load balancer \"svc-1234\"");
    }
}
