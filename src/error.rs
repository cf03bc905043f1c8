use thiserror::Error;

use crate::challenge::ChallengeMechanism;

pub type AppResult<T> = Result<T, AppError>;

/// Application error type for the signup protocol engine.
///
/// The first group is the protocol taxonomy: every signup attempt that does
/// not succeed terminates with exactly one of these, and each maps to a wire
/// challenge mechanism via [`AppError::mechanism`]. The second group covers
/// collaborator failures that must never leak detail to the peer.
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Protocol taxonomy =====
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("self-ident does not name this server")]
    KeyMismatch,

    #[error("connection key absent from claimed authorizations")]
    UnauthorizedDataLeak,

    #[error("account already exists")]
    AlreadySignedUp,

    #[error("invalid assertion: {0}")]
    InvalidAssertion(String),

    // ===== Collaborator & infrastructure failures =====
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("unknown error: {0}")]
    Unknown(#[from] anyhow::Error),
}

impl AppError {
    /// The wire mechanism a signup attempt failing with this error answers
    /// with. MalformedPayload, KeyMismatch and UnauthorizedDataLeak collapse
    /// to the same `never` so the response cannot be used as an authorization
    /// oracle; everything unclassified is a generic retry-later.
    pub fn mechanism(&self) -> ChallengeMechanism {
        match self {
            AppError::MalformedPayload(_)
            | AppError::KeyMismatch
            | AppError::UnauthorizedDataLeak => ChallengeMechanism::Never,
            AppError::AlreadySignedUp => ChallengeMechanism::AlreadySignedUp,
            AppError::InvalidAssertion(_) => ChallengeMechanism::BadBrowserIdAssertion,
            _ => ChallengeMechanism::ServerProblemTryAgainLater,
        }
    }

    /// Log this error with a level matching its severity.
    pub fn log(&self) {
        match self {
            AppError::UnauthorizedDataLeak => {
                tracing::warn!(error = %self, "peer probed keys it is not authorized for");
            }
            AppError::MalformedPayload(_)
            | AppError::KeyMismatch
            | AppError::AlreadySignedUp
            | AppError::InvalidAssertion(_) => {
                tracing::debug!(error = %self, "signup attempt rejected");
            }
            _ => {
                tracing::error!(error = %self, "internal error during signup");
            }
        }
    }

    /// Create a malformed-payload error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        AppError::MalformedPayload(msg.into())
    }

    /// Create an invalid-assertion error.
    pub fn assertion(msg: impl Into<String>) -> Self {
        AppError::InvalidAssertion(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}
