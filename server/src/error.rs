use common::network::{ErrorKind, ErrorReply};
use common::{Action, PoolStatus, SettlementError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] SettlementError),
    #[error("role is not allowed to {0:?}")]
    Forbidden(Action),
    #[error("{0} not found")]
    NotFound(String),
    #[error("pool is {status:?}, cannot {operation}")]
    InvalidState {
        status: PoolStatus,
        operation: &'static str,
    },
    #[error("{0}")]
    Conflict(String),
    #[error("record store unavailable: {0}")]
    UpstreamUnavailable(#[from] surrealdb::Error),
    #[error("{0}")]
    BadRequest(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Validation(error) => match error {
                SettlementError::InvalidDrawSize { .. } => ErrorKind::InvalidDrawSize,
                SettlementError::InvalidNumberRange { .. } => ErrorKind::InvalidNumberRange,
                SettlementError::DuplicateNumber(_) => ErrorKind::DuplicateNumber,
                SettlementError::InvalidBetSize { .. } => ErrorKind::InvalidBetSize,
                SettlementError::InvalidPlayerName { .. } => ErrorKind::InvalidPlayerName,
                SettlementError::InvalidPrizeTier { .. } | SettlementError::SampleTooLarge { .. } => {
                    ErrorKind::BadRequest
                }
            },
            ServiceError::Forbidden(_) => ErrorKind::Forbidden,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::InvalidState { .. } => ErrorKind::InvalidState,
            ServiceError::Conflict(_) => ErrorKind::Conflict,
            ServiceError::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            ServiceError::BadRequest(_) => ErrorKind::BadRequest,
            ServiceError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn reply(&self) -> ErrorReply {
        ErrorReply {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

// A manager that went away is a bug in the wiring, not something the client can fix.
impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ServiceError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        ServiceError::Internal("manager queue closed".into())
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for ServiceError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        ServiceError::Internal("manager dropped the request".into())
    }
}
