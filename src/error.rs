use thiserror::Error;
use tonic::Status;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Item is already attached to this wishlist")]
    AlreadyAttached,

    #[error("Item is not attached to this wishlist")]
    NotAttached,

    #[error("Item already has an active reservation")]
    AlreadyReserved,

    #[error("No active reservation for this item")]
    ReservationNotFound,

    #[error("Reservation belongs to someone else")]
    IdentityMismatch,

    #[error("Item has already been purchased")]
    AlreadyPurchased,

    #[error("Guest reservations require both a name and an email")]
    GuestInfoRequired,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// Connection, pool or unexpected store failure. Carries a message only.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl AppError {
    /// Whether a caller may blindly retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::StorageUnavailable(_))
    }
}

impl From<AppError> for Status {
    fn from(err: AppError) -> Self {
        let message = err.to_string();
        match err {
            AppError::NotFound(msg) => Status::not_found(msg),
            AppError::PermissionDenied(msg) => Status::permission_denied(msg),
            AppError::AlreadyAttached => Status::already_exists(message),
            AppError::NotAttached => Status::not_found(message),
            AppError::AlreadyReserved => Status::already_exists(message),
            AppError::ReservationNotFound => Status::not_found(message),
            AppError::IdentityMismatch => Status::permission_denied(message),
            AppError::AlreadyPurchased => Status::failed_precondition(message),
            AppError::GuestInfoRequired => Status::invalid_argument(message),
            AppError::InvalidInput(msg) => Status::invalid_argument(msg),
            AppError::Internal(msg) => Status::internal(msg),
            AppError::StorageUnavailable(msg) => Status::unavailable(msg),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn test_status_mapping() {
        assert_eq!(Status::from(AppError::AlreadyReserved).code(), Code::AlreadyExists);
        assert_eq!(Status::from(AppError::IdentityMismatch).code(), Code::PermissionDenied);
        assert_eq!(Status::from(AppError::AlreadyPurchased).code(), Code::FailedPrecondition);
        assert_eq!(
            Status::from(AppError::StorageUnavailable("pool timed out".into())).code(),
            Code::Unavailable
        );
    }

    #[test]
    fn test_only_storage_failures_are_retryable() {
        assert!(AppError::StorageUnavailable("reset".into()).is_retryable());
        assert!(!AppError::AlreadyReserved.is_retryable());
        assert!(!AppError::NotFound("item".into()).is_retryable());
    }
}
