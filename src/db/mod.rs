pub mod pool;

pub use pool::{create_pool, run_migrations};

use crate::error::AppError;

/// Partial unique index over `reservations(item_id) WHERE status = 'active'`.
pub const ACTIVE_RESERVATION_INDEX: &str = "reservations_one_active_per_item";
pub const ATTACHMENT_PKEY: &str = "wishlist_items_pkey";
pub const WISHLIST_SLUG_KEY: &str = "wishlists_public_slug_key";
pub const RESERVATION_IDENTITY_CHECK: &str = "reservations_identity_xor";

/// Maps a store failure onto the domain taxonomy. Every operation funnels its
/// `sqlx::Error`s through here so no raw storage error leaves the crate.
pub fn translate(err: sqlx::Error) -> AppError {
    if let sqlx::Error::Database(db_err) = &err {
        match db_err.constraint() {
            Some(ACTIVE_RESERVATION_INDEX) => return AppError::AlreadyReserved,
            Some(ATTACHMENT_PKEY) => return AppError::AlreadyAttached,
            Some(RESERVATION_IDENTITY_CHECK) => return AppError::GuestInfoRequired,
            Some(WISHLIST_SLUG_KEY) => {
                return AppError::InvalidInput("public_slug is already in use".to_string())
            }
            _ => {}
        }
        if db_err.is_foreign_key_violation() {
            // The referenced row vanished between our read and write.
            return AppError::NotFound("referenced record no longer exists".to_string());
        }
        if db_err.is_check_violation() {
            return AppError::InvalidInput(db_err.message().to_string());
        }
    }

    if let sqlx::Error::RowNotFound = err {
        return AppError::NotFound("record not found".to_string());
    }

    tracing::error!("Database error: {}", err);
    AppError::StorageUnavailable(format!("Database error: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;
    use std::fmt;

    #[derive(Debug)]
    struct FakeDbError {
        constraint: Option<&'static str>,
        foreign_key: bool,
    }

    impl fmt::Display for FakeDbError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "fake violation of {:?}", self.constraint)
        }
    }

    impl std::error::Error for FakeDbError {}

    impl DatabaseError for FakeDbError {
        fn message(&self) -> &str {
            "fake violation"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(if self.foreign_key { "23503" } else { "23505" }))
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn constraint(&self) -> Option<&str> {
            self.constraint
        }

        fn kind(&self) -> ErrorKind {
            if self.foreign_key {
                ErrorKind::ForeignKeyViolation
            } else {
                ErrorKind::UniqueViolation
            }
        }
    }

    fn violation(constraint: &'static str, foreign_key: bool) -> sqlx::Error {
        sqlx::Error::Database(Box::new(FakeDbError {
            constraint: Some(constraint),
            foreign_key,
        }))
    }

    #[test]
    fn test_active_reservation_conflict_is_already_reserved() {
        assert_eq!(
            translate(violation(ACTIVE_RESERVATION_INDEX, false)),
            AppError::AlreadyReserved
        );
    }

    #[test]
    fn test_attachment_conflict_is_already_attached() {
        assert_eq!(translate(violation(ATTACHMENT_PKEY, false)), AppError::AlreadyAttached);
    }

    #[test]
    fn test_foreign_key_violation_is_not_found() {
        assert!(matches!(
            translate(violation("wishlist_items_item_id_fkey", true)),
            AppError::NotFound(_)
        ));
    }

    #[test]
    fn test_unknown_failures_become_storage_unavailable() {
        assert!(matches!(
            translate(sqlx::Error::PoolTimedOut),
            AppError::StorageUnavailable(_)
        ));
        assert!(matches!(
            translate(violation("some_other_key", false)),
            AppError::StorageUnavailable(_)
        ));
    }
}
