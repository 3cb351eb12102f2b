//! Infrastructure and service-level errors.

use thiserror::Error;
use uuid::Uuid;

use bulkyard_auth::AuthzError;
use bulkyard_core::{DomainError, ErrorKind};

/// Record store failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{table} row {id} already exists")]
    Duplicate { table: &'static str, id: Uuid },

    #[error("{table} row {id} not found")]
    Missing { table: &'static str, id: Uuid },

    #[error("{table} row {id}: expected revision {expected}, found {actual}")]
    VersionConflict {
        table: &'static str,
        id: Uuid,
        expected: u64,
        actual: u64,
    },

    #[error("failed to encode {table} row: {message}")]
    Encode { table: &'static str, message: String },

    #[error("failed to decode {table} row: {message}")]
    Decode { table: &'static str, message: String },

    #[error("record store unavailable: {0}")]
    Unavailable(String),
}

/// Object storage failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("upload of '{path}' failed: {message}")]
    Upload { path: String, message: String },
}

/// Error returned by the application services.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<AuthzError> for ServiceError {
    fn from(value: AuthzError) -> Self {
        ServiceError::Domain(value.into())
    }
}

impl ServiceError {
    /// Domain classification, `None` for infrastructure failures.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ServiceError::Domain(e) => Some(e.kind()),
            _ => None,
        }
    }

    /// Lost an optimistic-concurrency race; the operation may be retried.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ServiceError::Store(StoreError::VersionConflict { .. })
                | ServiceError::Domain(DomainError::Conflict(_))
        )
    }

    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            ServiceError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflicts_are_retryable() {
        let err = ServiceError::from(StoreError::VersionConflict {
            table: "releases",
            id: Uuid::nil(),
            expected: 1,
            actual: 2,
        });
        assert!(err.is_conflict());
        assert_eq!(err.kind(), None);

        let err = ServiceError::from(DomainError::NotFound);
        assert!(!err.is_conflict());
        assert_eq!(err.kind(), Some(ErrorKind::NotFound));
    }

    #[test]
    fn authz_errors_surface_as_permission() {
        let err = ServiceError::from(AuthzError::NotOwner("edit schedule"));
        assert_eq!(err.kind(), Some(ErrorKind::Permission));
    }
}
