use thiserror::Error;

use grantflow_core::approvals::StoreError;

mod codec;

pub mod approval;
pub mod memory;

pub use approval::SqlApprovalStore;
pub use memory::InMemoryApprovalStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        if let RepositoryError::Database(sqlx::Error::Database(database_error)) = &value {
            if database_error.is_unique_violation() {
                return Self::UniqueViolation(database_error.message().to_string());
            }
        }
        Self::Backend(value.to_string())
    }
}
