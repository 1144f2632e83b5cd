use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::broadcaster::BroadcastError;
use crate::frame::FrameError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("broadcast error: {0}")]
    Broadcast(#[from] BroadcastError),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("authentication failed")]
    Authentication,
    #[error("authorization failed")]
    Authorization,
}

pub type ApplicationResult<T> = Result<T, ApplicationError>;
