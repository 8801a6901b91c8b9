//! Producer error types

use newsguard_common::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PollError {
    #[error("Feed error for {url}: {message}")]
    Feed { url: String, message: String },

    #[error("Classification failed for {id}: {source}")]
    Classify { id: String, source: AppError },

    #[error("Publish failed for {id}: {source}")]
    Publish { id: String, source: AppError },

    #[error(transparent)]
    Common(#[from] AppError),
}
