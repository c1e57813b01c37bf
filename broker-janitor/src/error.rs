use broker_common::error::DatabaseError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum JanitorError {
    #[error(transparent)]
    DatabaseError(#[from] DatabaseError),
    #[error("replay request failed with: {0}")]
    ReplayRequestError(#[from] reqwest::Error),
}
