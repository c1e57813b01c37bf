use broker_common::error::DatabaseError;
use thiserror::Error;

/// Enumeration of errors that abort a whole worker invocation. Failures
/// scoped to a single job are reported per-job instead and never poison the
/// rest of the batch.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error(transparent)]
    DatabaseError(#[from] DatabaseError),
}
