use thiserror::Error;

/// Errors out of the broker's Postgres tables. Driver errors are wrapped
/// with the statement kind that failed, so a log line says which operation
/// broke instead of just echoing sqlx.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("could not open a connection pool: {error}")]
    PoolCreationError { error: sqlx::Error },
    #[error("{command} against the broker tables failed: {error}")]
    QueryError { command: String, error: sqlx::Error },
}

impl DatabaseError {
    pub fn query(command: &str, error: sqlx::Error) -> Self {
        DatabaseError::QueryError {
            command: command.to_owned(),
            error,
        }
    }
}
