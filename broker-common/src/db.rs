use std::str::FromStr;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};

use crate::error::DatabaseError;

/// Open a lazy pool against the broker database, tagged with the service
/// name. Connections are only established on first use, so a service binary
/// can come up before Postgres does.
pub fn create_pool(
    url: &str,
    max_connections: u32,
    app_name: &'static str,
) -> Result<PgPool, DatabaseError> {
    let options = PgConnectOptions::from_str(url)
        .map_err(|error| DatabaseError::PoolCreationError { error })?
        .application_name(app_name);

    Ok(PgPoolOptions::new()
        .max_connections(max_connections)
        .connect_lazy_with(options))
}
