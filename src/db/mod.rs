pub mod connection;
pub mod db_pool;
pub mod executor;
pub mod history_store;
pub mod introspect;

use thiserror::Error;

/// Failures talking to a caller-supplied target database.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("{0}")]
    Connection(String),
    #[error("{0}")]
    Query(String),
}
