use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{ConnectOptions, Connection};
use std::fmt;
use tracing::{debug, warn};

use super::DbError;

pub const DEFAULT_MYSQL_PORT: u16 = 3306;

/// Credentials for one target database, supplied with every request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

impl ConnectionConfig {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_MYSQL_PORT)
    }

    fn connect_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port())
            .username(&self.user)
            .password(&self.password)
            .database(&self.database)
    }

    /// Opens a fresh, unpooled connection. Callers must hand it back to [`close`].
    pub async fn open(&self) -> Result<MySqlConnection, DbError> {
        debug!(
            "Opening connection to {}@{}:{}/{}",
            self.user,
            self.host,
            self.port(),
            self.database
        );
        self.connect_options()
            .connect()
            .await
            .map_err(|e| DbError::Connection(e.to_string()))
    }
}

/// Closes a transient connection. A failed close is logged, never surfaced.
pub async fn close(conn: MySqlConnection) {
    if let Err(e) = conn.close().await {
        warn!("Failed to close database connection cleanly: {}", e);
    }
}
