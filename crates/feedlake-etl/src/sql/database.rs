//! Database access
//!
//! [`Database`] is the seam between the executor and PostgreSQL. The
//! production implementation opens a fresh connection for every script, runs
//! it inside one transaction and closes the connection again; nothing is
//! pooled between calls.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{Connection, Row};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Failure of one script execution, split by whether a retry can help
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DbError {
    /// Could not reach or stay connected to the server
    #[error("connection error: {0}")]
    Connection(String),

    /// The server rejected the SQL itself
    #[error("statement error: {0}")]
    Statement(String),
}

impl DbError {
    pub fn is_connection(&self) -> bool {
        matches!(self, DbError::Connection(_))
    }

    /// Sort an sqlx error into connection or statement failure
    pub fn classify(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => DbError::Connection(err.to_string()),
            sqlx::Error::Database(db) => {
                // class 08 is connection exception, 57P is operator intervention
                let code = db.code().unwrap_or_default();
                if code.starts_with("08") || code.starts_with("57P") {
                    DbError::Connection(err.to_string())
                } else {
                    DbError::Statement(err.to_string())
                }
            },
            _ => DbError::Statement(err.to_string()),
        }
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        DbError::classify(err)
    }
}

/// Runs a rendered SQL script
#[async_trait]
pub trait Database: Send + Sync {
    /// Execute `sql` atomically. Returns the first column of the last row the
    /// script produced, `None` when no row or a NULL came back.
    async fn run_script(&self, sql: &str) -> Result<Option<i64>, DbError>;
}

/// PostgreSQL backed [`Database`]
#[derive(Debug, Clone)]
pub struct PgDatabase {
    options: PgConnectOptions,
    connect_timeout: Duration,
}

impl PgDatabase {
    pub fn new(options: PgConnectOptions, connect_timeout: Duration) -> Self {
        Self {
            options,
            connect_timeout,
        }
    }

    async fn connect(&self) -> Result<PgConnection, DbError> {
        match tokio::time::timeout(self.connect_timeout, PgConnection::connect_with(&self.options))
            .await
        {
            Ok(conn) => conn.map_err(|e| DbError::Connection(e.to_string())),
            Err(_) => Err(DbError::Connection(format!(
                "connect timed out after {}s",
                self.connect_timeout.as_secs()
            ))),
        }
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn run_script(&self, sql: &str) -> Result<Option<i64>, DbError> {
        let mut conn = self.connect().await?;

        let mut tx = conn.begin().await?;
        let rows = sqlx::Executor::fetch_all(&mut *tx, sqlx::raw_sql(sql)).await?;
        let result = last_scalar(&rows);
        tx.commit().await?;

        if let Err(e) = conn.close().await {
            debug!("Connection close failed after commit: {}", e);
        }

        Ok(result)
    }
}

fn last_scalar(rows: &[PgRow]) -> Option<i64> {
    let row = rows.last()?;
    if row.columns().is_empty() {
        return None;
    }
    match row.try_get::<Option<i64>, _>(0) {
        Ok(value) => value,
        Err(_) => row.try_get::<Option<i32>, _>(0).ok().flatten().map(i64::from),
    }
}
