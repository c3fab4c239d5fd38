//! Driver abstraction layer for querydesk.
//!
//! Provides a trait-based interface through which SQL is executed, allowing
//! different backends to be used interchangeably by the executor, the
//! connection registry and the transaction manager.

pub mod detect;
mod mock;
mod postgres;
mod types;

pub use mock::MockDriver;
pub use postgres::PostgresDriver;
pub use types::{ColumnInfo, QueryOutput, ResultSet, Row, StatementResult};

use crate::error::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Error message of an execution stopped by cancellation.
pub(crate) const CANCELLED_MESSAGE: &str = "Query was cancelled";

/// Supported database backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    #[default]
    Postgres,
    /// In-memory driver used for tests and dry runs.
    Mock,
}

impl DatabaseBackend {
    /// Returns the backend as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Mock => "mock",
        }
    }

    /// Returns the default port for this backend.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Postgres => 5432,
            Self::Mock => 0,
        }
    }

    /// Returns the URL scheme for this backend.
    pub fn url_scheme(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::Mock => "mock",
        }
    }
}

/// Creates a fresh, unconnected driver for the given backend.
///
/// This is the central factory function for drivers.
pub fn create_driver(backend: DatabaseBackend) -> Arc<dyn QueryDriver> {
    match backend {
        DatabaseBackend::Postgres => Arc::new(PostgresDriver::new()),
        DatabaseBackend::Mock => Arc::new(MockDriver::new()),
    }
}

/// Trait defining the interface every driver exposes.
///
/// All methods take `&self`: one driver is shared (via `Arc`) between the
/// submitter, the execution task and whoever cancels it, so implementations
/// use interior mutability and must tolerate `cancel` racing `execute`.
#[async_trait]
pub trait QueryDriver: Send + Sync {
    /// Opens the connection described by `connection_string`.
    async fn connect(&self, connection_string: &str) -> Result<()>;

    /// Closes the connection. Idempotent.
    async fn disconnect(&self);

    /// Returns true while a connection is open.
    fn is_connected(&self) -> bool;

    /// Executes one SQL string and returns its result set.
    async fn execute(&self, sql: &str) -> Result<ResultSet> {
        self.execute_cancellable(sql, &CancellationToken::new()).await
    }

    /// Executes one SQL string, giving up once `cancel` fires.
    ///
    /// The token belongs to this call alone. Firing it never disturbs other
    /// executions sharing the driver, and a call that has not reached the
    /// backend yet returns without running the statement.
    async fn execute_cancellable(&self, sql: &str, cancel: &CancellationToken) -> Result<ResultSet>;

    /// Requests cooperative cancellation of every in-flight `execute`.
    ///
    /// Safe to call from a different task than the one running `execute`.
    fn cancel(&self);

    /// Returns the message of the most recent failure, or an empty string.
    fn last_error(&self) -> String;

    /// Returns the backend this driver talks to.
    fn backend(&self) -> DatabaseBackend;
}

/// Locks a std mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
