//! PostgreSQL driver implementation.
//!
//! Provides the `PostgresDriver` struct that implements the `QueryDriver` trait
//! for PostgreSQL using sqlx. Each driver owns one dedicated connection so that
//! session state (transactions, `SET` commands) survives between statements.

use super::{lock, ColumnInfo, DatabaseBackend, QueryDriver, ResultSet, Row, CANCELLED_MESSAGE};
use crate::error::{QueryDeskError, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{Column as SqlxColumn, ConnectOptions, Connection, Either, Row as SqlxRow, TypeInfo};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Maximum number of connection retry attempts.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between retry attempts (doubles each retry).
const RETRY_BASE_DELAY_MS: u64 = 500;

/// PostgreSQL driver.
///
/// The connection sits behind an async mutex: concurrent `execute` calls on the
/// same driver are serialized rather than interleaved on the wire. A call's
/// cancellation token is only acted on by that call: while it waits for the
/// mutex it gives up without running, and once it owns the connection it sends
/// `pg_cancel_backend` over a second connection. `cancel` never touches the
/// mutex; it fires the token of whichever call currently owns the connection.
pub struct PostgresDriver {
    conn: tokio::sync::Mutex<Option<PgConnection>>,
    options: Mutex<Option<PgConnectOptions>>,
    connected: AtomicBool,
    backend_pid: AtomicI32,
    last_error: Mutex<String>,
    in_flight: Mutex<Option<CancellationToken>>,
}

impl PostgresDriver {
    /// Creates a new, unconnected driver.
    pub fn new() -> Self {
        Self {
            conn: tokio::sync::Mutex::new(None),
            options: Mutex::new(None),
            connected: AtomicBool::new(false),
            backend_pid: AtomicI32::new(0),
            last_error: Mutex::new(String::new()),
            in_flight: Mutex::new(None),
        }
    }

    fn fail(&self, err: QueryDeskError) -> QueryDeskError {
        *lock(&self.last_error) = err.message().to_string();
        err
    }

    /// Asks the server to cancel whatever backend `pid` is running.
    async fn send_cancel_request(&self, pid: i32) {
        let Some(options) = lock(&self.options).clone() else {
            return;
        };

        match options.connect().await {
            Ok(mut conn) => {
                let outcome = sqlx::query("SELECT pg_cancel_backend($1)")
                    .bind(pid)
                    .execute(&mut conn)
                    .await;
                if let Err(e) = outcome {
                    warn!("Cancel request for backend {} failed: {}", pid, e);
                }
                let _ = conn.close().await;
            }
            Err(e) => warn!("Could not open cancel connection: {}", e),
        }
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryDriver for PostgresDriver {
    async fn connect(&self, connection_string: &str) -> Result<()> {
        let options = PgConnectOptions::from_str(connection_string).map_err(|e| {
            self.fail(QueryDeskError::connection(format!(
                "Invalid connection string: {e}"
            )))
        })?;

        let mut last_error = None;
        let mut delay = Duration::from_millis(RETRY_BASE_DELAY_MS);

        for attempt in 1..=MAX_RETRY_ATTEMPTS {
            debug!("Connection attempt {} of {}", attempt, MAX_RETRY_ATTEMPTS);

            match options.connect().await {
                Ok(mut conn) => {
                    let pid: i32 = sqlx::query_scalar("SELECT pg_backend_pid()")
                        .fetch_one(&mut conn)
                        .await
                        .map_err(|e| self.fail(QueryDeskError::connection(e.to_string())))?;

                    let previous = self.conn.lock().await.replace(conn);
                    if let Some(old) = previous {
                        let _ = old.close().await;
                    }

                    *lock(&self.options) = Some(options);
                    self.backend_pid.store(pid, Ordering::SeqCst);
                    self.connected.store(true, Ordering::SeqCst);
                    lock(&self.last_error).clear();

                    debug!("Connected to database (backend pid {})", pid);
                    return Ok(());
                }
                Err(e) => {
                    let is_transient = is_transient_error(&e);
                    last_error = Some(e);

                    if attempt < MAX_RETRY_ATTEMPTS && is_transient {
                        warn!(
                            "Connection attempt {} failed (transient error), retrying in {:?}",
                            attempt, delay
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2; // Exponential backoff
                    } else {
                        break;
                    }
                }
            }
        }

        let err = match last_error {
            Some(e) => map_connection_error(e, &options),
            None => QueryDeskError::connection("No connection attempt was made"),
        };
        Err(self.fail(err))
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(conn) = self.conn.lock().await.take() {
            if let Err(e) = conn.close().await {
                debug!("Error while closing connection: {}", e);
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn execute_cancellable(&self, sql: &str, cancel: &CancellationToken) -> Result<ResultSet> {
        let mut guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(self.fail(QueryDeskError::execution(CANCELLED_MESSAGE)));
            }
            guard = self.conn.lock() => guard,
        };
        let Some(conn) = guard.as_mut() else {
            return Err(self.fail(QueryDeskError::connection("Not connected to database")));
        };
        if cancel.is_cancelled() {
            return Err(self.fail(QueryDeskError::execution(CANCELLED_MESSAGE)));
        }

        // Driver-wide cancel reaches this call only while it owns the connection.
        let token = cancel.child_token();
        *lock(&self.in_flight) = Some(token.clone());
        let pid = self.backend_pid.load(Ordering::SeqCst);
        let start = Instant::now();

        let run = async {
            let mut stream = sqlx::raw_sql(sql).fetch_many(&mut *conn);
            let mut columns: Option<Vec<ColumnInfo>> = None;
            let mut rows: Vec<Row> = Vec::new();
            let mut affected: u64 = 0;

            while let Some(item) = stream.try_next().await? {
                match item {
                    Either::Left(done) => affected += done.rows_affected(),
                    Either::Right(row) => {
                        if columns.is_none() {
                            columns = Some(column_info(&row));
                        }
                        rows.push(convert_row(&row));
                    }
                }
            }

            Ok::<_, sqlx::Error>((columns.unwrap_or_default(), rows, affected))
        };
        tokio::pin!(run);

        let outcome = tokio::select! {
            outcome = &mut run => outcome,
            _ = token.cancelled() => {
                debug!("Cancelling statement on backend {}", pid);
                self.send_cancel_request(pid).await;
                // The server aborts the statement; drain it so the connection stays usable.
                run.await
            }
        };

        lock(&self.in_flight).take();

        match outcome {
            Ok((columns, rows, affected)) => {
                lock(&self.last_error).clear();
                Ok(ResultSet::with_data(columns, rows)
                    .with_affected_rows(i64::try_from(affected).unwrap_or(i64::MAX))
                    .with_execution_time(start.elapsed()))
            }
            Err(e) => {
                if is_connection_lost(&e) {
                    self.connected.store(false, Ordering::SeqCst);
                }
                Err(self.fail(QueryDeskError::execution(format_query_error(e))))
            }
        }
    }

    fn cancel(&self) {
        if let Some(token) = lock(&self.in_flight).as_ref() {
            token.cancel();
        }
    }

    fn last_error(&self) -> String {
        lock(&self.last_error).clone()
    }

    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Postgres
    }
}

/// Extracts column metadata from a row.
fn column_info(row: &PgRow) -> Vec<ColumnInfo> {
    row.columns()
        .iter()
        .map(|col| ColumnInfo::new(col.name(), col.type_info().name()))
        .collect()
}

/// Converts a sqlx PgRow to our text Row type.
///
/// `raw_sql` uses the simple query protocol, so every value arrives in text
/// format and can be read without a type-specific decoder. NULL becomes "".
fn convert_row(row: &PgRow) -> Row {
    (0..row.columns().len())
        .map(|i| {
            row.try_get_unchecked::<Option<String>, _>(i)
                .ok()
                .flatten()
                .unwrap_or_default()
        })
        .collect()
}

/// Checks if an error is likely transient and worth retrying.
fn is_transient_error(error: &sqlx::Error) -> bool {
    let error_str = error.to_string().to_lowercase();

    // Connection refused or timeout are often transient
    if error_str.contains("connection refused")
        || error_str.contains("timed out")
        || error_str.contains("timeout")
        || error_str.contains("temporarily unavailable")
        || error_str.contains("connection reset")
        || error_str.contains("broken pipe")
    {
        return true;
    }

    false
}

fn is_connection_lost(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Io(_) | sqlx::Error::Tls(_))
}

/// Maps sqlx connection errors to user-friendly messages.
fn map_connection_error(error: sqlx::Error, options: &PgConnectOptions) -> QueryDeskError {
    let host = options.get_host();
    let port = options.get_port();
    let user = options.get_username();
    let database = options.get_database().unwrap_or("unknown");

    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") || error_str.contains("could not connect") {
        QueryDeskError::connection(format!(
            "Cannot connect to {host}:{port}. Check that the server is running."
        ))
    } else if error_str.contains("password authentication failed")
        || error_str.contains("authentication failed")
    {
        QueryDeskError::connection(format!(
            "Authentication failed for user '{user}'. Check your credentials."
        ))
    } else if error_str.contains("does not exist") && error_str.contains("database") {
        QueryDeskError::connection(format!("Database '{database}' does not exist."))
    } else if error_str.contains("ssl") || error_str.contains("tls") {
        QueryDeskError::connection(format!(
            "TLS negotiation failed. Set {} to adjust the sslmode.",
            super::detect::SSLMODE_ENV
        ))
    } else if error_str.contains("timed out") || error_str.contains("timeout") {
        QueryDeskError::connection(format!(
            "Connection to {host}:{port} timed out. The server may be overloaded or unreachable."
        ))
    } else {
        QueryDeskError::connection(error.to_string())
    }
}

/// Formats a query error with PostgreSQL detail and hint when available.
fn format_query_error(error: sqlx::Error) -> String {
    let Some(db_error) = error.as_database_error() else {
        return error.to_string();
    };

    let mut result = String::from("ERROR: ");
    result.push_str(db_error.message());

    if let Some(pg_error) = db_error.try_downcast_ref::<sqlx::postgres::PgDatabaseError>() {
        if let Some(detail) = pg_error.detail() {
            result.push_str("\n  DETAIL: ");
            result.push_str(detail);
        }

        if let Some(hint) = pg_error.hint() {
            result.push_str("\n  HINT: ");
            result.push_str(hint);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    // These tests require a running PostgreSQL database and are skipped
    // unless DATABASE_URL is set.

    async fn get_test_driver() -> Option<PostgresDriver> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let driver = PostgresDriver::new();
        driver.connect(&url).await.ok()?;
        Some(driver)
    }

    #[tokio::test]
    async fn test_execute_without_connection_fails() {
        let driver = PostgresDriver::new();
        let err = driver.execute("SELECT 1").await.unwrap_err();
        assert!(matches!(err, QueryDeskError::Connection(_)));
        assert_eq!(driver.last_error(), "Not connected to database");
    }

    #[tokio::test]
    async fn test_cancelled_call_returns_before_touching_connection() {
        let driver = PostgresDriver::new();
        let token = CancellationToken::new();
        token.cancel();

        let err = driver.execute_cancellable("SELECT 1", &token).await.unwrap_err();
        assert_eq!(err, QueryDeskError::execution("Query was cancelled"));
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_string() {
        let driver = PostgresDriver::new();
        let err = driver.connect("not a url").await.unwrap_err();
        assert!(matches!(err, QueryDeskError::Connection(_)));
        assert!(!driver.is_connected());
        assert!(!driver.last_error().is_empty());
    }

    #[tokio::test]
    async fn test_execute_select_query() {
        let Some(driver) = get_test_driver().await else {
            eprintln!("Skipping test: DATABASE_URL not set");
            return;
        };

        let result = driver
            .execute("SELECT 1 as num, NULL::text as missing")
            .await
            .unwrap();

        assert_eq!(result.columns.len(), 2);
        assert_eq!(result.columns[0].name, "num");
        assert_eq!(result.rows, vec![vec!["1".to_string(), String::new()]]);

        driver.disconnect().await;
        assert!(!driver.is_connected());
    }

    #[tokio::test]
    async fn test_execute_query_with_error() {
        let Some(driver) = get_test_driver().await else {
            eprintln!("Skipping test: DATABASE_URL not set");
            return;
        };

        let result = driver.execute("SELECT * FROM nonexistent_table_xyz").await;
        assert!(result.is_err());
        assert!(driver.last_error().contains("nonexistent_table_xyz"));

        driver.disconnect().await;
    }

    #[tokio::test]
    async fn test_cancel_queued_call_leaves_running_one_alone() {
        let Some(driver) = get_test_driver().await else {
            eprintln!("Skipping test: DATABASE_URL not set");
            return;
        };
        let driver = Arc::new(driver);

        let runner = Arc::clone(&driver);
        let running = tokio::spawn(async move { runner.execute("SELECT pg_sleep(0.3)").await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let token = CancellationToken::new();
        let waiter = Arc::clone(&driver);
        let waiter_token = token.clone();
        let queued =
            tokio::spawn(async move { waiter.execute_cancellable("SELECT 2", &waiter_token).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        assert!(queued.await.unwrap().is_err());
        assert!(running.await.unwrap().is_ok());

        driver.disconnect().await;
    }
}
