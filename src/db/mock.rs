//! Mock driver for testing.
//!
//! Provides an in-memory driver with configurable latency, credentials and
//! failures, and records every statement it is asked to execute.

use super::{lock, ColumnInfo, DatabaseBackend, QueryDriver, ResultSet, CANCELLED_MESSAGE};
use crate::error::{QueryDeskError, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

/// A mock driver that returns predefined results.
///
/// Connection strings must use the `mock://` scheme. When credentials are
/// configured, the user and password in the connection string must match.
pub struct MockDriver {
    delay: Duration,
    credentials: Option<(String, String)>,
    fail_patterns: Vec<String>,
    connected: AtomicBool,
    last_error: Mutex<String>,
    /// Fired by driver-wide `cancel`; replaced afterwards.
    cancel: Mutex<CancellationToken>,
    statements: Mutex<Vec<String>>,
    execute_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
    interrupted: AtomicUsize,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
}

impl MockDriver {
    /// Creates a new mock driver with no latency and no credential check.
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            credentials: None,
            fail_patterns: Vec::new(),
            connected: AtomicBool::new(false),
            last_error: Mutex::new(String::new()),
            cancel: Mutex::new(CancellationToken::new()),
            statements: Mutex::new(Vec::new()),
            execute_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
            interrupted: AtomicUsize::new(0),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
        }
    }

    /// Creates a mock driver that is already connected.
    pub fn connected() -> Self {
        let driver = Self::new();
        driver.connected.store(true, Ordering::SeqCst);
        driver
    }

    /// Makes every `execute` take `delay` (interruptible by `cancel`).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Requires the given credentials on `connect`.
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((user.into(), password.into()));
        self
    }

    /// Makes `execute` fail for any SQL containing `pattern` (case-insensitive).
    pub fn failing_on(mut self, pattern: impl Into<String>) -> Self {
        self.fail_patterns.push(pattern.into().to_uppercase());
        self
    }

    /// Number of times `execute` was called.
    pub fn execute_count(&self) -> usize {
        self.execute_calls.load(Ordering::SeqCst)
    }

    /// Number of times `cancel` was called.
    pub fn cancel_count(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    /// Number of executions that stopped because they were cancelled.
    pub fn interrupted_count(&self) -> usize {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Number of times `connect` was called.
    pub fn connect_count(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    /// Number of times `disconnect` was called.
    pub fn disconnect_count(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Every statement passed to `execute`, in call order.
    pub fn executed_statements(&self) -> Vec<String> {
        lock(&self.statements).clone()
    }

    fn fail(&self, err: QueryDeskError) -> QueryDeskError {
        *lock(&self.last_error) = err.message().to_string();
        err
    }

    fn interrupt(&self) -> QueryDeskError {
        self.interrupted.fetch_add(1, Ordering::SeqCst);
        self.fail(QueryDeskError::execution(CANCELLED_MESSAGE))
    }

    fn check_credentials(&self, url: &Url) -> Result<()> {
        let Some((user, password)) = &self.credentials else {
            return Ok(());
        };

        // Encode the expected pair the same way the connection string was built.
        let mut expected = Url::parse("mock://localhost")
            .map_err(|e| QueryDeskError::internal(e.to_string()))?;
        let _ = expected.set_username(user);
        let _ = expected.set_password(Some(password));

        if url.username() == expected.username() && url.password() == expected.password() {
            Ok(())
        } else {
            Err(QueryDeskError::connection(format!(
                "Authentication failed for user '{}'",
                url.username()
            )))
        }
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueryDriver for MockDriver {
    async fn connect(&self, connection_string: &str) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);

        let url = Url::parse(connection_string).map_err(|e| {
            self.fail(QueryDeskError::connection(format!(
                "Invalid connection string: {e}"
            )))
        })?;

        if url.scheme() != DatabaseBackend::Mock.url_scheme() {
            return Err(self.fail(QueryDeskError::connection(format!(
                "Invalid scheme '{}'. Expected 'mock'",
                url.scheme()
            ))));
        }

        self.check_credentials(&url).map_err(|e| self.fail(e))?;

        self.connected.store(true, Ordering::SeqCst);
        lock(&self.last_error).clear();
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn execute_cancellable(&self, sql: &str, cancel: &CancellationToken) -> Result<ResultSet> {
        if cancel.is_cancelled() {
            return Err(self.interrupt());
        }

        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.statements).push(sql.to_string());

        if !self.is_connected() {
            return Err(self.fail(QueryDeskError::connection("Not connected to database")));
        }

        let start = Instant::now();
        let driver_wide = lock(&self.cancel).clone();

        if !self.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = cancel.cancelled() => return Err(self.interrupt()),
                _ = driver_wide.cancelled() => return Err(self.interrupt()),
            }
        }

        let sql_upper = sql.trim_start().to_uppercase();

        if self.fail_patterns.iter().any(|p| sql_upper.contains(p)) {
            return Err(self.fail(QueryDeskError::execution(format!(
                "Mock failure for: {sql}"
            ))));
        }

        lock(&self.last_error).clear();

        let result = if sql_upper.starts_with("SELECT") || sql_upper.starts_with("WITH") {
            ResultSet::with_data(
                vec![ColumnInfo::new("result", "text")],
                vec![vec![format!("Mock result for: {sql}")]],
            )
        } else if sql_upper.starts_with("INSERT")
            || sql_upper.starts_with("UPDATE")
            || sql_upper.starts_with("DELETE")
        {
            ResultSet::new().with_affected_rows(1)
        } else {
            ResultSet::new()
        };

        Ok(result.with_execution_time(start.elapsed()))
    }

    fn cancel(&self) {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        let mut token = lock(&self.cancel);
        token.cancel();
        *token = CancellationToken::new();
    }

    fn last_error(&self) -> String {
        lock(&self.last_error).clone()
    }

    fn backend(&self) -> DatabaseBackend {
        DatabaseBackend::Mock
    }
}
