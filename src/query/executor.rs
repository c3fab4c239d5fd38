//! Asynchronous query executor.
//!
//! Every submission runs on its own tokio task and is tracked in a table keyed
//! by [`QueryId`]. Callers poll for progress; nothing here blocks except
//! [`AsyncQueryExecutor::shutdown`]. The table lock is only held for lookups
//! and inserts, never across driver calls or awaits.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use super::task::{QueryId, QuerySnapshot, QueryStatus, QueryTask};
use crate::config::ExecutorConfig;
use crate::db::{lock, QueryDriver, QueryOutput, ResultSet, StatementResult, CANCELLED_MESSAGE};
use crate::error::{QueryDeskError, Result};
use crate::sql::{split_statements, use_database};

/// Runs SQL on shared drivers in the background and tracks each submission.
pub struct AsyncQueryExecutor {
    tasks: Mutex<HashMap<QueryId, Arc<QueryTask>>>,
    next_id: AtomicU64,
    /// Caps concurrently executing queries; `None` means unbounded.
    limiter: Option<Arc<Semaphore>>,
    tracker: TaskTracker,
}

impl AsyncQueryExecutor {
    /// Creates an executor with no concurrency bound.
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            limiter: None,
            tracker: TaskTracker::new(),
        }
    }

    /// Creates an executor honoring `config.max_concurrent_queries`.
    pub fn with_config(config: &ExecutorConfig) -> Self {
        let mut executor = Self::new();
        executor.limiter = config
            .max_concurrent_queries
            .map(|n| Arc::new(Semaphore::new(n.max(1))));
        executor
    }

    /// Starts executing `sql` on `driver` and returns its id immediately.
    ///
    /// SQL holding several statements runs them one after another on the same
    /// driver; the first failure fails the whole query. Must be called from
    /// within a tokio runtime.
    pub fn submit(&self, driver: Arc<dyn QueryDriver>, sql: impl Into<String>) -> QueryId {
        let sql = sql.into();
        let id = QueryId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        let multiple = split_statements(&sql).len() > 1;

        let initial = if self.limiter.is_some() {
            QueryStatus::Pending
        } else {
            QueryStatus::Running
        };

        let task = Arc::new(QueryTask::new(id, driver, sql, multiple, initial));
        let handle = self
            .tracker
            .spawn(run(Arc::clone(&task), self.limiter.clone()));
        task.attach(handle);

        lock(&self.tasks).insert(id, task);
        debug!("Submitted {} ({})", id, initial);
        id
    }

    /// Returns the current state of a query. Never fails: unknown ids yield a
    /// Failed snapshot carrying a "not found" message.
    pub fn poll(&self, id: QueryId) -> QuerySnapshot {
        match self.get(id) {
            Some(task) => task.snapshot(),
            None => QuerySnapshot::not_found(id),
        }
    }

    /// Requests cancellation of a Pending or Running query.
    ///
    /// Returns false for unknown ids and queries that already finished. The
    /// status becomes Cancelled immediately. The driver is told through the
    /// query's own token, so other queries sharing the driver keep running;
    /// it stops on a best-effort basis.
    pub fn cancel(&self, id: QueryId) -> bool {
        let Some(task) = self.get(id) else {
            return false;
        };

        match task.mark_cancelled() {
            Some(from) => {
                debug!("Cancelled {} {}", from, id);
                true
            }
            None => false,
        }
    }

    /// True while the query is executing.
    pub fn is_running(&self, id: QueryId) -> bool {
        self.get(id)
            .is_some_and(|task| task.status() == QueryStatus::Running)
    }

    /// Forgets a query. A query that is still active is cancelled first.
    pub fn remove(&self, id: QueryId) -> bool {
        let Some(task) = lock(&self.tasks).remove(&id) else {
            return false;
        };
        if task.mark_cancelled().is_some() {
            debug!("Cancelled {} on removal", id);
        }
        true
    }

    /// Ids of Pending and Running queries, oldest first.
    pub fn list_active(&self) -> Vec<QueryId> {
        let mut ids: Vec<QueryId> = lock(&self.tasks)
            .values()
            .filter(|task| task.status().is_active())
            .map(|task| task.id)
            .collect();
        ids.sort();
        ids
    }

    /// Number of tracked queries, finished or not.
    pub fn len(&self) -> usize {
        lock(&self.tasks).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.tasks).is_empty()
    }

    /// Cancels every active query and waits for all execution units to
    /// finish. Finished queries stay pollable afterwards.
    pub async fn shutdown(&self) {
        let live: Vec<Arc<QueryTask>> = lock(&self.tasks)
            .values()
            .filter(|task| task.status().is_active())
            .cloned()
            .collect();

        for task in &live {
            task.mark_cancelled();
        }

        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
        debug!("Executor drained ({} cancelled)", live.len());
    }

    fn get(&self, id: QueryId) -> Option<Arc<QueryTask>> {
        lock(&self.tasks).get(&id).cloned()
    }
}

impl Default for AsyncQueryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AsyncQueryExecutor {
    fn drop(&mut self) {
        let tasks = match self.tasks.get_mut() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };
        let cancelled = tasks
            .values()
            .filter(|task| task.mark_cancelled().is_some())
            .count();
        if cancelled > 0 {
            warn!("Executor dropped with {} active queries; cancellation requested", cancelled);
        }
    }
}

/// Body of one execution unit. Every outcome, a driver panic included, ends
/// in a terminal status.
async fn run(task: Arc<QueryTask>, limiter: Option<Arc<Semaphore>>) -> Result<QueryOutput> {
    let outcome = AssertUnwindSafe(acquire_and_execute(&task, limiter))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            let message = panic_message(panic.as_ref());
            warn!("{} panicked: {}", task.id, message);
            Err(QueryDeskError::internal(format!("Query execution panicked: {message}")))
        });

    match &outcome {
        Ok(_) => {
            if task.transition(QueryStatus::Running, QueryStatus::Completed) {
                debug!("{} completed", task.id);
            }
        }
        Err(e) => {
            if task.fail(e.message()) {
                debug!("{} failed: {}", task.id, e);
            }
        }
    }
    outcome
}

async fn acquire_and_execute(
    task: &QueryTask,
    limiter: Option<Arc<Semaphore>>,
) -> Result<QueryOutput> {
    let _permit = match limiter {
        Some(limiter) => Some(wait_for_slot(task, limiter).await?),
        None => None,
    };
    execute(task).await
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Waits in Pending for a permit, then moves to Running.
async fn wait_for_slot(task: &QueryTask, limiter: Arc<Semaphore>) -> Result<OwnedSemaphorePermit> {
    let permit = tokio::select! {
        permit = limiter.acquire_owned() => {
            permit.map_err(|_| QueryDeskError::internal("Executor concurrency limiter closed"))?
        }
        _ = task.cancel.cancelled() => {
            return Err(QueryDeskError::execution(CANCELLED_MESSAGE));
        }
    };

    if !task.transition(QueryStatus::Pending, QueryStatus::Running) {
        return Err(QueryDeskError::execution(CANCELLED_MESSAGE));
    }
    Ok(permit)
}

async fn execute(task: &QueryTask) -> Result<QueryOutput> {
    let statements = split_statements(&task.sql);

    if !task.multiple {
        let statement = statements
            .into_iter()
            .next()
            .ok_or_else(|| QueryDeskError::execution("No SQL statement to execute"))?;
        ensure_not_cancelled(task)?;
        let result = task
            .driver
            .execute_cancellable(&statement, &task.cancel)
            .await?;
        return Ok(QueryOutput::Single(result));
    }

    let mut results = Vec::with_capacity(statements.len());
    for statement in statements {
        ensure_not_cancelled(task)?;
        let result = execute_script_statement(task, &statement).await?;
        results.push(StatementResult { statement, result });
    }
    Ok(QueryOutput::Multiple(results))
}

/// Executes one statement of a script. A `USE <db>` step reports a
/// synthesized message result in place of the driver's.
async fn execute_script_statement(task: &QueryTask, statement: &str) -> Result<ResultSet> {
    let result = task
        .driver
        .execute_cancellable(statement, &task.cancel)
        .await?;

    match use_database(statement) {
        Some(database) => Ok(ResultSet::message(format!("Database changed to {database}"))
            .with_execution_time(result.execution_time)),
        None => Ok(result),
    }
}

fn ensure_not_cancelled(task: &QueryTask) -> Result<()> {
    if task.cancel.is_cancelled() {
        Err(QueryDeskError::execution(CANCELLED_MESSAGE))
    } else {
        Ok(())
    }
}
