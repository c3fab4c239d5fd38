//! Per-submission bookkeeping: ids, status and the one-shot result slot.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use futures::FutureExt;
use serde::{Serialize, Serializer};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::db::{lock, QueryDriver, QueryOutput, ResultSet, StatementResult, CANCELLED_MESSAGE};
use crate::error::{QueryDeskError, Result};

pub(crate) const FETCH_FAILED_MESSAGE: &str = "Failed to retrieve result";

/// Identifier of a submitted query, rendered as `query_<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(u64);

impl QueryId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the inner u64 value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "query_{}", self.0)
    }
}

impl FromStr for QueryId {
    type Err = QueryDeskError;

    fn from_str(s: &str) -> Result<Self> {
        s.strip_prefix("query_")
            .and_then(|n| n.parse().ok())
            .map(Self)
            .ok_or_else(|| QueryDeskError::not_found(format!("Invalid query id '{s}'")))
    }
}

impl Serialize for QueryId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Lifecycle of a query. Only moves forward: Pending → Running → terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum QueryStatus {
    /// Waiting for an execution slot.
    Pending = 0,
    Running = 1,
    Completed = 2,
    Failed = 3,
    Cancelled = 4,
}

impl QueryStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Pending,
            1 => Self::Running,
            2 => Self::Completed,
            3 => Self::Failed,
            _ => Self::Cancelled,
        }
    }

    /// True for Completed, Failed and Cancelled.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// True for Pending and Running.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a query returned by `poll`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuerySnapshot {
    pub id: QueryId,
    pub status: QueryStatus,
    /// True when the SQL held more than one statement.
    pub multiple_results: bool,
    /// Result of a single-statement query, once completed.
    pub result: Option<ResultSet>,
    /// Per-statement results of a multi-statement query, once completed.
    pub results: Vec<StatementResult>,
    pub error: Option<String>,
    pub started_at: Option<SystemTime>,
    pub ended_at: Option<SystemTime>,
}

impl QuerySnapshot {
    pub(crate) fn not_found(id: QueryId) -> Self {
        Self {
            id,
            status: QueryStatus::Failed,
            multiple_results: false,
            result: None,
            results: Vec::new(),
            error: Some(format!("Query not found: {id}")),
            started_at: None,
            ended_at: None,
        }
    }

    /// Wall time between start and end, when both are known.
    pub fn elapsed(&self) -> Option<Duration> {
        let start = self.started_at?;
        self.ended_at?.duration_since(start).ok()
    }
}

#[derive(Debug, Default)]
struct Times {
    started: Option<SystemTime>,
    ended: Option<SystemTime>,
}

/// Where the task's output currently lives.
#[derive(Debug, Default)]
enum OutputSlot {
    #[default]
    Empty,
    /// Still owned by the execution unit.
    InFlight(JoinHandle<Result<QueryOutput>>),
    /// Fetched from the execution unit; never replaced afterwards.
    Ready(QueryOutput),
}

/// The tracked unit of work for one submission.
pub(crate) struct QueryTask {
    pub(crate) id: QueryId,
    pub(crate) driver: Arc<dyn QueryDriver>,
    pub(crate) sql: String,
    pub(crate) multiple: bool,
    pub(crate) cancel: CancellationToken,
    status: AtomicU8,
    times: Mutex<Times>,
    error: Mutex<Option<String>>,
    slot: Mutex<OutputSlot>,
}

impl QueryTask {
    pub(crate) fn new(
        id: QueryId,
        driver: Arc<dyn QueryDriver>,
        sql: String,
        multiple: bool,
        status: QueryStatus,
    ) -> Self {
        let started = (status == QueryStatus::Running).then(SystemTime::now);
        Self {
            id,
            driver,
            sql,
            multiple,
            cancel: CancellationToken::new(),
            status: AtomicU8::new(status as u8),
            times: Mutex::new(Times {
                started,
                ended: None,
            }),
            error: Mutex::new(None),
            slot: Mutex::new(OutputSlot::Empty),
        }
    }

    pub(crate) fn status(&self) -> QueryStatus {
        QueryStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Moves `from` → `to` only if the task is still in `from`.
    pub(crate) fn transition(&self, from: QueryStatus, to: QueryStatus) -> bool {
        let moved = self
            .status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if moved {
            let mut times = lock(&self.times);
            match to {
                QueryStatus::Running => times.started = Some(SystemTime::now()),
                s if s.is_terminal() => times.ended = Some(SystemTime::now()),
                _ => {}
            }
        }
        moved
    }

    /// Pending or Running → Failed, recording `message`. No-op once terminal.
    pub(crate) fn fail(&self, message: impl Into<String>) -> bool {
        for from in [QueryStatus::Running, QueryStatus::Pending] {
            if self.transition(from, QueryStatus::Failed) {
                *lock(&self.error) = Some(message.into());
                return true;
            }
        }
        false
    }

    /// Pending or Running → Cancelled. Returns the status cancelled from.
    pub(crate) fn mark_cancelled(&self) -> Option<QueryStatus> {
        for from in [QueryStatus::Running, QueryStatus::Pending] {
            if self.transition(from, QueryStatus::Cancelled) {
                *lock(&self.error) = Some(CANCELLED_MESSAGE.to_string());
                self.cancel.cancel();
                return Some(from);
            }
        }
        None
    }

    pub(crate) fn attach(&self, handle: JoinHandle<Result<QueryOutput>>) {
        *lock(&self.slot) = OutputSlot::InFlight(handle);
    }

    /// Builds a snapshot, fetching the output from the execution unit on the
    /// first poll after completion.
    pub(crate) fn snapshot(&self) -> QuerySnapshot {
        let mut status = self.status();
        let mut output = None;

        if status.is_active() && self.unit_returned() {
            // The unit ended without recording an outcome (aborted or torn down).
            self.fail(FETCH_FAILED_MESSAGE);
            status = self.status();
        }

        if status == QueryStatus::Completed {
            match self.materialize() {
                Ok(Some(fetched)) => output = Some(fetched),
                // Completed was stored but the unit has not returned yet.
                Ok(None) => status = QueryStatus::Running,
                Err(message) => {
                    self.status.store(QueryStatus::Failed as u8, Ordering::Release);
                    *lock(&self.error) = Some(message);
                    status = QueryStatus::Failed;
                }
            }
        }

        let (result, results) = match output {
            Some(QueryOutput::Single(result)) => (Some(result), Vec::new()),
            Some(QueryOutput::Multiple(results)) => (None, results),
            None => (None, Vec::new()),
        };

        let times = lock(&self.times);
        QuerySnapshot {
            id: self.id,
            status,
            multiple_results: self.multiple,
            result,
            results,
            error: lock(&self.error).clone(),
            started_at: times.started,
            ended_at: times.ended,
        }
    }

    fn unit_returned(&self) -> bool {
        matches!(&*lock(&self.slot), OutputSlot::InFlight(handle) if handle.is_finished())
    }

    /// `Ok(None)` while the unit is still finishing.
    fn materialize(&self) -> std::result::Result<Option<QueryOutput>, String> {
        let mut slot = lock(&self.slot);

        match std::mem::take(&mut *slot) {
            OutputSlot::Ready(output) => {
                let copy = output.clone();
                *slot = OutputSlot::Ready(output);
                Ok(Some(copy))
            }
            OutputSlot::InFlight(handle) if handle.is_finished() => {
                match handle.now_or_never() {
                    Some(Ok(Ok(output))) => {
                        *slot = OutputSlot::Ready(output.clone());
                        Ok(Some(output))
                    }
                    Some(Ok(Err(e))) => Err(e.message().to_string()),
                    Some(Err(_)) | None => Err(FETCH_FAILED_MESSAGE.to_string()),
                }
            }
            in_flight @ OutputSlot::InFlight(_) => {
                *slot = in_flight;
                Ok(None)
            }
            OutputSlot::Empty => Err(FETCH_FAILED_MESSAGE.to_string()),
        }
    }
}
