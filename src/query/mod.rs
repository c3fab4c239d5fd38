//! Background query execution for querydesk.
//!
//! Submissions run on their own tokio tasks; callers poll snapshots and may
//! cancel at any time.

pub mod executor;
mod task;

pub use executor::AsyncQueryExecutor;
pub use task::{QueryId, QuerySnapshot, QueryStatus};
