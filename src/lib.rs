//! querydesk - a concurrent SQL execution layer.
//!
//! Runs SQL against a backend driver on background tasks, keeps named
//! connections, caches results and manages explicit transactions.

pub mod cache;
pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod logging;
pub mod query;
pub mod sql;
pub mod transaction;
