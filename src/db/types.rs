//! Result set types for querydesk.
//!
//! Defines the structures used to represent query results returned by a driver.
//! Cells are text; a database NULL is represented as an empty string.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Represents the result of executing a single SQL statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSet {
    /// Column metadata, in result order.
    pub columns: Vec<ColumnInfo>,

    /// Rows of data, each aligned positionally with `columns`.
    pub rows: Vec<Row>,

    /// Rows affected by a data-modifying statement.
    pub affected_rows: i64,

    /// Time taken to execute the statement.
    #[serde(with = "duration_serde")]
    pub execution_time: Duration,
}

impl ResultSet {
    /// Creates a new empty result set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a result set with the given columns and rows.
    pub fn with_data(columns: Vec<ColumnInfo>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows,
            affected_rows: 0,
            execution_time: Duration::ZERO,
        }
    }

    /// Creates a single-column, single-row result carrying a message.
    pub fn message(text: impl Into<String>) -> Self {
        Self::with_data(
            vec![ColumnInfo::new("Message", "VARCHAR")
                .with_size(255)
                .with_nullable(false)],
            vec![vec![text.into()]],
        )
    }

    /// Sets the affected-row count.
    pub fn with_affected_rows(mut self, affected_rows: i64) -> Self {
        self.affected_rows = affected_rows;
        self
    }

    /// Sets the execution time.
    pub fn with_execution_time(mut self, duration: Duration) -> Self {
        self.execution_time = duration;
        self
    }

    /// Returns the number of rows.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the result set has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Approximate in-memory footprint in bytes: column metadata plus all cell text.
    pub fn estimated_size(&self) -> usize {
        let mut size = std::mem::size_of::<ResultSet>();

        for column in &self.columns {
            size += std::mem::size_of::<ColumnInfo>() + column.name.len() + column.data_type.len();
        }

        for row in &self.rows {
            size += std::mem::size_of::<Row>();
            size += row.iter().map(String::len).sum::<usize>();
        }

        size
    }
}

/// Metadata about a column in a result set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,

    /// Declared column type.
    pub data_type: String,

    /// Declared size (0 when unknown or unbounded).
    #[serde(default)]
    pub size: i32,

    /// Whether the column accepts NULL.
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnInfo {
    /// Creates a new nullable column with the given name and type.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            size: 0,
            nullable: true,
        }
    }

    /// Sets the declared size.
    pub fn with_size(mut self, size: i32) -> Self {
        self.size = size;
        self
    }

    /// Sets the nullability flag.
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

/// A row of data: one text cell per column.
pub type Row = Vec<String>;

/// The result of one statement inside a multi-statement submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementResult {
    /// The statement text as executed.
    pub statement: String,
    /// Its result.
    pub result: ResultSet,
}

/// Everything a submission produced: one result, or one per statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum QueryOutput {
    Single(ResultSet),
    Multiple(Vec<StatementResult>),
}

/// Serde support for Duration (not natively supported by serde).
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_nanos().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let nanos = u128::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos as u64))
    }
}
