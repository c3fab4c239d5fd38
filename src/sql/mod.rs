//! Statement splitting and type sniffing.
//!
//! Just enough SQL awareness for the executor: cut a script into statements
//! and recognize each statement by its leading keyword. No semantic analysis.

mod parser;

pub use parser::{split_statements, use_database};

use std::fmt;

/// The type of SQL statement detected from its leading keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Alter,
    Drop,
    Execute,
    Begin,
    Commit,
    Rollback,
    Use,
    With,
    /// A recognizable statement of some other type.
    Other,
    /// Only whitespace and comments.
    Empty,
}

impl StatementKind {
    /// Sniffs the type of a single statement.
    pub fn sniff(statement: &str) -> Self {
        if parser::use_database(statement).is_some() {
            return Self::Use;
        }

        let Some(keyword) = parser::leading_keyword(statement) else {
            return Self::Empty;
        };

        match keyword.as_str() {
            "SELECT" => Self::Select,
            "INSERT" => Self::Insert,
            "UPDATE" => Self::Update,
            "DELETE" => Self::Delete,
            "CREATE" => Self::Create,
            "ALTER" => Self::Alter,
            "DROP" => Self::Drop,
            "EXEC" | "EXECUTE" | "CALL" => Self::Execute,
            "BEGIN" | "START" => Self::Begin,
            "COMMIT" | "END" => Self::Commit,
            "ROLLBACK" | "ABORT" => Self::Rollback,
            "WITH" => Self::With,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Select => "SELECT",
            Self::Insert => "INSERT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Create => "CREATE",
            Self::Alter => "ALTER",
            Self::Drop => "DROP",
            Self::Execute => "EXECUTE",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Rollback => "ROLLBACK",
            Self::Use => "USE",
            Self::With => "WITH (CTE)",
            Self::Other => "OTHER",
            Self::Empty => "EMPTY",
        };
        f.write_str(name)
    }
}
