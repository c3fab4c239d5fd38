//! Command-line argument parsing for querydesk.

use clap::Parser;
use querydesk::config::Config;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

/// Run SQL through the querydesk executor.
#[derive(Parser, Debug)]
#[command(name = "querydesk")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// SQL to execute; each argument is submitted as its own query
    #[arg(value_name = "SQL")]
    pub sql: Vec<String>,

    /// Read SQL from a file (use "-" for stdin)
    #[arg(short = 'f', long, value_name = "PATH", conflicts_with = "sql")]
    pub file: Option<String>,

    /// Use named connection from config
    #[arg(short = 'c', long, value_name = "NAME")]
    pub connection: Option<String>,

    /// Config file path
    #[arg(long, value_name = "PATH", env = "QUERYDESK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Use the in-memory mock backend
    #[arg(long, conflicts_with = "connection")]
    pub mock: bool,

    /// Probe the connection and exit
    #[arg(long)]
    pub test: bool,

    /// List configured connections and exit
    #[arg(long, conflicts_with_all = ["sql", "file", "test"])]
    pub list: bool,

    /// Print snapshots as JSON
    #[arg(long)]
    pub json: bool,

    /// Skip the result cache
    #[arg(long)]
    pub no_cache: bool,

    /// Delay between status polls, in milliseconds
    #[arg(long, value_name = "MS", default_value = "50")]
    pub poll_interval_ms: u64,

    /// Write logs to the state directory instead of stderr
    #[arg(long)]
    pub log_file: bool,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Returns the config file path to use.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::default_path)
    }

    /// Returns the named connection to use, if specified.
    pub fn connection_name(&self) -> Option<&str> {
        self.connection.as_deref()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Collects the queries to run from the positional arguments or `--file`.
    pub fn queries(&self) -> std::result::Result<Vec<String>, String> {
        let queries: Vec<String> = match self.file.as_deref() {
            Some("-") => {
                let mut text = String::new();
                std::io::stdin()
                    .read_to_string(&mut text)
                    .map_err(|e| format!("Failed to read stdin: {e}"))?;
                vec![text]
            }
            Some(path) => vec![std::fs::read_to_string(path)
                .map_err(|e| format!("Failed to read '{path}': {e}"))?],
            None => self.sql.clone(),
        };

        let queries: Vec<String> = queries
            .into_iter()
            .filter(|q| !q.trim().is_empty())
            .collect();

        if queries.is_empty() && !self.test {
            return Err("No SQL given. Pass SQL as an argument or use --file".to_string());
        }
        Ok(queries)
    }
}
