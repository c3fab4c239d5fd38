//! querydesk - run SQL through the concurrent execution layer.

mod cli;

use cli::Cli;
use querydesk::cache::{fingerprint, ResultCache};
use querydesk::config::Config;
use querydesk::connection::{ConnectionDescriptor, ConnectionRegistry};
use querydesk::db::{DatabaseBackend, QueryDriver, ResultSet};
use querydesk::error::{QueryDeskError, Result};
use querydesk::logging::{self, LogTarget};
use querydesk::query::{AsyncQueryExecutor, QueryId, QuerySnapshot, QueryStatus};
use querydesk::sql::{split_statements, StatementKind};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    if let Some(path) = logging::init(LogTarget::from_flag(cli.log_file)) {
        info!("Logging to {}", path.display());
    }

    if let Err(e) = run(cli).await {
        error!("{}: {}", e.category(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let config = Config::load_from_file(&config_path)?;

    if cli.list {
        list_connections(&config);
        return Ok(());
    }

    let descriptor = resolve_descriptor(&cli, &config)?;
    info!("Connection: {}", descriptor.display_string());

    let registry = ConnectionRegistry::new();

    if cli.test {
        return if registry.test(&descriptor).await {
            println!("Connection '{}' OK", descriptor.id);
            Ok(())
        } else {
            Err(QueryDeskError::connection(format!(
                "Connection test failed for '{}'",
                descriptor.id
            )))
        };
    }

    let queries = cli.queries().map_err(QueryDeskError::config)?;

    let connection_id = descriptor.id.clone();
    if !registry.add(descriptor).await {
        return Err(QueryDeskError::connection(format!(
            "Could not connect to '{connection_id}'"
        )));
    }

    let driver = registry.acquire(&connection_id).await?;
    let executor = AsyncQueryExecutor::with_config(&config.executor);
    let cache = (!cli.no_cache).then(|| ResultCache::with_capacity(config.cache.max_size_bytes));

    let outcome = run_queries(
        &cli,
        &executor,
        Arc::clone(&driver),
        cache.as_ref(),
        &connection_id,
        &queries,
    )
    .await;

    executor.shutdown().await;
    registry.release(driver).await;
    outcome
}

fn list_connections(config: &Config) {
    let descriptors = config.descriptors();
    if descriptors.is_empty() {
        println!("No connections configured");
        return;
    }
    for descriptor in descriptors {
        println!(
            "{}\t{}\t{}",
            descriptor.id,
            descriptor.backend.as_str(),
            descriptor.display_string()
        );
    }
}

/// Picks the connection: `--mock`, the named or default config entry, or
/// the PG* environment.
fn resolve_descriptor(cli: &Cli, config: &Config) -> Result<ConnectionDescriptor> {
    if cli.mock {
        return Ok(ConnectionDescriptor::new("mock", "localhost", "mock")
            .with_backend(DatabaseBackend::Mock));
    }

    if let Some(name) = cli.connection_name() {
        return config.get_connection(Some(name)).ok_or_else(|| {
            QueryDeskError::config(format!("Connection '{name}' not found in config file"))
        });
    }

    if let Some(descriptor) = config.get_connection(None) {
        return Ok(descriptor);
    }

    let mut descriptor = ConnectionDescriptor::new("default", "", "");
    descriptor.apply_env_defaults();
    if descriptor.database.is_empty() {
        return Err(QueryDeskError::config(
            "No database connection configured. Use --connection, --mock or PGDATABASE",
        ));
    }
    Ok(descriptor)
}

async fn run_queries(
    cli: &Cli,
    executor: &AsyncQueryExecutor,
    driver: Arc<dyn QueryDriver>,
    cache: Option<&ResultCache>,
    connection_id: &str,
    queries: &[String],
) -> Result<()> {
    for sql in queries {
        let key = fingerprint(connection_id, sql);
        let cacheable = is_cacheable(sql);

        if cacheable {
            if let Some(result) = cache.and_then(|c| c.get(&key)) {
                debug!("Cache hit for {}", key);
                print_cached(cli, &result)?;
                continue;
            }
        }

        let id = executor.submit(Arc::clone(&driver), sql.as_str());
        let snapshot = wait_for(executor, id, cli.poll_interval()).await;
        print_snapshot(cli, &snapshot)?;

        match snapshot.status {
            QueryStatus::Completed => {
                if let (true, Some(cache), Some(result)) = (cacheable, cache, snapshot.result) {
                    cache.put(key, result);
                }
            }
            QueryStatus::Cancelled => {
                return Err(QueryDeskError::execution(format!("{id} was cancelled")));
            }
            _ => {
                let message = snapshot.error.unwrap_or_else(|| driver.last_error());
                return Err(QueryDeskError::execution(message));
            }
        }
    }
    Ok(())
}

/// Only single read statements are worth caching.
fn is_cacheable(sql: &str) -> bool {
    let statements = split_statements(sql);
    matches!(
        statements.as_slice(),
        [statement] if matches!(StatementKind::sniff(statement), StatementKind::Select | StatementKind::With)
    )
}

/// Polls until the query is terminal. Ctrl-C cancels it.
async fn wait_for(executor: &AsyncQueryExecutor, id: QueryId, interval: Duration) -> QuerySnapshot {
    let mut interrupted = false;
    loop {
        let snapshot = executor.poll(id);
        if snapshot.status.is_terminal() {
            return snapshot;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                if let Err(e) = signal {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                    continue;
                }
                if executor.cancel(id) {
                    warn!("Cancelling {}", id);
                }
            }
        }
    }
}

fn print_snapshot(cli: &Cli, snapshot: &QuerySnapshot) -> Result<()> {
    if cli.json {
        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| QueryDeskError::internal(format!("Failed to serialize result: {e}")))?;
        println!("{json}");
        return Ok(());
    }

    if let Some(result) = &snapshot.result {
        print_table(result);
    }
    for statement in &snapshot.results {
        println!("-- {}", statement.statement);
        print_table(&statement.result);
    }
    if let Some(elapsed) = snapshot.elapsed() {
        println!("({} in {:.1?})", snapshot.status, elapsed);
    }
    Ok(())
}

fn print_cached(cli: &Cli, result: &ResultSet) -> Result<()> {
    if cli.json {
        let json = serde_json::to_string_pretty(result)
            .map_err(|e| QueryDeskError::internal(format!("Failed to serialize result: {e}")))?;
        println!("{json}");
    } else {
        print_table(result);
        println!("(cached)");
    }
    Ok(())
}

fn print_table(result: &ResultSet) {
    if result.columns.is_empty() {
        println!("{} row(s) affected", result.affected_rows);
        return;
    }

    let mut widths: Vec<usize> = result.columns.iter().map(|c| c.name.chars().count()).collect();
    for row in &result.rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let render = |cells: Vec<&str>| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, &width)| format!("{cell:<width$}"))
            .collect::<Vec<_>>()
            .join(" | ")
    };

    println!("{}", render(result.columns.iter().map(|c| c.name.as_str()).collect()));
    println!(
        "{}",
        widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("-+-")
    );
    for row in &result.rows {
        println!("{}", render(row.iter().map(String::as_str).collect()));
    }
    println!("({} row(s))", result.row_count());
}
