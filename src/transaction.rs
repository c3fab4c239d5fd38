//! Explicit transaction control over a single driver.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, OnceLock};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::db::{lock, QueryDriver};
use crate::error::{QueryDeskError, Result};

const BEGIN_SQL: &str = "BEGIN TRANSACTION";
const COMMIT_SQL: &str = "COMMIT TRANSACTION";
const ROLLBACK_SQL: &str = "ROLLBACK TRANSACTION";

/// Where the current transaction attempt stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    #[default]
    None,
    Active,
    Committed,
    RolledBack,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Active => "active",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        };
        f.write_str(name)
    }
}

/// Rollbacks spawned by dropped managers, keyed by driver address. `begin`
/// waits for the ones on its driver so a late ROLLBACK cannot end the new
/// transaction.
type AbandonedRollbacks = Mutex<HashMap<usize, Vec<JoinHandle<()>>>>;

fn abandoned_rollbacks() -> &'static AbandonedRollbacks {
    static ABANDONED: OnceLock<AbandonedRollbacks> = OnceLock::new();
    ABANDONED.get_or_init(|| Mutex::new(HashMap::new()))
}

fn driver_key(driver: &Arc<dyn QueryDriver>) -> usize {
    Arc::as_ptr(driver).cast::<()>() as usize
}

fn record_abandoned(driver: &Arc<dyn QueryDriver>, handle: JoinHandle<()>) {
    let mut pending = lock(abandoned_rollbacks());
    let handles = pending.entry(driver_key(driver)).or_default();
    handles.retain(|h| !h.is_finished());
    handles.push(handle);
}

async fn settle_abandoned(driver: &Arc<dyn QueryDriver>) {
    let handles = lock(abandoned_rollbacks())
        .remove(&driver_key(driver))
        .unwrap_or_default();

    for handle in handles {
        if let Err(e) = handle.await {
            warn!("Rollback of abandoned transaction did not finish: {}", e);
        }
    }
}

async fn rollback_abandoned(driver: Arc<dyn QueryDriver>) {
    if let Err(e) = driver.execute(ROLLBACK_SQL).await {
        warn!("Rollback of abandoned transaction failed: {}", e);
    }
}

/// Issues BEGIN/COMMIT/ROLLBACK through one driver and enforces legal
/// transitions between them.
///
/// Dropping the manager while a transaction is active attempts a rollback:
/// spawned on the current tokio runtime when there is one, otherwise run to
/// completion on a temporary runtime. A later `begin` on the same driver waits
/// for a spawned rollback first. Call [`close`](Self::close) to roll back
/// deterministically instead.
pub struct TransactionManager {
    driver: Option<Arc<dyn QueryDriver>>,
    state: TransactionState,
    auto_commit: bool,
}

impl TransactionManager {
    /// Creates a manager with no driver bound.
    pub fn new() -> Self {
        Self {
            driver: None,
            state: TransactionState::None,
            auto_commit: true,
        }
    }

    /// Creates a manager bound to `driver`.
    pub fn with_driver(driver: Arc<dyn QueryDriver>) -> Self {
        Self {
            driver: Some(driver),
            ..Self::new()
        }
    }

    /// Binds a driver. Refused while a transaction is active.
    pub fn set_driver(&mut self, driver: Arc<dyn QueryDriver>) -> Result<()> {
        if self.is_active() {
            return Err(QueryDeskError::state(
                "Cannot change driver while a transaction is active",
            ));
        }
        self.driver = Some(driver);
        Ok(())
    }

    /// Starts a transaction.
    pub async fn begin(&mut self) -> Result<()> {
        if self.is_active() {
            return Err(QueryDeskError::state("Transaction already active"));
        }

        let driver = self.connected_driver()?;
        settle_abandoned(&driver).await;
        driver.execute(BEGIN_SQL).await?;

        self.state = TransactionState::Active;
        debug!("Transaction started");
        Ok(())
    }

    /// Commits the active transaction.
    pub async fn commit(&mut self) -> Result<()> {
        self.finish(COMMIT_SQL, TransactionState::Committed).await
    }

    /// Rolls back the active transaction.
    pub async fn rollback(&mut self) -> Result<()> {
        self.finish(ROLLBACK_SQL, TransactionState::RolledBack).await
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Records the auto-commit preference. Informational only: it is not
    /// sent to the server.
    pub fn set_auto_commit(&mut self, enabled: bool) {
        self.auto_commit = enabled;
    }

    pub fn is_auto_commit(&self) -> bool {
        self.auto_commit
    }

    /// Rolls back an active transaction and consumes the manager.
    ///
    /// Rollback failures are logged and discarded.
    pub async fn close(mut self) {
        if !self.is_active() {
            return;
        }
        if let Err(e) = self.rollback().await {
            warn!("Rollback on close failed: {}", e);
        }
        // Whatever happened, Drop must not try again.
        self.state = TransactionState::RolledBack;
    }

    async fn finish(&mut self, sql: &str, next: TransactionState) -> Result<()> {
        if !self.is_active() {
            return Err(QueryDeskError::state("No active transaction"));
        }

        let driver = self.connected_driver()?;
        driver.execute(sql).await?;

        self.state = next;
        debug!("Transaction {}", next);
        Ok(())
    }

    fn connected_driver(&self) -> Result<Arc<dyn QueryDriver>> {
        let driver = self
            .driver
            .as_ref()
            .ok_or_else(|| QueryDeskError::state("No driver bound to transaction manager"))?;

        if !driver.is_connected() {
            return Err(QueryDeskError::connection("Not connected to database"));
        }
        Ok(Arc::clone(driver))
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TransactionManager {
    fn drop(&mut self) {
        if !self.is_active() {
            return;
        }
        let Some(driver) = self.driver.take() else {
            return;
        };
        self.state = TransactionState::RolledBack;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let rollback = handle.spawn(rollback_abandoned(Arc::clone(&driver)));
                record_abandoned(&driver, rollback);
            }
            Err(_) => match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime.block_on(rollback_abandoned(driver)),
                Err(e) => warn!("Could not start a runtime to roll back dropped transaction: {}", e),
            },
        }
    }
}
