//! Connection registry: descriptor store plus connect-on-demand factory.
//!
//! `acquire` always builds and connects a fresh driver and `release` always
//! disconnects it; no live connection is kept between the two. Idle-connection
//! reuse could be added behind the same two calls without changing callers.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use super::ConnectionDescriptor;
use crate::db::{self, QueryDriver};
use crate::error::{QueryDeskError, Result};

/// Builds unconnected drivers for descriptors.
pub trait DriverFactory: Send + Sync {
    /// Returns a fresh, unconnected driver suitable for `descriptor`.
    fn create(&self, descriptor: &ConnectionDescriptor) -> Arc<dyn QueryDriver>;
}

impl<F> DriverFactory for F
where
    F: Fn(&ConnectionDescriptor) -> Arc<dyn QueryDriver> + Send + Sync,
{
    fn create(&self, descriptor: &ConnectionDescriptor) -> Arc<dyn QueryDriver> {
        self(descriptor)
    }
}

/// Default factory: picks the driver by the descriptor's backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendDriverFactory;

impl DriverFactory for BackendDriverFactory {
    fn create(&self, descriptor: &ConnectionDescriptor) -> Arc<dyn QueryDriver> {
        db::create_driver(descriptor.backend)
    }
}

/// Stores named connection descriptors and hands out connected drivers.
pub struct ConnectionRegistry {
    factory: Arc<dyn DriverFactory>,
    descriptors: RwLock<Vec<ConnectionDescriptor>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry using the backend driver factory.
    pub fn new() -> Self {
        Self::with_factory(BackendDriverFactory)
    }

    /// Creates an empty registry using a custom driver factory.
    pub fn with_factory(factory: impl DriverFactory + 'static) -> Self {
        Self {
            factory: Arc::new(factory),
            descriptors: RwLock::new(Vec::new()),
        }
    }

    /// Registers a descriptor after a successful connect/disconnect probe.
    ///
    /// Returns false (and stores nothing) when the id is empty or already
    /// registered, or when the probe fails.
    pub async fn add(&self, descriptor: ConnectionDescriptor) -> bool {
        if descriptor.id.is_empty() {
            warn!("Refusing to register a connection with an empty id");
            return false;
        }
        if self.contains(&descriptor.id) {
            warn!("Connection '{}' is already registered", descriptor.id);
            return false;
        }

        if let Err(e) = self.probe(&descriptor).await {
            warn!("Connection '{}' failed its probe: {}", descriptor.id, e);
            return false;
        }

        let mut descriptors = self.write();
        // Another caller may have registered the same id while we probed.
        if descriptors.iter().any(|d| d.id == descriptor.id) {
            return false;
        }
        info!("Registered connection '{}' ({})", descriptor.id, descriptor.display_string());
        descriptors.push(descriptor);
        true
    }

    /// Replaces an existing descriptor after a successful probe.
    ///
    /// Returns `Ok(false)` when the probe fails; the stored descriptor is
    /// left unchanged in that case.
    pub async fn update(&self, descriptor: ConnectionDescriptor) -> Result<bool> {
        if !self.contains(&descriptor.id) {
            return Err(not_found(&descriptor.id));
        }

        if let Err(e) = self.probe(&descriptor).await {
            warn!("Updated connection '{}' failed its probe: {}", descriptor.id, e);
            return Ok(false);
        }

        let mut descriptors = self.write();
        let slot = descriptors
            .iter_mut()
            .find(|d| d.id == descriptor.id)
            .ok_or_else(|| not_found(&descriptor.id))?;
        info!("Updated connection '{}'", descriptor.id);
        *slot = descriptor;
        Ok(true)
    }

    /// Removes a descriptor. Returns true if one was removed.
    pub fn remove(&self, id: &str) -> bool {
        let mut descriptors = self.write();
        let before = descriptors.len();
        descriptors.retain(|d| d.id != id);
        let removed = descriptors.len() != before;
        if removed {
            info!("Removed connection '{}'", id);
        }
        removed
    }

    /// All registered descriptors, in registration order.
    pub fn list(&self) -> Vec<ConnectionDescriptor> {
        self.read().clone()
    }

    /// Looks up one descriptor.
    pub fn get(&self, id: &str) -> Option<ConnectionDescriptor> {
        self.read().iter().find(|d| d.id == id).cloned()
    }

    /// Returns true if `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.read().iter().any(|d| d.id == id)
    }

    /// Probes a descriptor without registering it.
    pub async fn test(&self, descriptor: &ConnectionDescriptor) -> bool {
        match self.probe(descriptor).await {
            Ok(()) => true,
            Err(e) => {
                debug!("Probe of '{}' failed: {}", descriptor.id, e);
                false
            }
        }
    }

    /// Returns a newly connected driver for the registered descriptor `id`.
    pub async fn acquire(&self, id: &str) -> Result<Arc<dyn QueryDriver>> {
        let descriptor = self.get(id).ok_or_else(|| not_found(id))?;
        let connection_string = descriptor.connection_string()?;

        let driver = self.factory.create(&descriptor);
        driver.connect(&connection_string).await?;

        debug!("Acquired driver for '{}'", id);
        Ok(driver)
    }

    /// Disconnects a driver obtained from `acquire`.
    pub async fn release(&self, driver: Arc<dyn QueryDriver>) {
        driver.disconnect().await;
    }

    async fn probe(&self, descriptor: &ConnectionDescriptor) -> Result<()> {
        let connection_string = descriptor.connection_string()?;
        let driver = self.factory.create(descriptor);
        driver.connect(&connection_string).await?;
        driver.disconnect().await;
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<ConnectionDescriptor>> {
        self.descriptors
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<ConnectionDescriptor>> {
        self.descriptors
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(id: &str) -> QueryDeskError {
    QueryDeskError::not_found(format!("Connection '{id}' not found"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DatabaseBackend, MockDriver};

    fn mock_descriptor(id: &str) -> ConnectionDescriptor {
        ConnectionDescriptor::new(id, "localhost", "app")
            .with_backend(DatabaseBackend::Mock)
            .with_credentials("sa", "secret")
    }

    fn registry() -> ConnectionRegistry {
        ConnectionRegistry::with_factory(|_: &ConnectionDescriptor| {
            Arc::new(MockDriver::new().with_credentials("sa", "secret")) as Arc<dyn QueryDriver>
        })
    }

    #[tokio::test]
    async fn test_add_and_list() {
        let registry = registry();
        assert!(registry.add(mock_descriptor("a")).await);
        assert!(registry.add(mock_descriptor("b")).await);

        let ids: Vec<_> = registry.list().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_add_rejects_bad_credentials() {
        let registry = registry();
        assert!(registry.add(mock_descriptor("a")).await);

        let bad = mock_descriptor("b").with_credentials("sa", "wrong");
        assert!(!registry.add(bad).await);
        assert_eq!(registry.list().len(), 1);
    }

    #[tokio::test]
    async fn test_add_rejects_empty_and_duplicate_ids() {
        let registry = registry();
        assert!(!registry.add(mock_descriptor("")).await);
        assert!(registry.add(mock_descriptor("a")).await);
        assert!(!registry.add(mock_descriptor("a")).await);
        assert_eq!(registry.list().len(), 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let registry = registry();
        registry.add(mock_descriptor("a")).await;
        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
        assert!(registry.list().is_empty());
    }

    #[tokio::test]
    async fn test_update_replaces_descriptor() {
        let registry = registry();
        registry.add(mock_descriptor("a")).await;

        let renamed = mock_descriptor("a").with_name("Primary");
        assert!(registry.update(renamed).await.unwrap());
        assert_eq!(registry.get("a").unwrap().name, "Primary");

        let broken = mock_descriptor("a").with_credentials("sa", "nope");
        assert!(!registry.update(broken).await.unwrap());
        assert_eq!(registry.get("a").unwrap().password, "secret");
    }

    #[tokio::test]
    async fn test_update_unknown_id_is_not_found() {
        let registry = registry();
        let err = registry.update(mock_descriptor("ghost")).await.unwrap_err();
        assert!(matches!(err, QueryDeskError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_test_does_not_register() {
        let registry = registry();
        assert!(registry.test(&mock_descriptor("a")).await);
        assert!(!registry.test(&mock_descriptor("a").with_credentials("x", "y")).await);
        assert!(registry.list().is_empty());
    }

    #[tokio::test]
    async fn test_acquire_returns_connected_driver() {
        let registry = registry();
        registry.add(mock_descriptor("a")).await;

        let driver = registry.acquire("a").await.unwrap();
        assert!(driver.is_connected());

        registry.release(Arc::clone(&driver)).await;
        assert!(!driver.is_connected());
    }

    #[tokio::test]
    async fn test_acquire_unknown_id_is_not_found() {
        let registry = registry();
        let err = registry.acquire("missing").await.err().unwrap();
        assert!(matches!(err, QueryDeskError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_acquire_builds_a_new_driver_each_time() {
        let registry = ConnectionRegistry::new();
        registry
            .add(ConnectionDescriptor::new("m", "localhost", "app").with_backend(DatabaseBackend::Mock))
            .await;

        let first = registry.acquire("m").await.unwrap();
        let second = registry.acquire("m").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }
}
