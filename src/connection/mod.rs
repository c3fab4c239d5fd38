//! Connection management for querydesk.
//!
//! Named descriptors and the registry that turns them into connected drivers.

pub mod descriptor;
pub mod registry;

pub use descriptor::ConnectionDescriptor;
pub use registry::{BackendDriverFactory, ConnectionRegistry, DriverFactory};
