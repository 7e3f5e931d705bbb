//! Orchestration services.
//!
//! Services sit above the adapters: building them from configuration,
//! moving collections between them, and fanning work out across them.

mod backend_factory;
mod bridge;
mod manager;

pub use backend_factory::BackendFactory;
pub use bridge::{MigrationReport, VectorBridge};
pub use manager::VectorStoreManager;
