//! Infrastructure provisioning

pub mod allocator;
pub mod config;
pub mod engine;
pub mod keys;

pub use allocator::IdAllocator;
pub use config::TfVars;
pub use engine::{AppliedInfra, InfraEngine, TerraformEngine};
pub use keys::{KeyProvider, SshKeyMaterial};
