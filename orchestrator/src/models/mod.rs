//! Data models

pub mod deployment;

pub use deployment::{
    Deployment, DeploymentKind, DeploymentRequest, DeploymentStatus, ResourceSpec,
};
