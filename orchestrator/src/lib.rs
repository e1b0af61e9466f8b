//! Self-hosted deployment platform for Proxmox.
//!
//! Provisions LXC containers and QEMU virtual machines through
//! terraform, deploys applications onto them over SSH, and exposes the
//! whole lifecycle through an HTTP API.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod infra;
pub mod logs;
pub mod models;
pub mod proxmox;
pub mod remote;
pub mod server;
pub mod storage;
pub mod store;
pub mod utils;
