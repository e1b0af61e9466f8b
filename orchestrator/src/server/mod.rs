//! HTTP API

pub mod handlers;
pub mod serve;
pub mod state;
pub mod validate;

pub use serve::serve;
pub use state::ServerState;
