//! Router Module
//!
//! The desktop agent's message router:
//! - Configuration with serde defaults
//! - Per-message transactions over shared routing state
//! - Intent raising, disambiguation and launch flows

pub mod config;
pub mod dispatch;
mod intents;
pub mod state;

#[cfg(test)]
mod tests;

pub use config::{ProviderInfo, RouterConfig, DEFAULT_LAUNCH_TIMEOUT_MS, DEFAULT_RESULT_TIMEOUT_MS};
pub use dispatch::{MessageRouter, RouterBuilder};
pub use state::RouterState;
