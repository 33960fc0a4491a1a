//! Platform collaborators
//!
//! Capabilities the host supplies to the router:
//! - Message delivery to connected instances
//! - Application launch
//! - Intent disambiguation UI

pub mod delivery;
pub mod launcher;
pub mod resolver_ui;

pub use delivery::{ChannelDelivery, MessageDelivery};
pub use launcher::{AppLauncher, UnavailableLauncher};
pub use resolver_ui::{DisambiguationRequest, DisambiguationUi};
