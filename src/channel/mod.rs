//! Channel Registry
//!
//! Context-sharing scopes:
//! - Fixed user and system channels
//! - App channels created on first reference
//! - Private channels scoped to their participants

pub mod definition;
pub mod registry;

pub use definition::{default_user_channels, Channel, ChannelType, DisplayMetadata, PrivateChannel};
pub use registry::{ChannelRegistry, ContextDelivery, PrivateChannelEvent, PrivateChannelNotice};
