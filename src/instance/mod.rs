//! Instance Directory
//!
//! Tracks application instances:
//! - Identity and lifecycle status
//! - Channel membership
//! - Context and intent listener registrations

pub mod directory;
pub mod listener;
pub mod record;

pub use directory::{InstanceDirectory, RemovedInstance};
pub use listener::{ListenerKind, ListenerRecord, ListenerScope};
pub use record::{Instance, InstanceStatus};
