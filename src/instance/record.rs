//! Connected application instances.

use crate::core::{now, InstanceId, Timestamp};
use crate::protocol::Dialect;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Lifecycle status of an instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    /// Launch requested, not yet connected
    Pending,
    /// Connected and able to receive messages
    Ready,
    /// Disconnected or closed
    Unregistered,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceStatus::Pending => write!(f, "pending"),
            InstanceStatus::Ready => write!(f, "ready"),
            InstanceStatus::Unregistered => write!(f, "unregistered"),
        }
    }
}

/// One connected (or launching) application endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Instance {
    /// Stable instance id
    pub id: InstanceId,
    /// Directory application id
    pub app_id: String,
    /// Human readable title
    pub title: Option<String>,
    /// Lifecycle status
    pub status: InstanceStatus,
    /// Dialect used for messages sent to this instance
    pub dialect: Dialect,
    /// Current user/system channel, if any
    pub user_channel: Option<String>,
    /// App channels this instance holds
    pub app_channels: BTreeSet<String>,
    /// Private channels this instance participates in
    pub private_channels: BTreeSet<String>,
    /// Registration time
    pub registered_at: Timestamp,
    /// Last status change
    pub updated_at: Timestamp,
}

impl Instance {
    /// Create a new instance record.
    pub fn new(id: InstanceId, app_id: &str, status: InstanceStatus) -> Self {
        let ts = now();
        Self {
            id,
            app_id: app_id.to_string(),
            title: None,
            status,
            dialect: Dialect::default(),
            user_channel: None,
            app_channels: BTreeSet::new(),
            private_channels: BTreeSet::new(),
            registered_at: ts,
            updated_at: ts,
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    /// Set the dialect.
    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    /// Check if the instance can still take part in routing.
    pub fn is_active(&self) -> bool {
        self.status != InstanceStatus::Unregistered
    }

    /// Check if the instance is connected.
    pub fn is_ready(&self) -> bool {
        self.status == InstanceStatus::Ready
    }

    /// Check membership of any channel category.
    pub fn is_member_of(&self, channel_id: &str) -> bool {
        self.user_channel.as_deref() == Some(channel_id)
            || self.app_channels.contains(channel_id)
            || self.private_channels.contains(channel_id)
    }

    pub(crate) fn set_status(&mut self, status: InstanceStatus) {
        self.status = status;
        self.updated_at = now();
    }

    pub(crate) fn clear_membership(&mut self) {
        self.user_channel = None;
        self.app_channels.clear();
        self.private_channels.clear();
    }
}
