//! Listener records.
//!
//! Listeners are plain records with stable ids; delivery iterates over
//! the matching records instead of holding callbacks.

use crate::core::{now, InstanceId, ListenerId, Timestamp};
use serde::{Deserialize, Serialize};

/// Which channel a context listener follows.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "scope", content = "channelId")]
pub enum ListenerScope {
    /// Whatever user channel the instance is currently joined to
    CurrentChannel,
    /// A specific channel
    Channel(String),
}

impl ListenerScope {
    /// Scope from an optional channel id (`None` follows the current channel).
    pub fn from_channel(channel_id: Option<&str>) -> Self {
        match channel_id {
            Some(id) => ListenerScope::Channel(id.to_string()),
            None => ListenerScope::CurrentChannel,
        }
    }

    /// Named channel, if the scope is fixed.
    pub fn channel_id(&self) -> Option<&str> {
        match self {
            ListenerScope::CurrentChannel => None,
            ListenerScope::Channel(id) => Some(id),
        }
    }
}

/// Listener kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListenerKind {
    /// Context listener, optionally filtered by type
    Context {
        scope: ListenerScope,
        context_type: Option<String>,
    },
    /// Intent listener for one intent name
    Intent { intent: String },
}

/// A registered listener.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ListenerRecord {
    /// Listener id
    pub id: ListenerId,
    /// Owning instance
    pub instance_id: InstanceId,
    /// What the listener listens for
    pub kind: ListenerKind,
    /// Registration time
    pub registered_at: Timestamp,
}

impl ListenerRecord {
    /// Create a new context listener record.
    pub fn context(
        instance_id: &InstanceId,
        scope: ListenerScope,
        context_type: Option<&str>,
    ) -> Self {
        Self {
            id: ListenerId::generate(),
            instance_id: instance_id.clone(),
            kind: ListenerKind::Context {
                scope,
                context_type: context_type.map(str::to_string),
            },
            registered_at: now(),
        }
    }

    /// Create a new intent listener record.
    pub fn intent(instance_id: &InstanceId, intent: &str) -> Self {
        Self {
            id: ListenerId::generate(),
            instance_id: instance_id.clone(),
            kind: ListenerKind::Intent {
                intent: intent.to_string(),
            },
            registered_at: now(),
        }
    }

    /// Check if this is an intent listener for `intent`.
    pub fn handles_intent(&self, intent: &str) -> bool {
        matches!(&self.kind, ListenerKind::Intent { intent: i } if i == intent)
    }

    /// Check if this is a context listener accepting `context_type`.
    pub fn accepts_context(&self, context_type: &str) -> bool {
        match &self.kind {
            ListenerKind::Context { context_type: filter, .. } => {
                filter.as_deref().map_or(true, |t| t == context_type)
            }
            ListenerKind::Intent { .. } => false,
        }
    }

    /// Context listener scope, if this is a context listener.
    pub fn scope(&self) -> Option<&ListenerScope> {
        match &self.kind {
            ListenerKind::Context { scope, .. } => Some(scope),
            ListenerKind::Intent { .. } => None,
        }
    }

    /// Context type filter, if any.
    pub fn context_type(&self) -> Option<&str> {
        match &self.kind {
            ListenerKind::Context { context_type, .. } => context_type.as_deref(),
            ListenerKind::Intent { .. } => None,
        }
    }

    /// Check if this context listener hears broadcasts on `channel_id` for an
    /// instance whose current user channel is `user_channel`.
    pub fn hears_channel(&self, channel_id: &str, user_channel: Option<&str>) -> bool {
        match self.scope() {
            Some(ListenerScope::CurrentChannel) => user_channel == Some(channel_id),
            Some(ListenerScope::Channel(id)) => id == channel_id,
            None => false,
        }
    }
}
