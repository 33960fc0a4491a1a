//! Channel definitions.

use crate::core::{now, InstanceId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Channel category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// Predefined channel users join from a picker
    User,
    /// Channel created on demand by apps
    App,
    /// Channel shared by the participants of a resolved intent
    Private,
    /// Predefined channel managed by the platform
    System,
}

impl ChannelType {
    /// User and system channels share the one-at-a-time membership slot.
    pub fn is_user_slot(&self) -> bool {
        matches!(self, ChannelType::User | ChannelType::System)
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelType::User => write!(f, "user"),
            ChannelType::App => write!(f, "app"),
            ChannelType::Private => write!(f, "private"),
            ChannelType::System => write!(f, "system"),
        }
    }
}

/// Display hints for channel pickers.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub glyph: Option<String>,
}

/// A channel as exposed on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    /// Channel id
    pub id: String,
    /// Channel category
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    /// Display hints
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_metadata: Option<DisplayMetadata>,
}

impl Channel {
    /// Create a channel.
    pub fn new(id: &str, channel_type: ChannelType) -> Self {
        Self {
            id: id.to_string(),
            channel_type,
            display_metadata: None,
        }
    }

    /// Create a user channel with a name and color.
    pub fn user(id: &str, name: &str, color: &str) -> Self {
        Self::new(id, ChannelType::User).with_metadata(DisplayMetadata {
            name: Some(name.to_string()),
            color: Some(color.to_string()),
            glyph: None,
        })
    }

    /// Set display metadata.
    pub fn with_metadata(mut self, metadata: DisplayMetadata) -> Self {
        self.display_metadata = Some(metadata);
        self
    }
}

/// A private channel and its participants.
#[derive(Clone, Debug)]
pub struct PrivateChannel {
    /// Wire descriptor
    pub channel: Channel,
    /// Instance that created the channel
    pub owner: InstanceId,
    /// Instances allowed to use the channel
    pub participants: BTreeSet<InstanceId>,
    /// Creation time
    pub created: Timestamp,
}

impl PrivateChannel {
    /// Create a private channel owned by `owner`.
    pub fn new(id: &str, owner: &InstanceId) -> Self {
        let mut participants = BTreeSet::new();
        participants.insert(owner.clone());
        Self {
            channel: Channel::new(id, ChannelType::Private),
            owner: owner.clone(),
            participants,
            created: now(),
        }
    }

    /// Check if an instance may use this channel.
    pub fn is_participant(&self, id: &InstanceId) -> bool {
        self.participants.contains(id)
    }

    /// Participants other than `id`.
    pub fn others<'a>(&'a self, id: &'a InstanceId) -> impl Iterator<Item = &'a InstanceId> + 'a {
        self.participants.iter().filter(move |p| *p != id)
    }
}

/// Default user channel set.
pub fn default_user_channels() -> Vec<Channel> {
    vec![
        Channel::user("red", "Red", "#FF0000"),
        Channel::user("orange", "Orange", "#FF8000"),
        Channel::user("yellow", "Yellow", "#FFFF00"),
        Channel::user("green", "Green", "#00FF00"),
        Channel::user("blue", "Blue", "#0000FF"),
        Channel::user("purple", "Purple", "#FF00FF"),
    ]
}
