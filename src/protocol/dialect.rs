//! Protocol dialects.
//!
//! Both dialects carry the same payloads; they differ in envelope field
//! names and in the error-code strings they use.

use crate::core::ErrorKind;
use serde::{Deserialize, Serialize};

/// Protocol-version dialect spoken by an instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Legacy topic envelope: `{ topic, requestId, data }`
    V1,
    /// Typed envelope: `{ type, meta, payload }`
    #[default]
    V2,
}

impl Dialect {
    /// Detect the dialect of a raw envelope.
    pub fn detect(raw: &serde_json::Value) -> Option<Self> {
        let obj = raw.as_object()?;
        if obj.contains_key("type") && obj.contains_key("meta") {
            Some(Dialect::V2)
        } else if obj.contains_key("topic") {
            Some(Dialect::V1)
        } else {
            None
        }
    }

    /// Error-code string for an error kind in this dialect.
    pub fn error_code(&self, kind: ErrorKind) -> &'static str {
        match self {
            Dialect::V2 => match kind {
                ErrorKind::ChannelCreationFailed => "CreationFailed",
                ErrorKind::NoChannelFound => "NoChannelFound",
                ErrorKind::AccessDenied => "AccessDenied",
                ErrorKind::NoAppsFound => "NoAppsFound",
                ErrorKind::AppNotFound => "AppNotFound",
                ErrorKind::AppTimeout => "AppTimeout",
                ErrorKind::Timeout => "ResolverTimeout",
                ErrorKind::UserCancelled => "UserCancelledResolution",
                ErrorKind::IntentHandlerRejected => "IntentHandlerRejected",
                ErrorKind::InstanceGone => "TargetInstanceUnavailable",
                ErrorKind::ViewNotFound => "ViewNotFound",
                ErrorKind::LaunchFailed => "ErrorOnLaunch",
                ErrorKind::DeliveryFailed => "IntentDeliveryFailed",
                ErrorKind::InvalidRequest => "MalformedMessage",
                ErrorKind::Internal => "AgentError",
            },
            Dialect::V1 => match kind {
                ErrorKind::ChannelCreationFailed => "ChannelCreationFailed",
                ErrorKind::NoChannelFound => "NoChannelFound",
                ErrorKind::AccessDenied => "AccessDenied",
                ErrorKind::NoAppsFound => "NoAppsFound",
                ErrorKind::AppNotFound => "AppNotFound",
                ErrorKind::AppTimeout => "AppTimeout",
                ErrorKind::Timeout => "Timeout",
                ErrorKind::UserCancelled => "UserCancelled",
                ErrorKind::IntentHandlerRejected => "ResolverError",
                ErrorKind::InstanceGone => "InstanceGone",
                ErrorKind::ViewNotFound => "ViewNotFound",
                ErrorKind::LaunchFailed => "LaunchFailed",
                ErrorKind::DeliveryFailed => "DeliveryFailed",
                ErrorKind::InvalidRequest => "InvalidRequest",
                ErrorKind::Internal => "InternalError",
            },
        }
    }

    /// Wire name of a request of this kind.
    pub fn request_name(&self, base: &str) -> String {
        match self {
            Dialect::V2 => format!("{}Request", base),
            Dialect::V1 => base.to_string(),
        }
    }

    /// Wire name of a response to a request of this kind.
    pub fn response_name(&self, base: &str) -> String {
        match self {
            Dialect::V2 => format!("{}Response", base),
            Dialect::V1 => base.to_string(),
        }
    }

    /// Wire name of an event of this kind.
    pub fn event_name(&self, base: &str) -> String {
        match self {
            Dialect::V2 => format!("{}Event", base),
            Dialect::V1 => base.to_string(),
        }
    }

    /// Strip the dialect's request suffix from a wire name.
    pub fn request_base<'a>(&self, name: &'a str) -> Option<&'a str> {
        match self {
            Dialect::V2 => name.strip_suffix("Request"),
            Dialect::V1 => Some(name),
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::V1 => write!(f, "v1"),
            Dialect::V2 => write!(f, "v2"),
        }
    }
}
