//! Common types used across router modules.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap an existing id.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh random id.
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Borrow the id as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Identifier of one connected (or launching) application instance.
    InstanceId
);

string_id!(
    /// Identifier of a registered context or intent listener.
    ListenerId
);

string_id!(
    /// Correlation id carried by requests, responses and intent events.
    RequestId
);

/// Reserved channel id meaning "no channel".
pub const DEFAULT_CHANNEL: &str = "default";

/// Timestamp wrapper for consistent serialization.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Get current UTC timestamp.
pub fn now() -> Timestamp {
    chrono::Utc::now()
}

/// Application identity as exposed on the wire.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppIdentifier {
    /// Directory application id
    pub app_id: String,
    /// Running instance, if the identifier names one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<InstanceId>,
}

impl AppIdentifier {
    /// Identify an application without a specific instance.
    pub fn app(app_id: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            instance_id: None,
        }
    }

    /// Identify a specific running instance.
    pub fn instance(app_id: &str, instance_id: &InstanceId) -> Self {
        Self {
            app_id: app_id.to_string(),
            instance_id: Some(instance_id.clone()),
        }
    }
}
