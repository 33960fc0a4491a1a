//! Intent candidates and the metadata returned to apps.

use crate::appd::DirectoryApp;
use crate::core::{AppIdentifier, InstanceId};
use serde::{Deserialize, Serialize};

/// Where a candidate would be dispatched.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CandidateTarget {
    /// A running instance with a matching intent listener
    Instance(InstanceId),
    /// A directory app that must be launched first
    Directory(DirectoryApp),
}

/// One way of handling an intent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IntentCandidate {
    /// Intent name
    pub intent: String,
    /// Human-readable intent name
    pub display_name: String,
    /// Application id
    pub app_id: String,
    /// Application title
    pub title: Option<String>,
    /// Declared result type, when known
    pub result_type: Option<String>,
    /// Dispatch target
    pub target: CandidateTarget,
}

impl IntentCandidate {
    /// Candidate for a running instance.
    pub fn live(intent: &str, app_id: &str, instance_id: &InstanceId) -> Self {
        Self {
            intent: intent.to_string(),
            display_name: intent.to_string(),
            app_id: app_id.to_string(),
            title: None,
            result_type: None,
            target: CandidateTarget::Instance(instance_id.clone()),
        }
    }

    /// Candidate for a directory app.
    pub fn directory(intent: &str, app: &DirectoryApp) -> Self {
        let definition = app.intent(intent);
        Self {
            intent: intent.to_string(),
            display_name: definition.map_or(intent, |d| d.display()).to_string(),
            app_id: app.app_id.clone(),
            title: app.title.clone(),
            result_type: definition.and_then(|d| d.result_type.clone()),
            target: CandidateTarget::Directory(app.clone()),
        }
    }

    /// Running instance, for live candidates.
    pub fn instance_id(&self) -> Option<&InstanceId> {
        match &self.target {
            CandidateTarget::Instance(id) => Some(id),
            CandidateTarget::Directory(_) => None,
        }
    }

    /// Check if the candidate is already running.
    pub fn is_live(&self) -> bool {
        self.instance_id().is_some()
    }

    /// Identity of the candidate.
    pub fn app_identifier(&self) -> AppIdentifier {
        match self.instance_id() {
            Some(id) => AppIdentifier::instance(&self.app_id, id),
            None => AppIdentifier::app(&self.app_id),
        }
    }

    /// Metadata exposed to apps.
    pub fn app_metadata(&self) -> AppMetadata {
        AppMetadata {
            app_id: self.app_id.clone(),
            instance_id: self.instance_id().cloned(),
            title: self.title.clone(),
            result_type: self.result_type.clone(),
        }
    }
}

/// Intent name and display name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentMetadata {
    /// Intent name
    pub name: String,
    /// Human-readable name
    pub display_name: String,
}

/// Application that can handle an intent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppMetadata {
    /// Application id
    pub app_id: String,
    /// Running instance, for live handlers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<InstanceId>,
    /// Display title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Declared result type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_type: Option<String>,
}

/// An intent with every app able to handle it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppIntent {
    /// The intent
    pub intent: IntentMetadata,
    /// Handlers
    pub apps: Vec<AppMetadata>,
}

/// Group candidates by intent, keeping first-seen order.
pub fn group_by_intent(candidates: &[IntentCandidate]) -> Vec<AppIntent> {
    let mut grouped: Vec<AppIntent> = Vec::new();
    for candidate in candidates {
        let metadata = candidate.app_metadata();
        match grouped.iter_mut().find(|g| g.intent.name == candidate.intent) {
            Some(group) => group.apps.push(metadata),
            None => grouped.push(AppIntent {
                intent: IntentMetadata {
                    name: candidate.intent.clone(),
                    display_name: candidate.display_name.clone(),
                },
                apps: vec![metadata],
            }),
        }
    }
    grouped
}
