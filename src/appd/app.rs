//! Directory application records.

use serde::{Deserialize, Serialize};

/// An intent an application declares it can handle.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentDefinition {
    /// Intent name
    pub name: String,
    /// Human-readable intent name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Context types accepted
    #[serde(default)]
    pub contexts: Vec<String>,
    /// Result type produced, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_type: Option<String>,
}

impl IntentDefinition {
    /// Create an intent definition with no contexts.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: None,
            contexts: Vec::new(),
            result_type: None,
        }
    }

    /// Set the display name.
    pub fn with_display_name(mut self, display_name: &str) -> Self {
        self.display_name = Some(display_name.to_string());
        self
    }

    /// Add an accepted context type.
    pub fn with_context(mut self, context_type: &str) -> Self {
        self.contexts.push(context_type.to_string());
        self
    }

    /// Set the result type.
    pub fn with_result_type(mut self, result_type: &str) -> Self {
        self.result_type = Some(result_type.to_string());
        self
    }

    /// Check if the intent accepts a context type (`None` accepts anything).
    pub fn accepts(&self, context_type: Option<&str>) -> bool {
        match context_type {
            Some(t) => self.contexts.iter().any(|c| c == t),
            None => true,
        }
    }

    /// Display name, falling back to the intent name.
    pub fn display(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

/// An application known to the directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryApp {
    /// Application id
    pub app_id: String,
    /// Application name
    #[serde(default)]
    pub name: String,
    /// Display title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Short description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declared intents
    #[serde(default)]
    pub intents: Vec<IntentDefinition>,
}

impl DirectoryApp {
    /// Create an application with no intents.
    pub fn new(app_id: &str) -> Self {
        Self {
            app_id: app_id.to_string(),
            name: app_id.to_string(),
            title: None,
            description: None,
            intents: Vec::new(),
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    /// Declare an intent.
    pub fn with_intent(mut self, intent: IntentDefinition) -> Self {
        self.intents.push(intent);
        self
    }

    /// Look up a declared intent.
    pub fn intent(&self, name: &str) -> Option<&IntentDefinition> {
        self.intents.iter().find(|i| i.name == name)
    }

    /// Check if the app offers `intent` for a context type.
    pub fn offers(&self, intent: &str, context_type: Option<&str>) -> bool {
        self.intent(intent).is_some_and(|i| i.accepts(context_type))
    }

    /// Intents accepting a context type.
    pub fn intents_for<'a>(
        &'a self,
        context_type: &'a str,
    ) -> impl Iterator<Item = &'a IntentDefinition> + 'a {
        self.intents.iter().filter(move |i| i.accepts(Some(context_type)))
    }
}
