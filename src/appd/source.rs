//! App directory sources.
//!
//! The router only ever asks the directory narrow questions; sources answer
//! them asynchronously so remote catalogs can be plugged in.

use crate::appd::app::DirectoryApp;
use crate::core::Result;
use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// A directory question.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DirectoryQuery {
    /// Exact app id
    ByAppId(String),
    /// Exact app name
    ByName(String),
    /// Apps offering an intent, optionally for a context type
    ByIntentAndContextType {
        intent: String,
        context_type: Option<String>,
    },
    /// Apps offering any intent for a context type
    ByContextType(String),
}

impl DirectoryQuery {
    /// Check if an app answers this query.
    pub fn matches(&self, app: &DirectoryApp) -> bool {
        match self {
            DirectoryQuery::ByAppId(id) => &app.app_id == id,
            DirectoryQuery::ByName(name) => &app.name == name,
            DirectoryQuery::ByIntentAndContextType { intent, context_type } => {
                app.offers(intent, context_type.as_deref())
            }
            DirectoryQuery::ByContextType(context_type) => {
                app.intents_for(context_type).next().is_some()
            }
        }
    }
}

/// External application catalog.
#[async_trait]
pub trait AppDirectory: Send + Sync {
    /// Answer a query.
    async fn query(&self, query: &DirectoryQuery) -> Result<Vec<DirectoryApp>>;

    /// Source name, for logging.
    fn name(&self) -> &str {
        "directory"
    }
}

/// In-memory directory.
#[derive(Clone, Debug, Default)]
pub struct StaticDirectory {
    apps: Vec<DirectoryApp>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DirectoryDocument {
    List(Vec<DirectoryApp>),
    Wrapped { applications: Vec<DirectoryApp> },
}

impl StaticDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an app.
    pub fn with_app(mut self, app: DirectoryApp) -> Self {
        self.apps.push(app);
        self
    }

    /// Parse a JSON document: either an array of apps or `{"applications": [...]}`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let document: DirectoryDocument = serde_json::from_str(json)?;
        let apps = match document {
            DirectoryDocument::List(apps) => apps,
            DirectoryDocument::Wrapped { applications } => applications,
        };
        Ok(Self { apps })
    }

    /// Load a JSON document from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            crate::core::Error::invalid(format!("cannot read directory {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// All apps.
    pub fn apps(&self) -> &[DirectoryApp] {
        &self.apps
    }
}

#[async_trait]
impl AppDirectory for StaticDirectory {
    async fn query(&self, query: &DirectoryQuery) -> Result<Vec<DirectoryApp>> {
        Ok(self.apps.iter().filter(|a| query.matches(a)).cloned().collect())
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Directory fanning each query out to several sources.
///
/// Results are merged in source order; the first source to report an app id
/// wins. A failing source is logged and skipped.
#[derive(Clone, Default)]
pub struct CompositeDirectory {
    sources: Vec<Arc<dyn AppDirectory>>,
}

impl CompositeDirectory {
    /// Create an empty composite.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source.
    pub fn with_source(mut self, source: Arc<dyn AppDirectory>) -> Self {
        self.sources.push(source);
        self
    }

    /// Number of sources.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Check if there are no sources.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[async_trait]
impl AppDirectory for CompositeDirectory {
    async fn query(&self, query: &DirectoryQuery) -> Result<Vec<DirectoryApp>> {
        let results = join_all(self.sources.iter().map(|s| s.query(query))).await;

        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for (source, result) in self.sources.iter().zip(results) {
            match result {
                Ok(apps) => {
                    merged.extend(apps.into_iter().filter(|a| seen.insert(a.app_id.clone())))
                }
                Err(e) => {
                    tracing::warn!(source = source.name(), error = %e, "directory source failed")
                }
            }
        }
        Ok(merged)
    }

    fn name(&self) -> &str {
        "composite"
    }
}
