//! Intent disambiguation collaborator.

use crate::context::Context;
use crate::core::{AppIdentifier, RequestId, Result};
use crate::intent::IntentCandidate;
use async_trait::async_trait;

/// What the user is asked to choose between.
#[derive(Clone, Debug)]
pub struct DisambiguationRequest {
    /// Raise being resolved
    pub raise_id: RequestId,
    /// Raising app
    pub source: AppIdentifier,
    /// Intent name; `None` when raised for a context only
    pub intent: Option<String>,
    /// Context being raised
    pub context: Context,
    /// Candidates, live instances first
    pub candidates: Vec<IntentCandidate>,
}

/// Presents candidates and returns the user's choice.
#[async_trait]
pub trait DisambiguationUi: Send + Sync {
    /// Pick one candidate; `Ok(None)` means the user cancelled.
    async fn select(&self, request: &DisambiguationRequest) -> Result<Option<IntentCandidate>>;
}
