//! In-flight raise state machine.

use crate::context::Context;
use crate::core::{now, InstanceId, RequestId, Timestamp};
use crate::pending::PendingHandle;
use crate::protocol::{Dialect, RequestKind};
use serde::Serialize;

/// Lifecycle of one raised intent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RaiseState {
    /// Collecting candidates
    Searching,
    /// Waiting for the user to choose
    Disambiguating,
    /// Delivering to (or launching) the chosen target
    Dispatching,
    /// Waiting for the target's result
    AwaitingResult,
    /// Result received
    Resolved,
    /// Failed with an error
    Failed,
    /// Result wait expired
    TimedOut,
}

impl RaiseState {
    /// Check if the state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RaiseState::Resolved | RaiseState::Failed | RaiseState::TimedOut)
    }

    /// Check if `next` is a legal successor.
    pub fn can_transition_to(&self, next: RaiseState) -> bool {
        use RaiseState::*;
        matches!(
            (self, next),
            (Searching, Disambiguating)
                | (Searching, Dispatching)
                | (Searching, Failed)
                | (Disambiguating, Dispatching)
                | (Disambiguating, Failed)
                | (Dispatching, AwaitingResult)
                | (Dispatching, Failed)
                | (AwaitingResult, Resolved)
                | (AwaitingResult, Failed)
                | (AwaitingResult, TimedOut)
        )
    }
}

impl std::fmt::Display for RaiseState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A raise between request and final result.
#[derive(Clone, Debug)]
pub struct InFlightRaise {
    /// Correlation id shared with the target
    pub raise_id: RequestId,
    /// Request that started the raise
    pub request_id: RequestId,
    /// `raiseIntent` or `raiseIntentForContext`
    pub request_kind: RequestKind,
    /// Raising instance
    pub source: InstanceId,
    /// Dialect of the raising instance
    pub source_dialect: Dialect,
    /// Intent name, once known
    pub intent: Option<String>,
    /// Context being raised
    pub context: Context,
    /// Current state
    pub state: RaiseState,
    /// Chosen target, once dispatched
    pub target: Option<InstanceId>,
    /// Pending operation the raise is currently blocked on
    pub waiting_on: Option<PendingHandle>,
    /// Start time
    pub started: Timestamp,
}

impl InFlightRaise {
    /// Start a raise in `Searching`.
    pub fn new(
        request_id: &RequestId,
        request_kind: RequestKind,
        source: &InstanceId,
        source_dialect: Dialect,
        intent: Option<&str>,
        context: Context,
    ) -> Self {
        Self {
            raise_id: RequestId::generate(),
            request_id: request_id.clone(),
            request_kind,
            source: source.clone(),
            source_dialect,
            intent: intent.map(str::to_string),
            context,
            state: RaiseState::Searching,
            target: None,
            waiting_on: None,
            started: now(),
        }
    }
}
