//! Intent Resolution
//!
//! Finding and dispatching intent handlers:
//! - Candidate search over live listeners and the app directory
//! - Target selection and disambiguation hand-off
//! - Explicit state machine for every raise in flight

pub mod candidate;
pub mod raise;
pub mod resolver;

pub use candidate::{
    group_by_intent, AppIntent, AppMetadata, CandidateTarget, IntentCandidate, IntentMetadata,
};
pub use raise::{InFlightRaise, RaiseState};
pub use resolver::{result_type_matches, CandidateSearch, IntentResolver, Resolution};
