//! Append-only context history, one sequence per channel.

use crate::context::Context;
use std::collections::HashMap;

/// Per-channel ordered history of broadcast contexts.
///
/// History is never pruned during a session and is keyed by channel, so it
/// survives the instances that produced it.
#[derive(Debug, Default)]
pub struct ContextStore {
    histories: HashMap<String, Vec<Context>>,
}

impl ContextStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a context to a channel's history.
    pub fn append(&mut self, channel_id: &str, context: Context) {
        self.histories
            .entry(channel_id.to_string())
            .or_default()
            .push(context);
    }

    /// Most recent context on a channel, optionally restricted to a type.
    pub fn latest(&self, channel_id: &str, context_type: Option<&str>) -> Option<&Context> {
        self.histories
            .get(channel_id)?
            .iter()
            .rev()
            .find(|ctx| ctx.matches_type(context_type))
    }

    /// Full history of a channel, oldest first.
    pub fn history(&self, channel_id: &str) -> &[Context] {
        self.histories
            .get(channel_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of contexts recorded on a channel.
    pub fn len(&self, channel_id: &str) -> usize {
        self.history(channel_id).len()
    }

    /// Check if a channel has no history.
    pub fn is_empty(&self, channel_id: &str) -> bool {
        self.len(channel_id) == 0
    }
}
