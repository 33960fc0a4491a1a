//! Router state and outbound batching.

use crate::channel::{ChannelRegistry, ContextDelivery, PrivateChannelEvent, PrivateChannelNotice};
use crate::core::{InstanceId, Result};
use crate::instance::{InstanceDirectory, ListenerScope};
use crate::intent::{IntentCandidate, IntentResolver};
use crate::monitoring::RouterMetrics;
use crate::pending::{PendingKind, PendingTracker};
use crate::platform::MessageDelivery;
use crate::protocol::{
    Dialect, EventKind, InboundMessage, IntentResultValue, OutboundKind, OutboundMessage,
};
use crate::router::config::RouterConfig;
use serde_json::{json, Value};

/// All mutable routing state, owned by one router.
///
/// Only the router mutates it, always under its write lock.
#[derive(Debug)]
pub struct RouterState {
    /// Channels and context history
    pub channels: ChannelRegistry,
    /// Connected instances and listeners
    pub instances: InstanceDirectory,
    /// In-flight raises
    pub intents: IntentResolver,
}

impl RouterState {
    /// Build empty state from configuration.
    pub fn new(config: &RouterConfig) -> Result<Self> {
        Ok(Self {
            channels: ChannelRegistry::new(config.fixed_channels())?,
            instances: InstanceDirectory::new(),
            intents: IntentResolver::new(),
        })
    }

    /// Dialect an instance speaks (the default for unknown instances).
    pub fn dialect_of(&self, id: &InstanceId) -> Dialect {
        self.instances.get(id).map(|i| i.dialect).unwrap_or_default()
    }

    /// Check if a launch wait is satisfied: the instance is ready and has
    /// the awaited listener.
    pub fn wait_satisfied(&self, kind: &PendingKind, subject: &InstanceId) -> bool {
        let ready = self.instances.get(subject).is_some_and(|i| i.is_ready());
        ready
            && match kind {
                PendingKind::AwaitIntentListener { intent } => {
                    self.instances.intent_listener(subject, intent).is_some()
                }
                PendingKind::AwaitContextListener {
                    context_type: Some(context_type),
                } => self.instances.current_channel_listener(subject, context_type).is_some(),
                PendingKind::AwaitContextListener { context_type: None } => {
                    self.instances
                        .listeners_of(subject)
                        .any(|l| l.scope() == Some(&ListenerScope::CurrentChannel))
                }
                PendingKind::AwaitIntentResult { .. } | PendingKind::Disambiguation => false,
            }
    }
}

/// Pending waits, one tracker per outcome type.
#[derive(Clone, Default)]
pub(crate) struct Waits {
    /// User choice among intent candidates
    pub selections: PendingTracker<IntentCandidate>,
    /// Launched instance ready with the awaited listener
    pub readiness: PendingTracker<()>,
    /// Intent handler results
    pub results: PendingTracker<IntentResultValue>,
}

impl Waits {
    /// Fail every wait about an instance with `InstanceGone`.
    pub fn fail_subject(&self, subject: &InstanceId) -> usize {
        self.selections.fail_subject(subject)
            + self.readiness.fail_subject(subject)
            + self.results.fail_subject(subject)
    }

    /// Resolve launch waits that the current state satisfies.
    pub fn resolve_ready(&self, state: &RouterState) -> usize {
        self.readiness
            .resolve_matching(|kind, subject| state.wait_satisfied(kind, subject), ())
    }
}

/// Messages produced while handling one inbound message, delivered in order.
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    messages: Vec<(InstanceId, OutboundMessage)>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message.
    pub fn push(&mut self, to: &InstanceId, message: OutboundMessage) {
        self.messages.push((to.clone(), message));
    }

    /// Queue the response to `request` ahead of any events.
    pub fn respond(&mut self, to: &InstanceId, request: &InboundMessage, result: &Result<Value>) {
        let (dialect, kind, request_id) = (request.dialect, request.kind(), &request.request_id);
        let message = match result {
            Ok(payload) => OutboundMessage::response(dialect, kind, request_id, payload.clone()),
            Err(error) => OutboundMessage::error(dialect, kind, request_id, error),
        };
        self.messages.insert(0, (to.clone(), message));
    }

    /// Queue context events for listener deliveries.
    pub fn contexts(&mut self, state: &RouterState, deliveries: Vec<ContextDelivery>) {
        for delivery in deliveries {
            let dialect = state.dialect_of(&delivery.instance_id);
            let payload = json!({
                "channelId": delivery.channel_id,
                "context": delivery.context,
                "listenerId": delivery.listener_id,
            });
            self.push(
                &delivery.instance_id,
                OutboundMessage::event(dialect, EventKind::Broadcast, payload),
            );
        }
    }

    /// Queue private channel events.
    pub fn notices(&mut self, state: &RouterState, notices: Vec<PrivateChannelNotice>) {
        for notice in notices {
            let (kind, context_type) = match notice.event {
                PrivateChannelEvent::AddContextListener { context_type } => {
                    (EventKind::PrivateChannelAddContextListener, context_type)
                }
                PrivateChannelEvent::Unsubscribe { context_type } => {
                    (EventKind::PrivateChannelUnsubscribe, context_type)
                }
                PrivateChannelEvent::Disconnect => (EventKind::PrivateChannelDisconnect, None),
            };
            let payload = json!({
                "privateChannelId": notice.channel_id,
                "contextType": context_type,
            });
            let dialect = state.dialect_of(&notice.target);
            self.push(&notice.target, OutboundMessage::event(dialect, kind, payload));
        }
    }

    /// Drop everything but the response.
    pub fn discard_events(&mut self) {
        self.messages.truncate(1);
    }

    /// Deliver every queued message. Failures are logged and counted.
    pub fn flush(self, delivery: &dyn MessageDelivery, metrics: &RouterMetrics) {
        for (to, message) in self.messages {
            if message.is_error() {
                metrics.errors.inc();
            }
            if matches!(message.kind, OutboundKind::Event(EventKind::Broadcast)) {
                metrics.context_deliveries.inc();
            }
            let name = message.wire_name();
            if let Err(e) = delivery.deliver(&to, message) {
                metrics.delivery_failures.inc();
                tracing::warn!(instance = %to, message = %name, error = %e, "delivery failed");
            }
        }
    }
}
