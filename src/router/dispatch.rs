//! Message router.
//!
//! Every inbound message is one serialized transaction against
//! [`RouterState`]: the synchronous phase runs under the write lock and the
//! resulting messages are delivered before the lock is released, which keeps
//! per-channel broadcast order. Intent and open flows continue in spawned
//! tasks that only take the lock between waits.

use crate::appd::{AppDirectory, DirectoryApp, DirectoryQuery, StaticDirectory};
use crate::channel::{Channel, ChannelType};
use crate::context::Context;
use crate::core::{AppIdentifier, Error, InstanceId, RequestId, Result};
use crate::instance::{Instance, InstanceStatus};
use crate::intent::RaiseState;
use crate::monitoring::{MetricsSnapshot, RouterMetrics};
use crate::platform::{AppLauncher, DisambiguationUi, MessageDelivery, UnavailableLauncher};
use crate::protocol::{Dialect, InboundMessage, OutboundMessage, Request, RequestKind};
use crate::router::config::RouterConfig;
use crate::router::state::{Outbox, RouterState, Waits};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::Instrument;

pub(crate) struct RouterInner {
    pub config: RouterConfig,
    pub state: RwLock<RouterState>,
    pub delivery: Arc<dyn MessageDelivery>,
    pub directory: Arc<dyn AppDirectory>,
    pub launcher: Arc<dyn AppLauncher>,
    pub resolver_ui: Option<Arc<dyn DisambiguationUi>>,
    pub waits: Waits,
    pub metrics: RouterMetrics,
}

/// Builder for [`MessageRouter`].
pub struct RouterBuilder {
    config: RouterConfig,
    delivery: Option<Arc<dyn MessageDelivery>>,
    directory: Arc<dyn AppDirectory>,
    launcher: Arc<dyn AppLauncher>,
    resolver_ui: Option<Arc<dyn DisambiguationUi>>,
}

impl RouterBuilder {
    /// Set the delivery capability (required).
    pub fn with_delivery(mut self, delivery: Arc<dyn MessageDelivery>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    /// Set the app directory (defaults to an empty one).
    pub fn with_directory(mut self, directory: Arc<dyn AppDirectory>) -> Self {
        self.directory = directory;
        self
    }

    /// Set the launcher (defaults to one that always fails).
    pub fn with_launcher(mut self, launcher: Arc<dyn AppLauncher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Set the disambiguation UI. Without one, ambiguous raises are cancelled.
    pub fn with_resolver_ui(mut self, ui: Arc<dyn DisambiguationUi>) -> Self {
        self.resolver_ui = Some(ui);
        self
    }

    /// Validate configuration and build the router.
    pub fn build(self) -> Result<MessageRouter> {
        self.config.validate()?;
        let delivery = self
            .delivery
            .ok_or_else(|| Error::Internal("router requires a delivery capability".to_string()))?;
        let state = RouterState::new(&self.config)?;

        tracing::info!(
            user_channels = self.config.user_channels.len(),
            system_channels = self.config.system_channels.len(),
            launch_timeout_ms = self.config.launch_timeout_ms,
            result_timeout_ms = self.config.result_timeout_ms,
            "message router created"
        );

        Ok(MessageRouter {
            inner: Arc::new(RouterInner {
                config: self.config,
                state: RwLock::new(state),
                delivery,
                directory: self.directory,
                launcher: self.launcher,
                resolver_ui: self.resolver_ui,
                waits: Waits::default(),
                metrics: RouterMetrics::new(),
            }),
        })
    }
}

/// The desktop agent's message router.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MessageRouter {
    pub(crate) inner: Arc<RouterInner>,
}

impl MessageRouter {
    /// Start building a router.
    pub fn builder(config: RouterConfig) -> RouterBuilder {
        RouterBuilder {
            config,
            delivery: None,
            directory: Arc::new(StaticDirectory::new()),
            launcher: Arc::new(UnavailableLauncher),
            resolver_ui: None,
        }
    }

    /// Create a router with the required collaborators.
    pub fn new(
        config: RouterConfig,
        delivery: Arc<dyn MessageDelivery>,
        directory: Arc<dyn AppDirectory>,
        launcher: Arc<dyn AppLauncher>,
    ) -> Result<Self> {
        Self::builder(config)
            .with_delivery(delivery)
            .with_directory(directory)
            .with_launcher(launcher)
            .build()
    }

    /// Router configuration.
    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    /// Handle a typed inbound message from `sender`.
    ///
    /// Failures become correlated error responses; nothing is returned.
    pub async fn handle_inbound_message(&self, sender: &InstanceId, message: InboundMessage) {
        self.inner.metrics.messages.inc();
        let span = tracing::debug_span!(
            "message",
            instance = %sender,
            kind = ?message.kind(),
            request = %message.request_id
        );

        async {
            match message.request.clone() {
                Request::FindIntent(payload) => self.find_intent(sender, &message, payload).await,
                Request::FindIntentsByContext(payload) => {
                    self.find_intents_by_context(sender, &message, payload).await
                }
                Request::RaiseIntent(payload) => self.raise_intent(sender, &message, payload).await,
                Request::RaiseIntentForContext(payload) => {
                    self.raise_intent_for_context(sender, &message, payload).await
                }
                Request::Open(payload) => self.open(sender, &message, payload).await,
                Request::Disconnect => {
                    if let Err(e) = self.on_instance_disconnect(sender).await {
                        tracing::debug!(error = %e, "disconnect from unknown instance");
                    }
                }
                _ => self.apply(sender, &message).await,
            }
        }
        .instrument(span)
        .await
    }

    /// Validate a raw envelope and handle it.
    ///
    /// Envelopes too broken to answer (no recognizable kind or correlation
    /// id) are rejected with `InvalidRequest`; other validation failures are
    /// answered with an error response.
    pub async fn handle_raw_message(&self, sender: &InstanceId, raw: &Value) -> Result<()> {
        match InboundMessage::from_value(raw) {
            Ok(message) => {
                self.handle_inbound_message(sender, message).await;
                Ok(())
            }
            Err(error) => {
                self.inner.metrics.messages.inc();
                let Some((dialect, kind, request_id)) = correlation_of(raw) else {
                    tracing::warn!(instance = %sender, error = %error, "unanswerable message");
                    return Err(error);
                };
                tracing::debug!(instance = %sender, error = %error, "malformed message");
                let response = OutboundMessage::error(dialect, kind, &request_id, &error);
                self.send(sender, response);
                Ok(())
            }
        }
    }

    /// An instance went away: release its listeners and memberships and fail
    /// every wait about it with `InstanceGone`.
    pub async fn on_instance_disconnect(&self, instance_id: &InstanceId) -> Result<()> {
        let mut state = self.inner.state.write().await;
        let removed = state.instances.remove(instance_id)?;
        let notices = state.channels.release_instance(&removed);

        let mut outbox = Outbox::new();
        outbox.notices(&state, notices);
        let mut failed = self.inner.waits.fail_subject(instance_id);
        for raise_id in state.intents.raises_from(instance_id) {
            let Some(raise) = state.intents.get(&raise_id) else { continue };
            if let (RaiseState::AwaitingResult, Some(handle)) = (raise.state, raise.waiting_on) {
                let gone = Error::InstanceGone(instance_id.clone());
                failed += usize::from(self.inner.waits.results.fail(handle, gone));
            }
        }

        tracing::info!(
            instance = %instance_id,
            app = %removed.instance.app_id,
            listeners = removed.listeners.len(),
            failed_waits = failed,
            "instance disconnected"
        );
        outbox.flush(self.inner.delivery.as_ref(), &self.inner.metrics);
        Ok(())
    }

    /// The platform reports an instance as connected.
    pub async fn on_instance_ready(&self, instance_id: &InstanceId) -> Result<()> {
        let mut state = self.inner.state.write().await;
        let previous = state.instances.require_active(instance_id)?.status;
        if previous == InstanceStatus::Pending {
            state.instances.update_status(instance_id, InstanceStatus::Ready)?;
            tracing::info!(instance = %instance_id, "instance ready");
        }
        self.inner.waits.resolve_ready(&state);
        Ok(())
    }

    /// Snapshot of an instance.
    pub async fn instance(&self, instance_id: &InstanceId) -> Option<Instance> {
        self.inner.state.read().await.instances.get(instance_id).cloned()
    }

    /// Current user/system channel of an instance.
    pub async fn current_channel(&self, instance_id: &InstanceId) -> Option<Channel> {
        let state = self.inner.state.read().await;
        state.channels.current_channel(&state.instances, instance_id).ok().flatten()
    }

    /// Latest context on a channel, optionally of a type.
    pub async fn latest_context(
        &self,
        channel_id: &str,
        context_type: Option<&str>,
    ) -> Option<Context> {
        let state = self.inner.state.read().await;
        state.channels.contexts().latest(channel_id, context_type).cloned()
    }

    /// Metrics snapshot.
    pub async fn metrics(&self) -> MetricsSnapshot {
        let state = self.inner.state.read().await;
        let mut snapshot = self.inner.metrics.snapshot();
        snapshot.active_instances = state.instances.active_count() as u64;
        snapshot.raises_in_flight = state.intents.in_flight() as u64;
        snapshot
    }

    /// Deliver one message outside any transaction.
    pub(crate) fn send(&self, to: &InstanceId, message: OutboundMessage) {
        let mut outbox = Outbox::new();
        outbox.push(to, message);
        outbox.flush(self.inner.delivery.as_ref(), &self.inner.metrics);
    }

    /// Answer `request` outside any transaction.
    pub(crate) fn reply(&self, to: &InstanceId, request: &InboundMessage, result: Result<Value>) {
        if let Err(e) = &result {
            tracing::debug!(instance = %to, kind = ?request.kind(), error = %e, "request failed");
        }
        let mut outbox = Outbox::new();
        outbox.respond(to, request, &result);
        outbox.flush(self.inner.delivery.as_ref(), &self.inner.metrics);
    }

    /// Ask the directory, logging failures.
    pub(crate) async fn query_directory(&self, query: DirectoryQuery) -> Result<Vec<DirectoryApp>> {
        self.inner.directory.query(&query).await.map_err(|e| {
            tracing::warn!(?query, error = %e, "directory query failed");
            e
        })
    }

    /// Synchronous request kinds: one write-locked transaction.
    async fn apply(&self, sender: &InstanceId, message: &InboundMessage) {
        let mut state = self.inner.state.write().await;
        let mut outbox = Outbox::new();

        let result = self.apply_locked(&mut state, &mut outbox, sender, message);
        let failed = result.is_err();
        if message.kind().expects_response() {
            outbox.respond(sender, message, &result);
        }
        if failed {
            outbox.discard_events();
            if let Err(e) = &result {
                tracing::debug!(error = %e, "request failed");
            }
        }

        if matches!(
            message.kind(),
            RequestKind::Hello | RequestKind::AddIntentListener | RequestKind::AddContextListener
        ) {
            let resolved = self.inner.waits.resolve_ready(&state);
            if resolved > 0 {
                tracing::debug!(instance = %sender, resolved, "launch waits satisfied");
            }
        }

        outbox.flush(self.inner.delivery.as_ref(), &self.inner.metrics);
    }

    fn apply_locked(
        &self,
        state: &mut RouterState,
        outbox: &mut Outbox,
        sender: &InstanceId,
        message: &InboundMessage,
    ) -> Result<Value> {
        if let Request::Hello(hello) = &message.request {
            let title = hello.title.clone();
            return Ok(self.hello(state, sender, message.dialect, &hello.app_id, title));
        }
        state.instances.require_active(sender)?;

        match &message.request {
            Request::JoinChannel(p) => {
                let deliver_current = self.inner.config.deliver_context_on_join;
                let deliveries = state.channels.join_channel(
                    &mut state.instances,
                    sender,
                    &p.channel_id,
                    deliver_current,
                )?;
                outbox.contexts(state, deliveries);
                Ok(json!({}))
            }
            Request::LeaveChannel => {
                state.channels.leave_channel(&mut state.instances, sender)?;
                Ok(json!({}))
            }
            Request::GetOrCreateAppChannel(p) => {
                let channel = state.channels.get_or_create_app_channel(
                    &mut state.instances,
                    sender,
                    &p.channel_id,
                )?;
                Ok(json!({ "channel": channel }))
            }
            Request::Broadcast(p) => {
                let deliveries = state.channels.broadcast(
                    &state.instances,
                    sender,
                    p.channel_id.as_deref(),
                    p.context.clone(),
                )?;
                self.inner.metrics.broadcasts.inc();
                outbox.contexts(state, deliveries);
                Ok(json!({}))
            }
            Request::GetCurrentContext(p) => {
                let context = state.channels.current_context(
                    &state.instances,
                    sender,
                    p.channel_id.as_deref(),
                    p.context_type.as_deref(),
                )?;
                Ok(json!({ "context": context }))
            }
            Request::AddContextListener(p) => {
                let (listener_id, notices) = state.channels.add_context_listener(
                    &mut state.instances,
                    sender,
                    p.channel_id.as_deref(),
                    p.context_type.as_deref(),
                )?;
                outbox.notices(state, notices);
                Ok(json!({ "listenerId": listener_id }))
            }
            Request::RemoveContextListener(p) => {
                let notices = state.channels.remove_context_listener(
                    &mut state.instances,
                    sender,
                    &p.listener_id,
                )?;
                outbox.notices(state, notices);
                Ok(json!({}))
            }
            Request::AddIntentListener(p) => {
                let listener_id = state.instances.add_intent_listener(sender, &p.intent)?;
                tracing::debug!(intent = %p.intent, listener = %listener_id, "listener added");
                Ok(json!({ "listenerId": listener_id }))
            }
            Request::RemoveIntentListener(p) => {
                match state.instances.listener(&p.listener_id) {
                    Some(l) if &l.instance_id == sender && l.scope().is_none() => {}
                    _ => {
                        let reason = format!("unknown intent listener {}", p.listener_id);
                        return Err(Error::invalid(reason));
                    }
                }
                state.instances.remove_listener(&p.listener_id);
                Ok(json!({}))
            }
            Request::IntentResult(p) => self.apply_intent_result(state, sender, p),
            Request::GetCurrentChannel => {
                let channel = state.channels.current_channel(&state.instances, sender)?;
                Ok(json!({ "channel": channel }))
            }
            Request::GetUserChannels => {
                let user_channels: Vec<&Channel> = state
                    .channels
                    .user_channels()
                    .iter()
                    .filter(|c| c.channel_type == ChannelType::User)
                    .collect();
                Ok(json!({ "userChannels": user_channels }))
            }
            Request::CreatePrivateChannel => {
                let channel = state.channels.create_private_channel(&mut state.instances, sender)?;
                Ok(json!({ "privateChannel": channel }))
            }
            Request::PrivateChannelDisconnect(p) => {
                let notices = state.channels.disconnect_private(
                    &mut state.instances,
                    sender,
                    &p.channel_id,
                )?;
                outbox.notices(state, notices);
                Ok(json!({}))
            }
            Request::FindInstances(p) => {
                let found: Vec<AppIdentifier> = state
                    .instances
                    .find_by_app(&p.app.app_id)
                    .into_iter()
                    .map(|i| AppIdentifier::instance(&i.app_id, &i.id))
                    .collect();
                Ok(json!({ "appIdentifiers": found }))
            }
            Request::GetInfo => {
                let instance = state.instances.require_active(sender)?;
                let provider = &self.inner.config.provider;
                Ok(json!({
                    "fdc3Version": provider.fdc3_version,
                    "provider": provider.provider,
                    "providerVersion": provider.provider_version,
                    "appMetadata": {
                        "appId": instance.app_id,
                        "instanceId": instance.id,
                        "title": instance.title,
                    },
                }))
            }
            other => Err(Error::Internal(format!(
                "{:?} is not a synchronous request",
                other.kind()
            ))),
        }
    }

    fn hello(
        &self,
        state: &mut RouterState,
        sender: &InstanceId,
        dialect: Dialect,
        app_id: &str,
        title: Option<String>,
    ) -> Value {
        let previous = state.instances.get(sender).map(|i| i.status);
        state.instances.register(sender, app_id, InstanceStatus::Ready, dialect);
        if title.is_some() {
            state.instances.set_title(sender, title);
        }
        tracing::info!(instance = %sender, app = app_id, %dialect, ?previous, "instance connected");
        json!({ "appIdentifier": AppIdentifier::instance(app_id, sender) })
    }
}

/// Recover dialect, kind and correlation id from an envelope that failed
/// validation.
fn correlation_of(raw: &Value) -> Option<(Dialect, RequestKind, RequestId)> {
    let dialect = Dialect::detect(raw)?;
    let (name, request_id) = match dialect {
        Dialect::V2 => (
            raw.get("type")?.as_str()?,
            raw.pointer("/meta/requestUuid")?.as_str()?,
        ),
        Dialect::V1 => (raw.get("topic")?.as_str()?, raw.get("requestId")?.as_str()?),
    };
    let kind = RequestKind::from_wire(dialect, name)?;
    Some((dialect, kind, RequestId::new(request_id)))
}
