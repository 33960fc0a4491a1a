//! Intent and open flows.
//!
//! Raises run as a sequence of short locked transactions separated by
//! waits on the pending trackers:
//! - search and select under the lock, then optional disambiguation
//! - optional launch, waiting for the new instance to listen
//! - dispatch under the lock, then wait for the handler's result
//! - completion under the lock

use crate::appd::{DirectoryApp, DirectoryQuery};
use crate::channel::ContextDelivery;
use crate::context::Context;
use crate::core::{AppIdentifier, Error, InstanceId, RequestId, Result};
use crate::instance::InstanceStatus;
use crate::intent::{
    CandidateSearch, CandidateTarget, InFlightRaise, IntentCandidate, RaiseState, Resolution,
};
use crate::pending::{PendingKind, PendingReceiver};
use crate::platform::DisambiguationRequest;
use crate::protocol::{
    Dialect, EventKind, FindIntentPayload, FindIntentsByContextPayload, InboundMessage,
    IntentResultPayload, IntentResultValue, OpenPayload, OutboundMessage,
    RaiseIntentForContextPayload, RaiseIntentPayload,
};
use crate::router::dispatch::MessageRouter;
use crate::router::state::{Outbox, RouterState};
use serde_json::{json, Value};
use tracing::Instrument;

/// Work left after a raise has been set up.
struct RaisePlan {
    raise_id: RequestId,
    context: Context,
    step: RaiseStep,
}

enum RaiseStep {
    Dispatch(IntentCandidate),
    Disambiguate {
        request: DisambiguationRequest,
        receiver: PendingReceiver<IntentCandidate>,
    },
}

impl MessageRouter {
    pub(super) async fn find_intent(
        &self,
        sender: &InstanceId,
        message: &InboundMessage,
        payload: FindIntentPayload,
    ) {
        let result = async {
            self.require_sender(sender).await?;
            let context_type = payload.context.as_ref().map(|c| c.context_type.clone());
            let apps = self
                .query_directory(DirectoryQuery::ByIntentAndContextType {
                    intent: payload.intent.clone(),
                    context_type: context_type.clone(),
                })
                .await?;

            let state = self.inner.state.read().await;
            let search = CandidateSearch {
                intent: Some(&payload.intent),
                context_type: context_type.as_deref(),
                result_type: payload.result_type.as_deref(),
            };
            let app_intent = state.intents.find_intent(&state.instances, &apps, search)?;
            Ok::<Value, Error>(json!({ "appIntent": app_intent }))
        }
        .await;
        self.reply(sender, message, result);
    }

    pub(super) async fn find_intents_by_context(
        &self,
        sender: &InstanceId,
        message: &InboundMessage,
        payload: FindIntentsByContextPayload,
    ) {
        let result = async {
            self.require_sender(sender).await?;
            let context_type = payload.context.context_type.as_str();
            let apps = self
                .query_directory(DirectoryQuery::ByContextType(context_type.to_string()))
                .await?;

            let state = self.inner.state.read().await;
            let app_intents = state.intents.find_intents_by_context(
                &state.instances,
                &apps,
                context_type,
                payload.result_type.as_deref(),
            )?;
            Ok::<Value, Error>(json!({ "appIntents": app_intents }))
        }
        .await;
        self.reply(sender, message, result);
    }

    pub(super) async fn raise_intent(
        &self,
        sender: &InstanceId,
        message: &InboundMessage,
        payload: RaiseIntentPayload,
    ) {
        let query = DirectoryQuery::ByIntentAndContextType {
            intent: payload.intent.clone(),
            context_type: Some(payload.context.context_type.clone()),
        };
        self.start_raise(
            sender,
            message,
            Some(&payload.intent),
            payload.context.clone(),
            payload.app.as_ref(),
            query,
        )
        .await
    }

    pub(super) async fn raise_intent_for_context(
        &self,
        sender: &InstanceId,
        message: &InboundMessage,
        payload: RaiseIntentForContextPayload,
    ) {
        let query = DirectoryQuery::ByContextType(payload.context.context_type.clone());
        let context = payload.context.clone();
        self.start_raise(sender, message, None, context, payload.app.as_ref(), query)
            .await
    }

    /// Set up a raise and hand the rest of it to a task.
    async fn start_raise(
        &self,
        sender: &InstanceId,
        message: &InboundMessage,
        intent: Option<&str>,
        context: Context,
        target: Option<&AppIdentifier>,
        query: DirectoryQuery,
    ) {
        self.inner.metrics.intents_raised.inc();

        let planned = async {
            context.validate()?;
            self.require_sender(sender).await?;
            let apps = self.query_directory(query).await?;
            let mut state = self.inner.state.write().await;
            self.plan_raise(&mut state, sender, message, intent, context, target, &apps)
        }
        .await;

        match planned {
            Ok(plan) => {
                let router = self.clone();
                let span = tracing::info_span!("raise", raise = %plan.raise_id);
                tokio::spawn(async move { router.run_raise(plan).await }.instrument(span));
            }
            Err(e) => {
                self.inner.metrics.intents_failed.inc();
                self.reply(sender, message, Err(e));
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn plan_raise(
        &self,
        state: &mut RouterState,
        sender: &InstanceId,
        message: &InboundMessage,
        intent: Option<&str>,
        context: Context,
        target: Option<&AppIdentifier>,
        apps: &[DirectoryApp],
    ) -> Result<RaisePlan> {
        let source_app = state.instances.require_active(sender)?.app_id.clone();
        let search = CandidateSearch {
            intent,
            context_type: Some(&context.context_type),
            result_type: None,
        };
        let candidates = state.intents.search(&state.instances, apps, search);
        let resolution = state.intents.select(candidates, target)?;

        let raise = InFlightRaise::new(
            &message.request_id,
            message.kind(),
            sender,
            message.dialect,
            intent,
            context.clone(),
        );
        let raise_id = state.intents.begin(raise);

        let step = match resolution {
            Resolution::Single(candidate) => state
                .intents
                .transition(&raise_id, RaiseState::Dispatching)
                .map(|_| RaiseStep::Dispatch(candidate)),
            Resolution::Ambiguous(candidates) => {
                state
                    .intents
                    .transition(&raise_id, RaiseState::Disambiguating)
                    .map(|raise| {
                        let selections = &self.inner.waits.selections;
                        let (handle, receiver) =
                            selections.create(PendingKind::Disambiguation, sender, None);
                        raise.waiting_on = Some(handle);
                        let request = DisambiguationRequest {
                            raise_id: raise_id.clone(),
                            source: AppIdentifier::instance(&source_app, sender),
                            intent: intent.map(str::to_string),
                            context: context.clone(),
                            candidates,
                        };
                        RaiseStep::Disambiguate { request, receiver }
                    })
            }
        };

        match step {
            Ok(step) => Ok(RaisePlan {
                raise_id,
                context,
                step,
            }),
            Err(e) => {
                state.intents.finish(&raise_id, RaiseState::Failed);
                Err(e)
            }
        }
    }

    async fn run_raise(self, plan: RaisePlan) {
        let raise_id = plan.raise_id.clone();
        let outcome = self.drive_raise(plan).await;
        self.complete_raise(&raise_id, outcome).await;
    }

    async fn drive_raise(&self, plan: RaisePlan) -> Result<IntentResultValue> {
        let candidate = match plan.step {
            RaiseStep::Dispatch(candidate) => candidate,
            RaiseStep::Disambiguate { request, receiver } => {
                self.disambiguate(&plan.raise_id, request, receiver).await?
            }
        };

        let target = match &candidate.target {
            CandidateTarget::Instance(id) => id.clone(),
            CandidateTarget::Directory(app) => {
                let awaited = PendingKind::AwaitIntentListener {
                    intent: candidate.intent.clone(),
                };
                self.launch_and_wait(app, Some(&plan.context), awaited).await?
            }
        };

        let receiver = self.dispatch_intent(&plan.raise_id, &candidate, &target).await?;
        receiver.wait().await
    }

    /// Ask the UI to choose. The choice arrives through the selection
    /// tracker, so a disconnecting raiser ends the wait.
    async fn disambiguate(
        &self,
        raise_id: &RequestId,
        request: DisambiguationRequest,
        receiver: PendingReceiver<IntentCandidate>,
    ) -> Result<IntentCandidate> {
        let handle = receiver.handle();
        let selections = self.inner.waits.selections.clone();

        match self.inner.resolver_ui.clone() {
            Some(ui) => {
                tokio::spawn(
                    async move {
                        let settled = match ui.select(&request).await {
                            Ok(Some(choice)) if request.candidates.contains(&choice) => {
                                selections.resolve(handle, choice)
                            }
                            Ok(Some(choice)) => {
                                let reason = format!("{} was not offered", choice.app_id);
                                selections.fail(handle, Error::invalid(reason))
                            }
                            Ok(None) => selections.fail(handle, Error::UserCancelled),
                            Err(e) => selections.fail(handle, e),
                        };
                        if !settled {
                            tracing::debug!(raise = %request.raise_id, "late selection dropped");
                        }
                    }
                    .in_current_span(),
                );
            }
            None => {
                tracing::warn!(raise = %raise_id, "several handlers but no resolver UI");
                selections.fail(handle, Error::UserCancelled);
            }
        }

        let choice = receiver.wait().await?;
        let mut state = self.inner.state.write().await;
        let raise = state.intents.transition(raise_id, RaiseState::Dispatching)?;
        raise.intent = Some(choice.intent.clone());
        raise.waiting_on = None;
        tracing::info!(app = %choice.app_id, intent = %choice.intent, "handler chosen");
        Ok(choice)
    }

    /// Launch a directory app and register it as pending.
    pub(super) async fn launch(
        &self,
        app: &DirectoryApp,
        context: Option<&Context>,
    ) -> Result<InstanceId> {
        self.inner.metrics.launches.inc();
        let instance_id = self.inner.launcher.launch(app, context).await.map_err(|e| {
            tracing::warn!(app = %app.app_id, error = %e, "launch failed");
            e
        })?;

        let mut state = self.inner.state.write().await;
        if !state.instances.get(&instance_id).is_some_and(|i| i.is_active()) {
            state
                .instances
                .register(&instance_id, &app.app_id, InstanceStatus::Pending, Dialect::default());
        }
        tracing::info!(app = %app.app_id, instance = %instance_id, "app launched");
        Ok(instance_id)
    }

    /// Launch an app and wait until it is ready with the awaited listener.
    async fn launch_and_wait(
        &self,
        app: &DirectoryApp,
        context: Option<&Context>,
        awaited: PendingKind,
    ) -> Result<InstanceId> {
        let instance_id = self.launch(app, context).await?;

        let receiver = {
            let state = self.inner.state.read().await;
            if !state.instances.get(&instance_id).is_some_and(|i| i.is_active()) {
                return Err(Error::InstanceGone(instance_id));
            }
            if state.wait_satisfied(&awaited, &instance_id) {
                None
            } else {
                let deadline = Some(self.inner.config.launch_timeout());
                Some(self.inner.waits.readiness.create(awaited, &instance_id, deadline).1)
            }
        };

        if let Some(receiver) = receiver {
            receiver.wait().await.map_err(|e| match e {
                Error::AppTimeout(_) => {
                    tracing::warn!(
                        app = %app.app_id,
                        instance = %instance_id,
                        "launched app never became ready"
                    );
                    Error::AppTimeout(app.app_id.clone())
                }
                other => other,
            })?;
        }
        Ok(instance_id)
    }

    /// Deliver the intent to its target and start waiting for the result.
    async fn dispatch_intent(
        &self,
        raise_id: &RequestId,
        candidate: &IntentCandidate,
        target: &InstanceId,
    ) -> Result<PendingReceiver<IntentResultValue>> {
        let mut state = self.inner.state.write().await;
        let mut outbox = Outbox::new();
        let receiver = self.dispatch_locked(&mut state, &mut outbox, raise_id, candidate, target)?;
        outbox.flush(self.inner.delivery.as_ref(), &self.inner.metrics);
        Ok(receiver)
    }

    fn dispatch_locked(
        &self,
        state: &mut RouterState,
        outbox: &mut Outbox,
        raise_id: &RequestId,
        candidate: &IntentCandidate,
        target: &InstanceId,
    ) -> Result<PendingReceiver<IntentResultValue>> {
        let intent = candidate.intent.as_str();
        let handler = state
            .instances
            .require_active(target)
            .map_err(|_| Error::InstanceGone(target.clone()))?;
        let (target_app, target_dialect) = (handler.app_id.clone(), handler.dialect);
        if state.instances.intent_listener(target, intent).is_none() {
            let reason = format!("{} is not listening for {}", target, intent);
            return Err(Error::DeliveryFailed(reason));
        }

        let raise = state
            .intents
            .get(raise_id)
            .ok_or_else(|| Error::Internal(format!("raise {} vanished", raise_id)))?;
        let source = raise.source.clone();
        let source_app = state
            .instances
            .require_active(&source)
            .map_err(|_| Error::InstanceGone(source.clone()))?
            .app_id
            .clone();

        let resolution = OutboundMessage::response(
            raise.source_dialect,
            raise.request_kind,
            &raise.request_id,
            json!({
                "intentResolution": {
                    "source": AppIdentifier::instance(&target_app, target),
                    "intent": intent,
                }
            }),
        );
        let event = OutboundMessage::event(
            target_dialect,
            EventKind::Intent,
            json!({
                "raiseId": raise_id,
                "intent": intent,
                "context": raise.context,
                "originatingApp": AppIdentifier::instance(&source_app, &source),
            }),
        );
        outbox.push(&source, resolution);
        outbox.push(target, event);

        let raise = state.intents.transition(raise_id, RaiseState::AwaitingResult)?;
        raise.target = Some(target.clone());
        let awaited = PendingKind::AwaitIntentResult {
            raise_id: raise_id.clone(),
        };
        let (handle, receiver) =
            self.inner
                .waits
                .results
                .create(awaited, target, Some(self.inner.config.result_timeout()));
        raise.waiting_on = Some(handle);

        tracing::info!(intent, target = %target, app = %target_app, "intent dispatched");
        Ok(receiver)
    }

    /// Finish a raise and tell the raiser how it ended.
    async fn complete_raise(&self, raise_id: &RequestId, outcome: Result<IntentResultValue>) {
        let mut state = self.inner.state.write().await;
        let Some((awaiting, source)) = state
            .intents
            .get(raise_id)
            .map(|r| (r.state == RaiseState::AwaitingResult, r.source.clone()))
        else {
            tracing::error!(raise = %raise_id, "completion for an unknown raise");
            return;
        };

        let outcome = match outcome {
            Ok(IntentResultValue::Channel(channel))
                if state.channels.private_channel(&channel.id).is_some() =>
            {
                let RouterState { channels, instances, .. } = &mut *state;
                channels
                    .add_private_participant(instances, &channel.id, &source)
                    .map(|_| IntentResultValue::Channel(channel))
            }
            other => other,
        };
        let terminal = match &outcome {
            Ok(_) => RaiseState::Resolved,
            Err(Error::Timeout) if awaiting => RaiseState::TimedOut,
            Err(_) => RaiseState::Failed,
        };
        let Some(raise) = state.intents.finish(raise_id, terminal) else {
            tracing::error!(raise = %raise_id, state = %terminal, "raise could not finish");
            return;
        };

        match terminal {
            RaiseState::Resolved => self.inner.metrics.intents_resolved.inc(),
            RaiseState::TimedOut => self.inner.metrics.intents_timed_out.inc(),
            _ => self.inner.metrics.intents_failed.inc(),
        }
        if let Err(e) = &outcome {
            let intent = raise.intent.as_deref().unwrap_or("*");
            tracing::info!(intent, error = %e, "raise failed");
        }

        let (dialect, request_id) = (raise.source_dialect, &raise.request_id);
        let message = match (&raise.target, &outcome) {
            (Some(_), Ok(value)) => {
                let payload = json!({ "intentResult": value });
                OutboundMessage::raise_result(dialect, request_id, Ok(payload))
            }
            (Some(_), Err(e)) => OutboundMessage::raise_result(dialect, request_id, Err(e)),
            (None, Err(e)) => OutboundMessage::error(dialect, raise.request_kind, request_id, e),
            (None, Ok(_)) => {
                tracing::error!(raise = %raise_id, "raise resolved without a target");
                return;
            }
        };
        let mut outbox = Outbox::new();
        outbox.push(&raise.source, message);
        outbox.flush(self.inner.delivery.as_ref(), &self.inner.metrics);
    }

    /// Apply a handler's result to the raise it answers.
    pub(super) fn apply_intent_result(
        &self,
        state: &mut RouterState,
        sender: &InstanceId,
        payload: &IntentResultPayload,
    ) -> Result<Value> {
        let raise = state
            .intents
            .get(&payload.raise_id)
            .ok_or_else(|| Error::invalid(format!("unknown raise {}", payload.raise_id)))?;
        if raise.state != RaiseState::AwaitingResult || raise.target.as_ref() != Some(sender) {
            return Err(Error::invalid(format!(
                "{} is not awaiting a result from {}",
                payload.raise_id, sender
            )));
        }
        let handle = raise.waiting_on.ok_or_else(|| {
            Error::Internal(format!("raise {} has no result wait", payload.raise_id))
        })?;

        if let Some(IntentResultValue::Channel(channel)) = &payload.result {
            let foreign = state
                .channels
                .private_channel(&channel.id)
                .is_some_and(|private| !private.is_participant(sender));
            if foreign {
                return Err(Error::AccessDenied(channel.id.clone()));
            }
        }

        let results = &self.inner.waits.results;
        let settled = match &payload.error {
            Some(reason) => results.fail(handle, Error::IntentHandlerRejected(reason.clone())),
            None => {
                let value = payload.result.clone().unwrap_or(IntentResultValue::Void);
                results.resolve(handle, value)
            }
        };
        if !settled {
            return Err(Error::Timeout);
        }
        Ok(json!({}))
    }

    pub(super) async fn open(
        &self,
        sender: &InstanceId,
        message: &InboundMessage,
        payload: OpenPayload,
    ) {
        let found = async {
            self.require_sender(sender).await?;
            if let Some(context) = &payload.context {
                context.validate()?;
            }
            let app_id = payload.app.app_id.as_str();
            self.query_directory(DirectoryQuery::ByAppId(app_id.to_string()))
                .await?
                .into_iter()
                .find(|app| app.app_id == app_id)
                .ok_or_else(|| Error::AppNotFound(app_id.to_string()))
        }
        .await;

        let app = match found {
            Ok(app) => app,
            Err(e) => return self.reply(sender, message, Err(e)),
        };

        let router = self.clone();
        let sender = sender.clone();
        let message = message.clone();
        tokio::spawn(
            async move {
                let opened = router.open_app(&app, payload.context).await;
                let result = opened.map(|id| {
                    json!({ "appIdentifier": AppIdentifier::instance(&app.app_id, &id) })
                });
                router.reply(&sender, &message, result);
            }
            .in_current_span(),
        );
    }

    /// Launch an app; with a context, wait for a matching listener and hand
    /// it the context.
    async fn open_app(&self, app: &DirectoryApp, context: Option<Context>) -> Result<InstanceId> {
        let Some(context) = context else {
            return self.launch(app, None).await;
        };

        let awaited = PendingKind::AwaitContextListener {
            context_type: Some(context.context_type.clone()),
        };
        let instance_id = self.launch_and_wait(app, Some(&context), awaited).await?;

        let state = self.inner.state.read().await;
        let listener_id = state
            .instances
            .current_channel_listener(&instance_id, &context.context_type)
            .map(|l| l.id.clone())
            .ok_or_else(|| Error::InstanceGone(instance_id.clone()))?;
        let mut outbox = Outbox::new();
        outbox.contexts(
            &state,
            vec![ContextDelivery {
                instance_id: instance_id.clone(),
                listener_id,
                channel_id: None,
                context,
            }],
        );
        outbox.flush(self.inner.delivery.as_ref(), &self.inner.metrics);
        Ok(instance_id)
    }

    async fn require_sender(&self, sender: &InstanceId) -> Result<()> {
        self.inner.state.read().await.instances.require_active(sender)?;
        Ok(())
    }
}
