use super::*;
use crate::appd::{DirectoryApp, IntentDefinition, StaticDirectory};
use crate::context::Context;
use crate::core::{AppIdentifier, ErrorKind, InstanceId, ListenerId, RequestId, Result};
use crate::intent::IntentCandidate;
use crate::platform::{AppLauncher, ChannelDelivery, DisambiguationRequest, DisambiguationUi};
use crate::protocol::{
    AddIntentListenerPayload, BroadcastPayload, ChannelContextPayload, ChannelPayload, ChannelRef,
    Dialect, EventKind, HelloPayload, InboundMessage, IntentResultPayload, IntentResultValue,
    OpenPayload, OutboundKind, OutboundMessage, RaiseIntentForContextPayload, RaiseIntentPayload,
    Request, RequestKind,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio_test::{assert_err, assert_ok};

type Inbox = mpsc::UnboundedReceiver<OutboundMessage>;

/// Launcher that hands out fixed instance ids and reports each launch.
struct ScriptedLauncher {
    launched: mpsc::UnboundedSender<(String, InstanceId)>,
    count: Mutex<u32>,
}

#[async_trait]
impl AppLauncher for ScriptedLauncher {
    async fn launch(&self, app: &DirectoryApp, _context: Option<&Context>) -> Result<InstanceId> {
        let n = {
            let mut count = self.count.lock().unwrap();
            *count += 1;
            *count
        };
        let id = InstanceId::new(format!("{}-{}", app.app_id, n));
        let _ = self.launched.send((app.app_id.clone(), id.clone()));
        Ok(id)
    }
}

/// UI that always picks the named app, or cancels.
struct PickApp(Option<String>);

#[async_trait]
impl DisambiguationUi for PickApp {
    async fn select(&self, request: &DisambiguationRequest) -> Result<Option<IntentCandidate>> {
        Ok(self
            .0
            .as_ref()
            .and_then(|app_id| request.candidates.iter().find(|c| &c.app_id == app_id).cloned()))
    }
}

/// UI that reports each request and answers only once released.
struct HeldUi {
    asked: mpsc::UnboundedSender<RequestId>,
    release: Arc<Notify>,
}

#[async_trait]
impl DisambiguationUi for HeldUi {
    async fn select(&self, request: &DisambiguationRequest) -> Result<Option<IntentCandidate>> {
        let _ = self.asked.send(request.raise_id.clone());
        self.release.notified().await;
        Ok(request.candidates.first().cloned())
    }
}

struct Harness {
    router: MessageRouter,
    delivery: Arc<ChannelDelivery>,
    launches: mpsc::UnboundedReceiver<(String, InstanceId)>,
}

impl Harness {
    fn new(directory: StaticDirectory) -> Self {
        Self::build(RouterConfig::default(), directory, None)
    }

    fn build(
        config: RouterConfig,
        directory: StaticDirectory,
        ui: Option<Arc<dyn DisambiguationUi>>,
    ) -> Self {
        let delivery = Arc::new(ChannelDelivery::new());
        let (tx, launches) = mpsc::unbounded_channel();
        let launcher = Arc::new(ScriptedLauncher {
            launched: tx,
            count: Mutex::new(0),
        });
        let mut builder = MessageRouter::builder(config)
            .with_delivery(delivery.clone())
            .with_directory(Arc::new(directory))
            .with_launcher(launcher);
        if let Some(ui) = ui {
            builder = builder.with_resolver_ui(ui);
        }
        Self {
            router: builder.build().unwrap(),
            delivery,
            launches,
        }
    }

    async fn send(&self, from: &InstanceId, request: Request) -> RequestId {
        let message = InboundMessage::generate(Dialect::V2, request);
        let request_id = message.request_id.clone();
        self.router.handle_inbound_message(from, message).await;
        request_id
    }

    async fn connect(&self, id: &str, app_id: &str) -> (InstanceId, Inbox) {
        let id = InstanceId::new(id);
        let mut inbox = self.delivery.connect(&id);
        let hello = HelloPayload {
            app_id: app_id.to_string(),
            title: None,
        };
        self.send(&id, Request::Hello(hello)).await;
        let response = next(&mut inbox).await;
        assert!(response.is_response_to(RequestKind::Hello));
        (id, inbox)
    }

    async fn listen_for(&self, id: &InstanceId, inbox: &mut Inbox, intent: &str) {
        let payload = AddIntentListenerPayload {
            intent: intent.to_string(),
        };
        self.send(id, Request::AddIntentListener(payload)).await;
        assert!(!next(inbox).await.is_error());
    }

    async fn join(&self, id: &InstanceId, inbox: &mut Inbox, channel_id: &str) {
        let payload = ChannelPayload {
            channel_id: channel_id.to_string(),
        };
        self.send(id, Request::JoinChannel(payload)).await;
        assert!(!next(inbox).await.is_error());
    }

    async fn raise(
        &self,
        from: &InstanceId,
        intent: &str,
        app: Option<AppIdentifier>,
    ) -> RequestId {
        let payload = RaiseIntentPayload {
            intent: intent.to_string(),
            context: instrument("AAPL"),
            app,
        };
        self.send(from, Request::RaiseIntent(payload)).await
    }
}

async fn next(inbox: &mut Inbox) -> OutboundMessage {
    tokio::time::timeout(Duration::from_secs(5), inbox.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("inbox closed")
}

fn instrument(ticker: &str) -> Context {
    Context::new("fdc3.instrument").with_field("id", json!({ "ticker": ticker }))
}

fn chart_app() -> DirectoryApp {
    DirectoryApp::new("chart")
        .with_title("Chart")
        .with_intent(IntentDefinition::new("ViewChart").with_context("fdc3.instrument"))
}

fn news_app() -> DirectoryApp {
    DirectoryApp::new("news")
        .with_title("News")
        .with_intent(IntentDefinition::new("ViewChart").with_context("fdc3.instrument"))
}

#[tokio::test]
async fn test_broadcast_reaches_channel_listeners() {
    let harness = Harness::new(StaticDirectory::new());
    let (a, mut a_inbox) = harness.connect("a", "blotter").await;
    let (b, mut b_inbox) = harness.connect("b", "chart").await;
    harness.join(&a, &mut a_inbox, "red").await;
    harness.join(&b, &mut b_inbox, "red").await;

    let listen = ChannelContextPayload {
        channel_id: None,
        context_type: Some("fdc3.instrument".to_string()),
    };
    harness.send(&b, Request::AddContextListener(listen)).await;
    let response = next(&mut b_inbox).await;
    let listener_id = response.payload["listenerId"].as_str().unwrap().to_string();

    let broadcast = BroadcastPayload {
        channel_id: None,
        context: instrument("MSFT"),
    };
    harness.send(&a, Request::Broadcast(broadcast)).await;
    assert!(next(&mut a_inbox).await.is_response_to(RequestKind::Broadcast));
    assert!(a_inbox.try_recv().is_err());

    let event = next(&mut b_inbox).await;
    assert_eq!(event.kind, OutboundKind::Event(EventKind::Broadcast));
    assert_eq!(event.payload["channelId"], "red");
    assert_eq!(event.payload["listenerId"], listener_id.as_str());
    assert_eq!(event.payload["context"]["id"]["ticker"], "MSFT");

    let (c, mut c_inbox) = harness.connect("c", "grid").await;
    let query = ChannelContextPayload {
        channel_id: Some("red".to_string()),
        context_type: None,
    };
    harness.send(&c, Request::GetCurrentContext(query)).await;
    let response = next(&mut c_inbox).await;
    assert_eq!(response.payload["context"]["type"], "fdc3.instrument");

    let latest = harness.router.latest_context("red", Some("fdc3.instrument")).await;
    assert_eq!(latest, Some(instrument("MSFT")));
    assert_eq!(harness.router.metrics().await.broadcasts, 1);
}

#[tokio::test]
async fn test_join_delivers_latest_context() {
    let harness = Harness::new(StaticDirectory::new());
    let (a, mut a_inbox) = harness.connect("a", "blotter").await;
    let (b, mut b_inbox) = harness.connect("b", "chart").await;

    harness.join(&a, &mut a_inbox, "blue").await;
    let broadcast = BroadcastPayload {
        channel_id: None,
        context: instrument("IBM"),
    };
    harness.send(&a, Request::Broadcast(broadcast)).await;
    next(&mut a_inbox).await;

    harness
        .send(&b, Request::AddContextListener(ChannelContextPayload::default()))
        .await;
    next(&mut b_inbox).await;

    let payload = ChannelPayload {
        channel_id: "blue".to_string(),
    };
    harness.send(&b, Request::JoinChannel(payload)).await;
    assert!(next(&mut b_inbox).await.is_response_to(RequestKind::JoinChannel));
    let event = next(&mut b_inbox).await;
    assert_eq!(event.payload["context"]["id"]["ticker"], "IBM");

    let channel = harness.router.current_channel(&b).await.unwrap();
    assert_eq!(channel.id, "blue");
}

#[tokio::test]
async fn test_unknown_sender_gets_view_not_found() {
    let harness = Harness::new(StaticDirectory::new());
    let stranger = InstanceId::new("stranger");
    let mut inbox = harness.delivery.connect(&stranger);

    harness.send(&stranger, Request::GetCurrentChannel).await;
    let response = next(&mut inbox).await;
    assert_eq!(response.error, Some(ErrorKind::ViewNotFound));
    assert_eq!(response.error_code(), Some("ViewNotFound"));
}

#[tokio::test]
async fn test_failed_request_sends_no_events() {
    let harness = Harness::new(StaticDirectory::new());
    let (a, mut a_inbox) = harness.connect("a", "blotter").await;

    let payload = ChannelPayload {
        channel_id: "no-such-channel".to_string(),
    };
    harness.send(&a, Request::JoinChannel(payload)).await;
    let response = next(&mut a_inbox).await;
    assert_eq!(response.error, Some(ErrorKind::NoChannelFound));
    assert!(a_inbox.try_recv().is_err());
}

#[tokio::test]
async fn test_get_user_channels_and_info() {
    let config = RouterConfig::default().with_system_channel("global");
    let harness = Harness::build(config, StaticDirectory::new(), None);
    let (a, mut a_inbox) = harness.connect("a", "blotter").await;

    harness.send(&a, Request::GetUserChannels).await;
    let response = next(&mut a_inbox).await;
    let channels = response.payload["userChannels"].as_array().unwrap();
    assert_eq!(channels.len(), 6);
    assert_eq!(channels[0]["id"], "red");

    harness.send(&a, Request::GetInfo).await;
    let response = next(&mut a_inbox).await;
    assert_eq!(response.payload["fdc3Version"], "2.0");
    assert_eq!(response.payload["appMetadata"]["appId"], "blotter");
    assert_eq!(response.payload["appMetadata"]["instanceId"], "a");
}

#[tokio::test]
async fn test_raise_intent_to_live_instance() {
    let harness = Harness::new(StaticDirectory::new().with_app(chart_app()));
    let (a, mut a_inbox) = harness.connect("a", "blotter").await;
    let (b, mut b_inbox) = harness.connect("b", "chart").await;
    harness.listen_for(&b, &mut b_inbox, "ViewChart").await;

    let request_id = harness.raise(&a, "ViewChart", None).await;

    let resolution = next(&mut a_inbox).await;
    assert!(resolution.is_response_to(RequestKind::RaiseIntent));
    assert_eq!(resolution.correlation_id, Some(request_id.clone()));
    assert_eq!(resolution.payload["intentResolution"]["source"]["instanceId"], "b");
    assert_eq!(resolution.payload["intentResolution"]["intent"], "ViewChart");

    let event = next(&mut b_inbox).await;
    assert_eq!(event.kind, OutboundKind::Event(EventKind::Intent));
    assert_eq!(event.payload["originatingApp"]["appId"], "blotter");
    let raise_id = RequestId::new(event.payload["raiseId"].as_str().unwrap());

    let result = IntentResultPayload {
        raise_id,
        result: Some(IntentResultValue::Context(instrument("AAPL"))),
        error: None,
    };
    harness.send(&b, Request::IntentResult(result)).await;
    assert!(!next(&mut b_inbox).await.is_error());

    let outcome = next(&mut a_inbox).await;
    assert_eq!(outcome.kind, OutboundKind::RaiseIntentResult);
    assert_eq!(outcome.correlation_id, Some(request_id));
    assert!(!outcome.is_error());
    assert_eq!(outcome.payload["intentResult"]["context"]["type"], "fdc3.instrument");

    let metrics = harness.router.metrics().await;
    assert_eq!(metrics.intents_raised, 1);
    assert_eq!(metrics.intents_resolved, 1);
    assert_eq!(metrics.raises_in_flight, 0);
}

#[tokio::test]
async fn test_raise_intent_without_handlers() {
    let harness = Harness::new(StaticDirectory::new());
    let (a, mut a_inbox) = harness.connect("a", "blotter").await;

    harness.raise(&a, "ViewChart", None).await;
    let response = next(&mut a_inbox).await;
    assert!(response.is_response_to(RequestKind::RaiseIntent));
    assert_eq!(response.error_code(), Some("NoAppsFound"));
    assert_eq!(harness.router.metrics().await.intents_failed, 1);
}

#[tokio::test]
async fn test_raise_intent_for_unknown_app() {
    let harness = Harness::new(StaticDirectory::new().with_app(chart_app()));
    let (a, mut a_inbox) = harness.connect("a", "blotter").await;

    harness.raise(&a, "ViewChart", Some(AppIdentifier::app("news"))).await;
    let response = next(&mut a_inbox).await;
    assert_eq!(response.error, Some(ErrorKind::AppNotFound));
}

#[tokio::test]
async fn test_raise_intent_launches_directory_app() {
    let mut harness = Harness::new(StaticDirectory::new().with_app(chart_app()));
    let (a, mut a_inbox) = harness.connect("a", "blotter").await;

    harness.raise(&a, "ViewChart", None).await;
    let (app_id, launched) = harness.launches.recv().await.unwrap();
    assert_eq!(app_id, "chart");

    let (chart, mut chart_inbox) = harness.connect(launched.as_str(), "chart").await;
    harness.listen_for(&chart, &mut chart_inbox, "ViewChart").await;

    let resolution = next(&mut a_inbox).await;
    assert!(!resolution.is_error());
    assert_eq!(resolution.payload["intentResolution"]["source"]["instanceId"], launched.as_str());

    let event = next(&mut chart_inbox).await;
    assert_eq!(event.payload["context"]["id"]["ticker"], "AAPL");
    assert_eq!(harness.router.metrics().await.launches, 1);
}

#[tokio::test(start_paused = true)]
async fn test_launched_app_never_listening_times_out() {
    let mut harness = Harness::new(StaticDirectory::new().with_app(chart_app()));
    let (a, mut a_inbox) = harness.connect("a", "blotter").await;

    harness.raise(&a, "ViewChart", None).await;
    let (_, launched) = harness.launches.recv().await.unwrap();
    let (_chart, _chart_inbox) = harness.connect(launched.as_str(), "chart").await;

    let response = tokio::time::timeout(Duration::from_secs(60), a_inbox.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(response.is_response_to(RequestKind::RaiseIntent));
    assert_eq!(response.error, Some(ErrorKind::AppTimeout));
}

#[tokio::test]
async fn test_pending_launch_disconnect_fails_raise() {
    let mut harness = Harness::new(StaticDirectory::new().with_app(chart_app()));
    let (a, mut a_inbox) = harness.connect("a", "blotter").await;

    harness.raise(&a, "ViewChart", None).await;
    let (_, launched) = harness.launches.recv().await.unwrap();
    while harness.router.instance(&launched).await.is_none() {
        tokio::task::yield_now().await;
    }
    assert_ok!(harness.router.on_instance_disconnect(&launched).await);

    let response = next(&mut a_inbox).await;
    assert!(response.is_response_to(RequestKind::RaiseIntent));
    assert_eq!(response.error, Some(ErrorKind::InstanceGone));
    assert_eq!(harness.router.metrics().await.intents_failed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_result_timeout_and_late_result() {
    let config = RouterConfig::default().with_result_timeout(Duration::from_secs(2));
    let harness = Harness::build(config, StaticDirectory::new(), None);
    let (a, mut a_inbox) = harness.connect("a", "blotter").await;
    let (b, mut b_inbox) = harness.connect("b", "chart").await;
    harness.listen_for(&b, &mut b_inbox, "ViewChart").await;

    harness.raise(&a, "ViewChart", None).await;
    assert!(!next(&mut a_inbox).await.is_error());
    let event = next(&mut b_inbox).await;
    let raise_id = RequestId::new(event.payload["raiseId"].as_str().unwrap());

    let outcome = next(&mut a_inbox).await;
    assert_eq!(outcome.kind, OutboundKind::RaiseIntentResult);
    assert_eq!(outcome.error, Some(ErrorKind::Timeout));
    assert_eq!(outcome.error_code(), Some("ResolverTimeout"));

    let late = IntentResultPayload {
        raise_id,
        result: None,
        error: None,
    };
    harness.send(&b, Request::IntentResult(late)).await;
    assert!(next(&mut b_inbox).await.is_error());
    assert!(a_inbox.try_recv().is_err());
    assert_eq!(harness.router.metrics().await.intents_timed_out, 1);
}

#[tokio::test]
async fn test_handler_rejection() {
    let harness = Harness::new(StaticDirectory::new());
    let (a, mut a_inbox) = harness.connect("a", "blotter").await;
    let (b, mut b_inbox) = harness.connect("b", "chart").await;
    harness.listen_for(&b, &mut b_inbox, "ViewChart").await;

    harness.raise(&a, "ViewChart", None).await;
    next(&mut a_inbox).await;
    let event = next(&mut b_inbox).await;

    let rejected = IntentResultPayload {
        raise_id: RequestId::new(event.payload["raiseId"].as_str().unwrap()),
        result: None,
        error: Some("chart is busy".to_string()),
    };
    harness.send(&b, Request::IntentResult(rejected)).await;
    next(&mut b_inbox).await;

    let outcome = next(&mut a_inbox).await;
    assert_eq!(outcome.error, Some(ErrorKind::IntentHandlerRejected));
}

#[tokio::test]
async fn test_result_from_wrong_instance_is_rejected() {
    let harness = Harness::new(StaticDirectory::new());
    let (a, mut a_inbox) = harness.connect("a", "blotter").await;
    let (b, mut b_inbox) = harness.connect("b", "chart").await;
    harness.listen_for(&b, &mut b_inbox, "ViewChart").await;

    harness.raise(&a, "ViewChart", None).await;
    next(&mut a_inbox).await;
    let event = next(&mut b_inbox).await;

    let forged = IntentResultPayload {
        raise_id: RequestId::new(event.payload["raiseId"].as_str().unwrap()),
        result: Some(IntentResultValue::Void),
        error: None,
    };
    harness.send(&a, Request::IntentResult(forged)).await;
    let response = next(&mut a_inbox).await;
    assert_eq!(response.error, Some(ErrorKind::InvalidRequest));
}

#[tokio::test]
async fn test_target_disconnect_fails_raise() {
    let harness = Harness::new(StaticDirectory::new());
    let (a, mut a_inbox) = harness.connect("a", "blotter").await;
    let (b, mut b_inbox) = harness.connect("b", "chart").await;
    harness.listen_for(&b, &mut b_inbox, "ViewChart").await;

    harness.raise(&a, "ViewChart", None).await;
    next(&mut a_inbox).await;
    next(&mut b_inbox).await;

    assert_ok!(harness.router.on_instance_disconnect(&b).await);
    let outcome = next(&mut a_inbox).await;
    assert_eq!(outcome.kind, OutboundKind::RaiseIntentResult);
    assert_eq!(outcome.error, Some(ErrorKind::InstanceGone));
    assert_eq!(outcome.error_code(), Some("TargetInstanceUnavailable"));

    assert_err!(harness.router.on_instance_disconnect(&b).await);
}

#[tokio::test]
async fn test_disambiguation_uses_choice() {
    let directory = StaticDirectory::new().with_app(chart_app()).with_app(news_app());
    let ui: Arc<dyn DisambiguationUi> = Arc::new(PickApp(Some("news".to_string())));
    let mut harness = Harness::build(RouterConfig::default(), directory, Some(ui));
    let (a, mut a_inbox) = harness.connect("a", "blotter").await;

    harness.raise(&a, "ViewChart", None).await;
    let (app_id, launched) = harness.launches.recv().await.unwrap();
    assert_eq!(app_id, "news");

    let (news, mut news_inbox) = harness.connect(launched.as_str(), "news").await;
    harness.listen_for(&news, &mut news_inbox, "ViewChart").await;

    let resolution = next(&mut a_inbox).await;
    assert_eq!(resolution.payload["intentResolution"]["source"]["appId"], "news");
    let event = next(&mut news_inbox).await;
    assert_eq!(event.kind, OutboundKind::Event(EventKind::Intent));
}

#[tokio::test]
async fn test_disambiguation_cancelled() {
    let directory = StaticDirectory::new().with_app(chart_app()).with_app(news_app());
    let ui: Arc<dyn DisambiguationUi> = Arc::new(PickApp(None));
    let harness = Harness::build(RouterConfig::default(), directory, Some(ui));
    let (a, mut a_inbox) = harness.connect("a", "blotter").await;

    harness.raise(&a, "ViewChart", None).await;
    let response = next(&mut a_inbox).await;
    assert!(response.is_response_to(RequestKind::RaiseIntent));
    assert_eq!(response.error, Some(ErrorKind::UserCancelled));
}

#[tokio::test]
async fn test_raiser_disconnect_during_disambiguation() {
    let directory = StaticDirectory::new().with_app(chart_app()).with_app(news_app());
    let (asked_tx, mut asked) = mpsc::unbounded_channel();
    let release = Arc::new(Notify::new());
    let ui: Arc<dyn DisambiguationUi> = Arc::new(HeldUi {
        asked: asked_tx,
        release: release.clone(),
    });
    let harness = Harness::build(RouterConfig::default(), directory, Some(ui));
    let (a, mut a_inbox) = harness.connect("a", "blotter").await;

    harness.raise(&a, "ViewChart", None).await;
    asked.recv().await.unwrap();
    assert_ok!(harness.router.on_instance_disconnect(&a).await);

    let response = next(&mut a_inbox).await;
    assert!(response.is_response_to(RequestKind::RaiseIntent));
    assert_eq!(response.error, Some(ErrorKind::InstanceGone));

    // The choice made after the raiser left is dropped
    release.notify_one();
    tokio::task::yield_now().await;
    assert!(a_inbox.try_recv().is_err());

    let metrics = harness.router.metrics().await;
    assert_eq!(metrics.launches, 0);
    assert_eq!(metrics.intents_failed, 1);
    assert_eq!(metrics.raises_in_flight, 0);
}

#[tokio::test]
async fn test_raise_for_context_with_single_handler() {
    let harness = Harness::new(StaticDirectory::new().with_app(chart_app()));
    let (a, mut a_inbox) = harness.connect("a", "blotter").await;
    let (b, mut b_inbox) = harness.connect("b", "chart").await;
    harness.listen_for(&b, &mut b_inbox, "ViewChart").await;

    let payload = RaiseIntentForContextPayload {
        context: instrument("TSLA"),
        app: None,
    };
    harness.send(&a, Request::RaiseIntentForContext(payload)).await;

    let resolution = next(&mut a_inbox).await;
    assert!(resolution.is_response_to(RequestKind::RaiseIntentForContext));
    assert_eq!(resolution.payload["intentResolution"]["intent"], "ViewChart");
    let event = next(&mut b_inbox).await;
    assert_eq!(event.payload["intent"], "ViewChart");
}

#[tokio::test]
async fn test_private_channel_result_grants_access() {
    let harness = Harness::new(StaticDirectory::new());
    let (a, mut a_inbox) = harness.connect("a", "blotter").await;
    let (b, mut b_inbox) = harness.connect("b", "quotes").await;
    harness.listen_for(&b, &mut b_inbox, "SubscribeQuotes").await;

    harness.raise(&a, "SubscribeQuotes", None).await;
    next(&mut a_inbox).await;
    let event = next(&mut b_inbox).await;

    harness.send(&b, Request::CreatePrivateChannel).await;
    let created = next(&mut b_inbox).await;
    let channel_id = created.payload["privateChannel"]["id"].as_str().unwrap().to_string();

    let broadcast = BroadcastPayload {
        channel_id: Some(channel_id.clone()),
        context: instrument("AAPL"),
    };
    harness.send(&a, Request::Broadcast(broadcast.clone())).await;
    assert_eq!(next(&mut a_inbox).await.error, Some(ErrorKind::AccessDenied));

    let result = IntentResultPayload {
        raise_id: RequestId::new(event.payload["raiseId"].as_str().unwrap()),
        result: Some(IntentResultValue::Channel(ChannelRef { id: channel_id })),
        error: None,
    };
    harness.send(&b, Request::IntentResult(result)).await;
    next(&mut b_inbox).await;
    let outcome = next(&mut a_inbox).await;
    assert!(!outcome.is_error());

    harness.send(&a, Request::Broadcast(broadcast)).await;
    assert!(!next(&mut a_inbox).await.is_error());
}

#[tokio::test]
async fn test_private_channel_result_requires_handler_participation() {
    let harness = Harness::new(StaticDirectory::new());
    let (a, mut a_inbox) = harness.connect("a", "blotter").await;
    let (b, mut b_inbox) = harness.connect("b", "quotes").await;
    let (c, mut c_inbox) = harness.connect("c", "pricing").await;
    harness.listen_for(&b, &mut b_inbox, "SubscribeQuotes").await;

    harness.send(&c, Request::CreatePrivateChannel).await;
    let created = next(&mut c_inbox).await;
    let channel_id = created.payload["privateChannel"]["id"].as_str().unwrap().to_string();

    let request_id = harness.raise(&a, "SubscribeQuotes", None).await;
    next(&mut a_inbox).await;
    let event = next(&mut b_inbox).await;
    let raise_id = RequestId::new(event.payload["raiseId"].as_str().unwrap());

    let id = channel_id.clone();
    let borrowed = IntentResultPayload {
        raise_id: raise_id.clone(),
        result: Some(IntentResultValue::Channel(ChannelRef { id })),
        error: None,
    };
    harness.send(&b, Request::IntentResult(borrowed)).await;
    assert_eq!(next(&mut b_inbox).await.error, Some(ErrorKind::AccessDenied));
    assert!(a_inbox.try_recv().is_err());

    let query = ChannelContextPayload {
        channel_id: Some(channel_id),
        context_type: None,
    };
    harness.send(&a, Request::GetCurrentContext(query)).await;
    assert_eq!(next(&mut a_inbox).await.error, Some(ErrorKind::AccessDenied));

    // The raise is still waiting for a proper result
    let result = IntentResultPayload {
        raise_id,
        result: Some(IntentResultValue::Void),
        error: None,
    };
    harness.send(&b, Request::IntentResult(result)).await;
    assert!(!next(&mut b_inbox).await.is_error());
    let outcome = next(&mut a_inbox).await;
    assert_eq!(outcome.correlation_id, Some(request_id));
    assert!(!outcome.is_error());
    assert_eq!(harness.router.metrics().await.intents_resolved, 1);
}

#[tokio::test]
async fn test_open_with_context() {
    let mut harness = Harness::new(StaticDirectory::new().with_app(chart_app()));
    let (a, mut a_inbox) = harness.connect("a", "blotter").await;

    let payload = OpenPayload {
        app: AppIdentifier::app("chart"),
        context: Some(instrument("NFLX")),
    };
    harness.send(&a, Request::Open(payload)).await;
    let (_, launched) = harness.launches.recv().await.unwrap();

    let (chart, mut chart_inbox) = harness.connect(launched.as_str(), "chart").await;
    let listen = ChannelContextPayload {
        channel_id: None,
        context_type: Some("fdc3.instrument".to_string()),
    };
    harness.send(&chart, Request::AddContextListener(listen)).await;
    next(&mut chart_inbox).await;

    let delivered = next(&mut chart_inbox).await;
    assert_eq!(delivered.kind, OutboundKind::Event(EventKind::Broadcast));
    assert_eq!(delivered.payload["context"]["id"]["ticker"], "NFLX");
    assert!(delivered.payload["channelId"].is_null());

    let response = next(&mut a_inbox).await;
    assert!(response.is_response_to(RequestKind::Open));
    assert_eq!(response.payload["appIdentifier"]["instanceId"], launched.as_str());
}

#[tokio::test]
async fn test_open_skips_fixed_channel_listeners() {
    let mut harness = Harness::new(StaticDirectory::new().with_app(chart_app()));
    let (a, mut a_inbox) = harness.connect("a", "blotter").await;

    let payload = OpenPayload {
        app: AppIdentifier::app("chart"),
        context: Some(instrument("NFLX")),
    };
    harness.send(&a, Request::Open(payload)).await;
    let (_, launched) = harness.launches.recv().await.unwrap();
    let (chart, mut chart_inbox) = harness.connect(launched.as_str(), "chart").await;

    let create = ChannelPayload {
        channel_id: "quotes".to_string(),
    };
    harness.send(&chart, Request::GetOrCreateAppChannel(create)).await;
    next(&mut chart_inbox).await;
    let fixed = ChannelContextPayload {
        channel_id: Some("quotes".to_string()),
        context_type: Some("fdc3.instrument".to_string()),
    };
    harness.send(&chart, Request::AddContextListener(fixed)).await;
    assert!(!next(&mut chart_inbox).await.is_error());
    assert!(chart_inbox.try_recv().is_err());
    assert!(a_inbox.try_recv().is_err());

    let follow = ChannelContextPayload {
        channel_id: None,
        context_type: Some("fdc3.instrument".to_string()),
    };
    harness.send(&chart, Request::AddContextListener(follow)).await;
    let response = next(&mut chart_inbox).await;
    let listener_id = response.payload["listenerId"].as_str().unwrap().to_string();

    let delivered = next(&mut chart_inbox).await;
    assert_eq!(delivered.payload["listenerId"], listener_id.as_str());
    assert!(delivered.payload["channelId"].is_null());
    assert!(next(&mut a_inbox).await.is_response_to(RequestKind::Open));
}

#[tokio::test]
async fn test_open_unknown_app() {
    let harness = Harness::new(StaticDirectory::new());
    let (a, mut a_inbox) = harness.connect("a", "blotter").await;

    let payload = OpenPayload {
        app: AppIdentifier::app("missing"),
        context: None,
    };
    harness.send(&a, Request::Open(payload)).await;
    assert_eq!(next(&mut a_inbox).await.error, Some(ErrorKind::AppNotFound));
}

#[tokio::test]
async fn test_find_intent_lists_live_and_directory_handlers() {
    let harness = Harness::new(StaticDirectory::new().with_app(chart_app()).with_app(news_app()));
    let (a, mut a_inbox) = harness.connect("a", "blotter").await;
    let (b, mut b_inbox) = harness.connect("b", "chart").await;
    harness.listen_for(&b, &mut b_inbox, "ViewChart").await;

    let payload = crate::protocol::FindIntentPayload {
        intent: "ViewChart".to_string(),
        context: Some(instrument("AAPL")),
        result_type: None,
    };
    harness.send(&a, Request::FindIntent(payload)).await;
    let response = next(&mut a_inbox).await;
    let apps = response.payload["appIntent"]["apps"].as_array().unwrap();
    assert_eq!(apps.len(), 2);
    assert_eq!(apps[0]["instanceId"], "b");
    assert_eq!(apps[1]["appId"], "news");
}

#[tokio::test]
async fn test_v1_dialect_round_trip() {
    let harness = Harness::new(StaticDirectory::new());
    let id = InstanceId::new("legacy");
    let mut inbox = harness.delivery.connect(&id);

    let hello = json!({ "topic": "hello", "requestId": "r1", "data": { "appId": "legacy-app" } });
    assert_ok!(harness.router.handle_raw_message(&id, &hello).await);
    let response = next(&mut inbox).await;
    assert_eq!(response.dialect, Dialect::V1);
    assert_eq!(response.wire_name(), "hello");

    let join = json!({
        "topic": "joinChannel",
        "requestId": "r2",
        "data": { "channelId": "nowhere" }
    });
    assert_ok!(harness.router.handle_raw_message(&id, &join).await);
    let response = next(&mut inbox).await;
    assert_eq!(response.correlation_id, Some(RequestId::new("r2")));
    assert_eq!(response.error_code(), Some("NoChannelFound"));
    assert_eq!(harness.router.instance(&id).await.unwrap().dialect, Dialect::V1);
}

#[tokio::test]
async fn test_malformed_messages() {
    let harness = Harness::new(StaticDirectory::new());
    let id = InstanceId::new("a");
    let mut inbox = harness.delivery.connect(&id);

    let bad_payload = json!({
        "type": "joinUserChannelRequest",
        "meta": { "requestUuid": "r1" },
        "payload": { "channelId": 42 },
    });
    assert_ok!(harness.router.handle_raw_message(&id, &bad_payload).await);
    let response = next(&mut inbox).await;
    assert_eq!(response.error, Some(ErrorKind::InvalidRequest));
    assert_eq!(response.correlation_id, Some(RequestId::new("r1")));

    let garbage = json!({ "hello": "world" });
    assert_err!(harness.router.handle_raw_message(&id, &garbage).await);
}

#[tokio::test]
async fn test_disconnect_releases_listeners() {
    let harness = Harness::new(StaticDirectory::new());
    let (a, mut a_inbox) = harness.connect("a", "blotter").await;
    let (b, mut b_inbox) = harness.connect("b", "chart").await;
    harness.listen_for(&b, &mut b_inbox, "ViewChart").await;
    assert_eq!(harness.router.metrics().await.active_instances, 2);

    harness.send(&b, Request::Disconnect).await;
    assert!(b_inbox.try_recv().is_err());
    assert_eq!(harness.router.metrics().await.active_instances, 1);

    harness.raise(&a, "ViewChart", None).await;
    assert_eq!(next(&mut a_inbox).await.error, Some(ErrorKind::NoAppsFound));
}

#[tokio::test]
async fn test_remove_intent_listener_checks_owner() {
    let harness = Harness::new(StaticDirectory::new());
    let (a, mut a_inbox) = harness.connect("a", "blotter").await;
    let (b, mut b_inbox) = harness.connect("b", "chart").await;

    let payload = AddIntentListenerPayload {
        intent: "ViewChart".to_string(),
    };
    harness.send(&b, Request::AddIntentListener(payload)).await;
    let response = next(&mut b_inbox).await;
    let listener_id = ListenerId::new(response.payload["listenerId"].as_str().unwrap());

    let remove = crate::protocol::ListenerPayload {
        listener_id: listener_id.clone(),
    };
    harness.send(&a, Request::RemoveIntentListener(remove.clone())).await;
    assert_eq!(next(&mut a_inbox).await.error, Some(ErrorKind::InvalidRequest));

    harness.send(&b, Request::RemoveIntentListener(remove)).await;
    assert!(!next(&mut b_inbox).await.is_error());
}
