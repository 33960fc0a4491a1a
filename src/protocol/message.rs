//! Inbound protocol messages.
//!
//! Inbound traffic is a closed tagged union keyed by request kind. Raw
//! envelopes are validated at this boundary; unknown kinds and malformed
//! payloads become `InvalidRequest`.

use crate::context::Context;
use crate::core::{now, AppIdentifier, Error, ListenerId, RequestId, Result, Timestamp};
use crate::protocol::dialect::Dialect;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request kinds understood by the router.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    Hello,
    JoinChannel,
    LeaveChannel,
    GetOrCreateAppChannel,
    Broadcast,
    GetCurrentContext,
    AddContextListener,
    RemoveContextListener,
    FindIntent,
    FindIntentsByContext,
    RaiseIntent,
    RaiseIntentForContext,
    IntentResult,
    AddIntentListener,
    RemoveIntentListener,
    Open,
    GetCurrentChannel,
    GetUserChannels,
    CreatePrivateChannel,
    PrivateChannelDisconnect,
    FindInstances,
    GetInfo,
    Disconnect,
}

impl RequestKind {
    /// Every request kind.
    pub const ALL: [RequestKind; 23] = [
        RequestKind::Hello,
        RequestKind::JoinChannel,
        RequestKind::LeaveChannel,
        RequestKind::GetOrCreateAppChannel,
        RequestKind::Broadcast,
        RequestKind::GetCurrentContext,
        RequestKind::AddContextListener,
        RequestKind::RemoveContextListener,
        RequestKind::FindIntent,
        RequestKind::FindIntentsByContext,
        RequestKind::RaiseIntent,
        RequestKind::RaiseIntentForContext,
        RequestKind::IntentResult,
        RequestKind::AddIntentListener,
        RequestKind::RemoveIntentListener,
        RequestKind::Open,
        RequestKind::GetCurrentChannel,
        RequestKind::GetUserChannels,
        RequestKind::CreatePrivateChannel,
        RequestKind::PrivateChannelDisconnect,
        RequestKind::FindInstances,
        RequestKind::GetInfo,
        RequestKind::Disconnect,
    ];

    /// Base wire name in a dialect (without request/response suffix).
    pub fn wire_base(&self, dialect: Dialect) -> &'static str {
        let v1 = dialect == Dialect::V1;
        match self {
            RequestKind::Hello => "hello",
            RequestKind::JoinChannel if v1 => "joinChannel",
            RequestKind::JoinChannel => "joinUserChannel",
            RequestKind::LeaveChannel if v1 => "leaveChannel",
            RequestKind::LeaveChannel => "leaveCurrentChannel",
            RequestKind::GetOrCreateAppChannel => "getOrCreateChannel",
            RequestKind::Broadcast => "broadcast",
            RequestKind::GetCurrentContext => "getCurrentContext",
            RequestKind::AddContextListener => "addContextListener",
            RequestKind::RemoveContextListener if v1 => "dropContextListener",
            RequestKind::RemoveContextListener => "contextListenerUnsubscribe",
            RequestKind::FindIntent => "findIntent",
            RequestKind::FindIntentsByContext => "findIntentsByContext",
            RequestKind::RaiseIntent => "raiseIntent",
            RequestKind::RaiseIntentForContext => "raiseIntentForContext",
            RequestKind::IntentResult => "intentResult",
            RequestKind::AddIntentListener => "addIntentListener",
            RequestKind::RemoveIntentListener if v1 => "dropIntentListener",
            RequestKind::RemoveIntentListener => "intentListenerUnsubscribe",
            RequestKind::Open => "open",
            RequestKind::GetCurrentChannel => "getCurrentChannel",
            RequestKind::GetUserChannels if v1 => "getSystemChannels",
            RequestKind::GetUserChannels => "getUserChannels",
            RequestKind::CreatePrivateChannel => "createPrivateChannel",
            RequestKind::PrivateChannelDisconnect => "privateChannelDisconnect",
            RequestKind::FindInstances => "findInstances",
            RequestKind::GetInfo => "getInfo",
            RequestKind::Disconnect if v1 => "disconnect",
            RequestKind::Disconnect => "goodbye",
        }
    }

    /// Look up a kind from its wire name.
    pub fn from_wire(dialect: Dialect, name: &str) -> Option<Self> {
        let base = dialect.request_base(name)?;
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.wire_base(dialect) == base)
    }

    /// Whether the sender expects a response.
    pub fn expects_response(&self) -> bool {
        !matches!(self, RequestKind::Disconnect)
    }
}

/// Handshake sent by a newly connected instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPayload {
    pub app_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Payload naming a single channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelPayload {
    pub channel_id: String,
}

/// Broadcast a context on a channel (current user channel when omitted).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    pub context: Context,
}

/// Query or subscribe to a channel's context, optionally by type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelContextPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_type: Option<String>,
}

/// Payload naming a listener.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerPayload {
    pub listener_id: ListenerId,
}

/// Find apps resolving one intent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindIntentPayload {
    pub intent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_type: Option<String>,
}

/// Find every intent resolvable for a context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindIntentsByContextPayload {
    pub context: Context,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_type: Option<String>,
}

/// Raise a named intent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaiseIntentPayload {
    pub intent: String,
    pub context: Context,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<AppIdentifier>,
}

/// Raise whichever intent the user picks for a context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaiseIntentForContextPayload {
    pub context: Context,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<AppIdentifier>,
}

/// Channel reference returned from an intent handler.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRef {
    pub id: String,
}

/// Value produced by an intent handler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntentResultValue {
    Context(Context),
    Channel(ChannelRef),
    Void,
}

/// Result reported by the instance that handled an intent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentResultPayload {
    /// Correlation id of the delivered intent event
    pub raise_id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<IntentResultValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Register an intent listener.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddIntentListenerPayload {
    pub intent: String,
}

/// Open an application, optionally handing it a context.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenPayload {
    pub app: AppIdentifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
}

/// Find running instances of an application.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindInstancesPayload {
    pub app: AppIdentifier,
}

/// A typed inbound request.
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    Hello(HelloPayload),
    JoinChannel(ChannelPayload),
    LeaveChannel,
    GetOrCreateAppChannel(ChannelPayload),
    Broadcast(BroadcastPayload),
    GetCurrentContext(ChannelContextPayload),
    AddContextListener(ChannelContextPayload),
    RemoveContextListener(ListenerPayload),
    FindIntent(FindIntentPayload),
    FindIntentsByContext(FindIntentsByContextPayload),
    RaiseIntent(RaiseIntentPayload),
    RaiseIntentForContext(RaiseIntentForContextPayload),
    IntentResult(IntentResultPayload),
    AddIntentListener(AddIntentListenerPayload),
    RemoveIntentListener(ListenerPayload),
    Open(OpenPayload),
    GetCurrentChannel,
    GetUserChannels,
    CreatePrivateChannel,
    PrivateChannelDisconnect(ChannelPayload),
    FindInstances(FindInstancesPayload),
    GetInfo,
    Disconnect,
}

impl Request {
    /// Kind of this request.
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Hello(_) => RequestKind::Hello,
            Request::JoinChannel(_) => RequestKind::JoinChannel,
            Request::LeaveChannel => RequestKind::LeaveChannel,
            Request::GetOrCreateAppChannel(_) => RequestKind::GetOrCreateAppChannel,
            Request::Broadcast(_) => RequestKind::Broadcast,
            Request::GetCurrentContext(_) => RequestKind::GetCurrentContext,
            Request::AddContextListener(_) => RequestKind::AddContextListener,
            Request::RemoveContextListener(_) => RequestKind::RemoveContextListener,
            Request::FindIntent(_) => RequestKind::FindIntent,
            Request::FindIntentsByContext(_) => RequestKind::FindIntentsByContext,
            Request::RaiseIntent(_) => RequestKind::RaiseIntent,
            Request::RaiseIntentForContext(_) => RequestKind::RaiseIntentForContext,
            Request::IntentResult(_) => RequestKind::IntentResult,
            Request::AddIntentListener(_) => RequestKind::AddIntentListener,
            Request::RemoveIntentListener(_) => RequestKind::RemoveIntentListener,
            Request::Open(_) => RequestKind::Open,
            Request::GetCurrentChannel => RequestKind::GetCurrentChannel,
            Request::GetUserChannels => RequestKind::GetUserChannels,
            Request::CreatePrivateChannel => RequestKind::CreatePrivateChannel,
            Request::PrivateChannelDisconnect(_) => RequestKind::PrivateChannelDisconnect,
            Request::FindInstances(_) => RequestKind::FindInstances,
            Request::GetInfo => RequestKind::GetInfo,
            Request::Disconnect => RequestKind::Disconnect,
        }
    }

    /// Parse a payload for a known kind.
    pub fn parse(kind: RequestKind, payload: Value) -> Result<Self> {
        let request = match kind {
            RequestKind::Hello => Request::Hello(serde_json::from_value(payload)?),
            RequestKind::JoinChannel => Request::JoinChannel(serde_json::from_value(payload)?),
            RequestKind::LeaveChannel => Request::LeaveChannel,
            RequestKind::GetOrCreateAppChannel => {
                Request::GetOrCreateAppChannel(serde_json::from_value(payload)?)
            }
            RequestKind::Broadcast => Request::Broadcast(serde_json::from_value(payload)?),
            RequestKind::GetCurrentContext => {
                Request::GetCurrentContext(serde_json::from_value(payload)?)
            }
            RequestKind::AddContextListener => {
                Request::AddContextListener(serde_json::from_value(payload)?)
            }
            RequestKind::RemoveContextListener => {
                Request::RemoveContextListener(serde_json::from_value(payload)?)
            }
            RequestKind::FindIntent => Request::FindIntent(serde_json::from_value(payload)?),
            RequestKind::FindIntentsByContext => {
                Request::FindIntentsByContext(serde_json::from_value(payload)?)
            }
            RequestKind::RaiseIntent => Request::RaiseIntent(serde_json::from_value(payload)?),
            RequestKind::RaiseIntentForContext => {
                Request::RaiseIntentForContext(serde_json::from_value(payload)?)
            }
            RequestKind::IntentResult => Request::IntentResult(serde_json::from_value(payload)?),
            RequestKind::AddIntentListener => {
                Request::AddIntentListener(serde_json::from_value(payload)?)
            }
            RequestKind::RemoveIntentListener => {
                Request::RemoveIntentListener(serde_json::from_value(payload)?)
            }
            RequestKind::Open => Request::Open(serde_json::from_value(payload)?),
            RequestKind::GetCurrentChannel => Request::GetCurrentChannel,
            RequestKind::GetUserChannels => Request::GetUserChannels,
            RequestKind::CreatePrivateChannel => Request::CreatePrivateChannel,
            RequestKind::PrivateChannelDisconnect => {
                Request::PrivateChannelDisconnect(serde_json::from_value(payload)?)
            }
            RequestKind::FindInstances => Request::FindInstances(serde_json::from_value(payload)?),
            RequestKind::GetInfo => Request::GetInfo,
            RequestKind::Disconnect => Request::Disconnect,
        };
        request.validate()?;
        Ok(request)
    }

    /// Payload as JSON (empty object for payload-less kinds).
    pub fn payload_value(&self) -> Result<Value> {
        let value = match self {
            Request::Hello(p) => serde_json::to_value(p)?,
            Request::JoinChannel(p)
            | Request::GetOrCreateAppChannel(p)
            | Request::PrivateChannelDisconnect(p) => serde_json::to_value(p)?,
            Request::Broadcast(p) => serde_json::to_value(p)?,
            Request::GetCurrentContext(p) | Request::AddContextListener(p) => {
                serde_json::to_value(p)?
            }
            Request::RemoveContextListener(p) | Request::RemoveIntentListener(p) => {
                serde_json::to_value(p)?
            }
            Request::FindIntent(p) => serde_json::to_value(p)?,
            Request::FindIntentsByContext(p) => serde_json::to_value(p)?,
            Request::RaiseIntent(p) => serde_json::to_value(p)?,
            Request::RaiseIntentForContext(p) => serde_json::to_value(p)?,
            Request::IntentResult(p) => serde_json::to_value(p)?,
            Request::AddIntentListener(p) => serde_json::to_value(p)?,
            Request::Open(p) => serde_json::to_value(p)?,
            Request::FindInstances(p) => serde_json::to_value(p)?,
            Request::LeaveChannel
            | Request::GetCurrentChannel
            | Request::GetUserChannels
            | Request::CreatePrivateChannel
            | Request::GetInfo
            | Request::Disconnect => Value::Object(serde_json::Map::new()),
        };
        Ok(value)
    }

    fn validate(&self) -> Result<()> {
        match self {
            Request::Hello(p) if p.app_id.trim().is_empty() => {
                Err(Error::invalid("hello requires an appId"))
            }
            Request::JoinChannel(p)
            | Request::GetOrCreateAppChannel(p)
            | Request::PrivateChannelDisconnect(p)
                if p.channel_id.is_empty() =>
            {
                Err(Error::invalid("channelId must not be empty"))
            }
            Request::Broadcast(p) => p.context.validate(),
            Request::FindIntent(p) if p.intent.trim().is_empty() => {
                Err(Error::invalid("intent must not be empty"))
            }
            Request::FindIntent(p) => p.context.as_ref().map_or(Ok(()), Context::validate),
            Request::FindIntentsByContext(p) => p.context.validate(),
            Request::RaiseIntent(p) if p.intent.trim().is_empty() => {
                Err(Error::invalid("intent must not be empty"))
            }
            Request::RaiseIntent(p) => p.context.validate(),
            Request::RaiseIntentForContext(p) => p.context.validate(),
            Request::AddIntentListener(p) if p.intent.trim().is_empty() => {
                Err(Error::invalid("intent must not be empty"))
            }
            Request::Open(p) => p.context.as_ref().map_or(Ok(()), Context::validate),
            _ => Ok(()),
        }
    }
}

/// An inbound message: request plus envelope metadata.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundMessage {
    /// Dialect the message arrived in
    pub dialect: Dialect,
    /// Correlation id for the response
    pub request_id: RequestId,
    /// Typed request
    pub request: Request,
    /// Receive time
    pub received_at: Timestamp,
}

impl InboundMessage {
    /// Create a message with an explicit correlation id.
    pub fn new(dialect: Dialect, request_id: RequestId, request: Request) -> Self {
        Self {
            dialect,
            request_id,
            request,
            received_at: now(),
        }
    }

    /// Create a message with a fresh correlation id.
    pub fn generate(dialect: Dialect, request: Request) -> Self {
        Self::new(dialect, RequestId::generate(), request)
    }

    /// Kind of the carried request.
    pub fn kind(&self) -> RequestKind {
        self.request.kind()
    }

    /// Validate and parse a raw envelope in either dialect.
    pub fn from_value(raw: &Value) -> Result<Self> {
        let dialect = Dialect::detect(raw).ok_or_else(|| Error::invalid("unrecognized envelope"))?;
        let (name, request_id, payload) = match dialect {
            Dialect::V2 => (
                raw.get("type").and_then(Value::as_str),
                raw.pointer("/meta/requestUuid").and_then(Value::as_str),
                raw.get("payload"),
            ),
            Dialect::V1 => (
                raw.get("topic").and_then(Value::as_str),
                raw.get("requestId").and_then(Value::as_str),
                raw.get("data"),
            ),
        };

        let name = name.ok_or_else(|| Error::invalid("message kind must be a string"))?;
        let request_id = request_id.ok_or_else(|| Error::invalid("missing correlation id"))?;
        let kind = RequestKind::from_wire(dialect, name)
            .ok_or_else(|| Error::invalid(format!("unknown message kind: {}", name)))?;
        let payload = payload
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()));

        let request = Request::parse(kind, payload)?;
        Ok(Self::new(dialect, RequestId::new(request_id), request))
    }

    /// Render the message as a raw envelope.
    pub fn to_value(&self) -> Result<Value> {
        let name = self.dialect.request_name(self.kind().wire_base(self.dialect));
        let payload = self.request.payload_value()?;
        Ok(match self.dialect {
            Dialect::V2 => serde_json::json!({
                "type": name,
                "meta": {
                    "requestUuid": self.request_id,
                    "timestamp": self.received_at,
                },
                "payload": payload,
            }),
            Dialect::V1 => serde_json::json!({
                "topic": name,
                "requestId": self.request_id,
                "data": payload,
            }),
        })
    }
}
