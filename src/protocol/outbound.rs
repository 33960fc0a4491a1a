//! Outbound responses and events.

use crate::core::{now, Error, ErrorKind, RequestId, Timestamp};
use crate::protocol::dialect::Dialect;
use crate::protocol::message::RequestKind;
use serde_json::{json, Value};

/// Events pushed to instances without a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A context delivered to a context listener
    Broadcast,
    /// An intent delivered to an intent listener
    Intent,
    /// A private channel peer added a context listener
    PrivateChannelAddContextListener,
    /// A private channel peer removed a context listener
    PrivateChannelUnsubscribe,
    /// A private channel peer disconnected
    PrivateChannelDisconnect,
}

impl EventKind {
    /// Base wire name in a dialect.
    pub fn wire_base(&self, dialect: Dialect) -> &'static str {
        let v1 = dialect == Dialect::V1;
        match self {
            EventKind::Broadcast if v1 => "context",
            EventKind::Broadcast => "broadcast",
            EventKind::Intent => "intent",
            EventKind::PrivateChannelAddContextListener => "privateChannelOnAddContextListener",
            EventKind::PrivateChannelUnsubscribe => "privateChannelOnUnsubscribe",
            EventKind::PrivateChannelDisconnect => "privateChannelOnDisconnect",
        }
    }
}

/// What an outbound message answers or announces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutboundKind {
    /// Response to a request of this kind
    Response(RequestKind),
    /// Final result of a raised intent, sent after the resolution response
    RaiseIntentResult,
    /// Unsolicited event
    Event(EventKind),
}

/// A message emitted by the router.
#[derive(Clone, Debug, PartialEq)]
pub struct OutboundMessage {
    /// Dialect the message is rendered in
    pub dialect: Dialect,
    /// Message kind
    pub kind: OutboundKind,
    /// Request this message answers (responses only)
    pub correlation_id: Option<RequestId>,
    /// Unique id of this message
    pub message_id: RequestId,
    /// Payload (identical across dialects)
    pub payload: Value,
    /// Error kind, for error responses
    pub error: Option<ErrorKind>,
    /// Creation time
    pub timestamp: Timestamp,
}

impl OutboundMessage {
    fn build(
        dialect: Dialect,
        kind: OutboundKind,
        correlation_id: Option<RequestId>,
        payload: Value,
    ) -> Self {
        Self {
            dialect,
            kind,
            correlation_id,
            message_id: RequestId::generate(),
            payload,
            error: None,
            timestamp: now(),
        }
    }

    /// Create a success response.
    pub fn response(
        dialect: Dialect,
        kind: RequestKind,
        request_id: &RequestId,
        payload: Value,
    ) -> Self {
        Self::build(dialect, OutboundKind::Response(kind), Some(request_id.clone()), payload)
    }

    /// Create an error response.
    pub fn error(
        dialect: Dialect,
        kind: RequestKind,
        request_id: &RequestId,
        error: &Error,
    ) -> Self {
        let mut msg = Self::build(
            dialect,
            OutboundKind::Response(kind),
            Some(request_id.clone()),
            Value::Object(serde_json::Map::new()),
        );
        msg.error = Some(error.kind());
        msg
    }

    /// Create the final result message of a raised intent.
    pub fn raise_result(
        dialect: Dialect,
        request_id: &RequestId,
        result: Result<Value, &Error>,
    ) -> Self {
        match result {
            Ok(payload) => Self::build(
                dialect,
                OutboundKind::RaiseIntentResult,
                Some(request_id.clone()),
                payload,
            ),
            Err(error) => {
                let mut msg = Self::build(
                    dialect,
                    OutboundKind::RaiseIntentResult,
                    Some(request_id.clone()),
                    Value::Object(serde_json::Map::new()),
                );
                msg.error = Some(error.kind());
                msg
            }
        }
    }

    /// Create an event.
    pub fn event(dialect: Dialect, kind: EventKind, payload: Value) -> Self {
        Self::build(dialect, OutboundKind::Event(kind), None, payload)
    }

    /// Wire name of this message in its dialect.
    pub fn wire_name(&self) -> String {
        match self.kind {
            OutboundKind::Response(kind) => {
                self.dialect.response_name(kind.wire_base(self.dialect))
            }
            OutboundKind::RaiseIntentResult => self.dialect.response_name("raiseIntentResult"),
            OutboundKind::Event(kind) => self.dialect.event_name(kind.wire_base(self.dialect)),
        }
    }

    /// Dialect-specific error code, for error responses.
    pub fn error_code(&self) -> Option<&'static str> {
        self.error.map(|kind| self.dialect.error_code(kind))
    }

    /// Check if this is an error response.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Check if this answers a request of `kind`.
    pub fn is_response_to(&self, kind: RequestKind) -> bool {
        self.kind == OutboundKind::Response(kind)
    }

    /// Render the wire envelope.
    pub fn to_wire(&self) -> Value {
        let name = self.wire_name();
        match self.dialect {
            Dialect::V2 => {
                let mut payload = self.payload.clone();
                if let (Some(code), Some(obj)) = (self.error_code(), payload.as_object_mut()) {
                    obj.insert("error".to_string(), json!(code));
                }
                let meta = match &self.correlation_id {
                    Some(request_id) => json!({
                        "requestUuid": request_id,
                        "responseUuid": self.message_id,
                        "timestamp": self.timestamp,
                    }),
                    None => json!({
                        "eventUuid": self.message_id,
                        "timestamp": self.timestamp,
                    }),
                };
                json!({ "type": name, "meta": meta, "payload": payload })
            }
            Dialect::V1 => {
                let mut envelope = json!({ "topic": name, "data": self.payload });
                if let Some(obj) = envelope.as_object_mut() {
                    if let Some(request_id) = &self.correlation_id {
                        obj.insert("requestId".to_string(), json!(request_id));
                    }
                    if let Some(code) = self.error_code() {
                        obj.insert("error".to_string(), json!(code));
                    }
                }
                envelope
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v2_response_envelope() {
        let request_id = RequestId::new("r-1");
        let msg = OutboundMessage::response(
            Dialect::V2,
            RequestKind::GetCurrentContext,
            &request_id,
            json!({"context": null}),
        );
        let wire = msg.to_wire();
        assert_eq!(wire["type"], "getCurrentContextResponse");
        assert_eq!(wire["meta"]["requestUuid"], "r-1");
        assert!(wire["meta"]["responseUuid"].is_string());
        assert!(wire["payload"]["error"].is_null());
    }

    #[test]
    fn test_error_codes_follow_dialect() {
        let request_id = RequestId::new("r-1");
        let err = Error::ChannelCreationFailed("default".to_string());

        let kind = RequestKind::GetOrCreateAppChannel;
        let v2 = OutboundMessage::error(Dialect::V2, kind, &request_id, &err);
        assert_eq!(v2.to_wire()["payload"]["error"], "CreationFailed");

        let v1 = OutboundMessage::error(Dialect::V1, kind, &request_id, &err);
        let wire = v1.to_wire();
        assert_eq!(wire["topic"], "getOrCreateChannel");
        assert_eq!(wire["requestId"], "r-1");
        assert_eq!(wire["error"], "ChannelCreationFailed");
        assert_eq!(v1.error, Some(ErrorKind::ChannelCreationFailed));
    }

    #[test]
    fn test_event_envelopes() {
        let payload = json!({"channelId": "red", "context": {"type": "x"}});
        let v2 = OutboundMessage::event(Dialect::V2, EventKind::Broadcast, payload.clone());
        let v2 = v2.to_wire();
        assert_eq!(v2["type"], "broadcastEvent");
        assert!(v2["meta"]["eventUuid"].is_string());
        assert!(v2["meta"].get("requestUuid").is_none());

        let v1 = OutboundMessage::event(Dialect::V1, EventKind::Broadcast, payload).to_wire();
        assert_eq!(v1["topic"], "context");
        assert!(v1.get("requestId").is_none());
    }

    #[test]
    fn test_raise_result_names() {
        let request_id = RequestId::new("r-9");
        let ok = OutboundMessage::raise_result(Dialect::V2, &request_id, Ok(json!({})));
        assert_eq!(ok.wire_name(), "raiseIntentResultResponse");
        assert!(!ok.is_error());

        let err = OutboundMessage::raise_result(Dialect::V1, &request_id, Err(&Error::Timeout));
        assert_eq!(err.wire_name(), "raiseIntentResult");
        assert_eq!(err.error_code(), Some("Timeout"));
    }
}
