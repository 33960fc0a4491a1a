//! Interop protocol
//!
//! Message model shared by both protocol dialects:
//! - Inbound requests as a closed tagged union
//! - Outbound responses and events
//! - Dialect-specific envelopes and error codes

pub mod dialect;
pub mod message;
pub mod outbound;

pub use dialect::Dialect;
pub use message::{
    AddIntentListenerPayload, BroadcastPayload, ChannelContextPayload, ChannelPayload, ChannelRef,
    FindInstancesPayload, FindIntentPayload, FindIntentsByContextPayload, HelloPayload,
    InboundMessage, IntentResultPayload, IntentResultValue, ListenerPayload, OpenPayload,
    RaiseIntentForContextPayload, RaiseIntentPayload, Request, RequestKind,
};
pub use outbound::{EventKind, OutboundKind, OutboundMessage};
