//! Outbound message delivery.

use crate::core::{Error, InstanceId, Result};
use crate::protocol::OutboundMessage;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::mpsc;

/// Transport capability: hand a message to a connected instance.
///
/// Called while the router holds its state lock, so implementations must
/// not block; queue the message and return.
pub trait MessageDelivery: Send + Sync {
    /// Deliver a message, failing with `DeliveryFailed` when the instance is
    /// unknown or its transport is closed.
    fn deliver(&self, instance_id: &InstanceId, message: OutboundMessage) -> Result<()>;
}

/// Delivery over one unbounded tokio channel per instance.
#[derive(Debug, Default)]
pub struct ChannelDelivery {
    senders: RwLock<HashMap<InstanceId, mpsc::UnboundedSender<OutboundMessage>>>,
}

impl ChannelDelivery {
    /// Create with no connected instances.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a queue for an instance, replacing any previous one.
    pub fn connect(&self, instance_id: &InstanceId) -> mpsc::UnboundedReceiver<OutboundMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(instance_id.clone(), tx);
        rx
    }

    /// Close an instance's queue.
    pub fn disconnect(&self, instance_id: &InstanceId) -> bool {
        self.senders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(instance_id)
            .is_some()
    }

    /// Check if an instance has an open queue.
    pub fn is_connected(&self, instance_id: &InstanceId) -> bool {
        self.senders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(instance_id)
            .is_some_and(|tx| !tx.is_closed())
    }
}

impl MessageDelivery for ChannelDelivery {
    fn deliver(&self, instance_id: &InstanceId, message: OutboundMessage) -> Result<()> {
        let senders = self.senders.read().unwrap_or_else(PoisonError::into_inner);
        let tx = senders
            .get(instance_id)
            .ok_or_else(|| Error::DeliveryFailed(format!("{} is not connected", instance_id)))?;
        tx.send(message)
            .map_err(|_| Error::DeliveryFailed(format!("{} closed its queue", instance_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Dialect, EventKind};
    use serde_json::json;

    fn event() -> OutboundMessage {
        OutboundMessage::event(Dialect::V2, EventKind::Broadcast, json!({}))
    }

    #[tokio::test]
    async fn test_deliver_to_connected() {
        let delivery = ChannelDelivery::new();
        let id = InstanceId::new("a");
        let mut rx = delivery.connect(&id);

        delivery.deliver(&id, event()).unwrap();
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.wire_name(), "broadcastEvent");
    }

    #[test]
    fn test_unknown_or_closed_fails() {
        let delivery = ChannelDelivery::new();
        let id = InstanceId::new("a");
        assert!(matches!(delivery.deliver(&id, event()), Err(Error::DeliveryFailed(_))));

        let rx = delivery.connect(&id);
        drop(rx);
        assert!(!delivery.is_connected(&id));
        assert!(matches!(delivery.deliver(&id, event()), Err(Error::DeliveryFailed(_))));

        assert!(delivery.disconnect(&id));
        assert!(!delivery.disconnect(&id));
    }
}
