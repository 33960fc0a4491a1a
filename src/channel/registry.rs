//! Channel registry.
//!
//! Owns every channel and its context history. Membership itself is stored
//! on the instance records; the registry is the only code that changes it.

use crate::channel::definition::{Channel, ChannelType, PrivateChannel};
use crate::context::{Context, ContextStore};
use crate::core::{Error, InstanceId, ListenerId, Result, DEFAULT_CHANNEL};
use crate::instance::{InstanceDirectory, ListenerRecord, ListenerScope, RemovedInstance};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// A context to hand to one listener.
#[derive(Clone, Debug, PartialEq)]
pub struct ContextDelivery {
    /// Instance owning the listener
    pub instance_id: InstanceId,
    /// Listener to invoke
    pub listener_id: ListenerId,
    /// Channel the context was broadcast on
    pub channel_id: Option<String>,
    /// The context
    pub context: Context,
}

/// Something that happened on a private channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrivateChannelEvent {
    /// A peer added a context listener
    AddContextListener { context_type: Option<String> },
    /// A peer removed a context listener
    Unsubscribe { context_type: Option<String> },
    /// A peer left the channel
    Disconnect,
}

/// Notification for one private channel participant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrivateChannelNotice {
    /// Participant to notify
    pub target: InstanceId,
    /// Private channel id
    pub channel_id: String,
    /// What happened
    pub event: PrivateChannelEvent,
}

/// Registry of user, system, app and private channels.
#[derive(Debug)]
pub struct ChannelRegistry {
    /// Fixed user and system channels, in display order
    user_channels: Vec<Channel>,
    /// App channels created on demand
    app_channels: HashMap<String, Channel>,
    /// Private channels by id
    private_channels: HashMap<String, PrivateChannel>,
    /// Context history of every channel
    contexts: ContextStore,
}

impl ChannelRegistry {
    /// Create a registry with a fixed set of user/system channels.
    pub fn new(user_channels: Vec<Channel>) -> Result<Self> {
        let mut seen = HashSet::new();
        for channel in &user_channels {
            if !channel.channel_type.is_user_slot() {
                return Err(Error::ChannelCreationFailed(format!(
                    "{} is a {} channel, expected user or system",
                    channel.id, channel.channel_type
                )));
            }
            if channel.id == DEFAULT_CHANNEL || channel.id.is_empty() {
                return Err(Error::ChannelCreationFailed(format!(
                    "reserved channel id '{}'",
                    channel.id
                )));
            }
            if !seen.insert(channel.id.as_str()) {
                return Err(Error::ChannelCreationFailed(format!(
                    "duplicate channel id {}",
                    channel.id
                )));
            }
        }

        Ok(Self {
            user_channels,
            app_channels: HashMap::new(),
            private_channels: HashMap::new(),
            contexts: ContextStore::new(),
        })
    }

    /// Resolve a channel id: user/system channels first, then app, then private.
    pub fn resolve_channel(&self, id: &str) -> Option<&Channel> {
        self.user_channels
            .iter()
            .find(|c| c.id == id)
            .or_else(|| self.app_channels.get(id))
            .or_else(|| self.private_channels.get(id).map(|p| &p.channel))
    }

    /// Create an app channel, or return the existing one.
    pub fn create_app_channel(&mut self, id: &str) -> Result<Channel> {
        if id == DEFAULT_CHANNEL || id.trim().is_empty() {
            return Err(Error::ChannelCreationFailed(format!("reserved channel id '{}'", id)));
        }
        if let Some(existing) = self.app_channels.get(id) {
            return Ok(existing.clone());
        }
        if let Some(other) = self.resolve_channel(id) {
            tracing::warn!(
                channel = id,
                kind = %other.channel_type,
                "app channel id collides with existing channel"
            );
            return Err(Error::ChannelCreationFailed(format!(
                "{} already exists as a {} channel",
                id, other.channel_type
            )));
        }

        let channel = Channel::new(id, ChannelType::App);
        self.app_channels.insert(id.to_string(), channel.clone());
        tracing::info!(channel = id, "app channel created");
        Ok(channel)
    }

    /// Create (if needed) an app channel and record the caller as a member.
    pub fn get_or_create_app_channel(
        &mut self,
        instances: &mut InstanceDirectory,
        instance_id: &InstanceId,
        id: &str,
    ) -> Result<Channel> {
        instances.require_active(instance_id)?;
        let channel = self.create_app_channel(id)?;
        instances
            .require_active_mut(instance_id)?
            .app_channels
            .insert(channel.id.clone());
        Ok(channel)
    }

    /// Join a channel.
    ///
    /// Joining a user/system channel replaces the current one; `"default"`
    /// only leaves. With `deliver_current`, the joiner's current-channel
    /// listeners are handed the channel's latest matching context.
    pub fn join_channel(
        &mut self,
        instances: &mut InstanceDirectory,
        instance_id: &InstanceId,
        channel_id: &str,
        deliver_current: bool,
    ) -> Result<Vec<ContextDelivery>> {
        instances.require_active(instance_id)?;

        if channel_id == DEFAULT_CHANNEL {
            let instance = instances.require_active_mut(instance_id)?;
            if let Some(previous) = instance.user_channel.take() {
                tracing::debug!(instance = %instance_id, channel = %previous, "left user channel");
            }
            return Ok(Vec::new());
        }

        let channel = self
            .resolve_channel(channel_id)
            .cloned()
            .ok_or_else(|| Error::NoChannelFound(channel_id.to_string()))?;

        match channel.channel_type {
            ChannelType::User | ChannelType::System => {
                let instance = instances.require_active_mut(instance_id)?;
                instance.user_channel = Some(channel.id.clone());
                tracing::debug!(instance = %instance_id, channel = channel_id, "joined channel");
            }
            ChannelType::App => {
                instances
                    .require_active_mut(instance_id)?
                    .app_channels
                    .insert(channel.id.clone());
                return Ok(Vec::new());
            }
            ChannelType::Private => {
                self.check_access(instance_id, &channel)?;
                return Ok(Vec::new());
            }
        }

        if !deliver_current {
            return Ok(Vec::new());
        }

        let deliveries = instances
            .listeners_of(instance_id)
            .filter(|l| l.scope() == Some(&ListenerScope::CurrentChannel))
            .filter_map(|l| {
                let context = self.contexts.latest(channel_id, l.context_type())?;
                Some(ContextDelivery {
                    instance_id: instance_id.clone(),
                    listener_id: l.id.clone(),
                    channel_id: Some(channel_id.to_string()),
                    context: context.clone(),
                })
            })
            .collect();
        Ok(deliveries)
    }

    /// Leave the current user/system channel.
    pub fn leave_channel(
        &mut self,
        instances: &mut InstanceDirectory,
        instance_id: &InstanceId,
    ) -> Result<()> {
        self.join_channel(instances, instance_id, DEFAULT_CHANNEL, false)
            .map(|_| ())
    }

    /// Current user/system channel of an instance.
    pub fn current_channel(
        &self,
        instances: &InstanceDirectory,
        instance_id: &InstanceId,
    ) -> Result<Option<Channel>> {
        let instance = instances.require_active(instance_id)?;
        Ok(instance
            .user_channel
            .as_deref()
            .and_then(|id| self.resolve_channel(id))
            .cloned())
    }

    /// Broadcast a context.
    ///
    /// Without a channel id the sender's current user channel is used; a
    /// sender on no channel broadcasts nowhere. The context is appended to
    /// history before deliveries are planned, and the sender never receives
    /// its own broadcast.
    pub fn broadcast(
        &mut self,
        instances: &InstanceDirectory,
        from: &InstanceId,
        channel_id: Option<&str>,
        context: Context,
    ) -> Result<Vec<ContextDelivery>> {
        let sender = instances.require_active(from)?;
        let channel_id = match channel_id.or(sender.user_channel.as_deref()) {
            Some(id) => id.to_string(),
            None => {
                tracing::debug!(instance = %from, "broadcast without a channel ignored");
                return Ok(Vec::new());
            }
        };

        let channel = self
            .resolve_channel(&channel_id)
            .cloned()
            .ok_or_else(|| Error::NoChannelFound(channel_id.clone()))?;
        self.check_access(from, &channel)?;

        self.contexts.append(&channel_id, context.clone());

        let deliveries: Vec<ContextDelivery> = instances
            .listeners()
            .iter()
            .filter(|l| &l.instance_id != from && l.accepts_context(&context.context_type))
            .filter(|l| {
                instances.get(&l.instance_id).is_some_and(|target| {
                    target.is_active()
                        && l.hears_channel(&channel_id, target.user_channel.as_deref())
                        && (channel.channel_type.is_user_slot() || target.is_member_of(&channel_id))
                })
            })
            .map(|l| ContextDelivery {
                instance_id: l.instance_id.clone(),
                listener_id: l.id.clone(),
                channel_id: Some(channel_id.clone()),
                context: context.clone(),
            })
            .collect();

        tracing::debug!(
            instance = %from,
            channel = %channel_id,
            context_type = %context.context_type,
            deliveries = deliveries.len(),
            "broadcast"
        );
        Ok(deliveries)
    }

    /// Latest context on a channel (the requester's current channel when omitted).
    pub fn current_context(
        &self,
        instances: &InstanceDirectory,
        requester: &InstanceId,
        channel_id: Option<&str>,
        context_type: Option<&str>,
    ) -> Result<Option<Context>> {
        let instance = instances.require_active(requester)?;
        let channel_id = match channel_id.or(instance.user_channel.as_deref()) {
            Some(id) => id,
            None => return Ok(None),
        };
        let channel = self
            .resolve_channel(channel_id)
            .ok_or_else(|| Error::NoChannelFound(channel_id.to_string()))?;
        self.check_access(requester, channel)?;
        Ok(self.contexts.latest(channel_id, context_type).cloned())
    }

    /// Register a context listener, tracking membership of the scoped channel.
    pub fn add_context_listener(
        &mut self,
        instances: &mut InstanceDirectory,
        instance_id: &InstanceId,
        channel_id: Option<&str>,
        context_type: Option<&str>,
    ) -> Result<(ListenerId, Vec<PrivateChannelNotice>)> {
        instances.require_active(instance_id)?;
        let mut notices = Vec::new();

        if let Some(id) = channel_id {
            let channel = self
                .resolve_channel(id)
                .cloned()
                .ok_or_else(|| Error::NoChannelFound(id.to_string()))?;
            self.check_access(instance_id, &channel)?;

            match channel.channel_type {
                ChannelType::App => {
                    instances
                        .require_active_mut(instance_id)?
                        .app_channels
                        .insert(channel.id.clone());
                }
                ChannelType::Private => {
                    notices = self.notify_peers(
                        &channel.id,
                        instance_id,
                        PrivateChannelEvent::AddContextListener {
                            context_type: context_type.map(str::to_string),
                        },
                    );
                }
                ChannelType::User | ChannelType::System => {}
            }
        }

        let scope = ListenerScope::from_channel(channel_id);
        let listener_id = instances.add_context_listener(instance_id, scope, context_type)?;
        Ok((listener_id, notices))
    }

    /// Remove a context listener owned by `instance_id`.
    pub fn remove_context_listener(
        &mut self,
        instances: &mut InstanceDirectory,
        instance_id: &InstanceId,
        listener_id: &ListenerId,
    ) -> Result<Vec<PrivateChannelNotice>> {
        match instances.listener(listener_id) {
            Some(l) if &l.instance_id == instance_id && l.scope().is_some() => {}
            _ => return Err(Error::invalid(format!("unknown context listener {}", listener_id))),
        }
        let removed = instances
            .remove_listener(listener_id)
            .ok_or_else(|| Error::invalid(format!("unknown context listener {}", listener_id)))?;
        Ok(self.unsubscribe_notices(instance_id, std::slice::from_ref(&removed)))
    }

    /// Create a private channel owned by `owner`.
    pub fn create_private_channel(
        &mut self,
        instances: &mut InstanceDirectory,
        owner: &InstanceId,
    ) -> Result<Channel> {
        let instance = instances.require_active_mut(owner)?;
        let id = format!("private-{}", Uuid::new_v4());
        let private = PrivateChannel::new(&id, owner);
        let channel = private.channel.clone();

        instance.private_channels.insert(id.clone());
        self.private_channels.insert(id.clone(), private);
        tracing::info!(channel = %id, owner = %owner, "private channel created");
        Ok(channel)
    }

    /// Admit an instance to a private channel.
    pub fn add_private_participant(
        &mut self,
        instances: &mut InstanceDirectory,
        channel_id: &str,
        instance_id: &InstanceId,
    ) -> Result<()> {
        let instance = instances.require_active_mut(instance_id)?;
        let private = self
            .private_channels
            .get_mut(channel_id)
            .ok_or_else(|| Error::NoChannelFound(channel_id.to_string()))?;
        private.participants.insert(instance_id.clone());
        instance.private_channels.insert(channel_id.to_string());
        Ok(())
    }

    /// Leave a private channel, notifying the remaining participants.
    pub fn disconnect_private(
        &mut self,
        instances: &mut InstanceDirectory,
        instance_id: &InstanceId,
        channel_id: &str,
    ) -> Result<Vec<PrivateChannelNotice>> {
        let channel = self
            .private_channels
            .get(channel_id)
            .map(|p| p.channel.clone())
            .ok_or_else(|| Error::NoChannelFound(channel_id.to_string()))?;
        self.check_access(instance_id, &channel)?;

        let removed = instances.remove_channel_listeners(instance_id, channel_id);
        let mut notices = self.unsubscribe_notices(instance_id, &removed);
        notices.extend(self.leave_private(instance_id, channel_id));

        if let Some(instance) = instances.get_mut(instance_id) {
            instance.private_channels.remove(channel_id);
        }
        Ok(notices)
    }

    /// Drop a removed instance from private channels.
    ///
    /// Channel history is kept; only participation is released.
    pub fn release_instance(&mut self, removed: &RemovedInstance) -> Vec<PrivateChannelNotice> {
        let id = &removed.instance.id;
        let mut notices = self.unsubscribe_notices(id, &removed.listeners);
        for channel_id in &removed.instance.private_channels {
            notices.extend(self.leave_private(id, channel_id));
        }
        notices
    }

    /// User and system channels in display order.
    pub fn user_channels(&self) -> &[Channel] {
        &self.user_channels
    }

    /// Context history.
    pub fn contexts(&self) -> &ContextStore {
        &self.contexts
    }

    /// Private channel by id.
    pub fn private_channel(&self, id: &str) -> Option<&PrivateChannel> {
        self.private_channels.get(id)
    }

    /// Number of app channels created so far.
    pub fn app_channel_count(&self) -> usize {
        self.app_channels.len()
    }

    fn check_access(&self, instance_id: &InstanceId, channel: &Channel) -> Result<()> {
        if channel.channel_type != ChannelType::Private {
            return Ok(());
        }
        match self.private_channels.get(&channel.id) {
            Some(private) if private.is_participant(instance_id) => Ok(()),
            Some(_) => Err(Error::AccessDenied(channel.id.clone())),
            None => {
                tracing::error!(channel = %channel.id, "private channel missing from registry");
                Err(Error::Internal(format!("private channel {} is not registered", channel.id)))
            }
        }
    }

    fn leave_private(
        &mut self,
        instance_id: &InstanceId,
        channel_id: &str,
    ) -> Vec<PrivateChannelNotice> {
        let Some(private) = self.private_channels.get_mut(channel_id) else {
            return Vec::new();
        };
        if !private.participants.remove(instance_id) {
            return Vec::new();
        }
        private
            .participants
            .iter()
            .map(|target| PrivateChannelNotice {
                target: target.clone(),
                channel_id: channel_id.to_string(),
                event: PrivateChannelEvent::Disconnect,
            })
            .collect()
    }

    fn unsubscribe_notices(
        &self,
        instance_id: &InstanceId,
        removed: &[ListenerRecord],
    ) -> Vec<PrivateChannelNotice> {
        removed
            .iter()
            .filter_map(|l| {
                let channel_id = l.scope()?.channel_id()?;
                self.private_channels.get(channel_id)?;
                Some(self.notify_peers(
                    channel_id,
                    instance_id,
                    PrivateChannelEvent::Unsubscribe {
                        context_type: l.context_type().map(str::to_string),
                    },
                ))
            })
            .flatten()
            .collect()
    }

    fn notify_peers(
        &self,
        channel_id: &str,
        instance_id: &InstanceId,
        event: PrivateChannelEvent,
    ) -> Vec<PrivateChannelNotice> {
        self.private_channels
            .get(channel_id)
            .map(|private| {
                private
                    .others(instance_id)
                    .map(|target| PrivateChannelNotice {
                        target: target.clone(),
                        channel_id: channel_id.to_string(),
                        event: event.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}
