//! Instance directory.
//!
//! Tracks connected application instances and their listener registrations.

use crate::core::{Error, InstanceId, ListenerId, Result};
use crate::instance::listener::{ListenerKind, ListenerRecord, ListenerScope};
use crate::instance::record::{Instance, InstanceStatus};
use crate::protocol::Dialect;
use std::collections::HashMap;

/// What was released when an instance was removed.
#[derive(Clone, Debug)]
pub struct RemovedInstance {
    /// Instance record as it was before removal
    pub instance: Instance,
    /// Listener registrations that were dropped
    pub listeners: Vec<ListenerRecord>,
}

/// Directory of connected application instances.
#[derive(Debug, Default)]
pub struct InstanceDirectory {
    /// All known instances, including unregistered ones
    instances: HashMap<InstanceId, Instance>,
    /// Listener registrations in registration order
    listeners: Vec<ListenerRecord>,
}

impl InstanceDirectory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance.
    ///
    /// Re-registering a known instance (e.g. a launched app completing its
    /// handshake) updates its app id, dialect and status in place.
    pub fn register(
        &mut self,
        id: &InstanceId,
        app_id: &str,
        status: InstanceStatus,
        dialect: Dialect,
    ) -> &Instance {
        let instance = self
            .instances
            .entry(id.clone())
            .and_modify(|existing| {
                if existing.status == InstanceStatus::Unregistered {
                    existing.clear_membership();
                }
                existing.app_id = app_id.to_string();
                existing.dialect = dialect;
                existing.set_status(status);
            })
            .or_insert_with(|| Instance::new(id.clone(), app_id, status).with_dialect(dialect));
        tracing::debug!(instance = %id, app = app_id, %status, "instance registered");
        instance
    }

    /// Update an instance's status, returning the previous one.
    pub fn update_status(
        &mut self,
        id: &InstanceId,
        status: InstanceStatus,
    ) -> Result<InstanceStatus> {
        let instance = self
            .instances
            .get_mut(id)
            .ok_or_else(|| Error::ViewNotFound(id.to_string()))?;
        let previous = instance.status;
        instance.set_status(status);
        Ok(previous)
    }

    /// Set an instance's title.
    pub fn set_title(&mut self, id: &InstanceId, title: Option<String>) {
        if let Some(instance) = self.instances.get_mut(id) {
            instance.title = title;
        }
    }

    /// Move an instance to `unregistered`, dropping listeners and membership.
    pub fn remove(&mut self, id: &InstanceId) -> Result<RemovedInstance> {
        let instance = self
            .instances
            .get_mut(id)
            .filter(|i| i.is_active())
            .ok_or_else(|| Error::ViewNotFound(id.to_string()))?;

        let snapshot = instance.clone();
        instance.clear_membership();
        instance.set_status(InstanceStatus::Unregistered);

        let (released, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.listeners)
            .into_iter()
            .partition(|l| &l.instance_id == id);
        self.listeners = kept;

        tracing::debug!(instance = %id, listeners = released.len(), "instance removed");
        Ok(RemovedInstance {
            instance: snapshot,
            listeners: released,
        })
    }

    /// Get an instance.
    pub fn get(&self, id: &InstanceId) -> Option<&Instance> {
        self.instances.get(id)
    }

    /// Get an instance mutably.
    pub fn get_mut(&mut self, id: &InstanceId) -> Option<&mut Instance> {
        self.instances.get_mut(id)
    }

    /// Get an instance that has not been unregistered.
    pub fn require_active(&self, id: &InstanceId) -> Result<&Instance> {
        self.instances
            .get(id)
            .filter(|i| i.is_active())
            .ok_or_else(|| Error::ViewNotFound(id.to_string()))
    }

    /// Mutable variant of [`Self::require_active`].
    pub fn require_active_mut(&mut self, id: &InstanceId) -> Result<&mut Instance> {
        self.instances
            .get_mut(id)
            .filter(|i| i.is_active())
            .ok_or_else(|| Error::ViewNotFound(id.to_string()))
    }

    /// Register a context listener.
    pub fn add_context_listener(
        &mut self,
        id: &InstanceId,
        scope: ListenerScope,
        context_type: Option<&str>,
    ) -> Result<ListenerId> {
        self.require_active(id)?;
        let record = ListenerRecord::context(id, scope, context_type);
        let listener_id = record.id.clone();
        self.listeners.push(record);
        Ok(listener_id)
    }

    /// Register an intent listener.
    pub fn add_intent_listener(&mut self, id: &InstanceId, intent: &str) -> Result<ListenerId> {
        self.require_active(id)?;
        if intent.trim().is_empty() {
            return Err(Error::invalid("intent name must not be empty"));
        }
        let record = ListenerRecord::intent(id, intent);
        let listener_id = record.id.clone();
        self.listeners.push(record);
        Ok(listener_id)
    }

    /// Remove a listener by id.
    pub fn remove_listener(&mut self, listener_id: &ListenerId) -> Option<ListenerRecord> {
        let index = self.listeners.iter().position(|l| &l.id == listener_id)?;
        Some(self.listeners.remove(index))
    }

    /// Remove every listener an instance has scoped to a channel.
    pub fn remove_channel_listeners(
        &mut self,
        id: &InstanceId,
        channel_id: &str,
    ) -> Vec<ListenerRecord> {
        let scoped_here = |l: &ListenerRecord| {
            let scope = l.scope().and_then(ListenerScope::channel_id);
            &l.instance_id == id && scope == Some(channel_id)
        };
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.listeners)
            .into_iter()
            .partition(scoped_here);
        self.listeners = kept;
        removed
    }

    /// Get a listener.
    pub fn listener(&self, listener_id: &ListenerId) -> Option<&ListenerRecord> {
        self.listeners.iter().find(|l| &l.id == listener_id)
    }

    /// Listeners owned by an instance.
    pub fn listeners_of<'a>(
        &'a self,
        id: &InstanceId,
    ) -> impl Iterator<Item = &'a ListenerRecord> + 'a {
        let id = id.clone();
        self.listeners.iter().filter(move |l| l.instance_id == id)
    }

    /// All listeners in registration order.
    pub fn listeners(&self) -> &[ListenerRecord] {
        &self.listeners
    }

    /// First intent listener an instance has for `intent`.
    pub fn intent_listener(&self, id: &InstanceId, intent: &str) -> Option<&ListenerRecord> {
        self.listeners_of(id).find(|l| l.handles_intent(intent))
    }

    /// First context listener an instance has accepting `context_type` that
    /// follows its current channel. App and private channel listeners never
    /// match.
    pub fn current_channel_listener(
        &self,
        id: &InstanceId,
        context_type: &str,
    ) -> Option<&ListenerRecord> {
        self.listeners_of(id).find(|l| {
            l.scope() == Some(&ListenerScope::CurrentChannel) && l.accepts_context(context_type)
        })
    }

    /// Active instances with an intent listener for `intent`.
    pub fn find_by_intent(&self, intent: &str) -> Vec<&Instance> {
        self.find_with_listener(|l| l.handles_intent(intent))
    }

    /// Active instances with a context listener accepting `context_type`.
    pub fn find_by_context_type(&self, context_type: &str) -> Vec<&Instance> {
        self.find_with_listener(|l| l.accepts_context(context_type))
    }

    /// Active instances of an application.
    pub fn find_by_app(&self, app_id: &str) -> Vec<&Instance> {
        let mut found: Vec<&Instance> = self
            .instances
            .values()
            .filter(|i| i.is_active() && i.app_id == app_id)
            .collect();
        found.sort_by(|a, b| a.registered_at.cmp(&b.registered_at).then(a.id.cmp(&b.id)));
        found
    }

    /// Intent names an instance currently listens for.
    pub fn intents_of(&self, id: &InstanceId) -> Vec<String> {
        let mut intents: Vec<String> = Vec::new();
        for listener in self.listeners_of(id) {
            if let ListenerKind::Intent { intent } = &listener.kind {
                if !intents.contains(intent) {
                    intents.push(intent.clone());
                }
            }
        }
        intents
    }

    /// Number of active instances.
    pub fn active_count(&self) -> usize {
        self.instances.values().filter(|i| i.is_active()).count()
    }

    fn find_with_listener(&self, pred: impl Fn(&ListenerRecord) -> bool) -> Vec<&Instance> {
        let mut seen = Vec::new();
        for listener in self.listeners.iter().filter(|l| pred(l)) {
            if seen.iter().any(|i: &&Instance| i.id == listener.instance_id) {
                continue;
            }
            match self.instances.get(&listener.instance_id) {
                Some(instance) if instance.is_active() => seen.push(instance),
                _ => {}
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory_with(ids: &[(&str, &str)]) -> InstanceDirectory {
        let mut dir = InstanceDirectory::new();
        for (id, app) in ids {
            dir.register(&InstanceId::new(*id), app, InstanceStatus::Ready, Dialect::V2);
        }
        dir
    }

    #[test]
    fn test_register_and_update_status() {
        let mut dir = InstanceDirectory::new();
        let id = InstanceId::new("i-1");
        dir.register(&id, "chart", InstanceStatus::Pending, Dialect::V2);

        assert_eq!(dir.get(&id).unwrap().status, InstanceStatus::Pending);
        let previous = dir.update_status(&id, InstanceStatus::Ready).unwrap();
        assert_eq!(previous, InstanceStatus::Pending);
        assert!(dir.get(&id).unwrap().is_ready());
        assert!(dir.update_status(&InstanceId::new("nope"), InstanceStatus::Ready).is_err());
    }

    #[test]
    fn test_reregister_updates_in_place() {
        let mut dir = InstanceDirectory::new();
        let id = InstanceId::new("i-1");
        dir.register(&id, "chart", InstanceStatus::Pending, Dialect::V2);
        dir.register(&id, "chart", InstanceStatus::Ready, Dialect::V1);

        let inst = dir.get(&id).unwrap();
        assert_eq!(inst.dialect, Dialect::V1);
        assert!(inst.is_ready());
        assert_eq!(dir.active_count(), 1);
    }

    #[test]
    fn test_listeners_and_lookup() {
        let mut dir = directory_with(&[("a", "chart"), ("b", "news")]);
        let a = InstanceId::new("a");
        let b = InstanceId::new("b");

        dir.add_intent_listener(&a, "ViewChart").unwrap();
        dir.add_intent_listener(&b, "ViewNews").unwrap();
        dir.add_context_listener(&b, ListenerScope::CurrentChannel, Some("fdc3.instrument"))
            .unwrap();

        let chart = dir.find_by_intent("ViewChart");
        assert_eq!(chart.len(), 1);
        assert_eq!(chart[0].id, a);

        assert_eq!(dir.find_by_context_type("fdc3.instrument").len(), 1);
        assert!(dir.find_by_context_type("fdc3.contact").is_empty());
        assert_eq!(dir.intents_of(&a), vec!["ViewChart".to_string()]);
    }

    #[test]
    fn test_remove_listener() {
        let mut dir = directory_with(&[("a", "chart")]);
        let a = InstanceId::new("a");
        let id = dir.add_intent_listener(&a, "ViewChart").unwrap();

        assert!(dir.remove_listener(&id).is_some());
        assert!(dir.remove_listener(&id).is_none());
        assert!(dir.find_by_intent("ViewChart").is_empty());
    }

    #[test]
    fn test_remove_instance_cascades() {
        let mut dir = directory_with(&[("a", "chart"), ("b", "chart")]);
        let a = InstanceId::new("a");
        dir.get_mut(&a).unwrap().user_channel = Some("red".to_string());
        dir.add_intent_listener(&a, "ViewChart").unwrap();
        dir.add_context_listener(&a, ListenerScope::CurrentChannel, None).unwrap();
        dir.add_intent_listener(&InstanceId::new("b"), "ViewChart").unwrap();

        let removed = dir.remove(&a).unwrap();
        assert_eq!(removed.listeners.len(), 2);
        assert_eq!(removed.instance.user_channel.as_deref(), Some("red"));

        let inst = dir.get(&a).unwrap();
        assert_eq!(inst.status, InstanceStatus::Unregistered);
        assert!(inst.user_channel.is_none());
        assert_eq!(dir.find_by_intent("ViewChart").len(), 1);
        assert_eq!(dir.find_by_app("chart").len(), 1);

        // A second removal is a stale reference
        assert!(matches!(dir.remove(&a), Err(Error::ViewNotFound(_))));
    }

    #[test]
    fn test_listeners_require_active_instance() {
        let mut dir = InstanceDirectory::new();
        let ghost = InstanceId::new("ghost");
        assert!(dir.add_intent_listener(&ghost, "ViewChart").is_err());
        assert!(dir
            .add_context_listener(&ghost, ListenerScope::CurrentChannel, None)
            .is_err());
    }

    #[test]
    fn test_remove_channel_listeners() {
        let mut dir = directory_with(&[("a", "chart")]);
        let a = InstanceId::new("a");
        dir.add_context_listener(&a, ListenerScope::from_channel(Some("p-1")), None)
            .unwrap();
        dir.add_context_listener(&a, ListenerScope::CurrentChannel, None).unwrap();

        let removed = dir.remove_channel_listeners(&a, "p-1");
        assert_eq!(removed.len(), 1);
        assert_eq!(dir.listeners().len(), 1);
    }

    #[test]
    fn test_current_channel_listener_ignores_fixed_scopes() {
        let mut dir = directory_with(&[("a", "chart")]);
        let a = InstanceId::new("a");
        let fixed = ListenerScope::from_channel(Some("p-1"));
        dir.add_context_listener(&a, fixed, Some("fdc3.instrument")).unwrap();
        assert!(dir.current_channel_listener(&a, "fdc3.instrument").is_none());

        let id = dir
            .add_context_listener(&a, ListenerScope::CurrentChannel, None)
            .unwrap();
        let found = dir.current_channel_listener(&a, "fdc3.instrument").unwrap();
        assert_eq!(found.id, id);
        assert_eq!(dir.listeners_of(&a).count(), 2);
    }
}
