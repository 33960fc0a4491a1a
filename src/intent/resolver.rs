//! Intent resolver.
//!
//! Candidate search over live intent listeners and directory apps, target
//! selection, and the table of in-flight raises.

use crate::appd::{DirectoryApp, IntentDefinition};
use crate::core::{AppIdentifier, Error, InstanceId, RequestId, Result};
use crate::instance::InstanceDirectory;
use crate::intent::candidate::{group_by_intent, AppIntent, IntentCandidate};
use crate::intent::raise::{InFlightRaise, RaiseState};
use std::collections::HashMap;

/// Parameters of a candidate search.
#[derive(Clone, Copy, Debug, Default)]
pub struct CandidateSearch<'a> {
    /// Intent name; `None` searches every intent for the context type
    pub intent: Option<&'a str>,
    /// Context type being raised
    pub context_type: Option<&'a str>,
    /// Required result type
    pub result_type: Option<&'a str>,
}

/// Outcome of target selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Exactly one candidate; dispatch directly
    Single(IntentCandidate),
    /// Several candidates; the user must choose
    Ambiguous(Vec<IntentCandidate>),
}

/// Check a declared result type against a requested one.
///
/// `"channel"` also matches typed channels such as `"channel<fdc3.instrument>"`.
pub fn result_type_matches(declared: Option<&str>, requested: Option<&str>) -> bool {
    match (requested, declared) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(requested), Some(declared)) => {
            declared == requested || (requested == "channel" && declared.starts_with("channel<"))
        }
    }
}

/// Intent resolver with its in-flight raise table.
#[derive(Debug, Default)]
pub struct IntentResolver {
    raises: HashMap<RequestId, InFlightRaise>,
}

impl IntentResolver {
    /// Create a resolver with no raises in flight.
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect candidates.
    ///
    /// `apps` is the directory's answer for this search. A directory app with
    /// a running instance listening for the same intent is folded into that
    /// live candidate. Live candidates come first, in registration order.
    pub fn search(
        &self,
        instances: &InstanceDirectory,
        apps: &[DirectoryApp],
        search: CandidateSearch<'_>,
    ) -> Vec<IntentCandidate> {
        let offered = |d: &IntentDefinition| {
            search.intent.map_or(true, |i| d.name == i) && d.accepts(search.context_type)
        };
        let offers: Vec<(&DirectoryApp, &str)> = apps
            .iter()
            .flat_map(move |app| {
                app.intents
                    .iter()
                    .filter(move |d| offered(*d))
                    .map(move |d| (app, d.name.as_str()))
            })
            .collect();

        let mut live: Vec<IntentCandidate> = Vec::new();
        match search.intent {
            Some(intent) => {
                for instance in instances.find_by_intent(intent) {
                    let declared = offers
                        .iter()
                        .find(|(app, name)| app.app_id == instance.app_id && *name == intent)
                        .map(|(app, _)| *app);
                    let title = instance.title.as_deref();
                    let app_id = instance.app_id.as_str();
                    live.push(live_candidate(intent, app_id, &instance.id, title, declared));
                }
            }
            None => {
                for (app, intent) in &offers {
                    for instance in instances.find_by_app(&app.app_id) {
                        if instances.intent_listener(&instance.id, intent).is_none() {
                            continue;
                        }
                        let title = instance.title.as_deref();
                        let candidate =
                            live_candidate(intent, &app.app_id, &instance.id, title, Some(*app));
                        live.push(candidate);
                    }
                }
            }
        }

        let directory = offers
            .iter()
            .filter(|(app, intent)| {
                !live.iter().any(|c| c.app_id == app.app_id && c.intent == *intent)
            })
            .map(|(app, intent)| IntentCandidate::directory(intent, app));

        let candidates: Vec<IntentCandidate> = live
            .clone()
            .into_iter()
            .chain(directory)
            .filter(|c| result_type_matches(c.result_type.as_deref(), search.result_type))
            .collect();

        tracing::debug!(
            intent = search.intent.unwrap_or("*"),
            context_type = search.context_type.unwrap_or("*"),
            live = live.len(),
            total = candidates.len(),
            "intent candidates"
        );
        candidates
    }

    /// Candidates for one intent, grouped for `findIntent`.
    pub fn find_intent(
        &self,
        instances: &InstanceDirectory,
        apps: &[DirectoryApp],
        search: CandidateSearch<'_>,
    ) -> Result<AppIntent> {
        let intent = search
            .intent
            .ok_or_else(|| Error::invalid("findIntent requires an intent name"))?;
        let candidates = self.search(instances, apps, search);
        group_by_intent(&candidates).into_iter().next().ok_or_else(|| {
            tracing::debug!(intent, "no handlers found");
            Error::NoAppsFound
        })
    }

    /// Every intent resolvable for a context type.
    pub fn find_intents_by_context(
        &self,
        instances: &InstanceDirectory,
        apps: &[DirectoryApp],
        context_type: &str,
        result_type: Option<&str>,
    ) -> Result<Vec<AppIntent>> {
        let search = CandidateSearch {
            intent: None,
            context_type: Some(context_type),
            result_type,
        };
        let grouped = group_by_intent(&self.search(instances, apps, search));
        if grouped.is_empty() {
            return Err(Error::NoAppsFound);
        }
        Ok(grouped)
    }

    /// Pick the dispatch target among candidates.
    ///
    /// A named instance must be among the live candidates. A named app uses
    /// its live candidates (several of them need disambiguation) before its
    /// directory entry. Without a target, several candidates always need
    /// disambiguation.
    pub fn select(
        &self,
        mut candidates: Vec<IntentCandidate>,
        target: Option<&AppIdentifier>,
    ) -> Result<Resolution> {
        let Some(target) = target else {
            return match candidates.len() {
                0 => Err(Error::NoAppsFound),
                1 => Ok(Resolution::Single(candidates.remove(0))),
                _ => Ok(Resolution::Ambiguous(candidates)),
            };
        };

        if let Some(instance_id) = &target.instance_id {
            return candidates
                .into_iter()
                .find(|c| c.instance_id() == Some(instance_id))
                .map(Resolution::Single)
                .ok_or_else(|| Error::AppNotFound(instance_id.to_string()));
        }

        let (live, directory): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .filter(|c| c.app_id == target.app_id)
            .partition(IntentCandidate::is_live);

        let mut pool = if live.is_empty() { directory } else { live };
        match pool.len() {
            0 => Err(Error::AppNotFound(target.app_id.clone())),
            1 => Ok(Resolution::Single(pool.remove(0))),
            _ => Ok(Resolution::Ambiguous(pool)),
        }
    }

    /// Track a new raise.
    pub fn begin(&mut self, raise: InFlightRaise) -> RequestId {
        let raise_id = raise.raise_id.clone();
        tracing::debug!(
            raise = %raise_id,
            source = %raise.source,
            intent = raise.intent.as_deref().unwrap_or("*"),
            "raise started"
        );
        self.raises.insert(raise_id.clone(), raise);
        raise_id
    }

    /// Move a raise to a non-terminal state.
    pub fn transition(
        &mut self,
        raise_id: &RequestId,
        next: RaiseState,
    ) -> Result<&mut InFlightRaise> {
        let raise = self
            .raises
            .get_mut(raise_id)
            .ok_or_else(|| Error::invalid(format!("unknown raise {}", raise_id)))?;
        if !raise.state.can_transition_to(next) {
            tracing::error!(
                raise = %raise_id,
                from = %raise.state,
                to = %next,
                "invalid raise transition"
            );
            return Err(Error::Internal(format!(
                "raise {} cannot move from {} to {}",
                raise_id, raise.state, next
            )));
        }
        tracing::debug!(raise = %raise_id, from = %raise.state, to = %next, "raise transition");
        raise.state = next;
        Ok(raise)
    }

    /// Move a raise to a terminal state and stop tracking it.
    pub fn finish(&mut self, raise_id: &RequestId, terminal: RaiseState) -> Option<InFlightRaise> {
        if !terminal.is_terminal() {
            tracing::error!(raise = %raise_id, state = %terminal, "finish with non-terminal state");
            return None;
        }
        self.transition(raise_id, terminal).ok()?;
        let raise = self.raises.remove(raise_id)?;
        tracing::info!(
            raise = %raise_id,
            state = %raise.state,
            elapsed_ms = (crate::core::now() - raise.started).num_milliseconds(),
            "raise finished"
        );
        Some(raise)
    }

    /// Look up a raise.
    pub fn get(&self, raise_id: &RequestId) -> Option<&InFlightRaise> {
        self.raises.get(raise_id)
    }

    /// Look up a raise mutably.
    pub fn get_mut(&mut self, raise_id: &RequestId) -> Option<&mut InFlightRaise> {
        self.raises.get_mut(raise_id)
    }

    /// Raises started by an instance.
    pub fn raises_from(&self, source: &InstanceId) -> Vec<RequestId> {
        self.raises
            .values()
            .filter(|r| &r.source == source)
            .map(|r| r.raise_id.clone())
            .collect()
    }

    /// Raises dispatched to an instance.
    pub fn raises_targeting(&self, target: &InstanceId) -> Vec<RequestId> {
        self.raises
            .values()
            .filter(|r| r.target.as_ref() == Some(target))
            .map(|r| r.raise_id.clone())
            .collect()
    }

    /// Number of raises in flight.
    pub fn in_flight(&self) -> usize {
        self.raises.len()
    }
}

fn live_candidate(
    intent: &str,
    app_id: &str,
    instance_id: &InstanceId,
    title: Option<&str>,
    declared: Option<&DirectoryApp>,
) -> IntentCandidate {
    let mut candidate = IntentCandidate::live(intent, app_id, instance_id);
    candidate.title = title.map(str::to_string);
    if let Some(definition) = declared.and_then(|app| app.intent(intent)) {
        candidate.display_name = definition.display().to_string();
        candidate.result_type = definition.result_type.clone();
    }
    if candidate.title.is_none() {
        candidate.title = declared.and_then(|app| app.title.clone());
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::instance::InstanceStatus;
    use crate::protocol::{Dialect, RequestKind};

    fn chart_app() -> DirectoryApp {
        DirectoryApp::new("chart").with_intent(
            IntentDefinition::new("ViewChart")
                .with_context("fdc3.instrument")
                .with_result_type("channel<fdc3.instrument>"),
        )
    }

    fn news_app() -> DirectoryApp {
        let view = IntentDefinition::new("ViewNews").with_context("fdc3.instrument");
        DirectoryApp::new("news").with_intent(view)
    }

    fn live(instances: &mut InstanceDirectory, id: &str, app: &str, intent: &str) -> InstanceId {
        let id = InstanceId::new(id);
        instances.register(&id, app, InstanceStatus::Ready, Dialect::V2);
        instances.add_intent_listener(&id, intent).unwrap();
        id
    }

    fn search(intent: &str) -> CandidateSearch<'_> {
        CandidateSearch {
            intent: Some(intent),
            context_type: Some("fdc3.instrument"),
            result_type: None,
        }
    }

    #[test]
    fn test_result_type_matching() {
        assert!(result_type_matches(None, None));
        assert!(result_type_matches(Some("fdc3.x"), None));
        assert!(!result_type_matches(None, Some("fdc3.x")));
        assert!(result_type_matches(Some("channel<fdc3.x>"), Some("channel")));
        assert!(!result_type_matches(Some("fdc3.y"), Some("fdc3.x")));
    }

    #[test]
    fn test_directory_only_candidate() {
        let resolver = IntentResolver::new();
        let instances = InstanceDirectory::new();
        let candidates = resolver.search(&instances, &[chart_app()], search("ViewChart"));
        assert_eq!(candidates.len(), 1);
        assert!(!candidates[0].is_live());
    }

    #[test]
    fn test_live_candidate_folds_directory_entry() {
        let resolver = IntentResolver::new();
        let mut instances = InstanceDirectory::new();
        let id = live(&mut instances, "i-1", "chart", "ViewChart");

        let candidates = resolver.search(&instances, &[chart_app()], search("ViewChart"));
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].instance_id(), Some(&id));
        assert_eq!(candidates[0].result_type.as_deref(), Some("channel<fdc3.instrument>"));

        let selected = resolver.select(candidates, None).unwrap();
        assert!(matches!(selected, Resolution::Single(c) if c.is_live()));
    }

    #[test]
    fn test_no_candidates() {
        let resolver = IntentResolver::new();
        let instances = InstanceDirectory::new();
        let candidates = resolver.search(&instances, &[news_app()], search("ViewChart"));
        assert!(candidates.is_empty());
        assert_eq!(resolver.select(candidates, None), Err(Error::NoAppsFound));
    }

    #[test]
    fn test_multiple_candidates_need_disambiguation() {
        let resolver = IntentResolver::new();
        let mut instances = InstanceDirectory::new();
        live(&mut instances, "i-1", "chart", "ViewChart");
        live(&mut instances, "i-2", "chart", "ViewChart");

        let candidates = resolver.search(&instances, &[], search("ViewChart"));
        assert!(matches!(
            resolver.select(candidates.clone(), None).unwrap(),
            Resolution::Ambiguous(c) if c.len() == 2
        ));
        assert!(matches!(
            resolver.select(candidates, Some(&AppIdentifier::app("chart"))).unwrap(),
            Resolution::Ambiguous(_)
        ));
    }

    #[test]
    fn test_targeted_selection() {
        let resolver = IntentResolver::new();
        let mut instances = InstanceDirectory::new();
        let id = live(&mut instances, "i-1", "chart", "ViewChart");
        let candidates = resolver.search(&instances, &[chart_app()], search("ViewChart"));

        let by_instance = AppIdentifier::instance("chart", &id);
        assert!(matches!(
            resolver.select(candidates.clone(), Some(&by_instance)).unwrap(),
            Resolution::Single(c) if c.instance_id() == Some(&id)
        ));

        let missing = AppIdentifier::instance("chart", &InstanceId::new("i-9"));
        assert!(matches!(
            resolver.select(candidates.clone(), Some(&missing)),
            Err(Error::AppNotFound(_))
        ));
        assert!(matches!(
            resolver.select(candidates, Some(&AppIdentifier::app("unknown"))),
            Err(Error::AppNotFound(_))
        ));
    }

    #[test]
    fn test_find_intents_by_context_groups() {
        let resolver = IntentResolver::new();
        let mut instances = InstanceDirectory::new();
        live(&mut instances, "i-1", "news", "ViewNews");

        let apps = [chart_app(), news_app()];
        let grouped = resolver
            .find_intents_by_context(&instances, &apps, "fdc3.instrument", None)
            .unwrap();
        assert_eq!(grouped.len(), 2);
        let news = grouped.iter().find(|g| g.intent.name == "ViewNews").unwrap();
        assert_eq!(news.apps[0].instance_id, Some(InstanceId::new("i-1")));

        let channels = resolver
            .find_intents_by_context(&instances, &apps, "fdc3.instrument", Some("channel"))
            .unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].intent.name, "ViewChart");

        assert_eq!(
            resolver.find_intents_by_context(&instances, &[], "fdc3.contact", None),
            Err(Error::NoAppsFound)
        );
    }

    #[test]
    fn test_raise_table_lifecycle() {
        let mut resolver = IntentResolver::new();
        let source = InstanceId::new("a");
        let raise_id = resolver.begin(InFlightRaise::new(
            &RequestId::new("r-1"),
            RequestKind::RaiseIntent,
            &source,
            Dialect::V2,
            Some("ViewChart"),
            Context::new("fdc3.instrument"),
        ));
        assert_eq!(resolver.raises_from(&source), vec![raise_id.clone()]);

        assert!(resolver.transition(&raise_id, RaiseState::AwaitingResult).is_err());
        resolver.transition(&raise_id, RaiseState::Dispatching).unwrap();
        let awaiting = resolver.transition(&raise_id, RaiseState::AwaitingResult).unwrap();
        awaiting.target = Some(InstanceId::new("b"));
        assert_eq!(resolver.raises_targeting(&InstanceId::new("b")).len(), 1);

        let finished = resolver.finish(&raise_id, RaiseState::Resolved).unwrap();
        assert_eq!(finished.state, RaiseState::Resolved);
        assert_eq!(resolver.in_flight(), 0);
        assert!(resolver.finish(&raise_id, RaiseState::Failed).is_none());
    }
}
