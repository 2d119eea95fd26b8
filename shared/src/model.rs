use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::api::IdeaApi;
use crate::config::Config;
use crate::event::SessionId;
use crate::push_channel::{ConnectionState, PushChannel};
use crate::AppError;

/// Server-assigned, immutable idea identifier.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct IdeaId(pub u64);

impl fmt::Display for IdeaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Idea {
    pub id: IdeaId,
    pub text: String,
    pub upvotes: u64,
}

/// Cached copy of the server's list, newest first, at most one entry per id.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct IdeaList(Vec<Idea>);

impl IdeaList {
    /// Builds a list from a server-supplied sequence. Order is kept; if the
    /// server repeats an id, only its first occurrence survives.
    #[must_use]
    pub fn from_snapshot(ideas: Vec<Idea>) -> Self {
        let mut seen = HashSet::with_capacity(ideas.len());
        let total = ideas.len();
        let ideas: Vec<Idea> = ideas.into_iter().filter(|i| seen.insert(i.id)).collect();

        if ideas.len() != total {
            tracing::warn!(
                dropped = total - ideas.len(),
                "snapshot contained duplicate idea ids"
            );
        }

        Self(ideas)
    }

    /// Discards the current sequence entirely.
    pub fn replace(&mut self, ideas: Vec<Idea>) {
        *self = Self::from_snapshot(ideas);
    }

    /// Puts a confirmed idea at the head. An entry with the same id (e.g.
    /// delivered earlier by a snapshot) is removed first.
    pub fn prepend(&mut self, idea: Idea) {
        self.0.retain(|existing| existing.id != idea.id);
        self.0.insert(0, idea);
    }

    /// Swaps the entry with the same id in place. Returns `false` when the id
    /// is not present, in which case the list is untouched.
    pub fn replace_entry(&mut self, idea: Idea) -> bool {
        match self.0.iter_mut().find(|existing| existing.id == idea.id) {
            Some(slot) => {
                *slot = idea;
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Idea] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Idea> {
        self.0.iter()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// One activate..teardown span and the client it talks through.
#[derive(Clone, Debug)]
pub struct Session {
    pub id: SessionId,
    pub api: IdeaApi,
}

/// Reconciler state. Only `app::App::update` mutates it.
#[derive(Clone, Debug, Default)]
pub struct Model {
    /// Applied on the next activate.
    pub config: Config,

    /// `Some` between activate and teardown.
    pub session: Option<Session>,
    pub(crate) last_session: SessionId,

    pub ideas: IdeaList,
    /// True only while the initial fetch is in flight.
    pub loading: bool,
    pub active_error: Option<AppError>,
    pub draft_text: String,

    pub channel: PushChannel,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// The current session issued this response.
    #[must_use]
    pub fn is_current(&self, session: SessionId) -> bool {
        self.session.as_ref().is_some_and(|s| s.id == session)
    }

    pub(crate) fn begin_session(&mut self, api: IdeaApi) -> SessionId {
        let id = self.last_session.next();
        self.last_session = id;
        self.session = Some(Session { id, api });
        id
    }

    /// Drops everything the session held. Id counters survive so that
    /// results tagged with an old session, connection or timer stay stale.
    pub(crate) fn end_session(&mut self) {
        self.session = None;
        self.ideas.clear();
        self.loading = false;
        self.active_error = None;
        self.draft_text.clear();
    }

    pub fn set_error(&mut self, error: AppError) {
        self.active_error = Some(error);
    }

    pub fn clear_error(&mut self) {
        self.active_error = None;
    }
}

/// What the presentation layer renders.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ViewModel {
    pub ideas: Vec<Idea>,
    pub loading: bool,
    pub error_message: Option<String>,
    pub draft_text: String,
    /// Characters, not bytes.
    pub draft_length: usize,
    pub max_length: usize,
    pub can_submit: bool,
    /// Nothing to show and nothing loading.
    pub is_empty: bool,
    pub connection: ConnectionState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn idea(id: u64, upvotes: u64) -> Idea {
        Idea {
            id: IdeaId(id),
            text: format!("idea {id}"),
            upvotes,
        }
    }

    #[test]
    fn idea_json_shape() {
        let parsed: Idea =
            serde_json::from_str(r#"{"id":1,"text":"Test","upvotes":0}"#).unwrap();
        assert_eq!(parsed, idea_with_text(1, "Test", 0));

        // Negative counts are not ideas.
        assert!(serde_json::from_str::<Idea>(r#"{"id":1,"text":"x","upvotes":-1}"#).is_err());
    }

    fn idea_with_text(id: u64, text: &str, upvotes: u64) -> Idea {
        Idea {
            id: IdeaId(id),
            text: text.into(),
            upvotes,
        }
    }

    #[test]
    fn prepend_puts_new_idea_first() {
        let mut list = IdeaList::from_snapshot(vec![idea(1, 0), idea(2, 0)]);
        list.prepend(idea(3, 0));
        let ids: Vec<u64> = list.iter().map(|i| i.id.0).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn prepend_replaces_copy_delivered_by_snapshot() {
        let mut list = IdeaList::from_snapshot(vec![idea(1, 0), idea(3, 0)]);
        list.prepend(idea(3, 0));
        let ids: Vec<u64> = list.iter().map(|i| i.id.0).collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[test]
    fn replace_entry_missing_id_is_noop() {
        let mut list = IdeaList::from_snapshot(vec![idea(1, 0)]);
        assert!(!list.replace_entry(idea(9, 4)));
        assert_eq!(list.as_slice(), &[idea(1, 0)]);
    }

    fn api() -> IdeaApi {
        IdeaApi::from_config(&Config::default()).unwrap()
    }

    #[test]
    fn session_lifecycle() {
        let mut model = Model::new();
        assert!(!model.is_active());

        let first = model.begin_session(api());
        assert!(model.is_current(first));
        model.ideas.prepend(idea(1, 0));
        model.draft_text = "draft".into();

        model.end_session();
        assert!(!model.is_active());
        assert!(!model.is_current(first));
        assert!(model.ideas.is_empty());
        assert!(model.draft_text.is_empty());

        let second = model.begin_session(api());
        assert_ne!(first, second);
    }

    proptest! {
        #[test]
        fn snapshot_keeps_first_occurrence_in_order(ids in proptest::collection::vec(0u64..20, 0..40)) {
            let ideas: Vec<Idea> = ids.iter().enumerate().map(|(n, id)| idea(*id, n as u64)).collect();
            let list = IdeaList::from_snapshot(ideas);

            let mut expected = Vec::new();
            for (n, id) in ids.iter().enumerate() {
                if !expected.iter().any(|(seen, _)| seen == id) {
                    expected.push((*id, n as u64));
                }
            }

            let actual: Vec<(u64, u64)> = list.iter().map(|i| (i.id.0, i.upvotes)).collect();
            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn replace_entry_touches_only_matching_id(
            ids in proptest::collection::hash_set(0u64..50, 1..20),
            bump in 1u64..100,
        ) {
            let ideas: Vec<Idea> = ids.iter().map(|id| idea(*id, 0)).collect();
            let target = ideas[ideas.len() / 2].id;
            let mut list = IdeaList::from_snapshot(ideas.clone());

            let replaced = list.replace_entry(Idea { id: target, text: format!("idea {}", target.0), upvotes: bump });
            prop_assert!(replaced);

            prop_assert_eq!(list.len(), ideas.len());
            for (before, after) in ideas.iter().zip(list.iter()) {
                prop_assert_eq!(before.id, after.id);
                if after.id == target {
                    prop_assert_eq!(after.upvotes, bump);
                } else {
                    prop_assert_eq!(before, after);
                }
            }
        }
    }
}
