//! Diff engine: per-event actions between local state and a remote change set.
//!
//! Local and remote sides are joined through the [`LinkTable`]. A local event
//! changed since the last sync when it has no link or its revision moved past
//! the link's `synced_revision`; a remote event changed when its ETag differs
//! from `synced_etag` or it was deleted.
//!
//! Output is deterministic: actions keyed by a local id come first in
//! ascending local id order, then `CreateLocal` actions in ascending remote id
//! order.

use crate::{
    resolve::SyncConflict, CalendarEvent, EventId, EventLink, LinkTable, RemoteChange,
    RemoteEvent, RemoteId,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Remote side of a diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteSet {
    /// Every event the provider holds; linked ids missing from it were deleted
    Snapshot(Vec<RemoteEvent>),
    /// Changes since a cursor, in provider order; later entries win
    Delta(Vec<RemoteChange>),
}

impl RemoteSet {
    pub fn len(&self) -> usize {
        match self {
            RemoteSet::Snapshot(events) => events.len(),
            RemoteSet::Delta(changes) => changes.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One step of a sync pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    /// Mirror a new remote event locally
    CreateLocal { remote: RemoteEvent },
    /// Push a local event the provider does not have. `link` is set when the
    /// provider deleted the event while it was edited locally.
    CreateRemote {
        local: CalendarEvent,
        link: Option<EventLink>,
    },
    /// Overwrite the local event with remote content
    UpdateLocal {
        local: CalendarEvent,
        remote: RemoteEvent,
    },
    /// Push local content over the linked remote event
    UpdateRemote { local: CalendarEvent, link: EventLink },
    /// The provider deleted the event; remove it locally
    DeleteLocal { local: CalendarEvent, link: EventLink },
    /// The event was deleted locally; delete it on the provider
    DeleteRemote { local: CalendarEvent, link: EventLink },
    /// Both sides hold the same content; record it as synced
    Relink {
        local: CalendarEvent,
        remote: RemoteEvent,
    },
    /// Both sides agree the event is gone; drop the tombstone
    Purge { local: CalendarEvent },
    Conflict(SyncConflict),
}

impl SyncAction {
    /// The local event this action concerns, if it has one yet.
    pub fn local_id(&self) -> Option<&EventId> {
        match self {
            SyncAction::CreateLocal { .. } => None,
            SyncAction::CreateRemote { local, .. }
            | SyncAction::UpdateLocal { local, .. }
            | SyncAction::UpdateRemote { local, .. }
            | SyncAction::DeleteLocal { local, .. }
            | SyncAction::DeleteRemote { local, .. }
            | SyncAction::Relink { local, .. }
            | SyncAction::Purge { local } => Some(&local.id),
            SyncAction::Conflict(conflict) => Some(conflict.local_id()),
        }
    }

    /// Whether the action needs a call to the provider.
    pub fn touches_remote(&self) -> bool {
        matches!(
            self,
            SyncAction::CreateRemote { .. }
                | SyncAction::UpdateRemote { .. }
                | SyncAction::DeleteRemote { .. }
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncAction::Conflict(_))
    }
}

/// Action counts for logging and status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffSummary {
    pub create_local: usize,
    pub create_remote: usize,
    pub update_local: usize,
    pub update_remote: usize,
    pub delete_local: usize,
    pub delete_remote: usize,
    pub relink: usize,
    pub purge: usize,
    pub conflicts: usize,
}

impl DiffSummary {
    pub fn of(actions: &[SyncAction]) -> Self {
        let mut summary = Self::default();
        for action in actions {
            let counter = match action {
                SyncAction::CreateLocal { .. } => &mut summary.create_local,
                SyncAction::CreateRemote { .. } => &mut summary.create_remote,
                SyncAction::UpdateLocal { .. } => &mut summary.update_local,
                SyncAction::UpdateRemote { .. } => &mut summary.update_remote,
                SyncAction::DeleteLocal { .. } => &mut summary.delete_local,
                SyncAction::DeleteRemote { .. } => &mut summary.delete_remote,
                SyncAction::Relink { .. } => &mut summary.relink,
                SyncAction::Purge { .. } => &mut summary.purge,
                SyncAction::Conflict(_) => &mut summary.conflicts,
            };
            *counter += 1;
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.create_local
            + self.create_remote
            + self.update_local
            + self.update_remote
            + self.delete_local
            + self.delete_remote
            + self.relink
            + self.purge
            + self.conflicts
    }
}

/// Remote state of one id after folding the change set.
#[derive(Debug, Clone, Copy)]
enum RemoteState<'a> {
    Present(&'a RemoteEvent),
    Deleted,
}

fn index_remote(remote: &RemoteSet) -> BTreeMap<&str, RemoteState<'_>> {
    let mut index = BTreeMap::new();
    match remote {
        RemoteSet::Snapshot(events) => {
            for event in events {
                index.insert(event.remote_id.as_str(), RemoteState::Present(event));
            }
        }
        RemoteSet::Delta(changes) => {
            for change in changes {
                let state = match change {
                    RemoteChange::Upserted(event) => RemoteState::Present(event),
                    RemoteChange::Deleted { .. } => RemoteState::Deleted,
                };
                index.insert(change.remote_id().as_str(), state);
            }
        }
    }
    index
}

/// Compute the actions of one sync pass.
///
/// `local` holds the local candidates: every event on a full sync, or the
/// events changed since the checkpoint plus the counterparts of linked
/// remote changes on an incremental one.
pub fn diff(
    local: &BTreeMap<EventId, CalendarEvent>,
    remote: &RemoteSet,
    links: &LinkTable,
) -> Vec<SyncAction> {
    let remote_index = index_remote(remote);
    let mut by_local: BTreeMap<EventId, SyncAction> = BTreeMap::new();
    let mut by_remote: BTreeMap<RemoteId, SyncAction> = BTreeMap::new();
    let mut joined: BTreeSet<&str> = BTreeSet::new();

    for (&remote_id, &state) in &remote_index {
        if let Some(link) = links.by_remote(remote_id) {
            // Counterpart not among the candidates: nothing to join against
            let Some(event) = local.get(&link.local_id) else {
                continue;
            };
            joined.insert(event.id.as_str());
            if let Some(action) = reconcile(event, Some(link), state) {
                by_local.insert(event.id.clone(), action);
            }
            continue;
        }

        let RemoteState::Present(remote_event) = state else {
            // Deletion of an event we never linked
            continue;
        };

        // Join on a matching identifier when both sides are unlinked
        match local.get(remote_id) {
            Some(event) if links.by_local(&event.id).is_none() => {
                joined.insert(event.id.as_str());
                if let Some(action) = reconcile(event, None, state) {
                    by_local.insert(event.id.clone(), action);
                }
            }
            _ => {
                by_remote.insert(
                    remote_event.remote_id.clone(),
                    SyncAction::CreateLocal {
                        remote: remote_event.clone(),
                    },
                );
            }
        }
    }

    if let RemoteSet::Snapshot(_) = remote {
        // Linked ids the provider no longer lists were deleted remotely
        for link in links.iter() {
            if remote_index.contains_key(link.remote_id.as_str()) {
                continue;
            }
            let Some(event) = local.get(&link.local_id) else {
                continue;
            };
            joined.insert(event.id.as_str());
            if let Some(action) = reconcile(event, Some(link), RemoteState::Deleted) {
                by_local.insert(event.id.clone(), action);
            }
        }
    }

    for event in local.values() {
        if joined.contains(event.id.as_str()) {
            continue;
        }
        if let Some(action) = local_only(event, links.by_local(&event.id)) {
            by_local.insert(event.id.clone(), action);
        }
    }

    by_local.into_values().chain(by_remote.into_values()).collect()
}

/// Action for a local event with no remote change in this pass.
fn local_only(event: &CalendarEvent, link: Option<&EventLink>) -> Option<SyncAction> {
    match link {
        Some(link) if link.synced_revision == event.revision => None,
        Some(link) if event.deleted => Some(SyncAction::DeleteRemote {
            local: event.clone(),
            link: link.clone(),
        }),
        Some(link) => Some(SyncAction::UpdateRemote {
            local: event.clone(),
            link: link.clone(),
        }),
        None if event.deleted => Some(SyncAction::Purge {
            local: event.clone(),
        }),
        None => Some(SyncAction::CreateRemote {
            local: event.clone(),
            link: None,
        }),
    }
}

/// Action for a local event joined with a remote change.
fn reconcile(
    event: &CalendarEvent,
    link: Option<&EventLink>,
    remote: RemoteState<'_>,
) -> Option<SyncAction> {
    let local_changed = link.map_or(true, |link| link.synced_revision != event.revision);
    let remote_changed = match remote {
        RemoteState::Deleted => true,
        RemoteState::Present(remote) => link.map_or(true, |link| link.synced_etag != remote.etag),
    };

    match (local_changed, remote_changed, remote) {
        (false, false, _) => None,

        (true, false, _) => local_only(event, link),

        (_, true, RemoteState::Deleted) if event.deleted => Some(SyncAction::Purge {
            local: event.clone(),
        }),
        (false, true, RemoteState::Deleted) => link.map(|link| SyncAction::DeleteLocal {
            local: event.clone(),
            link: link.clone(),
        }),
        // Edited locally, deleted remotely: the edit wins
        (true, true, RemoteState::Deleted) => Some(SyncAction::CreateRemote {
            local: event.clone(),
            link: link.cloned(),
        }),

        (_, true, RemoteState::Present(remote)) if !event.deleted && event.fields == remote.fields => {
            Some(SyncAction::Relink {
                local: event.clone(),
                remote: remote.clone(),
            })
        }
        (false, true, RemoteState::Present(remote)) => Some(SyncAction::UpdateLocal {
            local: event.clone(),
            remote: remote.clone(),
        }),
        (true, true, RemoteState::Present(remote)) => SyncConflict::detect(
            event.clone(),
            remote.clone(),
            link.map(|link| link.synced_fields.clone()),
        )
        .map(SyncAction::Conflict),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{resolve::ConflictType, EventFields};

    fn fields(title: &str) -> EventFields {
        EventFields::new(title, 1_000, 2_000)
    }

    fn local(id: &str, title: &str, revision: u64) -> CalendarEvent {
        let mut event = CalendarEvent::new(id, fields(title), 1_000);
        event.revision = revision;
        event
    }

    fn remote(id: &str, title: &str, etag: &str) -> RemoteEvent {
        RemoteEvent::new(id, fields(title), 2_000, etag)
    }

    fn link(local_id: &str, remote_id: &str, revision: u64, etag: &str, title: &str) -> EventLink {
        EventLink::new(local_id, remote_id, revision, etag, fields(title))
    }

    fn locals(events: Vec<CalendarEvent>) -> BTreeMap<EventId, CalendarEvent> {
        events.into_iter().map(|e| (e.id.clone(), e)).collect()
    }

    fn table(links: Vec<EventLink>) -> LinkTable {
        LinkTable::from_links(links).unwrap()
    }

    #[test]
    fn nothing_changed_nothing_to_do() {
        let actions = diff(
            &locals(vec![local("evt-1", "Lunch", 1)]),
            &RemoteSet::Snapshot(vec![remote("r-1", "Lunch", "e1")]),
            &table(vec![link("evt-1", "r-1", 1, "e1", "Lunch")]),
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn both_changed_title_is_conflict() {
        let actions = diff(
            &locals(vec![local("evt-1", "Lunch", 2)]),
            &RemoteSet::Delta(vec![RemoteChange::Upserted(remote("r-1", "Dinner", "e2"))]),
            &table(vec![link("evt-1", "r-1", 1, "e1", "Brunch")]),
        );

        assert_eq!(actions.len(), 1);
        match &actions[0] {
            SyncAction::Conflict(conflict) => {
                assert_eq!(conflict.kind, ConflictType::TitleMismatch);
                assert_eq!(conflict.base.as_ref().unwrap().title, "Brunch");
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn only_local_changed_updates_remote() {
        let actions = diff(
            &locals(vec![local("evt-1", "Brunch", 2)]),
            &RemoteSet::Delta(vec![]),
            &table(vec![link("evt-1", "r-1", 1, "e1", "Lunch")]),
        );
        assert!(matches!(&actions[..], [SyncAction::UpdateRemote { .. }]));
    }

    #[test]
    fn only_remote_changed_updates_local() {
        let actions = diff(
            &locals(vec![local("evt-1", "Lunch", 1)]),
            &RemoteSet::Delta(vec![RemoteChange::Upserted(remote("r-1", "Dinner", "e2"))]),
            &table(vec![link("evt-1", "r-1", 1, "e1", "Lunch")]),
        );
        assert!(matches!(&actions[..], [SyncAction::UpdateLocal { remote, .. }] if remote.fields.title == "Dinner"));
    }

    #[test]
    fn converged_edits_relink() {
        let actions = diff(
            &locals(vec![local("evt-1", "Dinner", 2)]),
            &RemoteSet::Delta(vec![RemoteChange::Upserted(remote("r-1", "Dinner", "e2"))]),
            &table(vec![link("evt-1", "r-1", 1, "e1", "Lunch")]),
        );
        assert!(matches!(&actions[..], [SyncAction::Relink { .. }]));
    }

    #[test]
    fn remote_deletion_tombstones_unchanged_local() {
        let actions = diff(
            &locals(vec![local("evt-1", "Lunch", 1)]),
            &RemoteSet::Delta(vec![RemoteChange::Deleted {
                remote_id: "r-1".into(),
            }]),
            &table(vec![link("evt-1", "r-1", 1, "e1", "Lunch")]),
        );
        assert!(matches!(&actions[..], [SyncAction::DeleteLocal { .. }]));
    }

    #[test]
    fn remote_deletion_loses_to_local_edit() {
        let actions = diff(
            &locals(vec![local("evt-1", "Brunch", 2)]),
            &RemoteSet::Delta(vec![RemoteChange::Deleted {
                remote_id: "r-1".into(),
            }]),
            &table(vec![link("evt-1", "r-1", 1, "e1", "Lunch")]),
        );
        assert!(matches!(
            &actions[..],
            [SyncAction::CreateRemote { link: Some(_), .. }]
        ));
    }

    #[test]
    fn both_deleted_purges() {
        let mut tombstone = local("evt-1", "Lunch", 2);
        tombstone.deleted = true;

        let actions = diff(
            &locals(vec![tombstone]),
            &RemoteSet::Delta(vec![RemoteChange::Deleted {
                remote_id: "r-1".into(),
            }]),
            &table(vec![link("evt-1", "r-1", 1, "e1", "Lunch")]),
        );
        assert!(matches!(&actions[..], [SyncAction::Purge { .. }]));
    }

    #[test]
    fn tombstone_against_remote_edit_conflicts() {
        let mut tombstone = local("evt-1", "Lunch", 2);
        tombstone.deleted = true;

        let actions = diff(
            &locals(vec![tombstone]),
            &RemoteSet::Delta(vec![RemoteChange::Upserted(remote("r-1", "Dinner", "e2"))]),
            &table(vec![link("evt-1", "r-1", 1, "e1", "Lunch")]),
        );
        match &actions[..] {
            [SyncAction::Conflict(conflict)] => {
                assert_eq!(conflict.kind, ConflictType::MultipleDifferences)
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn local_tombstone_deletes_remote() {
        let mut tombstone = local("evt-1", "Lunch", 2);
        tombstone.deleted = true;

        let actions = diff(
            &locals(vec![tombstone]),
            &RemoteSet::Delta(vec![]),
            &table(vec![link("evt-1", "r-1", 1, "e1", "Lunch")]),
        );
        assert!(matches!(&actions[..], [SyncAction::DeleteRemote { .. }]));
    }

    #[test]
    fn unlinked_events_are_created_on_the_other_side() {
        let mut orphan = local("evt-2", "Gone", 2);
        orphan.deleted = true;

        let actions = diff(
            &locals(vec![local("evt-1", "Lunch", 1), orphan]),
            &RemoteSet::Snapshot(vec![remote("r-9", "Gym", "e1")]),
            &LinkTable::new(),
        );

        assert_eq!(actions.len(), 3);
        assert!(matches!(&actions[0], SyncAction::CreateRemote { local, link: None } if local.id == "evt-1"));
        assert!(matches!(&actions[1], SyncAction::Purge { local } if local.id == "evt-2"));
        assert!(matches!(&actions[2], SyncAction::CreateLocal { remote } if remote.remote_id == "r-9"));
    }

    #[test]
    fn full_snapshot_missing_linked_id_is_deletion() {
        let actions = diff(
            &locals(vec![local("evt-1", "Lunch", 1)]),
            &RemoteSet::Snapshot(vec![]),
            &table(vec![link("evt-1", "r-1", 1, "e1", "Lunch")]),
        );
        assert!(matches!(&actions[..], [SyncAction::DeleteLocal { .. }]));
    }

    #[test]
    fn delta_does_not_imply_deletion() {
        let actions = diff(
            &locals(vec![local("evt-1", "Lunch", 1)]),
            &RemoteSet::Delta(vec![]),
            &table(vec![link("evt-1", "r-1", 1, "e1", "Lunch")]),
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn matching_identifier_joins_unlinked_pair() {
        let actions = diff(
            &locals(vec![local("shared-1", "Lunch", 1)]),
            &RemoteSet::Snapshot(vec![remote("shared-1", "Lunch", "e1")]),
            &LinkTable::new(),
        );
        assert!(matches!(&actions[..], [SyncAction::Relink { .. }]));

        let actions = diff(
            &locals(vec![local("shared-1", "Lunch", 1)]),
            &RemoteSet::Snapshot(vec![remote("shared-1", "Dinner", "e1")]),
            &LinkTable::new(),
        );
        match &actions[..] {
            [SyncAction::Conflict(conflict)] => assert!(conflict.base.is_none()),
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[test]
    fn later_delta_entries_win() {
        let actions = diff(
            &locals(vec![local("evt-1", "Lunch", 1)]),
            &RemoteSet::Delta(vec![
                RemoteChange::Upserted(remote("r-1", "Dinner", "e2")),
                RemoteChange::Deleted {
                    remote_id: "r-1".into(),
                },
            ]),
            &table(vec![link("evt-1", "r-1", 1, "e1", "Lunch")]),
        );
        assert!(matches!(&actions[..], [SyncAction::DeleteLocal { .. }]));
    }

    #[test]
    fn summary_counts() {
        let actions = diff(
            &locals(vec![local("evt-1", "Lunch", 1), local("evt-2", "Gym", 2)]),
            &RemoteSet::Snapshot(vec![remote("r-1", "Dinner", "e2"), remote("r-3", "Yoga", "e1")]),
            &table(vec![
                link("evt-1", "r-1", 1, "e1", "Lunch"),
                link("evt-2", "r-2", 1, "e1", "Gym"),
            ]),
        );
        let summary = DiffSummary::of(&actions);
        assert_eq!(summary.update_local, 1);
        assert_eq!(summary.create_remote, 1); // evt-2 edited, r-2 gone
        assert_eq!(summary.create_local, 1);
        assert_eq!(summary.total(), 3);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_local() -> impl Strategy<Value = CalendarEvent> {
            (0u8..12, "[a-c]", 1u64..4, any::<bool>()).prop_map(|(n, title, revision, deleted)| {
                let mut event = local(&format!("evt-{n}"), &title, revision);
                event.deleted = deleted;
                event
            })
        }

        fn arb_remote() -> impl Strategy<Value = RemoteEvent> {
            (0u8..12, "[a-c]", 1u8..4)
                .prop_map(|(n, title, etag)| remote(&format!("r-{n}"), &title, &format!("e{etag}")))
        }

        proptest! {
            #[test]
            fn prop_diff_is_deterministic(
                events in proptest::collection::vec(arb_local(), 0..10),
                remotes in proptest::collection::vec(arb_remote(), 0..10),
                linked in proptest::collection::btree_set(0u8..12, 0..8),
            ) {
                let local_map = locals(events);
                let links = table(
                    linked
                        .iter()
                        .map(|n| link(&format!("evt-{n}"), &format!("r-{n}"), 1, "e1", "a"))
                        .filter(|l| local_map.contains_key(&l.local_id))
                        .collect(),
                );
                let set = RemoteSet::Snapshot(remotes);

                let first = diff(&local_map, &set, &links);
                let second = diff(&local_map, &set, &links);
                prop_assert_eq!(&first, &second);

                // At most one action per local event
                let mut seen = BTreeSet::new();
                for id in first.iter().filter_map(SyncAction::local_id) {
                    prop_assert!(seen.insert(id.clone()));
                }

                // Local-keyed actions precede creations, each group sorted
                let split = first
                    .iter()
                    .position(|a| a.local_id().is_none())
                    .unwrap_or(first.len());
                prop_assert!(first[split..].iter().all(|a| a.local_id().is_none()));
                let ids: Vec<_> = first[..split].iter().filter_map(SyncAction::local_id).collect();
                prop_assert!(ids.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }
}
