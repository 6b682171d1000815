//! Conflict classification and resolution.
//!
//! A conflict exists when both the local and the remote copy of a linked event
//! changed since the last sync and their content differs. Classification is a
//! pure field comparison; resolution turns a conflict into the event that
//! should be committed locally and pushed to the provider.

use crate::{CalendarEvent, EventField, EventFields, EventId, RemoteEvent, RemoteId};
use serde::{Deserialize, Serialize};

/// Classification of a conflict by the fields that differ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConflictType {
    TitleMismatch,
    DateMismatch,
    DescriptionMismatch,
    LocationMismatch,
    /// Two or more fields differ, or a deletion collides with an edit
    MultipleDifferences,
}

impl ConflictType {
    /// Map a set of differing fields to its classification.
    ///
    /// Returns `None` when nothing differs.
    pub fn from_differences(fields: &[EventField]) -> Option<Self> {
        match fields {
            [] => None,
            [EventField::Title] => Some(ConflictType::TitleMismatch),
            [EventField::Date] => Some(ConflictType::DateMismatch),
            [EventField::Description] => Some(ConflictType::DescriptionMismatch),
            [EventField::Location] => Some(ConflictType::LocationMismatch),
            _ => Some(ConflictType::MultipleDifferences),
        }
    }
}

/// How the caller wants a conflict settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    UseLocal,
    UseRemote,
    Merge,
    Skip,
}

/// Classify a local/remote pair.
///
/// A local tombstone against a live remote event is always
/// [`ConflictType::MultipleDifferences`]. Identical live pairs are not
/// conflicts and yield `None`.
pub fn classify(local: &CalendarEvent, remote: &RemoteEvent) -> Option<ConflictType> {
    if local.deleted {
        return Some(ConflictType::MultipleDifferences);
    }
    ConflictType::from_differences(&local.fields.differing_fields(&remote.fields))
}

/// A detected conflict between a local and a remote event.
///
/// Both sides are value snapshots taken during diffing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    pub local: CalendarEvent,
    pub remote: RemoteEvent,
    /// Content both sides agreed on at the last sync, if they ever did
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<EventFields>,
    pub kind: ConflictType,
    /// Decision recorded by the caller; `None` while undecided
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
}

impl SyncConflict {
    /// Build a conflict for the pair, or `None` if the pair does not conflict.
    pub fn detect(
        local: CalendarEvent,
        remote: RemoteEvent,
        base: Option<EventFields>,
    ) -> Option<Self> {
        let kind = classify(&local, &remote)?;
        Some(Self {
            local,
            remote,
            base,
            kind,
            resolution: None,
        })
    }

    pub fn local_id(&self) -> &EventId {
        &self.local.id
    }

    pub fn remote_id(&self) -> &RemoteId {
        &self.remote.remote_id
    }

    /// Whether a decision other than `Skip` has been recorded.
    pub fn is_resolved(&self) -> bool {
        matches!(self.resolution, Some(r) if r != Resolution::Skip)
    }
}

/// Why a merge fell back to the local side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "camelCase")]
pub enum MergeDegradation {
    /// Both sides changed these fields to different values
    FieldCollision { fields: Vec<EventField> },
    /// The local side is a deletion; there is nothing to merge field-wise
    LocalDeleted,
}

/// Result of applying a resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// The event to commit locally and push remotely
    Resolved {
        event: CalendarEvent,
        /// Set when a `Merge` fell back to `UseLocal`
        degradation: Option<MergeDegradation>,
    },
    /// Left unresolved; it will surface again on the next pass
    Skipped,
}

impl ResolveOutcome {
    pub fn event(&self) -> Option<&CalendarEvent> {
        match self {
            ResolveOutcome::Resolved { event, .. } => Some(event),
            ResolveOutcome::Skipped => None,
        }
    }
}

/// Apply `resolution` to a conflict.
pub fn resolve(conflict: &SyncConflict, resolution: Resolution) -> ResolveOutcome {
    match resolution {
        Resolution::UseLocal => resolved(use_local(conflict), None),
        Resolution::UseRemote => resolved(conflict.local.with_remote_content(&conflict.remote), None),
        Resolution::Merge => merge(conflict),
        Resolution::Skip => ResolveOutcome::Skipped,
    }
}

fn resolved(event: CalendarEvent, degradation: Option<MergeDegradation>) -> ResolveOutcome {
    ResolveOutcome::Resolved { event, degradation }
}

fn use_local(conflict: &SyncConflict) -> CalendarEvent {
    CalendarEvent {
        revision: conflict.local.revision + 1,
        ..conflict.local.clone()
    }
}

/// Field-level three-way merge against the conflict's base.
///
/// Each differing field goes to the side that changed it. If both sides
/// changed the same field the whole merge degrades to `UseLocal`.
fn merge(conflict: &SyncConflict) -> ResolveOutcome {
    if conflict.local.deleted {
        return resolved(use_local(conflict), Some(MergeDegradation::LocalDeleted));
    }

    let local = &conflict.local.fields;
    let remote = &conflict.remote.fields;
    let changed = |side: &EventFields, field: EventField| {
        conflict
            .base
            .as_ref()
            .map_or(true, |base| !base.field_eq(side, field))
    };

    let mut merged = local.clone();
    let mut collisions = Vec::new();
    for field in local.differing_fields(remote) {
        match (changed(local, field), changed(remote, field)) {
            (true, true) => collisions.push(field),
            (false, true) => merged.take_field(remote, field),
            // Only the local side moved (or neither, which cannot differ)
            _ => {}
        }
    }

    if !collisions.is_empty() {
        return resolved(
            use_local(conflict),
            Some(MergeDegradation::FieldCollision { fields: collisions }),
        );
    }

    let event = CalendarEvent {
        id: conflict.local.id.clone(),
        fields: merged,
        last_modified: conflict.local.last_modified.max(conflict.remote.last_modified),
        revision: conflict.local.revision + 1,
        deleted: false,
    };
    resolved(event, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> EventFields {
        EventFields::new("Lunch", 1_000, 2_000)
            .with_location("Cafe")
            .with_description("team")
    }

    fn local_with(fields: EventFields, revision: u64) -> CalendarEvent {
        let mut event = CalendarEvent::new("evt-1", fields, 1_000);
        event.revision = revision;
        event
    }

    fn remote_with(fields: EventFields) -> RemoteEvent {
        RemoteEvent::new("r-1", fields, 2_000, "etag-2")
    }

    #[test]
    fn lunch_vs_dinner_is_title_mismatch() {
        let local = local_with(base(), 2);
        let mut remote_fields = base();
        remote_fields.title = "Dinner".into();

        let conflict =
            SyncConflict::detect(local, remote_with(remote_fields), Some(base())).unwrap();
        assert_eq!(conflict.kind, ConflictType::TitleMismatch);

        let outcome = resolve(&conflict, Resolution::UseRemote);
        let event = outcome.event().unwrap();
        assert_eq!(event.fields.title, "Dinner");
        assert_eq!(event.id, "evt-1");
        assert_eq!(event.revision, 3);
    }

    #[test]
    fn identical_pair_is_not_a_conflict() {
        assert!(SyncConflict::detect(local_with(base(), 1), remote_with(base()), None).is_none());
    }

    #[test]
    fn tombstone_against_edit_is_multiple_differences() {
        let mut local = local_with(base(), 2);
        local.deleted = true;
        assert_eq!(
            classify(&local, &remote_with(base())),
            Some(ConflictType::MultipleDifferences)
        );
    }

    #[test]
    fn use_local_only_bumps_revision() {
        let mut local_fields = base();
        local_fields.title = "Brunch".into();
        let local = local_with(local_fields, 4);
        let conflict =
            SyncConflict::detect(local.clone(), remote_with(base()), Some(base())).unwrap();

        let event = resolve(&conflict, Resolution::UseLocal).event().unwrap().clone();
        assert_eq!(event.revision, 5);
        assert_eq!(CalendarEvent { revision: 4, ..event }, local);
    }

    #[test]
    fn merge_disjoint_fields() {
        let mut local_fields = base();
        local_fields.location = Some("Rooftop".into());
        let mut remote_fields = base();
        remote_fields.description = Some("whole floor".into());

        let conflict = SyncConflict::detect(
            local_with(local_fields, 2),
            remote_with(remote_fields),
            Some(base()),
        )
        .unwrap();
        assert_eq!(conflict.kind, ConflictType::MultipleDifferences);

        match resolve(&conflict, Resolution::Merge) {
            ResolveOutcome::Resolved { event, degradation } => {
                assert_eq!(degradation, None);
                assert_eq!(event.fields.location.as_deref(), Some("Rooftop"));
                assert_eq!(event.fields.description.as_deref(), Some("whole floor"));
                assert_eq!(event.fields.title, "Lunch");
                assert_eq!(event.last_modified, 2_000);
                assert_eq!(event.revision, 3);
            }
            ResolveOutcome::Skipped => panic!("merge must resolve"),
        }
    }

    #[test]
    fn merge_collision_degrades_to_local() {
        let mut local_fields = base();
        local_fields.title = "Brunch".into();
        local_fields.location = Some("Rooftop".into());
        let mut remote_fields = base();
        remote_fields.title = "Dinner".into();

        let conflict = SyncConflict::detect(
            local_with(local_fields.clone(), 2),
            remote_with(remote_fields),
            Some(base()),
        )
        .unwrap();

        match resolve(&conflict, Resolution::Merge) {
            ResolveOutcome::Resolved { event, degradation } => {
                assert_eq!(
                    degradation,
                    Some(MergeDegradation::FieldCollision {
                        fields: vec![EventField::Title]
                    })
                );
                assert_eq!(event.fields, local_fields);
            }
            ResolveOutcome::Skipped => panic!("merge must resolve"),
        }
    }

    #[test]
    fn merge_without_base_degrades() {
        let mut remote_fields = base();
        remote_fields.title = "Dinner".into();
        let conflict =
            SyncConflict::detect(local_with(base(), 1), remote_with(remote_fields), None).unwrap();

        let outcome = resolve(&conflict, Resolution::Merge);
        assert!(matches!(
            outcome,
            ResolveOutcome::Resolved {
                degradation: Some(MergeDegradation::FieldCollision { .. }),
                ..
            }
        ));
    }

    #[test]
    fn merge_against_tombstone_degrades() {
        let mut local = local_with(base(), 2);
        local.deleted = true;
        let conflict = SyncConflict::detect(local, remote_with(base()), Some(base())).unwrap();

        match resolve(&conflict, Resolution::Merge) {
            ResolveOutcome::Resolved { event, degradation } => {
                assert!(event.deleted);
                assert_eq!(degradation, Some(MergeDegradation::LocalDeleted));
            }
            ResolveOutcome::Skipped => panic!("merge must resolve"),
        }
    }

    #[test]
    fn skip_leaves_conflict_open() {
        let mut remote_fields = base();
        remote_fields.title = "Dinner".into();
        let mut conflict =
            SyncConflict::detect(local_with(base(), 1), remote_with(remote_fields), None).unwrap();

        assert_eq!(resolve(&conflict, Resolution::Skip), ResolveOutcome::Skipped);

        conflict.resolution = Some(Resolution::Skip);
        assert!(!conflict.is_resolved());
        conflict.resolution = Some(Resolution::Merge);
        assert!(conflict.is_resolved());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_fields() -> impl Strategy<Value = EventFields> {
            (
                "[a-z]{1,8}",
                0u64..10_000,
                0u64..10_000,
                proptest::option::of("[a-z]{1,8}"),
                proptest::option::of("[a-z]{1,8}"),
            )
                .prop_map(|(title, start, len, location, description)| EventFields {
                    title,
                    start,
                    end: start + len,
                    location,
                    description,
                })
        }

        fn arb_field() -> impl Strategy<Value = EventField> {
            prop_oneof![
                Just(EventField::Title),
                Just(EventField::Date),
                Just(EventField::Description),
                Just(EventField::Location),
            ]
        }

        /// Change exactly `field` of `fields`.
        fn perturb(fields: &EventFields, field: EventField) -> EventFields {
            let mut changed = fields.clone();
            match field {
                EventField::Title => changed.title.push('!'),
                EventField::Date => changed.end += 1,
                EventField::Description => {
                    changed.description = Some(format!("{:?}!", fields.description))
                }
                EventField::Location => {
                    changed.location = Some(format!("{:?}!", fields.location))
                }
            }
            changed
        }

        proptest! {
            #[test]
            fn prop_single_difference_maps_to_its_type(
                fields in arb_fields(),
                field in arb_field(),
            ) {
                let local = local_with(fields.clone(), 1);
                let remote = remote_with(perturb(&fields, field));

                let expected = match field {
                    EventField::Title => ConflictType::TitleMismatch,
                    EventField::Date => ConflictType::DateMismatch,
                    EventField::Description => ConflictType::DescriptionMismatch,
                    EventField::Location => ConflictType::LocationMismatch,
                };
                prop_assert_eq!(classify(&local, &remote), Some(expected));
            }

            #[test]
            fn prop_two_differences_are_multiple(
                fields in arb_fields(),
                first in arb_field(),
                second in arb_field(),
            ) {
                prop_assume!(first != second);
                let local = local_with(fields.clone(), 1);
                let remote = remote_with(perturb(&perturb(&fields, first), second));

                prop_assert_eq!(
                    classify(&local, &remote),
                    Some(ConflictType::MultipleDifferences)
                );
            }

            #[test]
            fn prop_use_local_preserves_snapshot(
                fields in arb_fields(),
                other in arb_fields(),
                revision in 1u64..1_000,
            ) {
                let local = local_with(fields, revision);
                if let Some(conflict) = SyncConflict::detect(local.clone(), remote_with(other), None) {
                    let event = resolve(&conflict, Resolution::UseLocal).event().cloned().unwrap();
                    prop_assert_eq!(event.revision, revision + 1);
                    prop_assert_eq!(CalendarEvent { revision, ..event }, local);
                }
            }
        }
    }
}
