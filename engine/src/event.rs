//! Event types for local and remote calendar entries.

use crate::{ETag, EventId, RemoteId, Revision, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A logical field of an event, as compared during diffing.
///
/// `Date` covers both the start and the end of the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventField {
    Title,
    Date,
    Description,
    Location,
}

impl EventField {
    /// All fields in comparison order.
    pub const ALL: [EventField; 4] = [
        EventField::Title,
        EventField::Date,
        EventField::Description,
        EventField::Location,
    ];
}

impl fmt::Display for EventField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventField::Title => "title",
            EventField::Date => "date",
            EventField::Description => "description",
            EventField::Location => "location",
        };
        f.write_str(name)
    }
}

/// The descriptive content shared by local and remote events.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventFields {
    pub title: String,
    /// Start time (milliseconds since epoch)
    pub start: Timestamp,
    /// End time (milliseconds since epoch)
    pub end: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl EventFields {
    /// Create fields with a title and time range.
    pub fn new(title: impl Into<String>, start: Timestamp, end: Timestamp) -> Self {
        Self {
            title: title.into(),
            start,
            end,
            location: None,
            description: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Compare a single logical field against another set of fields.
    pub fn field_eq(&self, other: &EventFields, field: EventField) -> bool {
        match field {
            EventField::Title => self.title == other.title,
            EventField::Date => self.start == other.start && self.end == other.end,
            EventField::Description => self.description == other.description,
            EventField::Location => self.location == other.location,
        }
    }

    /// Fields whose values differ, in [`EventField::ALL`] order.
    pub fn differing_fields(&self, other: &EventFields) -> Vec<EventField> {
        EventField::ALL
            .into_iter()
            .filter(|field| !self.field_eq(other, *field))
            .collect()
    }

    /// Copy one logical field from `source` into `self`.
    pub fn take_field(&mut self, source: &EventFields, field: EventField) {
        match field {
            EventField::Title => self.title = source.title.clone(),
            EventField::Date => {
                self.start = source.start;
                self.end = source.end;
            }
            EventField::Description => self.description = source.description.clone(),
            EventField::Location => self.location = source.location.clone(),
        }
    }
}

/// A calendar event in the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    /// Local identifier
    pub id: EventId,
    #[serde(flatten)]
    pub fields: EventFields,
    /// When the event was last modified (milliseconds since epoch)
    pub last_modified: Timestamp,
    /// Local revision, incremented on every content change
    pub revision: Revision,
    /// Soft delete flag (tombstone)
    pub deleted: bool,
}

impl CalendarEvent {
    /// Create a new, not yet stored event. The store assigns the revision.
    pub fn new(id: impl Into<EventId>, fields: EventFields, last_modified: Timestamp) -> Self {
        Self {
            id: id.into(),
            fields,
            last_modified,
            revision: 0,
            deleted: false,
        }
    }

    /// Check if event is active (not deleted).
    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    /// True when `other` carries the same content, ignoring bookkeeping.
    pub fn same_content(&self, other: &CalendarEvent) -> bool {
        self.fields == other.fields && self.deleted == other.deleted
    }

    /// Mark event as deleted (tombstone).
    pub fn mark_deleted(&mut self, timestamp: Timestamp) {
        self.deleted = true;
        self.revision += 1;
        self.last_modified = timestamp;
    }

    /// The event rewritten with a remote event's content, revision bumped.
    pub fn with_remote_content(&self, remote: &RemoteEvent) -> CalendarEvent {
        CalendarEvent {
            id: self.id.clone(),
            fields: remote.fields.clone(),
            last_modified: remote.last_modified,
            revision: self.revision + 1,
            deleted: false,
        }
    }

    /// A fresh local event mirroring a remote one.
    pub fn from_remote(id: impl Into<EventId>, remote: &RemoteEvent) -> CalendarEvent {
        CalendarEvent {
            id: id.into(),
            fields: remote.fields.clone(),
            last_modified: remote.last_modified,
            revision: 1,
            deleted: false,
        }
    }
}

/// An event as reported by the calendar provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEvent {
    /// Provider-side identifier
    pub remote_id: RemoteId,
    #[serde(flatten)]
    pub fields: EventFields,
    /// When the provider last saw a change (milliseconds since epoch)
    pub last_modified: Timestamp,
    /// Provider version token
    pub etag: ETag,
}

impl RemoteEvent {
    pub fn new(
        remote_id: impl Into<RemoteId>,
        fields: EventFields,
        last_modified: Timestamp,
        etag: impl Into<ETag>,
    ) -> Self {
        Self {
            remote_id: remote_id.into(),
            fields,
            last_modified,
            etag: etag.into(),
        }
    }
}

/// One entry of a remote delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RemoteChange {
    /// Created or modified on the provider
    Upserted(RemoteEvent),
    /// Removed from the provider
    #[serde(rename_all = "camelCase")]
    Deleted { remote_id: RemoteId },
}

impl RemoteChange {
    /// The provider identifier this change refers to.
    pub fn remote_id(&self) -> &RemoteId {
        match self {
            RemoteChange::Upserted(event) => &event.remote_id,
            RemoteChange::Deleted { remote_id } => remote_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lunch() -> EventFields {
        EventFields::new("Lunch", 1_000, 2_000)
            .with_location("Cafe")
            .with_description("with Sam")
    }

    #[test]
    fn identical_fields_have_no_differences() {
        assert!(lunch().differing_fields(&lunch()).is_empty());
    }

    #[test]
    fn start_or_end_change_is_a_date_difference() {
        let mut moved = lunch();
        moved.end = 3_000;
        assert_eq!(lunch().differing_fields(&moved), vec![EventField::Date]);

        let mut moved = lunch();
        moved.start = 500;
        assert_eq!(lunch().differing_fields(&moved), vec![EventField::Date]);
    }

    #[test]
    fn differences_are_reported_in_field_order() {
        let mut other = lunch();
        other.location = None;
        other.title = "Dinner".into();
        assert_eq!(
            lunch().differing_fields(&other),
            vec![EventField::Title, EventField::Location]
        );
    }

    #[test]
    fn take_field_copies_only_that_field() {
        let mut target = lunch();
        let source = EventFields::new("Dinner", 5_000, 6_000).with_location("Home");
        target.take_field(&source, EventField::Location);

        assert_eq!(target.location.as_deref(), Some("Home"));
        assert_eq!(target.title, "Lunch");
        assert_eq!(target.start, 1_000);
    }

    #[test]
    fn delete_event() {
        let mut event = CalendarEvent::new("evt-1", lunch(), 1_000);
        event.revision = 1;
        event.mark_deleted(2_000);

        assert!(event.deleted);
        assert!(!event.is_active());
        assert_eq!(event.revision, 2);
        assert_eq!(event.last_modified, 2_000);
    }

    #[test]
    fn remote_content_keeps_local_identity() {
        let mut local = CalendarEvent::new("evt-1", lunch(), 1_000);
        local.revision = 3;
        local.deleted = true;
        let remote = RemoteEvent::new("r-1", EventFields::new("Dinner", 1, 2), 9_000, "e2");

        let updated = local.with_remote_content(&remote);
        assert_eq!(updated.id, "evt-1");
        assert_eq!(updated.fields.title, "Dinner");
        assert_eq!(updated.revision, 4);
        assert_eq!(updated.last_modified, 9_000);
        assert!(!updated.deleted);
    }

    #[test]
    fn serialization_format() {
        let event = CalendarEvent::new("evt-1", lunch(), 1_000);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("lastModified")); // camelCase
        assert!(json.contains(r#""title":"Lunch""#)); // flattened fields

        let change = RemoteChange::Deleted {
            remote_id: "r-1".into(),
        };
        let json = serde_json::to_string(&change).unwrap();
        assert_eq!(json, r#"{"kind":"deleted","remoteId":"r-1"}"#);
    }
}
