//! Links between local events and their provider counterparts.

use crate::{error::Result, ETag, Error, EventFields, EventId, RemoteId, Revision};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The sync relationship of one local event with one remote event.
///
/// `synced_revision` and `synced_etag` are the versions last written on each
/// side. `synced_fields` is the content both sides agreed on at that point and
/// serves as the common ancestor for three-way merges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLink {
    pub local_id: EventId,
    pub remote_id: RemoteId,
    pub synced_revision: Revision,
    pub synced_etag: ETag,
    pub synced_fields: EventFields,
}

impl EventLink {
    pub fn new(
        local_id: impl Into<EventId>,
        remote_id: impl Into<RemoteId>,
        synced_revision: Revision,
        synced_etag: impl Into<ETag>,
        synced_fields: EventFields,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            remote_id: remote_id.into(),
            synced_revision,
            synced_etag: synced_etag.into(),
            synced_fields,
        }
    }
}

/// Bijective table of [`EventLink`]s, indexed both ways.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkTable {
    by_local: BTreeMap<EventId, EventLink>,
    by_remote: BTreeMap<RemoteId, EventId>,
}

impl LinkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from links, rejecting any that break bijectivity.
    pub fn from_links(links: impl IntoIterator<Item = EventLink>) -> Result<Self> {
        let mut table = Self::new();
        for link in links {
            table.insert(link)?;
        }
        Ok(table)
    }

    pub fn by_local(&self, local_id: &str) -> Option<&EventLink> {
        self.by_local.get(local_id)
    }

    pub fn by_remote(&self, remote_id: &str) -> Option<&EventLink> {
        self.by_remote
            .get(remote_id)
            .and_then(|local_id| self.by_local.get(local_id))
    }

    /// Insert or replace the link for `link.local_id`.
    ///
    /// Fails if the remote id is already linked to a different local event.
    pub fn insert(&mut self, link: EventLink) -> Result<()> {
        if let Some(owner) = self.by_remote.get(&link.remote_id) {
            if owner != &link.local_id {
                return Err(Error::LinkConflict {
                    remote_id: link.remote_id,
                    linked_to: owner.clone(),
                });
            }
        }

        if let Some(previous) = self.by_local.get(&link.local_id) {
            if previous.remote_id != link.remote_id {
                self.by_remote.remove(&previous.remote_id);
            }
        }

        self.by_remote
            .insert(link.remote_id.clone(), link.local_id.clone());
        self.by_local.insert(link.local_id.clone(), link);
        Ok(())
    }

    /// Remove the link for a local event, returning it.
    pub fn remove(&mut self, local_id: &str) -> Option<EventLink> {
        let link = self.by_local.remove(local_id)?;
        self.by_remote.remove(&link.remote_id);
        Some(link)
    }

    /// Links in ascending local id order.
    pub fn iter(&self) -> impl Iterator<Item = &EventLink> {
        self.by_local.values()
    }

    pub fn len(&self) -> usize {
        self.by_local.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_local.is_empty()
    }
}
