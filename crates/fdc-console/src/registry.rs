use std::collections::{HashMap, HashSet};

use fdc_core::wire::EntityPayload;
use fdc_core::EntityStatus;
use serde_json::Value;

use crate::logs::LogSubscription;

/// Canonical state of one tracked worker. Owned by the [`Registry`]; the view
/// only ever holds derived, disposable projections keyed by identity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRecord {
    pub identity: String,
    /// Opaque controller-supplied fields, merged key-by-key, never replaced
    /// wholesale.
    pub attributes: serde_json::Map<String, Value>,
    pub status: EntityStatus,
    /// Written only by the filter engine.
    pub visible: bool,
    /// Set once on first selection; detail panels are never torn down.
    pub detail_opened: bool,
    /// Logical removal: the record stays, but no further pushes are routed.
    pub removed: bool,
    pub logs: LogSubscription,
}

impl EntityRecord {
    fn new(identity: String) -> Self {
        Self {
            identity,
            attributes: serde_json::Map::new(),
            status: EntityStatus::default(),
            visible: true,
            detail_opened: false,
            removed: false,
            logs: LogSubscription::default(),
        }
    }

    pub fn attribute_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }
}

/// Single source of truth for the entity set. Insertion order is preserved so
/// snapshots and individual lifecycle events project identically.
#[derive(Debug, Default)]
pub struct Registry {
    records: HashMap<String, EntityRecord>,
    order: Vec<String>,
    dirty: HashSet<String>,
}

impl Registry {
    /// Create-or-merge. New keys overwrite, keys absent from the payload stay
    /// untouched, and a payload without a status leaves the status alone.
    /// Re-announcing a removed identity revives the record in place.
    pub fn upsert(&mut self, payload: &EntityPayload) -> &mut EntityRecord {
        self.dirty.insert(payload.identity.clone());

        let record = match self.records.entry(payload.identity.clone()) {
            std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
            std::collections::hash_map::Entry::Vacant(entry) => {
                self.order.push(payload.identity.clone());
                entry.insert(EntityRecord::new(payload.identity.clone()))
            }
        };
        for (key, value) in &payload.attributes {
            record.attributes.insert(key.clone(), value.clone());
        }
        if let Some(status) = payload.status {
            record.status = status;
        }
        record.removed = false;
        record
    }

    pub fn get(&self, identity: &str) -> Option<&EntityRecord> {
        self.records.get(identity)
    }

    pub fn get_mut(&mut self, identity: &str) -> Option<&mut EntityRecord> {
        self.records.get_mut(identity)
    }

    /// Marks the record logically removed. Unknown or already-removed
    /// identities are a no-op.
    pub fn remove(&mut self, identity: &str) {
        if let Some(record) = self.records.get_mut(identity) {
            if !record.removed {
                record.removed = true;
                self.dirty.insert(identity.to_string());
            }
        }
    }

    /// Restartable pass over current records in insertion order.
    pub fn all(&self) -> impl Iterator<Item = &EntityRecord> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    pub fn all_mut(&mut self) -> impl Iterator<Item = &mut EntityRecord> {
        self.records.values_mut()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn mark_dirty(&mut self, identity: &str) {
        self.dirty.insert(identity.to_string());
    }

    pub fn mark_all_dirty(&mut self) {
        for identity in &self.order {
            self.dirty.insert(identity.clone());
        }
    }

    /// Identities whose projected state must be recomputed since the last
    /// drain.
    pub fn take_dirty(&mut self) -> HashSet<String> {
        std::mem::take(&mut self.dirty)
    }
}
