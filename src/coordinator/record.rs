//! Object records and the name directory
//!
//! The table is only ever mutated by the coordinator from inside its
//! exclusive section. It knows nothing about transports or callbacks:
//! the lock protocol lives in [`crate::coordinator::core`].

use crate::common::{validate_name, Error, ObjectId, Payload, Result, ServerId};
use crate::coordinator::snapshot::PersistedSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Per-object coherence state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub id: ObjectId,
    /// Last flushed, authoritative payload
    pub payload: Payload,
    pub writer: Option<ServerId>,
    pub readers: BTreeSet<ServerId>,
    /// Every server ever granted access or that looked the object up
    pub servers: BTreeSet<ServerId>,
    /// Epoch of the latest grant issued for this object
    pub epoch: u64,
    /// Epoch of each current holder's latest grant
    pub grants: BTreeMap<ServerId, u64>,
}

impl ObjectRecord {
    pub fn new(id: ObjectId, payload: Payload, creator: ServerId) -> Self {
        Self {
            id,
            payload,
            writer: None,
            readers: BTreeSet::new(),
            servers: BTreeSet::from([creator]),
            epoch: 0,
            grants: BTreeMap::new(),
        }
    }

    /// Issue a new grant epoch to `server`.
    pub fn next_grant(&mut self, server: &ServerId) -> u64 {
        self.epoch += 1;
        self.grants.insert(server.clone(), self.epoch);
        self.servers.insert(server.clone());
        self.epoch
    }

    /// Epoch of the grant `server` currently holds (0 when unknown)
    pub fn grant_of(&self, server: &ServerId) -> u64 {
        self.grants.get(server).copied().unwrap_or(0)
    }

    /// Write-exclusivity: a writer never coexists with readers.
    pub fn is_exclusive(&self) -> bool {
        self.writer.is_none() || self.readers.is_empty()
    }

    pub fn is_writer(&self, server: &ServerId) -> bool {
        self.writer.as_ref() == Some(server)
    }

    /// Drop every trace of `server`. Returns whether anything changed.
    pub fn forget(&mut self, server: &ServerId) -> bool {
        let mut changed = false;
        if self.is_writer(server) {
            self.writer = None;
            changed = true;
        }
        changed |= self.readers.remove(server);
        changed |= self.servers.remove(server);
        changed |= self.grants.remove(server).is_some();
        changed
    }

    /// Drop `server`'s lock grades but keep it as a known server.
    pub fn release(&mut self, server: &ServerId) {
        if self.is_writer(server) {
            self.writer = None;
        }
        self.readers.remove(server);
        self.grants.remove(server);
    }
}

/// Record table plus name directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectTable {
    next_id: ObjectId,
    names: BTreeMap<String, ObjectId>,
    records: BTreeMap<ObjectId, ObjectRecord>,
}

impl Default for ObjectTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectTable {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            names: BTreeMap::new(),
            records: BTreeMap::new(),
        }
    }

    pub fn next_id(&self) -> ObjectId {
        self.next_id
    }

    /// Hand out a fresh id. Ids are never reused.
    pub fn allocate_id(&mut self) -> ObjectId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Was `id` handed out by [`allocate_id`](Self::allocate_id)?
    pub fn is_allocated(&self, id: ObjectId) -> bool {
        id >= 1 && id < self.next_id
    }

    /// Bind `name` to `id`, creating the record on first registration.
    ///
    /// Returns `false` when the exact binding already existed.
    pub fn bind(
        &mut self,
        name: &str,
        id: ObjectId,
        payload: Payload,
        caller: &ServerId,
    ) -> Result<bool> {
        validate_name(name)?;

        if let Some(&existing) = self.names.get(name) {
            if existing == id {
                return Ok(false);
            }
            return Err(Error::NameConflict {
                name: name.to_string(),
                existing,
            });
        }

        if !self.is_allocated(id) {
            return Err(Error::InvalidArgument(format!(
                "object {} was never allocated",
                id
            )));
        }

        if let Some(other) = self.name_of(id) {
            return Err(Error::NameConflict {
                name: other.to_string(),
                existing: id,
            });
        }

        self.names.insert(name.to_string(), id);
        self.records
            .entry(id)
            .or_insert_with(|| ObjectRecord::new(id, payload, caller.clone()));
        Ok(true)
    }

    pub fn resolve(&self, name: &str) -> Option<ObjectId> {
        self.names.get(name).copied()
    }

    pub fn name_of(&self, id: ObjectId) -> Option<&str> {
        self.names
            .iter()
            .find(|(_, bound)| **bound == id)
            .map(|(name, _)| name.as_str())
    }

    pub fn get(&self, id: ObjectId) -> Option<&ObjectRecord> {
        self.records.get(&id)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Result<&mut ObjectRecord> {
        self.records
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("object {}", id)))
    }

    pub fn records(&self) -> impl Iterator<Item = &ObjectRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Objects `server` currently holds `WRITE` on
    pub fn written_by(&self, server: &ServerId) -> Vec<ObjectId> {
        self.records
            .values()
            .filter(|r| r.is_writer(server))
            .map(|r| r.id)
            .collect()
    }

    /// Every server appearing in any writer slot, reader set or known-servers set
    pub fn known_servers(&self) -> BTreeSet<ServerId> {
        let mut out = BTreeSet::new();
        for record in self.records.values() {
            out.extend(record.writer.iter().cloned());
            out.extend(record.readers.iter().cloned());
            out.extend(record.servers.iter().cloned());
        }
        out
    }

    /// Remove `server` from every record. Returns the number of records touched.
    pub fn purge(&mut self, server: &ServerId) -> usize {
        self.records
            .values_mut()
            .map(|record| record.forget(server))
            .filter(|&changed| changed)
            .count()
    }

    /// Ids of records violating write-exclusivity (always empty)
    pub fn exclusivity_violations(&self) -> Vec<ObjectId> {
        self.records
            .values()
            .filter(|r| !r.is_exclusive())
            .map(|r| r.id)
            .collect()
    }

    pub fn capture(&self) -> PersistedSnapshot {
        PersistedSnapshot {
            next_id: self.next_id,
            names: self.names.clone(),
            records: self.records.clone(),
        }
    }

    /// Replace the whole table with a restored snapshot.
    pub fn apply(&mut self, snapshot: PersistedSnapshot) {
        self.next_id = snapshot.next_id.max(1);
        self.names = snapshot.names;
        self.records = snapshot.records;
    }

    pub fn from_snapshot(snapshot: PersistedSnapshot) -> Self {
        let mut table = Self::new();
        table.apply(snapshot);
        table
    }
}
