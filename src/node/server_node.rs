//! Server node: local cache, lock grades and the callback contract
//!
//! Each node keeps one cache entry per object it knows: its lock grade,
//! its copy of the payload and the epoch of the latest grant it installed.
//! Accesses are served locally whenever the cached grade allows it; only a
//! `NONE` grade before a read or a `READ` grade before a write escalates to
//! the coordinator.
//!
//! Acquisitions for one object are serialized by a per-object gate, so
//! concurrent local accesses make at most one coordinator call. Callbacks
//! never take the gate: they only hold the short cache lock, plus at most a
//! bounded wait for a grant reply that is already on its way.

use crate::common::{Error, Grant, Invalidation, LockGrade, ObjectId, Payload, Result, ServerId};
use crate::node::api::CoordinatorApi;
use crate::node::handle::ObjectHandle;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct CacheEntry {
    grade: LockGrade,
    payload: Option<Payload>,
    /// Epoch of the latest installed grant
    epoch: u64,
    /// Unregistered objects live only on this node
    registered: bool,
}

impl CacheEntry {
    fn local(payload: Payload) -> Self {
        Self {
            grade: LockGrade::None,
            payload: Some(payload),
            epoch: 0,
            registered: false,
        }
    }

    fn remote() -> Self {
        Self {
            grade: LockGrade::None,
            payload: None,
            epoch: 0,
            registered: true,
        }
    }

    fn readable(&self, local_ok: bool) -> Option<Payload> {
        let hit = if self.registered {
            self.grade.satisfies(LockGrade::Read)
        } else {
            local_ok
        };
        hit.then(|| self.payload.clone().unwrap_or_default())
    }

    fn store(&mut self, payload: &Payload, local_ok: bool) -> bool {
        let hit = if self.registered {
            self.grade == LockGrade::Write
        } else {
            local_ok
        };
        if hit {
            self.payload = Some(payload.clone());
        }
        hit
    }
}

pub struct ServerNode {
    id: ServerId,
    coordinator: Arc<dyn CoordinatorApi>,
    cache: Mutex<HashMap<ObjectId, CacheEntry>>,
    gates: Mutex<HashMap<ObjectId, Arc<tokio::sync::Mutex<()>>>>,
    /// Bumped after every grant install
    installs: watch::Sender<u64>,
    grant_wait: Duration,
}

impl ServerNode {
    pub fn new(id: ServerId, coordinator: Arc<dyn CoordinatorApi>, grant_wait: Duration) -> Arc<Self> {
        let (installs, _) = watch::channel(0);
        Arc::new(Self {
            id,
            coordinator,
            cache: Mutex::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
            installs,
            grant_wait,
        })
    }

    pub fn id(&self) -> &ServerId {
        &self.id
    }

    /// Locally cached grade for `id` (`NONE` for unknown objects)
    pub fn grade(&self, id: ObjectId) -> LockGrade {
        self.lock_cache()
            .get(&id)
            .map(|e| e.grade)
            .unwrap_or(LockGrade::None)
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<ObjectId, CacheEntry>> {
        // entries are only mutated by plain assignments, so a poisoned
        // guard still holds a consistent map
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn with_entry<R>(&self, id: ObjectId, f: impl FnOnce(&mut CacheEntry) -> R) -> Result<R> {
        let mut cache = self.lock_cache();
        let entry = cache
            .get_mut(&id)
            .ok_or_else(|| Error::InvalidArgument(format!("object {} is unknown to {}", id, self.id)))?;
        Ok(f(entry))
    }

    fn gate(&self, id: ObjectId) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        gates.entry(id).or_default().clone()
    }

    // === Application API ===

    /// Create a new object holding `payload`. It stays local to this node
    /// until registered under a name.
    pub async fn create_object(self: &Arc<Self>, payload: impl Into<Payload>) -> Result<ObjectHandle> {
        let id = self.coordinator.allocate_id().await?;
        self.lock_cache().insert(id, CacheEntry::local(payload.into()));
        debug!("Created object {}", id);
        Ok(ObjectHandle::new(id, self.clone()))
    }

    /// Publish `handle` under `name`. The object's current local payload
    /// becomes the coordinator's first authoritative copy.
    pub async fn register_name(&self, name: &str, handle: &ObjectHandle) -> Result<()> {
        let id = handle.id();
        let gate = self.gate(id);
        let _turn = gate.lock().await;

        let payload = self.with_entry(id, |e| e.payload.clone().unwrap_or_default())?;
        self.coordinator
            .register_object(name, id, payload, &self.id)
            .await?;

        self.with_entry(id, |e| {
            if !e.registered {
                *e = CacheEntry::remote();
            }
        })?;
        info!("Registered object {} as '{}'", id, name);
        Ok(())
    }

    /// Find a published object. No lock is taken until the first access.
    pub async fn lookup_by_name(self: &Arc<Self>, name: &str) -> Result<ObjectHandle> {
        let found = self.coordinator.lookup_object(name, &self.id).await?;
        self.lock_cache()
            .entry(found.id)
            .or_insert_with(CacheEntry::remote);
        Ok(ObjectHandle::new(found.id, self.clone()))
    }

    /// Read `id`, acquiring `READ` first if the cached grade is `NONE`.
    pub async fn read(&self, id: ObjectId) -> Result<Payload> {
        if let Some(payload) = self.with_entry(id, |e| e.readable(false))? {
            return Ok(payload);
        }

        let gate = self.gate(id);
        let _turn = gate.lock().await;
        if let Some(payload) = self.with_entry(id, |e| e.readable(true))? {
            return Ok(payload);
        }

        debug!("Read miss on object {}, acquiring READ", id);
        let grant = self.coordinator.acquire_read(id, &self.id).await?;
        Ok(self.install(grant, None))
    }

    /// Overwrite `id`, acquiring `WRITE` first if the cached grade is lower.
    pub async fn write(&self, id: ObjectId, payload: impl Into<Payload>) -> Result<()> {
        let payload = payload.into();
        if self.with_entry(id, |e| e.store(&payload, false))? {
            return Ok(());
        }

        let gate = self.gate(id);
        let _turn = gate.lock().await;
        if self.with_entry(id, |e| e.store(&payload, true))? {
            return Ok(());
        }

        debug!("Write miss on object {}, acquiring WRITE", id);
        let grant = self.coordinator.acquire_write(id, &self.id).await?;
        self.install(grant, Some(payload));
        Ok(())
    }

    /// Release every lock at the coordinator and forget cached state.
    pub async fn shutdown(&self) -> Result<()> {
        self.coordinator.terminate(&self.id).await?;
        for entry in self.lock_cache().values_mut() {
            if entry.registered {
                entry.grade = LockGrade::None;
                entry.payload = None;
            }
        }
        info!("Server node {} terminated", self.id);
        Ok(())
    }

    /// Install a grant, optionally replacing its payload with a local write.
    fn install(&self, grant: Grant, overwrite: Option<Payload>) -> Payload {
        let payload = overwrite.unwrap_or(grant.payload);
        {
            let mut cache = self.lock_cache();
            let entry = cache.entry(grant.object).or_insert_with(CacheEntry::remote);
            entry.grade = grant.grade;
            entry.payload = Some(payload.clone());
            entry.epoch = entry.epoch.max(grant.epoch);
            entry.registered = true;
        }
        self.installs.send_modify(|n| *n += 1);
        debug!(
            "Installed {} grant on object {} (epoch {})",
            grant.grade, grant.object, grant.epoch
        );
        payload
    }

    fn installed_epoch(&self, id: ObjectId) -> Option<u64> {
        self.lock_cache().get(&id).map(|e| e.epoch)
    }

    /// Wait until the grant an invalidation refers to has been installed.
    ///
    /// Returns `false` when this node has no entry for the object at all.
    async fn await_grant(&self, inv: Invalidation) -> Result<bool> {
        let mut installs = self.installs.subscribe();
        let wait = async {
            loop {
                match self.installed_epoch(inv.object) {
                    None => return false,
                    Some(epoch) if epoch >= inv.epoch => return true,
                    Some(_) => {}
                }
                if installs.changed().await.is_err() {
                    return false;
                }
            }
        };
        match tokio::time::timeout(self.grant_wait, wait).await {
            Ok(known) => Ok(known),
            Err(_) => {
                // the coordinator releases this node from the object, so
                // whatever older grant is cached here is void too
                if let Some(entry) = self.lock_cache().get_mut(&inv.object) {
                    entry.grade = LockGrade::None;
                    entry.payload = None;
                }
                warn!(
                    "Grant {} on object {} never arrived, dropped local copy",
                    inv.epoch, inv.object
                );
                Err(Error::StaleReference(format!(
                    "grant {} on object {} never reached {}",
                    inv.epoch, inv.object, self.id
                )))
            }
        }
    }

    // === Callback contract ===

    /// Drop the local `READ` grade.
    pub async fn invalidate_reader(&self, inv: Invalidation) -> Result<()> {
        if !self.await_grant(inv).await? {
            return Ok(());
        }
        self.with_entry(inv.object, |e| {
            e.grade = LockGrade::None;
            e.payload = None;
        })?;
        debug!("Reader invalidated on object {}", inv.object);
        Ok(())
    }

    /// Flush the payload and drop `WRITE` to `NONE`.
    pub async fn invalidate_writer(&self, inv: Invalidation) -> Result<Payload> {
        if !self.await_grant(inv).await? {
            return Err(self.no_copy(inv.object));
        }
        let flushed = self.with_entry(inv.object, |e| {
            e.grade = LockGrade::None;
            e.payload.take()
        })?;
        debug!("Writer invalidated on object {}", inv.object);
        flushed.ok_or_else(|| self.no_copy(inv.object))
    }

    /// Flush the payload and demote `WRITE` to `READ`.
    pub async fn invalidate_writer_for_reader(&self, inv: Invalidation) -> Result<Payload> {
        if !self.await_grant(inv).await? {
            return Err(self.no_copy(inv.object));
        }
        let flushed = self.with_entry(inv.object, |e| {
            if e.payload.is_some() {
                e.grade = LockGrade::Read;
            }
            e.payload.clone()
        })?;
        debug!("Writer demoted to reader on object {}", inv.object);
        flushed.ok_or_else(|| self.no_copy(inv.object))
    }

    pub fn liveness_probe(&self) -> Result<()> {
        Ok(())
    }

    fn no_copy(&self, id: ObjectId) -> Error {
        Error::StaleReference(format!("{} holds no copy of object {}", self.id, id))
    }
}

impl std::fmt::Debug for ServerNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerNode").field("id", &self.id).finish()
    }
}
