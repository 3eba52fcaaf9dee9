//! Coordinator lock protocol
//!
//! Every operation runs inside one coordinator-wide exclusive section (an
//! async mutex around the [`ObjectTable`]). The section is held across the
//! outbound invalidation callbacks, so a slow node stalls every other
//! coordinator call until its callback returns or times out. For one object,
//! grants are totally ordered by arrival at the section.
//!
//! Every mutating call persists the whole table before replying.

use crate::common::wire::{ObjectStatus, StatusReport};
use crate::common::{
    CallbackFailurePolicy, CoordinatorConfig, Error, Grant, Invalidation, LockGrade, ObjectId,
    ObjectRef, Payload, ProtocolMetrics, Result, ServerId,
};
use crate::coordinator::callbacks::NodeCallbacks;
use crate::coordinator::record::ObjectTable;
use crate::coordinator::snapshot::{PersistedSnapshot, SnapshotStore};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Timeouts and failure handling for outbound callbacks
#[derive(Debug, Clone, Copy)]
pub struct ProtocolSettings {
    pub callback_timeout: Duration,
    pub probe_timeout: Duration,
    pub on_callback_failure: CallbackFailurePolicy,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self::from(&CoordinatorConfig::default())
    }
}

impl From<&CoordinatorConfig> for ProtocolSettings {
    fn from(config: &CoordinatorConfig) -> Self {
        Self {
            callback_timeout: config.callback_timeout(),
            probe_timeout: config.probe_timeout(),
            on_callback_failure: config.on_callback_failure,
        }
    }
}

/// Central authority over every shared object
pub struct Coordinator {
    table: Mutex<ObjectTable>,
    nodes: Arc<dyn NodeCallbacks>,
    store: Option<SnapshotStore>,
    settings: ProtocolSettings,
    metrics: ProtocolMetrics,
}

impl Coordinator {
    /// A coordinator with an empty table and no persistence.
    pub fn new(nodes: Arc<dyn NodeCallbacks>, settings: ProtocolSettings) -> Self {
        Self {
            table: Mutex::new(ObjectTable::new()),
            nodes,
            store: None,
            settings,
            metrics: ProtocolMetrics::new(),
        }
    }

    /// Persist to `store` after every mutating call.
    pub fn with_store(mut self, store: SnapshotStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Start from a restored table instead of an empty one.
    pub fn with_table(mut self, table: ObjectTable) -> Self {
        self.table = Mutex::new(table);
        self
    }

    pub fn settings(&self) -> &ProtocolSettings {
        &self.settings
    }

    pub fn metrics(&self) -> &ProtocolMetrics {
        &self.metrics
    }

    pub(crate) fn nodes(&self) -> &Arc<dyn NodeCallbacks> {
        &self.nodes
    }

    /// Enter the exclusive section.
    pub(crate) async fn section(&self) -> MutexGuard<'_, ObjectTable> {
        self.table.lock().await
    }

    /// Copy of the current table in snapshot form.
    pub async fn capture(&self) -> PersistedSnapshot {
        self.table.lock().await.capture()
    }

    pub(crate) fn persist(&self, table: &ObjectTable) -> Result<()> {
        if let Some(store) = &self.store {
            store.save(&table.capture())?;
            ProtocolMetrics::incr(&self.metrics.snapshots_written);
        }
        Ok(())
    }

    /// Allocate a fresh object id (strictly increasing, never reused).
    pub async fn allocate_id(&self) -> Result<ObjectId> {
        let mut table = self.section().await;
        let id = table.allocate_id();
        self.persist(&table)?;
        ProtocolMetrics::incr(&self.metrics.ids_allocated);
        debug!("Allocated object id {}", id);
        Ok(id)
    }

    /// Bind `name` to `id`. Repeating an identical registration is a no-op.
    pub async fn register_object(
        &self,
        name: &str,
        id: ObjectId,
        payload: Payload,
        caller: &ServerId,
    ) -> Result<()> {
        let mut table = self.section().await;
        if table.bind(name, id, payload, caller)? {
            self.persist(&table)?;
            ProtocolMetrics::incr(&self.metrics.registrations);
            info!("Registered object {} as '{}' (by {})", id, name, caller);
        } else {
            debug!("Object {} already registered as '{}'", id, name);
        }
        Ok(())
    }

    /// Resolve `name`. The caller becomes a known server of the object.
    pub async fn lookup_object(&self, name: &str, caller: &ServerId) -> Result<ObjectRef> {
        let mut table = self.section().await;
        let id = table
            .resolve(name)
            .ok_or_else(|| Error::NotFound(format!("object named '{}'", name)))?;
        let added = table.get_mut(id)?.servers.insert(caller.clone());
        if added {
            self.persist(&table)?;
        }
        ProtocolMetrics::incr(&self.metrics.lookups);
        debug!("Lookup of '{}' by {} -> object {}", name, caller, id);
        Ok(ObjectRef {
            id,
            name: name.to_string(),
        })
    }

    /// Grant `READ` on `id` to `caller`, demoting a current writer to reader.
    pub async fn acquire_read(&self, id: ObjectId, caller: &ServerId) -> Result<Grant> {
        let mut table = self.section().await;

        let writer = {
            let record = table.get_mut(id)?;
            record
                .writer
                .clone()
                .filter(|w| w != caller)
                .map(|w| {
                    let epoch = record.grant_of(&w);
                    (w, epoch)
                })
        };

        if let Some((writer, epoch)) = writer {
            let inv = Invalidation { object: id, epoch };
            let flushed = self
                .callback(
                    &writer,
                    "invalidate_writer_for_reader",
                    self.nodes.invalidate_writer_for_reader(&writer, inv),
                )
                .await;
            match flushed {
                Ok(payload) => {
                    let record = table.get_mut(id)?;
                    record.payload = payload;
                    record.writer = None;
                    // demotion keeps the former writer's grant epoch
                    record.readers.insert(writer);
                }
                Err(e) => self.callback_failed(&mut table, id, &writer, e)?,
            }
        }

        let record = table.get_mut(id)?;
        if record.is_writer(caller) {
            // the caller lost its local state; its WRITE grant is void
            record.writer = None;
        }
        record.readers.insert(caller.clone());
        let epoch = record.next_grant(caller);
        debug_assert!(record.is_exclusive());
        let grant = Grant {
            object: id,
            grade: LockGrade::Read,
            epoch,
            payload: record.payload.clone(),
        };

        self.persist(&table)?;
        ProtocolMetrics::incr(&self.metrics.read_grants);
        debug!("Object {} locked for reading by {} (epoch {})", id, caller, epoch);
        Ok(grant)
    }

    /// Grant `WRITE` on `id` to `caller`, invalidating every other holder.
    pub async fn acquire_write(&self, id: ObjectId, caller: &ServerId) -> Result<Grant> {
        let mut table = self.section().await;

        let (readers, writer) = {
            let record = table.get_mut(id)?;
            let readers: Vec<(ServerId, u64)> = record
                .readers
                .iter()
                .filter(|r| *r != caller)
                .map(|r| (r.clone(), record.grant_of(r)))
                .collect();
            let writer = record.writer.clone().filter(|w| w != caller).map(|w| {
                let epoch = record.grant_of(&w);
                (w, epoch)
            });
            (readers, writer)
        };

        for (reader, epoch) in readers {
            let inv = Invalidation { object: id, epoch };
            let res = self
                .callback(
                    &reader,
                    "invalidate_reader",
                    self.nodes.invalidate_reader(&reader, inv),
                )
                .await;
            match res {
                Ok(()) => {
                    let record = table.get_mut(id)?;
                    record.readers.remove(&reader);
                    record.grants.remove(&reader);
                }
                Err(e) => self.callback_failed(&mut table, id, &reader, e)?,
            }
        }

        if let Some((writer, epoch)) = writer {
            let inv = Invalidation { object: id, epoch };
            let flushed = self
                .callback(
                    &writer,
                    "invalidate_writer",
                    self.nodes.invalidate_writer(&writer, inv),
                )
                .await;
            match flushed {
                Ok(payload) => {
                    let record = table.get_mut(id)?;
                    record.payload = payload;
                    record.writer = None;
                    record.grants.remove(&writer);
                }
                Err(e) => self.callback_failed(&mut table, id, &writer, e)?,
            }
        }

        let record = table.get_mut(id)?;
        for reader in std::mem::take(&mut record.readers) {
            record.grants.remove(&reader);
        }
        record.writer = Some(caller.clone());
        let epoch = record.next_grant(caller);
        debug_assert!(record.is_exclusive());
        let grant = Grant {
            object: id,
            grade: LockGrade::Write,
            epoch,
            payload: record.payload.clone(),
        };

        self.persist(&table)?;
        ProtocolMetrics::incr(&self.metrics.write_grants);
        debug!("Object {} locked for writing by {} (epoch {})", id, caller, epoch);
        Ok(grant)
    }

    /// Release everything `server` holds: flush its writes, then remove it
    /// from every writer slot, reader set and known-servers set.
    pub async fn terminate(&self, server: &ServerId) -> Result<()> {
        let mut table = self.section().await;

        for id in table.written_by(server) {
            // an earlier failure may already have purged the server
            let epoch = match table.get(id) {
                Some(record) if record.is_writer(server) => record.grant_of(server),
                _ => continue,
            };
            let inv = Invalidation { object: id, epoch };
            let flushed = self
                .callback(
                    server,
                    "invalidate_writer",
                    self.nodes.invalidate_writer(server, inv),
                )
                .await;
            match flushed {
                Ok(payload) => {
                    let record = table.get_mut(id)?;
                    record.payload = payload;
                    record.writer = None;
                }
                Err(e) => self.callback_failed(&mut table, id, server, e)?,
            }
        }

        let touched = table.purge(server);
        self.persist(&table)?;
        ProtocolMetrics::incr(&self.metrics.terminations);
        info!("Terminated server {} ({} objects released)", server, touched);
        Ok(())
    }

    /// Run one outbound callback under the callback timeout.
    async fn callback<T, F>(&self, server: &ServerId, what: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let res = match tokio::time::timeout(self.settings.callback_timeout, call).await {
            Ok(res) => res,
            Err(_) => Err(Error::Timeout(format!(
                "{} on {} exceeded {:?}",
                what, server, self.settings.callback_timeout
            ))),
        };
        self.metrics.callback_latency.observe(start.elapsed());
        ProtocolMetrics::incr(&self.metrics.invalidations);
        if let Err(e) = &res {
            ProtocolMetrics::incr(&self.metrics.callback_failures);
            warn!("{} on {} failed: {}", what, server, e);
        }
        res
    }

    /// Apply the callback failure policy for a callback about object `id`.
    ///
    /// A stale holder answered but has no grant on `id`: only its entries
    /// on that record are released, whatever the policy. Under `prune`, an
    /// unreachable node is purged everywhere. Either way the request carries
    /// on with the last authoritative payload.
    fn callback_failed(
        &self,
        table: &mut ObjectTable,
        id: ObjectId,
        server: &ServerId,
        err: Error,
    ) -> Result<()> {
        if matches!(err, Error::StaleReference(_)) {
            table.get_mut(id)?.release(server);
            warn!("Released stale holder {} of object {}", server, id);
            return Ok(());
        }
        match self.settings.on_callback_failure {
            CallbackFailurePolicy::Prune if err.is_unreachable() => {
                let touched = table.purge(server);
                ProtocolMetrics::incr(&self.metrics.servers_pruned);
                warn!(
                    "Pruned unreachable server {} from {} objects",
                    server, touched
                );
                Ok(())
            }
            _ => {
                // readers invalidated before the failure are already gone
                self.persist(table)?;
                Err(err)
            }
        }
    }

    pub async fn status(&self) -> StatusReport {
        let table = self.section().await;
        let objects = table
            .records()
            .map(|r| ObjectStatus {
                id: r.id,
                name: table.name_of(r.id).map(str::to_string),
                writer: r.writer.clone(),
                readers: r.readers.iter().cloned().collect(),
                servers: r.servers.iter().cloned().collect(),
                epoch: r.epoch,
                payload_len: r.payload.len() as u64,
            })
            .collect();
        StatusReport {
            next_id: table.next_id(),
            objects,
            generated_at: chrono::Utc::now(),
        }
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("settings", &self.settings)
            .field("store", &self.store)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::{BTreeSet, HashMap, HashSet};
    use std::sync::Mutex as StdMutex;

    /// Scripted node fleet recording every callback it receives.
    #[derive(Default)]
    pub(crate) struct FakeNodes {
        pub calls: StdMutex<Vec<(&'static str, ServerId, ObjectId)>>,
        pub flushes: StdMutex<HashMap<ServerId, Payload>>,
        pub dead: StdMutex<HashSet<ServerId>>,
        pub slow: StdMutex<HashSet<ServerId>>,
        pub stale: StdMutex<HashSet<ServerId>>,
    }

    impl FakeNodes {
        pub fn flush_with(&self, server: &str, payload: &str) {
            self.flushes
                .lock()
                .unwrap()
                .insert(ServerId::new(server), Payload::from(payload));
        }

        pub fn kill(&self, server: &str) {
            self.dead.lock().unwrap().insert(ServerId::new(server));
        }

        pub fn revive(&self, server: &str) {
            self.dead.lock().unwrap().remove(&ServerId::new(server));
        }

        pub fn calls(&self) -> Vec<(&'static str, ServerId, ObjectId)> {
            self.calls.lock().unwrap().clone()
        }

        async fn answer(&self, what: &'static str, server: &ServerId, object: ObjectId) -> Result<Payload> {
            self.calls
                .lock()
                .unwrap()
                .push((what, server.clone(), object));
            if self.dead.lock().unwrap().contains(server) {
                return Err(Error::TransportFailure(format!("{} unreachable", server)));
            }
            if self.stale.lock().unwrap().contains(server) {
                return Err(Error::StaleReference(format!("{} holds no copy", server)));
            }
            let slow = self.slow.lock().unwrap().contains(server);
            if slow {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(self
                .flushes
                .lock()
                .unwrap()
                .get(server)
                .cloned()
                .unwrap_or_default())
        }
    }

    #[async_trait]
    impl NodeCallbacks for FakeNodes {
        async fn invalidate_reader(&self, server: &ServerId, inv: Invalidation) -> Result<()> {
            self.answer("invalidate_reader", server, inv.object)
                .await
                .map(|_| ())
        }

        async fn invalidate_writer(&self, server: &ServerId, inv: Invalidation) -> Result<Payload> {
            self.answer("invalidate_writer", server, inv.object).await
        }

        async fn invalidate_writer_for_reader(
            &self,
            server: &ServerId,
            inv: Invalidation,
        ) -> Result<Payload> {
            self.answer("invalidate_writer_for_reader", server, inv.object)
                .await
        }

        async fn probe(&self, server: &ServerId) -> Result<()> {
            self.answer("probe", server, 0).await.map(|_| ())
        }
    }

    pub(crate) fn s(name: &str) -> ServerId {
        ServerId::new(name)
    }

    pub(crate) fn settings() -> ProtocolSettings {
        ProtocolSettings {
            callback_timeout: Duration::from_millis(200),
            probe_timeout: Duration::from_millis(200),
            on_callback_failure: CallbackFailurePolicy::Prune,
        }
    }

    async fn coordinator_with(objects: &[&str]) -> (Arc<FakeNodes>, Coordinator) {
        let nodes = Arc::new(FakeNodes::default());
        let coord = Coordinator::new(nodes.clone(), settings());
        for name in objects {
            let id = coord.allocate_id().await.unwrap();
            coord
                .register_object(name, id, Payload::from("initial"), &s("creator"))
                .await
                .unwrap();
        }
        (nodes, coord)
    }

    async fn holders(coord: &Coordinator, id: ObjectId) -> (Option<ServerId>, BTreeSet<ServerId>) {
        let snap = coord.capture().await;
        let record = &snap.records[&id];
        (record.writer.clone(), record.readers.clone())
    }

    #[tokio::test]
    async fn test_write_then_read_demotes_writer() {
        let (nodes, coord) = coordinator_with(&["obj1"]).await;
        coord.acquire_write(1, &s("s1")).await.unwrap();
        nodes.flush_with("s1", "written by s1");

        let grant = coord.acquire_read(1, &s("s2")).await.unwrap();
        assert_eq!(grant.payload, Payload::from("written by s1"));
        assert_eq!(grant.grade, LockGrade::Read);

        assert_eq!(
            nodes.calls(),
            vec![("invalidate_writer_for_reader", s("s1"), 1)]
        );
        let (writer, readers) = holders(&coord, 1).await;
        assert_eq!(writer, None);
        assert_eq!(readers, BTreeSet::from([s("s1"), s("s2")]));
    }

    #[tokio::test]
    async fn test_write_steals_from_writer() {
        let (nodes, coord) = coordinator_with(&["obj1"]).await;
        coord.acquire_write(1, &s("s1")).await.unwrap();
        nodes.flush_with("s1", "v2");

        let grant = coord.acquire_write(1, &s("s2")).await.unwrap();
        assert_eq!(grant.payload, Payload::from("v2"));
        assert_eq!(nodes.calls(), vec![("invalidate_writer", s("s1"), 1)]);

        let (writer, readers) = holders(&coord, 1).await;
        assert_eq!(writer, Some(s("s2")));
        assert!(readers.is_empty());
    }

    #[tokio::test]
    async fn test_write_invalidates_other_readers_only() {
        let (nodes, coord) = coordinator_with(&["obj1"]).await;
        for srv in ["s1", "s2", "s3"] {
            coord.acquire_read(1, &s(srv)).await.unwrap();
        }
        assert!(nodes.calls().is_empty());

        coord.acquire_write(1, &s("s2")).await.unwrap();
        let mut calls = nodes.calls();
        calls.sort();
        assert_eq!(
            calls,
            vec![
                ("invalidate_reader", s("s1"), 1),
                ("invalidate_reader", s("s3"), 1),
            ]
        );

        let (writer, readers) = holders(&coord, 1).await;
        assert_eq!(writer, Some(s("s2")));
        assert!(readers.is_empty());
    }

    #[tokio::test]
    async fn test_terminate_flushes_and_forgets() {
        let (nodes, coord) = coordinator_with(&["obj1", "obj2"]).await;
        coord.acquire_write(1, &s("s1")).await.unwrap();
        coord.acquire_write(2, &s("s1")).await.unwrap();
        coord.lookup_object("obj1", &s("s2")).await.unwrap();
        nodes.flush_with("s1", "final");

        coord.terminate(&s("s1")).await.unwrap();

        let calls = nodes.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.contains(&("invalidate_writer", s("s1"), 1)));
        assert!(calls.contains(&("invalidate_writer", s("s1"), 2)));

        let snap = coord.capture().await;
        for record in snap.records.values() {
            assert!(record.writer.is_none());
            assert!(!record.readers.contains(&s("s1")));
            assert!(!record.servers.contains(&s("s1")));
            assert_eq!(record.payload, Payload::from("final"));
        }
        assert!(snap.records[&1].servers.contains(&s("s2")));
    }

    #[tokio::test]
    async fn test_reads_never_remove_readers() {
        let (nodes, coord) = coordinator_with(&["obj1"]).await;
        coord.acquire_read(1, &s("s1")).await.unwrap();
        coord.acquire_read(1, &s("s2")).await.unwrap();
        coord.acquire_read(1, &s("s1")).await.unwrap();
        assert!(nodes.calls().is_empty());
        let (_, readers) = holders(&coord, 1).await;
        assert_eq!(readers.len(), 2);
    }

    #[tokio::test]
    async fn test_grant_epochs_increase_and_are_remembered() {
        let (nodes, coord) = coordinator_with(&["obj1"]).await;
        let g1 = coord.acquire_read(1, &s("s1")).await.unwrap();
        let g2 = coord.acquire_read(1, &s("s2")).await.unwrap();
        let g3 = coord.acquire_write(1, &s("s3")).await.unwrap();
        assert!(g1.epoch < g2.epoch && g2.epoch < g3.epoch);

        let snap = coord.capture().await;
        let record = &snap.records[&1];
        assert_eq!(record.grants.len(), 1);
        assert_eq!(record.grant_of(&s("s3")), g3.epoch);
        assert_eq!(nodes.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_object_and_name() {
        let (_, coord) = coordinator_with(&["obj1"]).await;
        assert!(matches!(
            coord.acquire_read(99, &s("s1")).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            coord.lookup_object("nope", &s("s1")).await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            coord.register_object("x", 99, Payload::default(), &s("s1")).await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_registration_idempotence() {
        let (_, coord) = coordinator_with(&["obj1"]).await;
        coord
            .register_object("obj1", 1, Payload::from("ignored"), &s("s9"))
            .await
            .unwrap();
        let other = coord.allocate_id().await.unwrap();
        let err = coord
            .register_object("obj1", other, Payload::default(), &s("s9"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NameConflict { existing: 1, .. }));
        assert_eq!(
            coord.capture().await.records[&1].payload,
            Payload::from("initial")
        );
    }

    #[tokio::test]
    async fn test_lookup_adds_known_server() {
        let (_, coord) = coordinator_with(&["obj1"]).await;
        let found = coord.lookup_object("obj1", &s("s7")).await.unwrap();
        assert_eq!(found.id, 1);
        let snap = coord.capture().await;
        assert!(snap.records[&1].servers.contains(&s("s7")));
        assert!(snap.records[&1].readers.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_writer_is_pruned() {
        let (nodes, coord) = coordinator_with(&["obj1"]).await;
        coord.acquire_write(1, &s("s1")).await.unwrap();
        nodes.kill("s1");

        let grant = coord.acquire_read(1, &s("s2")).await.unwrap();
        // falls back to the last authoritative payload
        assert_eq!(grant.payload, Payload::from("initial"));

        let snap = coord.capture().await;
        let record = &snap.records[&1];
        assert_eq!(record.writer, None);
        assert_eq!(record.readers, BTreeSet::from([s("s2")]));
        assert!(!record.servers.contains(&s("s1")));
    }

    #[tokio::test]
    async fn test_slow_reader_times_out_and_is_pruned() {
        let (nodes, coord) = coordinator_with(&["obj1"]).await;
        coord.acquire_read(1, &s("s1")).await.unwrap();
        nodes.slow.lock().unwrap().insert(s("s1"));

        let start = Instant::now();
        coord.acquire_write(1, &s("s2")).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(coord.metrics().servers_pruned.load(std::sync::atomic::Ordering::Relaxed), 1);

        let (writer, readers) = holders(&coord, 1).await;
        assert_eq!(writer, Some(s("s2")));
        assert!(readers.is_empty());
    }

    #[tokio::test]
    async fn test_fail_policy_surfaces_transport_error() {
        let nodes = Arc::new(FakeNodes::default());
        let coord = Coordinator::new(
            nodes.clone(),
            ProtocolSettings {
                on_callback_failure: CallbackFailurePolicy::Fail,
                ..settings()
            },
        );
        let id = coord.allocate_id().await.unwrap();
        coord
            .register_object("obj1", id, Payload::from("v"), &s("s1"))
            .await
            .unwrap();
        coord.acquire_write(id, &s("s1")).await.unwrap();
        nodes.kill("s1");

        let err = coord.acquire_write(id, &s("s2")).await.unwrap_err();
        assert!(matches!(err, Error::TransportFailure(_)));
        let (writer, _) = holders(&coord, id).await;
        assert_eq!(writer, Some(s("s1")));
    }

    #[tokio::test]
    async fn test_stale_holder_is_released_from_one_object_only() {
        let (nodes, coord) = coordinator_with(&["obj1", "obj2"]).await;
        coord.lookup_object("obj1", &s("s1")).await.unwrap();
        coord.acquire_write(1, &s("s1")).await.unwrap();
        coord.acquire_write(2, &s("s1")).await.unwrap();
        nodes.stale.lock().unwrap().insert(s("s1"));

        let grant = coord.acquire_write(1, &s("s2")).await.unwrap();
        assert_eq!(grant.payload, Payload::from("initial"));

        let snap = coord.capture().await;
        let first = &snap.records[&1];
        assert_eq!(first.writer, Some(s("s2")));
        assert!(first.servers.contains(&s("s1")));
        assert_eq!(first.grant_of(&s("s1")), 0);
        assert_eq!(snap.records[&2].writer, Some(s("s1")));
        assert_eq!(
            coord.metrics().servers_pruned.load(std::sync::atomic::Ordering::Relaxed),
            0
        );
    }

    #[tokio::test]
    async fn test_terminate_stops_after_pruning() {
        let (nodes, coord) = coordinator_with(&["obj1", "obj2", "obj3"]).await;
        for id in 1..=3 {
            coord.acquire_write(id, &s("s1")).await.unwrap();
        }
        nodes.kill("s1");

        coord.terminate(&s("s1")).await.unwrap();
        assert_eq!(nodes.calls().len(), 1);
        assert_eq!(
            coord.metrics().servers_pruned.load(std::sync::atomic::Ordering::Relaxed),
            1
        );
        let snap = coord.capture().await;
        assert!(snap.records.values().all(|r| r.writer.is_none()));
    }

    #[tokio::test]
    async fn test_fail_policy_keeps_readers_already_invalidated_out() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("status.snap"));
        let nodes = Arc::new(FakeNodes::default());
        let coord = Coordinator::new(
            nodes.clone(),
            ProtocolSettings {
                on_callback_failure: CallbackFailurePolicy::Fail,
                ..settings()
            },
        )
        .with_store(store.clone());
        let id = coord.allocate_id().await.unwrap();
        coord
            .register_object("obj1", id, Payload::from("v"), &s("creator"))
            .await
            .unwrap();
        for srv in ["s1", "s2", "s3"] {
            coord.acquire_read(id, &s(srv)).await.unwrap();
        }
        nodes.kill("s3");

        let err = coord.acquire_write(id, &s("s4")).await.unwrap_err();
        assert!(matches!(err, Error::TransportFailure(_)));
        let (writer, readers) = holders(&coord, id).await;
        assert_eq!(writer, None);
        // s1 and s2 dropped their copies before s3 failed
        assert_eq!(readers, BTreeSet::from([s("s3")]));
        assert_eq!(store.load().unwrap().unwrap(), coord.capture().await);

        // s1 has to ask again, and nobody needs a callback for that
        coord.acquire_read(id, &s("s1")).await.unwrap();
        assert_eq!(nodes.calls().len(), 3);

        nodes.revive("s3");
        coord.acquire_write(id, &s("s4")).await.unwrap();
        let mut calls = nodes.calls().split_off(3);
        calls.sort();
        assert_eq!(
            calls,
            vec![
                ("invalidate_reader", s("s1"), id),
                ("invalidate_reader", s("s3"), id),
            ]
        );
        let (writer, readers) = holders(&coord, id).await;
        assert_eq!(writer, Some(s("s4")));
        assert!(readers.is_empty());
    }

    #[tokio::test]
    async fn test_every_mutation_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("status.snap"));
        let nodes = Arc::new(FakeNodes::default());
        let coord = Coordinator::new(nodes, settings()).with_store(store.clone());

        let id = coord.allocate_id().await.unwrap();
        assert_eq!(store.load().unwrap().unwrap().next_id, id + 1);

        coord
            .register_object("obj1", id, Payload::from("v"), &s("s1"))
            .await
            .unwrap();
        coord.acquire_write(id, &s("s1")).await.unwrap();
        assert_eq!(store.load().unwrap().unwrap(), coord.capture().await);

        coord.terminate(&s("s1")).await.unwrap();
        assert_eq!(store.load().unwrap().unwrap(), coord.capture().await);
    }

    #[tokio::test]
    async fn test_exclusivity_holds_under_concurrency() {
        let (_, coord) = coordinator_with(&["obj1"]).await;
        let coord = Arc::new(coord);

        let mut tasks = Vec::new();
        for i in 0..16 {
            let coord = coord.clone();
            tasks.push(tokio::spawn(async move {
                let me = s(&format!("s{}", i % 4));
                if i % 3 == 0 {
                    coord.acquire_write(1, &me).await.unwrap();
                } else {
                    coord.acquire_read(1, &me).await.unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let snap = coord.capture().await;
        let table = ObjectTable::from_snapshot(snap);
        assert!(table.exclusivity_violations().is_empty());
    }
}
