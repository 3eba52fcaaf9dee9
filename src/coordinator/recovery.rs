//! Startup recovery
//!
//! Restoring a snapshot and reconciling it against the live cluster are two
//! separate steps: [`SnapshotStore::load`] + [`ObjectTable::apply`] bring back
//! the record table, then [`Coordinator::reconcile`] probes every server the
//! table mentions and purges the ones that do not answer.
//!
//! [`SnapshotStore::load`]: crate::coordinator::snapshot::SnapshotStore::load
//! [`ObjectTable::apply`]: crate::coordinator::record::ObjectTable::apply

use crate::common::{ProtocolMetrics, Result, ServerId};
use crate::coordinator::core::Coordinator;
use crate::coordinator::record::ObjectTable;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Outcome of a reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub alive: Vec<ServerId>,
    pub pruned: Vec<ServerId>,
}

impl ReconcileReport {
    pub fn probed(&self) -> usize {
        self.alive.len() + self.pruned.len()
    }
}

/// Purge every server in `dead` from the table.
///
/// Each purge only touches the purged server's own entries, so the result
/// does not depend on the order of `dead` and running it twice is a no-op.
pub fn prune_servers<'a>(table: &mut ObjectTable, dead: impl IntoIterator<Item = &'a ServerId>) -> usize {
    dead.into_iter().map(|server| table.purge(server)).sum()
}

impl Coordinator {
    /// Probe every known server and purge those failing the probe.
    ///
    /// Runs inside the exclusive section; probes are issued concurrently,
    /// each bounded by the probe timeout.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut table = self.section().await;
        let known = table.known_servers();
        if known.is_empty() {
            return Ok(ReconcileReport::default());
        }

        info!("Probing {} known servers", known.len());
        let timeout = self.settings().probe_timeout;
        let probes = known.iter().map(|server| async move {
            let alive = matches!(
                tokio::time::timeout(timeout, self.nodes().probe(server)).await,
                Ok(Ok(()))
            );
            (server.clone(), alive)
        });

        let mut report = ReconcileReport::default();
        for (server, alive) in join_all(probes).await {
            if alive {
                report.alive.push(server);
            } else {
                warn!("Server {} failed its liveness probe", server);
                report.pruned.push(server);
            }
        }

        if !report.pruned.is_empty() {
            let touched = prune_servers(&mut table, &report.pruned);
            ProtocolMetrics::add(&self.metrics().servers_pruned, report.pruned.len() as u64);
            self.persist(&table)?;
            info!(
                "Pruned {} dead servers from {} records",
                report.pruned.len(),
                touched
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Payload;
    use crate::coordinator::core::tests::{s, settings, FakeNodes};
    use crate::coordinator::snapshot::SnapshotStore;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    /// obj1: S1 writer, S2 reader
    fn crashed_table() -> ObjectTable {
        let mut table = ObjectTable::new();
        let id = table.allocate_id();
        table
            .bind("obj1", id, Payload::from("saved"), &s("s1"))
            .unwrap();
        let record = table.get_mut(id).unwrap();
        record.writer = Some(s("s1"));
        record.next_grant(&s("s1"));
        record.readers.insert(s("s2"));
        record.next_grant(&s("s2"));
        table
    }

    #[tokio::test]
    async fn test_dead_writer_pruned_live_reader_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("status.snap"));
        store.save(&crashed_table().capture()).unwrap();

        // restart: restore, then reconcile
        let restored = ObjectTable::from_snapshot(store.load().unwrap().unwrap());
        let nodes = Arc::new(FakeNodes::default());
        nodes.kill("s1");
        let coord = Coordinator::new(nodes.clone(), settings())
            .with_table(restored)
            .with_store(store.clone());

        let report = coord.reconcile().await.unwrap();
        assert_eq!(report.pruned, vec![s("s1")]);
        assert_eq!(report.alive, vec![s("s2")]);
        assert_eq!(report.probed(), 2);

        let snap = coord.capture().await;
        let record = &snap.records[&1];
        assert_eq!(record.writer, None);
        assert_eq!(record.readers, BTreeSet::from([s("s2")]));
        assert!(!record.servers.contains(&s("s1")));
        assert_eq!(record.payload, Payload::from("saved"));

        // pruning is persisted
        assert_eq!(store.load().unwrap().unwrap(), snap);
    }

    #[tokio::test]
    async fn test_all_alive_keeps_table_identical() {
        let table = crashed_table();
        let nodes = Arc::new(FakeNodes::default());
        let coord = Coordinator::new(nodes, settings()).with_table(table.clone());

        let report = coord.reconcile().await.unwrap();
        assert!(report.pruned.is_empty());
        assert_eq!(coord.capture().await, table.capture());
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let nodes = Arc::new(FakeNodes::default());
        nodes.kill("s1");
        nodes.kill("s2");
        let coord = Coordinator::new(nodes, settings()).with_table(crashed_table());

        let first = coord.reconcile().await.unwrap();
        assert_eq!(first.pruned.len(), 2);
        let after_first = coord.capture().await;

        let second = coord.reconcile().await.unwrap();
        assert!(second.pruned.is_empty());
        assert_eq!(coord.capture().await, after_first);
    }

    #[test]
    fn test_prune_order_independent() {
        let dead = [s("s2"), s("s1")];
        let mut a = crashed_table();
        prune_servers(&mut a, dead.iter());
        let mut b = crashed_table();
        prune_servers(&mut b, dead.iter().rev());
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_ids_keep_increasing_after_restore() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("status.snap"));
        let nodes = Arc::new(FakeNodes::default());

        let before = {
            let coord = Coordinator::new(nodes.clone(), settings()).with_store(store.clone());
            let mut ids = Vec::new();
            for _ in 0..3 {
                ids.push(coord.allocate_id().await.unwrap());
            }
            ids
        };

        let table = ObjectTable::from_snapshot(store.load().unwrap().unwrap());
        let coord = Coordinator::new(nodes, settings())
            .with_table(table)
            .with_store(store);
        let after = coord.allocate_id().await.unwrap();
        assert!(before.iter().all(|&id| id < after));
        assert_eq!(after, before[2] + 1);
    }
}
