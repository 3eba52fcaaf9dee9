//! Stress test: many nodes hammering a few objects
//!
//! Run with `cargo test --features heavy-tests --test stress`.

#![cfg(feature = "heavy-tests")]

use minidsm::common::{CallbackFailurePolicy, LockGrade};
use minidsm::coordinator::record::ObjectTable;
use minidsm::coordinator::ProtocolSettings;
use minidsm::LocalCluster;
use std::time::{Duration, Instant};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stress_mixed_access() {
    let cluster = LocalCluster::new(ProtocolSettings {
        callback_timeout: Duration::from_secs(2),
        probe_timeout: Duration::from_millis(500),
        on_callback_failure: CallbackFailurePolicy::Prune,
    });
    let nodes: Vec<_> = (0..8).map(|i| cluster.join(&format!("n{}", i))).collect();

    let mut names = Vec::new();
    for i in 0..4 {
        let name = format!("obj{}", i);
        let handle = nodes[0].create_object("0").await.unwrap();
        nodes[0].register_name(&name, &handle).await.unwrap();
        names.push(name);
    }

    let start = Instant::now();
    let mut tasks = Vec::new();
    for (n, node) in nodes.iter().enumerate() {
        let node = node.clone();
        let names = names.clone();
        tasks.push(tokio::spawn(async move {
            let mut handles = Vec::new();
            for name in &names {
                handles.push(node.lookup_by_name(name).await.unwrap());
            }
            for i in 0..500usize {
                let handle = &handles[(i + n) % handles.len()];
                if i % 5 == 0 {
                    handle.write(format!("{}:{}", n, i)).await.unwrap();
                } else {
                    handle.read().await.unwrap();
                }
            }
            handles
        }));
    }
    let mut all = Vec::new();
    for task in tasks {
        all.push(task.await.unwrap());
    }
    let elapsed = start.elapsed();
    println!("8 nodes x 500 accesses in {:?}", elapsed);

    let table = ObjectTable::from_snapshot(cluster.coordinator().capture().await);
    assert!(table.exclusivity_violations().is_empty());

    for obj in 0..names.len() {
        let writers = all
            .iter()
            .filter(|handles| handles[obj].grade() == LockGrade::Write)
            .count();
        assert!(writers <= 1);

        let expected = all[0][obj].read().await.unwrap();
        for handles in &all {
            assert_eq!(handles[obj].read().await.unwrap(), expected);
        }
    }
}
