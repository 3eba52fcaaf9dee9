//! Protocol metrics
//!
//! Counters owned by one coordinator instance and rendered in the
//! Prometheus text format on `/metrics`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Histogram bucket boundaries for callback latency (in milliseconds)
const LATENCY_BUCKETS: [f64; 9] = [1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 1000.0, 5000.0];

/// Fixed-bucket latency histogram
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<AtomicU64>,
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new()
    }
}

impl Histogram {
    pub fn new() -> Self {
        Self {
            buckets: (0..=LATENCY_BUCKETS.len())
                .map(|_| AtomicU64::new(0))
                .collect(),
            sum_micros: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        let idx = LATENCY_BUCKETS
            .iter()
            .position(|&b| ms <= b)
            .unwrap_or(LATENCY_BUCKETS.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Cumulative `(upper bound, count)` pairs, ending with `+Inf`
    pub fn cumulative(&self) -> Vec<(f64, u64)> {
        let mut total = 0;
        LATENCY_BUCKETS
            .iter()
            .copied()
            .chain(std::iter::once(f64::INFINITY))
            .zip(&self.buckets)
            .map(|(bound, bucket)| {
                total += bucket.load(Ordering::Relaxed);
                (bound, total)
            })
            .collect()
    }

    fn render(&self, name: &str, out: &mut String) {
        out.push_str(&format!("# TYPE {name} histogram\n"));
        for (bound, count) in self.cumulative() {
            let le = if bound.is_infinite() {
                "+Inf".to_string()
            } else {
                bound.to_string()
            };
            out.push_str(&format!("{name}_bucket{{le=\"{le}\"}} {count}\n"));
        }
        let sum_ms = self.sum_micros.load(Ordering::Relaxed) as f64 / 1000.0;
        out.push_str(&format!("{name}_sum {sum_ms}\n"));
        out.push_str(&format!("{name}_count {}\n", self.count()));
    }
}

/// Counters for the coherence protocol
#[derive(Debug, Default)]
pub struct ProtocolMetrics {
    pub ids_allocated: AtomicU64,
    pub registrations: AtomicU64,
    pub lookups: AtomicU64,
    pub read_grants: AtomicU64,
    pub write_grants: AtomicU64,
    pub invalidations: AtomicU64,
    pub callback_failures: AtomicU64,
    pub servers_pruned: AtomicU64,
    pub terminations: AtomicU64,
    pub snapshots_written: AtomicU64,
    pub callback_latency: Histogram,
}

impl ProtocolMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn to_prometheus(&self) -> String {
        let counters: [(&str, &AtomicU64); 10] = [
            ("minidsm_ids_allocated_total", &self.ids_allocated),
            ("minidsm_registrations_total", &self.registrations),
            ("minidsm_lookups_total", &self.lookups),
            ("minidsm_read_grants_total", &self.read_grants),
            ("minidsm_write_grants_total", &self.write_grants),
            ("minidsm_invalidations_total", &self.invalidations),
            ("minidsm_callback_failures_total", &self.callback_failures),
            ("minidsm_servers_pruned_total", &self.servers_pruned),
            ("minidsm_terminations_total", &self.terminations),
            ("minidsm_snapshots_written_total", &self.snapshots_written),
        ];

        let mut out = String::new();
        for (name, counter) in counters {
            out.push_str(&format!("# TYPE {name} counter\n"));
            out.push_str(&format!("{name} {}\n", counter.load(Ordering::Relaxed)));
        }
        self.callback_latency
            .render("minidsm_callback_latency_ms", &mut out);
        out
    }
}
