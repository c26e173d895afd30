//! Prometheus-compatible metrics endpoint
//!
//! Exposes replication server metrics in Prometheus format.
//! Default endpoint: http://localhost:9090/metrics

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Metrics registry for the replication server
#[derive(Debug)]
pub struct Metrics {
    // Session counts
    pub sessions_active: AtomicU64,
    pub sessions_evicted_total: AtomicU64,

    // Entity counts
    pub entities_active: AtomicU64,
    pub entities_pooled: AtomicU64,
    pub entities_constructed: AtomicU64,

    // Interest management
    pub visibility_pairs: AtomicU64,
    pub visibility_gains_total: AtomicU64,
    pub visibility_losses_total: AtomicU64,

    // Broadcast
    pub batches_sent_total: AtomicU64,
    pub batch_bytes_sent_total: AtomicU64,

    // Health
    pub probes_sent_total: AtomicU64,
    pub probes_failed_total: AtomicU64,

    // Tick timing (microseconds)
    pub tick_time_us: AtomicU64,
    pub tick_time_p95_us: AtomicU64,
    pub tick_time_p99_us: AtomicU64,
    pub tick_time_max_us: AtomicU64,
    pub tick_count: AtomicU64,

    start_time: Instant,

    // Rolling tick times for percentile calculation (VecDeque for O(1) pop_front)
    tick_history: RwLock<VecDeque<u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            sessions_active: AtomicU64::new(0),
            sessions_evicted_total: AtomicU64::new(0),
            entities_active: AtomicU64::new(0),
            entities_pooled: AtomicU64::new(0),
            entities_constructed: AtomicU64::new(0),
            visibility_pairs: AtomicU64::new(0),
            visibility_gains_total: AtomicU64::new(0),
            visibility_losses_total: AtomicU64::new(0),
            batches_sent_total: AtomicU64::new(0),
            batch_bytes_sent_total: AtomicU64::new(0),
            probes_sent_total: AtomicU64::new(0),
            probes_failed_total: AtomicU64::new(0),
            tick_time_us: AtomicU64::new(0),
            tick_time_p95_us: AtomicU64::new(0),
            tick_time_p99_us: AtomicU64::new(0),
            tick_time_max_us: AtomicU64::new(0),
            tick_count: AtomicU64::new(0),
            start_time: Instant::now(),
            tick_history: RwLock::new(VecDeque::with_capacity(1000)),
        }
    }

    /// Record a tick time and update percentiles
    pub fn record_tick_time(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.tick_time_us.store(us, Ordering::Relaxed);
        self.tick_count.fetch_add(1, Ordering::Relaxed);

        let mut history = self.tick_history.write();
        history.push_back(us);

        // Keep last 1000 samples
        while history.len() > 1000 {
            history.pop_front();
        }

        if history.len() >= 10 {
            let mut sorted: Vec<u64> = history.iter().copied().collect();
            sorted.sort_unstable();

            let p95_idx = (sorted.len() as f32 * 0.95) as usize;
            let p99_idx = (sorted.len() as f32 * 0.99) as usize;

            self.tick_time_p95_us
                .store(sorted[p95_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_p99_us
                .store(sorted[p99_idx.min(sorted.len() - 1)], Ordering::Relaxed);
            self.tick_time_max_us
                .store(sorted.last().copied().unwrap_or(0), Ordering::Relaxed);
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Generate Prometheus-format metrics output
    pub fn to_prometheus(&self) -> String {
        let mut output = String::with_capacity(4096);

        macro_rules! metric {
            ($name:expr, $help:expr, $type:expr, $value:expr) => {
                output.push_str(&format!(
                    "# HELP {} {}\n# TYPE {} {}\n{} {}\n",
                    $name, $help, $name, $type, $name, $value
                ));
            };
        }

        metric!("emberhold_sessions_active", "Connected sessions", "gauge",
            self.sessions_active.load(Ordering::Relaxed));
        metric!("emberhold_sessions_evicted_total", "Sessions evicted by the health monitor", "counter",
            self.sessions_evicted_total.load(Ordering::Relaxed));

        metric!("emberhold_entities_active", "Active replicated entities", "gauge",
            self.entities_active.load(Ordering::Relaxed));
        metric!("emberhold_entities_pooled", "Inactive entities parked in the pool", "gauge",
            self.entities_pooled.load(Ordering::Relaxed));
        metric!("emberhold_entities_constructed", "Entity instances ever constructed", "gauge",
            self.entities_constructed.load(Ordering::Relaxed));

        metric!("emberhold_visibility_pairs", "Currently visible (session, entity) pairs", "gauge",
            self.visibility_pairs.load(Ordering::Relaxed));
        metric!("emberhold_visibility_gains_total", "Visibility gain transitions", "counter",
            self.visibility_gains_total.load(Ordering::Relaxed));
        metric!("emberhold_visibility_losses_total", "Visibility loss transitions", "counter",
            self.visibility_losses_total.load(Ordering::Relaxed));

        metric!("emberhold_batches_sent_total", "Snapshot batches sent", "counter",
            self.batches_sent_total.load(Ordering::Relaxed));
        metric!("emberhold_batch_bytes_sent_total", "Snapshot batch bytes sent", "counter",
            self.batch_bytes_sent_total.load(Ordering::Relaxed));

        metric!("emberhold_probes_sent_total", "Liveness probes sent", "counter",
            self.probes_sent_total.load(Ordering::Relaxed));
        metric!("emberhold_probes_failed_total", "Liveness probes failed", "counter",
            self.probes_failed_total.load(Ordering::Relaxed));

        metric!("emberhold_tick_time_microseconds", "Current tick time in microseconds", "gauge",
            self.tick_time_us.load(Ordering::Relaxed));
        metric!("emberhold_tick_time_p95_microseconds", "95th percentile tick time", "gauge",
            self.tick_time_p95_us.load(Ordering::Relaxed));
        metric!("emberhold_tick_time_p99_microseconds", "99th percentile tick time", "gauge",
            self.tick_time_p99_us.load(Ordering::Relaxed));
        metric!("emberhold_tick_time_max_microseconds", "Maximum tick time", "gauge",
            self.tick_time_max_us.load(Ordering::Relaxed));
        metric!("emberhold_tick_count", "Total ticks processed", "counter",
            self.tick_count.load(Ordering::Relaxed));

        metric!("emberhold_uptime_seconds", "Server uptime in seconds", "counter",
            self.uptime_seconds());

        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the metrics HTTP server
pub async fn start_metrics_server(metrics: Arc<Metrics>, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (mut socket, peer) = listener.accept().await?;
        let metrics = metrics.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; 1024];

            match socket.read(&mut buffer).await {
                Ok(n) if n > 0 => {
                    let request = String::from_utf8_lossy(&buffer[..n]);

                    let response = if request.starts_with("GET /metrics") {
                        let body = metrics.to_prometheus();
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    } else if request.starts_with("GET /health") || request.starts_with("GET /") {
                        let body = "OK";
                        format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        )
                    } else {
                        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                    };

                    if let Err(e) = socket.write_all(response.as_bytes()).await {
                        debug!("Failed to write metrics response to {}: {}", peer, e);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("Failed to read from metrics socket {}: {}", peer, e);
                }
            }
        });
    }
}
