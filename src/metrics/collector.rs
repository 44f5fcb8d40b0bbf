//! # Contadores del Servidor
//! src/metrics/collector.rs
//!
//! Contadores por contexto que actualizan el maestro (aceptadas, rechazadas)
//! y los workers (procesadas, fallidas, latencia del handler).

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Máximo de latencias guardadas para calcular percentiles
const LATENCY_WINDOW: usize = 10_000;

/// Contadores thread-safe de un contexto
#[derive(Debug)]
pub struct ServerStats {
    accepted: AtomicU64,
    rejected: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    /// Latencias del handler en microsegundos (ventana deslizante)
    latencies: Mutex<VecDeque<u64>>,
    start_time: Instant,
}

/// Foto serializable de los contadores
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub accepted: u64,
    pub rejected: u64,
    pub processed: u64,
    pub failed: u64,
    pub uptime_secs: u64,
    pub latency_p50_us: u64,
    pub latency_p99_us: u64,
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            latencies: Mutex::new(VecDeque::new()),
            start_time: Instant::now(),
        }
    }

    /// Conexión aceptada y entregada a la cola
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    /// Conexión descartada por la ACL
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// El handler terminó sin error
    pub fn record_processed(&self, latency: Duration) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
    }

    /// El handler retornó error o entró en panic
    pub fn record_failed(&self, latency: Duration) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
    }

    fn record_latency(&self, latency: Duration) {
        let mut window = self.latencies.lock().unwrap_or_else(PoisonError::into_inner);
        if window.len() >= LATENCY_WINDOW {
            window.pop_front();
        }
        window.push_back(latency.as_micros() as u64);
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let (p50, p99) = {
            let window = self.latencies.lock().unwrap_or_else(PoisonError::into_inner);
            percentiles(window.iter().copied().collect())
        };

        StatsSnapshot {
            accepted: self.accepted(),
            rejected: self.rejected(),
            processed: self.processed(),
            failed: self.failed(),
            uptime_secs: self.uptime().as_secs(),
            latency_p50_us: p50,
            latency_p99_us: p99,
        }
    }

    /// Snapshot en JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

fn percentiles(mut samples: Vec<u64>) -> (u64, u64) {
    if samples.is_empty() {
        return (0, 0);
    }
    samples.sort_unstable();
    let len = samples.len();
    (samples[len * 50 / 100], samples[len * 99 / 100])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_counters() {
        let stats = ServerStats::new();
        stats.record_accepted();
        stats.record_accepted();
        stats.record_rejected();
        stats.record_processed(Duration::from_millis(3));
        stats.record_failed(Duration::from_millis(1));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.accepted, 2);
        assert_eq!(snapshot.rejected, 1);
        assert_eq!(snapshot.processed, 1);
        assert_eq!(snapshot.failed, 1);
    }

    #[test]
    fn test_percentiles() {
        let stats = ServerStats::new();
        for i in 1..=100 {
            stats.record_processed(Duration::from_micros(i));
        }

        let snapshot = stats.snapshot();
        assert!(snapshot.latency_p50_us > 0);
        assert!(snapshot.latency_p99_us > snapshot.latency_p50_us);
    }

    #[test]
    fn test_latency_window_is_bounded() {
        let stats = ServerStats::new();
        for i in 0..(LATENCY_WINDOW as u64 + 500) {
            stats.record_processed(Duration::from_micros(i));
        }
        assert_eq!(stats.latencies.lock().unwrap().len(), LATENCY_WINDOW);
        assert_eq!(stats.processed(), LATENCY_WINDOW as u64 + 500);
    }

    #[test]
    fn test_concurrent_updates() {
        let stats = Arc::new(ServerStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        stats.record_accepted();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(stats.accepted(), 8000);
    }

    #[test]
    fn test_json_snapshot() {
        let stats = ServerStats::new();
        stats.record_accepted();

        let value: serde_json::Value = serde_json::from_str(&stats.to_json()).unwrap();
        assert_eq!(value["accepted"], 1);
        assert_eq!(value["processed"], 0);
        assert!(value.get("uptime_secs").is_some());
    }
}
