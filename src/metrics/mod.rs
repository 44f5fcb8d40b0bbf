//! # Métricas
//! src/metrics/mod.rs
//!
//! Contadores por contexto:
//! - Conexiones aceptadas y rechazadas por la ACL
//! - Conexiones procesadas y fallidas
//! - Latencia del handler (p50, p99) y uptime

pub mod collector;

pub use collector::{ServerStats, StatsSnapshot};
