//! Metrics facade for Trellis.
//!
//! Provides a [`MetricsRecorder`] trait with domain-specific methods and default
//! no-op implementations. A global singleton recorder is accessed via `recorder()`,
//! and convenience free functions delegate to it.
//!
//! # Usage
//!
//! Callers record metrics via free functions:
//! ```ignore
//! trellis_metrics::record_storage_read(latency_secs);
//! trellis_metrics::record_commit(version, latency_secs);
//! ```
//!
//! At startup, install a backend with [`set_global_recorder`]. Without one,
//! every call is a no-op.

#![warn(missing_docs)]

use std::sync::OnceLock;

// ═══════════════════════════════════════════════════════════════════════
// Trait
// ═══════════════════════════════════════════════════════════════════════

/// Domain-specific metrics recording trait.
///
/// All methods have default no-op implementations so backends only need
/// to override the metrics they care about.
#[allow(unused_variables)]
pub trait MetricsRecorder: Send + Sync + 'static {
    // ── Storage ──────────────────────────────────────────────────────

    /// Record a storage read latency.
    fn record_storage_read(&self, latency_secs: f64) {}

    /// Record a storage write latency.
    fn record_storage_write(&self, latency_secs: f64) {}

    // ── Commit ───────────────────────────────────────────────────────

    /// Record a multi-store commit.
    fn record_commit(&self, version: i64, latency_secs: f64) {}

    /// Set the latest committed version gauge.
    fn set_latest_version(&self, version: i64) {}

    /// Set the earliest retained version gauge.
    fn set_earliest_version(&self, version: i64) {}

    // ── Pruning ──────────────────────────────────────────────────────

    /// Record a pruning pass over the mounted stores.
    fn record_versions_pruned(&self, count: usize, latency_secs: f64) {}

    // ── Queries ──────────────────────────────────────────────────────

    /// Record a query latency.
    fn record_query(&self, latency_secs: f64) {}

    // ── Snapshots ────────────────────────────────────────────────────

    /// Record per-store totals for a snapshot export segment.
    fn record_snapshot_store_exported(
        &self,
        store_name: &str,
        num_keys: u64,
        key_bytes: u64,
        value_bytes: u64,
    ) {
    }

    /// Record per-store totals for a snapshot import segment.
    fn record_snapshot_store_imported(&self, store_name: &str, num_nodes: u64) {}
}

// ═══════════════════════════════════════════════════════════════════════
// Global singleton
// ═══════════════════════════════════════════════════════════════════════

struct NoopRecorder;
impl MetricsRecorder for NoopRecorder {}

static RECORDER: OnceLock<Box<dyn MetricsRecorder>> = OnceLock::new();

/// Install a global metrics recorder.
///
/// Can only be called once. Subsequent calls are silently ignored.
pub fn set_global_recorder(recorder: Box<dyn MetricsRecorder>) {
    let _ = RECORDER.set(recorder);
}

/// Get the global metrics recorder.
///
/// Returns a no-op recorder if none has been installed.
#[inline]
fn recorder() -> &'static dyn MetricsRecorder {
    RECORDER.get().map(|r| r.as_ref()).unwrap_or(&NoopRecorder)
}

// ═══════════════════════════════════════════════════════════════════════
// Convenience free functions
// ═══════════════════════════════════════════════════════════════════════

/// Record a storage read latency.
#[inline]
pub fn record_storage_read(latency_secs: f64) {
    recorder().record_storage_read(latency_secs);
}

/// Record a storage write latency.
#[inline]
pub fn record_storage_write(latency_secs: f64) {
    recorder().record_storage_write(latency_secs);
}

/// Record a multi-store commit.
#[inline]
pub fn record_commit(version: i64, latency_secs: f64) {
    recorder().record_commit(version, latency_secs);
}

/// Set the latest committed version gauge.
#[inline]
pub fn set_latest_version(version: i64) {
    recorder().set_latest_version(version);
}

/// Set the earliest retained version gauge.
#[inline]
pub fn set_earliest_version(version: i64) {
    recorder().set_earliest_version(version);
}

/// Record a pruning pass over the mounted stores.
#[inline]
pub fn record_versions_pruned(count: usize, latency_secs: f64) {
    recorder().record_versions_pruned(count, latency_secs);
}

/// Record a query latency.
#[inline]
pub fn record_query(latency_secs: f64) {
    recorder().record_query(latency_secs);
}

/// Record per-store totals for a snapshot export segment.
#[inline]
pub fn record_snapshot_store_exported(
    store_name: &str,
    num_keys: u64,
    key_bytes: u64,
    value_bytes: u64,
) {
    recorder().record_snapshot_store_exported(store_name, num_keys, key_bytes, value_bytes);
}

/// Record per-store totals for a snapshot import segment.
#[inline]
pub fn record_snapshot_store_imported(store_name: &str, num_nodes: u64) {
    recorder().record_snapshot_store_imported(store_name, num_nodes);
}
