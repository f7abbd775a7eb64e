//! Live operational counters (spec §4.6, C8). Adapted from the teacher's
//! trace-statistics `MetricsCollector`/`MetricsPrinterConfig` pair: instead
//! of min/max/mean/variance over a simulated trace, this tracks simple
//! running counts appropriate for a long-lived daemon.

use std::sync::atomic::{AtomicU64, Ordering};

use prettytable::{row, Table};
use serde::Serialize;

#[derive(Default)]
pub struct Metrics {
    pub ticks: AtomicU64,
    pub ticks_skipped_taint_blocked: AtomicU64,
    pub scale_up_events_published: AtomicU64,
    pub scale_up_events_deferred: AtomicU64,
    pub scale_down_events_published: AtomicU64,
    pub create_worker_failures: AtomicU64,
    pub destroy_worker_failures: AtomicU64,
    pub orphans_reconciled: AtomicU64,
    pub orphan_reconciliation_skipped_inflight: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            ticks_skipped_taint_blocked: self.ticks_skipped_taint_blocked.load(Ordering::Relaxed),
            scale_up_events_published: self.scale_up_events_published.load(Ordering::Relaxed),
            scale_up_events_deferred: self.scale_up_events_deferred.load(Ordering::Relaxed),
            scale_down_events_published: self.scale_down_events_published.load(Ordering::Relaxed),
            create_worker_failures: self.create_worker_failures.load(Ordering::Relaxed),
            destroy_worker_failures: self.destroy_worker_failures.load(Ordering::Relaxed),
            orphans_reconciled: self.orphans_reconciled.load(Ordering::Relaxed),
            orphan_reconciliation_skipped_inflight: self
                .orphan_reconciliation_skipped_inflight
                .load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Serialize, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub ticks_skipped_taint_blocked: u64,
    pub scale_up_events_published: u64,
    pub scale_up_events_deferred: u64,
    pub scale_down_events_published: u64,
    pub create_worker_failures: u64,
    pub destroy_worker_failures: u64,
    pub orphans_reconciled: u64,
    pub orphan_reconciliation_skipped_inflight: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    PrettyTable,
    Json,
}

pub fn render(snapshot: &MetricsSnapshot, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            serde_json::to_string_pretty(snapshot).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::PrettyTable => {
            let mut table = Table::new();
            table.add_row(row!["Metric", "Count"]);
            table.add_row(row!["Ticks", snapshot.ticks]);
            table.add_row(row![
                "Ticks skipped (taint-blocked)",
                snapshot.ticks_skipped_taint_blocked
            ]);
            table.add_row(row![
                "Scale-up events published",
                snapshot.scale_up_events_published
            ]);
            table.add_row(row![
                "Scale-up events deferred",
                snapshot.scale_up_events_deferred
            ]);
            table.add_row(row![
                "Scale-down events published",
                snapshot.scale_down_events_published
            ]);
            table.add_row(row![
                "Create worker failures",
                snapshot.create_worker_failures
            ]);
            table.add_row(row![
                "Destroy worker failures",
                snapshot.destroy_worker_failures
            ]);
            table.add_row(row!["Orphans reconciled", snapshot.orphans_reconciled]);
            table.add_row(row![
                "Orphan reconciliation skipped (inflight)",
                snapshot.orphan_reconciliation_skipped_inflight
            ]);
            table.to_string()
        }
    }
}
