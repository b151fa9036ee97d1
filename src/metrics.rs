//! Results of the last run in the Prometheus text format, written for the
//! node-exporter textfile collector.

use crate::collectors::CollectionSummary;
use crate::inventory::Role;
use crate::runner::RunTotals;
use crate::state::SnapshotStore;
use prometheus::core::Collector;
use prometheus::{opts, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::fs;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to encode metrics: {0}")]
    Encode(#[from] prometheus::Error),
    #[error("failed to write metrics file {path}: {source}")]
    Write { path: String, source: io::Error },
}

pub struct Metrics {
    registry: Registry,
    pub checks: GaugeVec,
    pub hosts: GaugeVec,
    pub hosts_total: Gauge,
    pub failed_hosts: Gauge,
    pub collect_duration_seconds: Gauge,
    pub last_run_timestamp_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let checks = GaugeVec::new(
            opts!("cephmedic_checks", "Check results of the last run by result"),
            &["result"],
        )?;
        let hosts = GaugeVec::new(
            opts!("cephmedic_hosts", "Collected hosts of the last run by role"),
            &["role"],
        )?;
        let hosts_total = Gauge::with_opts(opts!(
            "cephmedic_hosts_total",
            "Host and role pairs checked in the last run"
        ))?;
        let failed_hosts = Gauge::with_opts(opts!(
            "cephmedic_failed_hosts",
            "Hosts that could not be collected in the last run"
        ))?;
        let collect_duration_seconds = Gauge::with_opts(opts!(
            "cephmedic_collect_duration_seconds",
            "Time spent collecting remote node information"
        ))?;
        let last_run_timestamp_seconds = Gauge::with_opts(opts!(
            "cephmedic_last_run_timestamp_seconds",
            "Unix timestamp of the last run"
        ))?;

        register(&registry, &checks)?;
        register(&registry, &hosts)?;
        register(&registry, &hosts_total)?;
        register(&registry, &failed_hosts)?;
        register(&registry, &collect_duration_seconds)?;
        register(&registry, &last_run_timestamp_seconds)?;

        Ok(Self {
            registry,
            checks,
            hosts,
            hosts_total,
            failed_hosts,
            collect_duration_seconds,
            last_run_timestamp_seconds,
        })
    }

    pub fn update_from_run(&self, store: &SnapshotStore, collection: &CollectionSummary, totals: &RunTotals) {
        self.checks.reset();
        let results = [
            ("passed", totals.passed),
            ("error", totals.errors),
            ("warning", totals.warnings),
            ("skipped", totals.skipped),
            ("internal_error", totals.internal_errors.len()),
        ];
        for (result, count) in results {
            self.checks.with_label_values(&[result]).set(count as f64);
        }

        self.hosts.reset();
        for role in Role::ALL {
            self.hosts
                .with_label_values(&[role.group_name()])
                .set(store.collected_count(role) as f64);
        }
        self.hosts_total.set(totals.total_hosts as f64);
        self.failed_hosts.set(store.failed_hosts.len() as f64);
        self.collect_duration_seconds
            .set(collection.elapsed.as_secs_f64());

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.last_run_timestamp_seconds.set(now as f64);
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }

    /// Writes next to the target and renames, so the textfile collector
    /// never reads a partial file.
    pub fn write_textfile(&self, path: &Path) -> Result<(), MetricsError> {
        let buf = self.encode_metrics()?;
        let tmp = path.with_extension("prom.tmp");
        let write_err = |source| MetricsError::Write {
            path: path.display().to_string(),
            source,
        };
        fs::write(&tmp, buf).map_err(write_err)?;
        fs::rename(&tmp, path).map_err(write_err)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
