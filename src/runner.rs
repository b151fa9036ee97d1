use crate::checks::{CheckCatalog, CheckResult, Finding, Severity};
use crate::inventory::Role;
use crate::reporter::{BlockStatus, Reporter};
use crate::state::SnapshotStore;
use std::any::Any;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, error, info};

const CLUSTER_LABEL: &str = "cluster";
pub const FAILED_NODES_SECTION: &str = "Failed Nodes";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RunError {
    #[error("checks were already run")]
    AlreadyCompleted,
    #[error("cluster name was not resolved, refusing to run checks")]
    ClusterNameUnresolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    ChecksFailed,
    Fatal,
}

impl RunOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::ChecksFailed => 1,
            RunOutcome::Fatal => 2,
        }
    }
}

/// A check that failed to evaluate, as opposed to one that found a problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalError {
    pub context: String,
    pub check: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunTotals {
    pub passed: usize,
    pub errors: usize,
    pub warnings: usize,
    pub skipped: usize,
    pub total: usize,
    pub total_hosts: usize,
    pub internal_errors: Vec<InternalError>,
}

impl RunTotals {
    /// Internal errors are defects of checks, not findings about the
    /// cluster, and do not fail the run.
    pub fn outcome(&self) -> RunOutcome {
        if self.errors + self.warnings > 0 {
            RunOutcome::ChecksFailed
        } else {
            RunOutcome::Success
        }
    }

    pub fn status(&self) -> BlockStatus {
        if self.errors > 0 || !self.internal_errors.is_empty() {
            BlockStatus::Failed
        } else if self.warnings > 0 {
            BlockStatus::Warning
        } else {
            BlockStatus::Passed
        }
    }
}

/// Segments with a zero count are left out, except `passed`.
pub fn summary_line(totals: &RunTotals) -> String {
    let mut parts = vec![format!("{} passed", totals.passed)];
    let optional = [
        (totals.errors, "errors"),
        (totals.warnings, "warnings"),
        (totals.skipped, "skipped"),
        (totals.internal_errors.len(), "internal errors"),
    ];
    for (count, label) in optional {
        if count > 0 {
            parts.push(format!("{count} {label}"));
        }
    }
    format!("{}, on {} hosts", parts.join(", "), totals.total_hosts)
}

/// Tracks whether a host (or the cluster) block has been opened and how bad
/// its findings are.
#[derive(Default)]
struct Block {
    opened: bool,
    worst: Option<Severity>,
}

impl Block {
    fn status(&self) -> BlockStatus {
        match self.worst {
            None => BlockStatus::Passed,
            Some(Severity::Warning) => BlockStatus::Warning,
            Some(Severity::Error) => BlockStatus::Failed,
        }
    }
}

/// Runs every registered check against a collected snapshot, once.
pub struct Runner<'a> {
    catalog: &'a CheckCatalog,
    ignore: BTreeSet<String>,
    log_path: Option<PathBuf>,
    state: RunState,
    totals: RunTotals,
}

impl<'a> Runner<'a> {
    pub fn new(catalog: &'a CheckCatalog, ignore: impl IntoIterator<Item = String>) -> Self {
        Self {
            catalog,
            ignore: ignore.into_iter().collect(),
            log_path: None,
            state: RunState::NotStarted,
            totals: RunTotals::default(),
        }
    }

    /// Where internal errors are logged, mentioned in the final report.
    pub fn with_log_path(mut self, path: Option<PathBuf>) -> Self {
        self.log_path = path;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn run(
        &mut self,
        store: &SnapshotStore,
        reporter: &mut dyn Reporter,
    ) -> Result<RunTotals, RunError> {
        if self.state == RunState::Completed {
            return Err(RunError::AlreadyCompleted);
        }
        if store.cluster_name.is_empty() {
            return Err(RunError::ClusterNameUnresolved);
        }
        let catalog = self.catalog;
        self.state = RunState::Running;
        self.totals = RunTotals {
            total_hosts: store.total_hosts(),
            ..RunTotals::default()
        };
        start_header(store, reporter);

        for role in Role::ALL {
            let Some(hosts) = store.role_hosts(role) else {
                continue;
            };
            reporter.section(role.readable_name());
            for (hostname, data) in hosts {
                let mut block = Block::default();
                for module in catalog.host_modules(role) {
                    debug!(host = %hostname, role = %role, module = module.name, "running checks");
                    for (name, check) in module.list_checks() {
                        let result = evaluate(|| check(store, hostname, data));
                        self.record(hostname, name, result, &mut block, reporter);
                    }
                }
                reporter.finish_block(hostname, block.status());
            }
        }

        // Cluster data only means something when at least one host answered.
        if store.collected_nodes().next().is_some() {
            let checks = catalog.cluster.list_checks();
            if !checks.is_empty() {
                reporter.section(CLUSTER_LABEL);
                let mut block = Block::default();
                for (name, check) in checks {
                    let result = evaluate(|| check(store));
                    self.record(CLUSTER_LABEL, name, result, &mut block, reporter);
                }
                reporter.finish_block(CLUSTER_LABEL, block.status());
            }
        }

        if !store.failed_hosts.is_empty() {
            reporter.section(FAILED_NODES_SECTION);
            for (hostname, reason) in &store.failed_hosts {
                reporter.raw(&format!(" {hostname}"));
                reporter.raw(&format!("   {reason}"));
            }
        }

        let totals = &mut self.totals;
        totals.total = totals.errors + totals.warnings + totals.passed + totals.internal_errors.len();
        self.state = RunState::Completed;
        self.report(reporter);
        info!(
            passed = self.totals.passed,
            errors = self.totals.errors,
            warnings = self.totals.warnings,
            skipped = self.totals.skipped,
            internal_errors = self.totals.internal_errors.len(),
            "checks completed"
        );
        Ok(self.totals.clone())
    }

    fn record(
        &mut self,
        context: &str,
        check: &'static str,
        result: Result<Option<Finding>, String>,
        block: &mut Block,
        reporter: &mut dyn Reporter,
    ) {
        let finding = match result {
            Ok(Some(finding)) => finding,
            Ok(None) => {
                self.totals.passed += 1;
                return;
            }
            Err(message) => {
                error!(context, check, error = %message, "check failed to evaluate");
                self.totals.internal_errors.push(InternalError {
                    context: context.to_string(),
                    check,
                    message,
                });
                return;
            }
        };
        if self.ignore.contains(&finding.code) {
            debug!(context, check, code = %finding.code, "ignoring finding");
            self.totals.skipped += 1;
            return;
        }
        let severity = finding.severity();
        match severity {
            Severity::Error => self.totals.errors += 1,
            Severity::Warning => self.totals.warnings += 1,
        }
        if !block.opened {
            reporter.start_block(context, severity);
            block.opened = true;
        }
        if block.worst != Some(Severity::Error) {
            block.worst = Some(severity);
        }
        reporter.finding(severity, &finding.code, &finding.message);
    }

    fn report(&self, reporter: &mut dyn Reporter) {
        let totals = &self.totals;
        reporter.summary(&summary_line(totals), totals.status());
        if totals.internal_errors.is_empty() {
            return;
        }
        let hint = match &self.log_path {
            Some(path) => format!(
                "{} checks failed to evaluate, see the log file for details: {}",
                totals.internal_errors.len(),
                path.display()
            ),
            None => format!(
                "{} checks failed to evaluate, see the logs for details",
                totals.internal_errors.len()
            ),
        };
        reporter.raw(&hint);
    }
}

/// Runs one check, turning both `Err` and panics into an internal error
/// message.
fn evaluate(check: impl FnOnce() -> CheckResult) -> Result<Option<Finding>, String> {
    match panic::catch_unwind(AssertUnwindSafe(check)) {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(err.to_string()),
        Err(payload) => Err(format!("check panicked: {}", panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn start_header(store: &SnapshotStore, reporter: &mut dyn Reporter) {
    let count = |role| store.collected_count(role);
    reporter.raw(&format!("\n{:=^80}", "  Starting remote check session  "));
    reporter.raw(&format!(
        "Version: {}    Cluster Name: \"{}\"",
        env!("CARGO_PKG_VERSION"),
        store.cluster_name
    ));
    reporter.raw(&format!("Total hosts: [{}]", store.total_hosts()));
    reporter.raw(&format!(
        "OSDs: {:>4}    MONs: {:>4}     Clients: {:>4}",
        count(Role::Osd),
        count(Role::Mon),
        count(Role::Client)
    ));
    reporter.raw(&format!(
        "MDSs: {:>4}    RGWs: {:>4}     MGRs: {:>7}",
        count(Role::Mds),
        count(Role::Rgw),
        count(Role::Mgr)
    ));
    reporter.raw(&"=".repeat(80));
}
