//! Check registry. Checks are plain functions registered explicitly by
//! name; only names starting with `check` are run, in lexicographic order.

/// Builds a [`CheckModule`] named after each function identifier.
macro_rules! check_module {
    ($name:expr, $ty:ty; $($check:ident),* $(,)?) => {
        $crate::checks::CheckModule::<$ty>::new(
            $name,
            vec![$((stringify!($check), $check as $ty)),*],
        )
    };
}

pub mod cluster;
pub mod common;
pub mod mons;
pub mod osds;

use crate::inventory::Role;
use crate::state::{HostMetadata, SnapshotStore};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::warn;

pub const CHECK_PREFIX: &str = "check";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    /// Severity is carried by the first letter of a code: `E` or `W`.
    /// Anything else is a malformed code and counts as an error.
    pub fn from_code(code: &str) -> Severity {
        match code.chars().next() {
            Some('E') => Severity::Error,
            Some('W') => Severity::Warning,
            _ => {
                warn!(code, "check code has no severity prefix, treating it as an error");
                Severity::Error
            }
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub code: String,
    pub message: String,
}

impl Finding {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn severity(&self) -> Severity {
        Severity::from_code(&self.code)
    }
}

/// Raised by a check that finds data it cannot interpret. Such a failure is
/// a defect of the check, not a finding about the cluster.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("{field} has an unexpected value: {value}")]
    InvalidValue { field: String, value: String },
    #[error("missing metadata: {0}")]
    MissingMetadata(String),
}

pub type CheckResult = Result<Option<Finding>, CheckError>;

pub type HostCheckFn = fn(&SnapshotStore, &str, &HostMetadata) -> CheckResult;
pub type ClusterCheckFn = fn(&SnapshotStore) -> CheckResult;

#[derive(Clone)]
pub struct CheckModule<F> {
    pub name: &'static str,
    entries: Vec<(&'static str, F)>,
}

pub type HostModule = CheckModule<HostCheckFn>;
pub type ClusterModule = CheckModule<ClusterCheckFn>;

impl<F: Copy> CheckModule<F> {
    pub fn new(name: &'static str, entries: Vec<(&'static str, F)>) -> Self {
        Self { name, entries }
    }

    pub fn with_entry(mut self, name: &'static str, check: F) -> Self {
        self.entries.push((name, check));
        self
    }

    /// Registered checks in execution order.
    pub fn list_checks(&self) -> Vec<(&'static str, F)> {
        let mut checks: Vec<_> = self
            .entries
            .iter()
            .copied()
            .filter(|(name, _)| name.starts_with(CHECK_PREFIX))
            .collect();
        checks.sort_by_key(|(name, _)| *name);
        checks
    }
}

impl<F> fmt::Debug for CheckModule<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.entries.iter().map(|(name, _)| *name).collect();
        f.debug_struct("CheckModule")
            .field("name", &self.name)
            .field("entries", &names)
            .finish()
    }
}

/// Every module a run evaluates: `common` for all hosts, an optional module
/// per role, and the cluster-wide module.
#[derive(Debug, Clone)]
pub struct CheckCatalog {
    pub common: HostModule,
    pub per_role: BTreeMap<Role, HostModule>,
    pub cluster: ClusterModule,
}

impl CheckCatalog {
    pub fn builtin() -> Self {
        Self {
            common: common::module(),
            per_role: BTreeMap::from([(Role::Mon, mons::module()), (Role::Osd, osds::module())]),
            cluster: cluster::module(),
        }
    }

    /// `common` first, then the role's own module when there is one.
    pub fn host_modules(&self, role: Role) -> impl Iterator<Item = &HostModule> {
        std::iter::once(&self.common).chain(self.per_role.get(&role))
    }
}
