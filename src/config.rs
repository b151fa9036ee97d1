use crate::inventory::HostRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const CONFIG_FILE_NAME: &str = "cephmedic.yaml";
const HOME_CONFIG_FILE_NAME: &str = ".cephmedic.yaml";
const CONTAINER_RUNTIMES: [&str; 2] = ["docker", "podman"];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub inventory: Option<PathBuf>,
    #[serde(default)]
    pub ssh_config: Option<PathBuf>,
    #[serde(default)]
    pub ssh_user: Option<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_session_timeout")]
    pub session_timeout: String,
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub deployment: DeploymentConfig,
    #[serde(default)]
    pub log: LogConfig,
    /// Inline inventory keyed by group name (`mons`, `osds`, ...).
    #[serde(default)]
    pub nodes: BTreeMap<String, Vec<HostRef>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentKind {
    Baremetal,
    Kubernetes,
    Openshift,
}

impl DeploymentKind {
    /// Client used to list and exec into pods, `None` for plain hosts.
    pub fn platform_executable(self) -> Option<&'static str> {
        match self {
            DeploymentKind::Baremetal => None,
            DeploymentKind::Kubernetes => Some("kubectl"),
            DeploymentKind::Openshift => Some("oc"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeploymentConfig {
    #[serde(default = "default_deployment_kind")]
    pub kind: DeploymentKind,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default = "default_container_runtime")]
    pub container_runtime: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    #[serde(default = "default_log_path")]
    pub path: PathBuf,
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster_name: None,
            inventory: None,
            ssh_config: None,
            ssh_user: None,
            concurrency: default_concurrency(),
            session_timeout: default_session_timeout(),
            ignore: Vec::new(),
            deployment: DeploymentConfig::default(),
            log: LogConfig::default(),
            nodes: BTreeMap::new(),
        }
    }
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            kind: default_deployment_kind(),
            namespace: default_namespace(),
            context: None,
            container_runtime: default_container_runtime(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: default_log_path(),
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("the given config path does not exist: {0}")]
    NotFound(String),
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        // A file holding nothing but comments is a valid, all-default config.
        let cfg: Config = if text.lines().all(|line| {
            let line = line.trim();
            line.is_empty() || line.starts_with('#')
        }) {
            Config::default()
        } else {
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path_display,
                source,
            })?
        };

        cfg.validate()?;
        Ok(cfg)
    }

    /// Finds the config file to use: the explicit path, `./cephmedic.yaml`,
    /// then `~/.cephmedic.yaml`. `None` means built-in defaults.
    pub fn locate(explicit: Option<&Path>) -> Result<Option<PathBuf>, ConfigError> {
        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(ConfigError::NotFound(path.display().to_string()));
            }
            return Ok(Some(path.to_path_buf()));
        }
        let cwd = Path::new(CONFIG_FILE_NAME);
        if cwd.is_file() {
            return Ok(Some(cwd.to_path_buf()));
        }
        let home = dirs::home_dir().map(|home| home.join(HOME_CONFIG_FILE_NAME));
        if let Some(home) = home.filter(|path| path.is_file()) {
            return Ok(Some(home));
        }
        debug!("no config file found, using defaults");
        Ok(None)
    }

    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        match Self::locate(explicit)? {
            Some(path) => Ok((Self::load_from_file(&path)?, Some(path))),
            None => Ok((Self::default(), None)),
        }
    }

    pub fn session_timeout(&self) -> Result<Duration, ConfigError> {
        humantime::parse_duration(self.session_timeout.trim()).map_err(|err| {
            ConfigError::Validation(format!(
                "session_timeout '{}' is not a valid duration: {err}",
                self.session_timeout
            ))
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency < 1 {
            return Err(ConfigError::Validation(
                "concurrency must be >= 1".to_string(),
            ));
        }
        if self.session_timeout()? < Duration::from_secs(1) {
            return Err(ConfigError::Validation(
                "session_timeout must be at least 1s".to_string(),
            ));
        }
        if let Some(name) = &self.cluster_name {
            validate_cluster_name(name)?;
        }
        if self.ignore.iter().any(|code| code.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "ignore must not contain empty check codes".to_string(),
            ));
        }
        validate_deployment(&self.deployment)?;
        if self.log.level.trim().is_empty() {
            return Err(ConfigError::Validation(
                "log.level must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

pub fn validate_cluster_name(name: &str) -> Result<(), ConfigError> {
    if name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "cluster_name must not be empty".to_string(),
        ));
    }
    if name.contains('/') {
        return Err(ConfigError::Validation(format!(
            "cluster_name '{name}' must not contain '/'"
        )));
    }
    Ok(())
}

fn validate_deployment(cfg: &DeploymentConfig) -> Result<(), ConfigError> {
    if cfg.kind != DeploymentKind::Baremetal && cfg.namespace.trim().is_empty() {
        return Err(ConfigError::Validation(
            "deployment.namespace must not be empty".to_string(),
        ));
    }
    if !CONTAINER_RUNTIMES.contains(&cfg.container_runtime.as_str()) {
        return Err(ConfigError::Validation(format!(
            "deployment.container_runtime '{}' must be one of: {}",
            cfg.container_runtime,
            CONTAINER_RUNTIMES.join(", ")
        )));
    }
    Ok(())
}

const fn default_concurrency() -> usize {
    8
}

fn default_session_timeout() -> String {
    "300s".to_string()
}

const fn default_deployment_kind() -> DeploymentKind {
    DeploymentKind::Baremetal
}

fn default_namespace() -> String {
    "rook-ceph".to_string()
}

fn default_container_runtime() -> String {
    "docker".to_string()
}

fn default_log_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_level() -> String {
    "info".to_string()
}
