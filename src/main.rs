#[macro_use]
mod checks;
mod collectors;
mod config;
mod generate;
mod inventory;
mod metrics;
mod remote;
mod reporter;
mod runner;
mod state;

use checks::CheckCatalog;
use clap::{Parser, Subcommand};
use collectors::Collector;
use config::{Config, ConfigError};
use generate::GenerateError;
use inventory::{HostRef, InventoryError, NodeInventory};
use metrics::Metrics;
use remote::process::{ProcessConnector, Transport};
use reporter::TerminalReporter;
use runner::{RunOutcome, Runner};
use state::SnapshotStore;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ceph-medic")]
#[command(version, about = "Detect common issues with Ceph clusters")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
    /// Config file, instead of ./cephmedic.yaml or ~/.cephmedic.yaml
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Ansible hosts file
    #[arg(long, global = true)]
    inventory: Option<PathBuf>,
    /// Check codes to skip, comma separated
    #[arg(long, global = true, value_delimiter = ',')]
    ignore: Vec<String>,
    /// Cluster name, instead of inferring it from /etc/ceph
    #[arg(long, global = true)]
    cluster: Option<String>,
    /// ssh config file passed as `ssh -F`
    #[arg(long, global = true)]
    ssh_config: Option<PathBuf>,
    #[arg(long, global = true)]
    concurrency: Option<usize>,
    /// Write run metrics in the node-exporter textfile format
    #[arg(long, global = true)]
    metrics_file: Option<PathBuf>,
    #[arg(long, global = true)]
    print_default_config: bool,
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Collect from every host and run all checks (default)
    Check,
    /// Create an Ansible hosts file from `ceph report` on a running monitor
    Generate {
        /// Monitor host (or pod) to query
        monitor: String,
        /// Print the hosts file instead of writing it
        #[arg(long)]
        stdout: bool,
        #[arg(long, default_value = "hosts")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let (cfg, config_path) = match load_config(&cli) {
        Ok(loaded) => loaded,
        Err(err) => {
            init_tracing(None, "info");
            error!(error = %err, "failed to load configuration");
            eprintln!("{err}");
            std::process::exit(RunOutcome::Fatal.exit_code());
        }
    };
    let log_file = init_tracing(Some(&cfg.log.path), &cfg.log.level);
    info!(
        config = ?config_path,
        deployment = ?cfg.deployment.kind,
        concurrency = cfg.concurrency,
        "starting ceph-medic"
    );

    let code = match cli.command.clone().unwrap_or(Command::Check) {
        Command::Check => run_checks(&cli, &cfg, log_file).await,
        Command::Generate {
            monitor,
            stdout,
            output,
        } => run_generate(&cfg, &monitor, (!stdout).then_some(output.as_path())).await,
    };
    std::process::exit(code);
}

async fn run_checks(cli: &Cli, cfg: &Config, log_file: Option<PathBuf>) -> i32 {
    let nodes = match load_inventory(cfg, cli.inventory.as_deref()).await {
        Ok(nodes) => nodes,
        Err(err) => {
            error!(error = %err, "failed to load the inventory");
            eprintln!("{err}");
            return RunOutcome::Fatal.exit_code();
        }
    };
    if nodes.values().all(Vec::is_empty) {
        warn!("inventory has no Ceph hosts, nothing will be checked");
    }

    let session_timeout = match cfg.session_timeout() {
        Ok(timeout) => timeout,
        Err(err) => {
            error!(error = %err, "invalid session timeout");
            return RunOutcome::Fatal.exit_code();
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received Ctrl+C, skipping hosts that are still pending");
                let _ = shutdown_tx.send(true);
            }
            Err(err) => error!(error = %err, "failed to listen for Ctrl+C"),
        }
    });

    let connector = Arc::new(ProcessConnector::new(transport(cfg)));
    let collector = Collector::new(
        connector,
        cfg.concurrency,
        session_timeout,
        cfg.cluster_name.clone(),
    );
    let mut reporter = TerminalReporter::stdout(cli.no_color);
    let mut store = SnapshotStore::new(nodes);

    let collection = match collector.collect(&mut store, &mut reporter, shutdown_rx).await {
        Ok(summary) => summary,
        Err(err) => {
            error!(error = %err, "collection failed");
            eprintln!("{err}");
            return RunOutcome::Fatal.exit_code();
        }
    };

    let catalog = CheckCatalog::builtin();
    let mut runner = Runner::new(&catalog, cfg.ignore.iter().cloned()).with_log_path(log_file);
    let totals = match runner.run(&store, &mut reporter) {
        Ok(totals) => totals,
        Err(err) => {
            error!(error = %err, "check run failed");
            eprintln!("{err}");
            return RunOutcome::Fatal.exit_code();
        }
    };

    if let Some(path) = &cli.metrics_file {
        // Metrics are a side channel, a failure here does not change the outcome.
        match Metrics::new() {
            Ok(metrics) => {
                metrics.update_from_run(&store, &collection, &totals);
                if let Err(err) = metrics.write_textfile(path) {
                    error!(error = %err, "failed to write metrics file");
                }
            }
            Err(err) => error!(error = %err, "failed to initialize metrics"),
        }
    }

    let outcome = totals.outcome();
    info!(
        state = ?runner.state(),
        passed = totals.passed,
        errors = totals.errors,
        warnings = totals.warnings,
        skipped = totals.skipped,
        exit_code = outcome.exit_code(),
        "run finished"
    );
    outcome.exit_code()
}

async fn run_generate(cfg: &Config, monitor: &str, output: Option<&Path>) -> i32 {
    match generate_hosts_file(cfg, monitor, output).await {
        Ok(()) => 0,
        Err(err) => {
            error!(error = %err, monitor, "failed to generate the hosts file");
            eprintln!("{err}");
            RunOutcome::Fatal.exit_code()
        }
    }
}

/// Writes the generated hosts file to `output`, or prints it when `None`.
async fn generate_hosts_file(cfg: &Config, monitor: &str, output: Option<&Path>) -> Result<(), GenerateError> {
    let connector = ProcessConnector::new(transport(cfg));
    let cluster_name = cfg
        .cluster_name
        .as_deref()
        .unwrap_or(collectors::ceph::DEFAULT_CLUSTER_NAME);
    let nodes = generate::generate(&connector, &HostRef::new(monitor), cluster_name).await?;
    let contents = generate::render_hosts_file(&nodes);
    match output {
        Some(path) => {
            generate::write_hosts_file(path, &contents)?;
            println!("hosts file written to {}", path.display());
        }
        None => print!("{contents}"),
    }
    Ok(())
}

/// Loads the config file and applies command line overrides on top.
fn load_config(cli: &Cli) -> Result<(Config, Option<PathBuf>), ConfigError> {
    let (mut cfg, path) = Config::load(cli.config.as_deref())?;
    if let Some(cluster) = &cli.cluster {
        cfg.cluster_name = Some(cluster.clone());
    }
    if let Some(ssh_config) = &cli.ssh_config {
        cfg.ssh_config = Some(ssh_config.clone());
    }
    if let Some(concurrency) = cli.concurrency {
        cfg.concurrency = concurrency;
    }
    for code in &cli.ignore {
        let code = code.trim();
        if !code.is_empty() && !cfg.ignore.iter().any(|known| known == code) {
            cfg.ignore.push(code.to_string());
        }
    }
    cfg.validate()?;
    Ok((cfg, path))
}

async fn load_inventory(cfg: &Config, cli_inventory: Option<&Path>) -> Result<NodeInventory, InventoryError> {
    if let Some(executable) = cfg.deployment.kind.platform_executable() {
        return inventory::load_from_platform(
            executable,
            &cfg.deployment.namespace,
            cfg.deployment.context.as_deref(),
        )
        .await;
    }
    let explicit = cli_inventory.or(cfg.inventory.as_deref());
    if explicit.is_none() && !cfg.nodes.is_empty() {
        return Ok(inventory::from_groups(cfg.nodes.clone()));
    }
    match inventory::locate_hosts_file(explicit)? {
        Some(path) => inventory::load_hosts_file(&path),
        None => Ok(NodeInventory::new()),
    }
}

fn transport(cfg: &Config) -> Transport {
    match cfg.deployment.kind.platform_executable() {
        Some(executable) => Transport::Kubectl {
            executable: executable.to_string(),
            namespace: cfg.deployment.namespace.clone(),
            context: cfg.deployment.context.clone(),
        },
        None => Transport::Ssh {
            ssh_config: cfg.ssh_config.clone(),
            user: cfg.ssh_user.clone(),
            container_runtime: cfg.deployment.container_runtime.clone(),
        },
    }
}

/// Stdout carries the report, so records go to a daily log file under
/// `log_dir`. Falls back to stderr when the file cannot be opened.
fn init_tracing(log_dir: Option<&Path>, level: &str) -> Option<PathBuf> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let opened = log_dir.and_then(|dir| match open_log_file(dir) {
        Ok(opened) => Some(opened),
        Err(err) => {
            eprintln!("unable to open log file in {}: {err}", dir.display());
            None
        }
    });
    match opened {
        Some((path, file)) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
            Some(path)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

fn open_log_file(dir: &Path) -> std::io::Result<(PathBuf, File)> {
    fs::create_dir_all(dir)?;
    let path = dir.join(log_file_name(chrono::Utc::now().date_naive()));
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((path, file))
}

fn log_file_name(date: chrono::NaiveDate) -> String {
    format!("ceph-medic-{}.log", date.format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeploymentKind;
    use crate::inventory::{HostRef, Role};
    use std::io::Write;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("ceph-medic").chain(args.iter().copied()))
    }

    #[test]
    fn check_is_the_default_command() {
        assert_eq!(cli(&["--ignore", "WMON3"]).command, None);
        let parsed = cli(&["check", "--ignore", "WMON3"]);
        assert_eq!(parsed.command, Some(Command::Check));
        assert_eq!(parsed.ignore, vec!["WMON3".to_string()]);
    }

    #[test]
    fn generate_takes_a_monitor() {
        let parsed = cli(&["generate", "mon0", "--stdout"]);
        assert_eq!(
            parsed.command,
            Some(Command::Generate {
                monitor: "mon0".to_string(),
                stdout: true,
                output: PathBuf::from("hosts"),
            })
        );
    }

    #[test]
    fn log_file_is_named_by_day() {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(log_file_name(date), "ceph-medic-2024-03-07.log");
    }

    #[test]
    fn cli_overrides_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"concurrency: 4\nignore: [WMON3]\n").unwrap();
        let path = file.path().display().to_string();

        let cli = cli(&[
            "--config",
            path.as_str(),
            "--ignore",
            "WMON4,WMON3",
            "--cluster",
            "prod",
            "--concurrency",
            "2",
        ]);
        let (cfg, loaded) = load_config(&cli).unwrap();
        assert_eq!(loaded.as_deref(), Some(file.path()));
        assert_eq!(cfg.concurrency, 2);
        assert_eq!(cfg.cluster_name.as_deref(), Some("prod"));
        assert_eq!(cfg.ignore, vec!["WMON3".to_string(), "WMON4".to_string()]);
    }

    #[test]
    fn invalid_cli_override_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().display().to_string();
        let cli = cli(&["--config", path.as_str(), "--cluster", "a/b"]);
        assert!(matches!(load_config(&cli), Err(ConfigError::Validation(_))));
    }

    #[tokio::test]
    async fn inventory_comes_from_hosts_file_before_inline_nodes() {
        let mut hosts = tempfile::NamedTempFile::new().unwrap();
        hosts.write_all(b"[mons]\nmon0\n\n[osds]\nosd0\nosd1\n").unwrap();
        let mut cfg = Config::default();
        cfg.nodes.insert("mgrs".to_string(), vec![HostRef::new("mgr0")]);

        let nodes = load_inventory(&cfg, Some(hosts.path())).await.unwrap();
        assert_eq!(nodes[&Role::Osd].len(), 2);
        assert!(!nodes.contains_key(&Role::Mgr));

        let nodes = load_inventory(&cfg, None).await.unwrap();
        assert_eq!(nodes[&Role::Mgr], vec![HostRef::new("mgr0")]);
    }

    #[test]
    fn transport_follows_deployment_kind() {
        let mut cfg = Config::default();
        assert!(matches!(transport(&cfg), Transport::Ssh { .. }));

        cfg.deployment.kind = DeploymentKind::Kubernetes;
        match transport(&cfg) {
            Transport::Kubectl { executable, namespace, .. } => {
                assert_eq!(executable, "kubectl");
                assert_eq!(namespace, "rook-ceph");
            }
            other => panic!("unexpected transport {other:?}"),
        }
    }
}
