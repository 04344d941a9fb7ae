use anyhow::Result;
use clap::{Parser, Subcommand};
use securewatch_core::alert_log::AlertLog;
use securewatch_core::bus::EventBus;
use securewatch_core::model::ProtectedPath;
use securewatch_core::paths::{data_dir, log_dir, path_store_file};
use securewatch_core::store::PathStore;
use securewatch_service::filewatch::FileMonitor;
use securewatch_service::firewall::Ufw;
use securewatch_service::netwatch::PacketMonitor;
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const ALERT_LOG_MAX_BYTES: u64 = 5 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(author, version, about = "SecureWatch host intrusion detection agent", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the detection pipeline (file monitor + packet capture)
    Run {
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Capture interface (default: all interfaces)
        #[arg(short, long)]
        interface: Option<String>,
        /// Stop capture after this many packets
        #[arg(short, long)]
        count: Option<u32>,
        /// Run the file monitor only
        #[arg(long)]
        no_capture: bool,
    },
    /// Control the host firewall
    Firewall {
        #[command(subcommand)]
        action: FirewallAction,
    },
    /// Add a path to the protected set
    AddPath {
        path: PathBuf,
        #[arg(long)]
        data_dir: Option<PathBuf>,
        /// Lock the path automatically after repeated access attempts
        #[arg(long)]
        auto_lock: bool,
        #[arg(long)]
        no_write_alert: bool,
        #[arg(long)]
        no_delete_alert: bool,
    },
    /// Remove a path from the protected set
    RemovePath {
        path: PathBuf,
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// List the protected set
    ListPaths {
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum FirewallAction {
    Enable,
    Disable,
    Reload,
    Status {
        #[arg(long)]
        verbose: bool,
    },
    /// List normalized rules
    List,
    AllowPort {
        port: u16,
        #[arg(long)]
        proto: Option<String>,
    },
    DenyPort {
        port: u16,
        #[arg(long)]
        proto: Option<String>,
    },
    AllowIp {
        ip: String,
    },
    DenyIp {
        ip: String,
    },
    AllowService {
        name: String,
    },
    DenyService {
        name: String,
    },
    /// Delete a rule by the text used to add it, e.g. "22/tcp"
    Delete {
        rule: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            data_dir,
            interface,
            count,
            no_capture,
        } => run_command(data_dir, interface, count, no_capture).await,
        Commands::Firewall { action } => firewall_command(action),
        Commands::AddPath {
            path,
            data_dir,
            auto_lock,
            no_write_alert,
            no_delete_alert,
        } => add_path_command(path, data_dir, auto_lock, no_write_alert, no_delete_alert),
        Commands::RemovePath { path, data_dir } => remove_path_command(path, data_dir),
        Commands::ListPaths { data_dir } => list_paths_command(data_dir),
    }
}

fn resolve_data_dir(data_dir_override: Option<PathBuf>) -> Result<PathBuf> {
    let data = match data_dir_override {
        Some(dir) => dir,
        None => data_dir()?,
    };
    std::fs::create_dir_all(&data)?;
    Ok(data)
}

async fn run_command(
    data_dir_override: Option<PathBuf>,
    interface: Option<String>,
    count: Option<u32>,
    no_capture: bool,
) -> Result<()> {
    let data = resolve_data_dir(data_dir_override)?;
    let logs = log_dir().unwrap_or_else(|_| data.join("logs"));
    std::fs::create_dir_all(&logs)?;

    let bus = EventBus::new();
    let store = PathStore::new(path_store_file(&data));
    let alerts = AlertLog::new(logs.join("alerts.log"), ALERT_LOG_MAX_BYTES)?;

    // keep one subscriber draining the bus so publishes from background
    // threads always have a receiver
    let mut rx = bus.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => info!(kind = ?event.kind, data = %event.data, "event"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "event printer lagged")
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let monitor = FileMonitor::new(store, alerts, bus.clone());
    monitor.start().await?;

    let capture = PacketMonitor::new(bus.clone());
    if !no_capture {
        if let Err(err) = capture.start(interface.as_deref(), count) {
            warn!(error = %err, "packet capture not started");
        }
    }

    info!("agent started");
    signal::ctrl_c().await?;
    info!("agent stopping");

    capture.stop();
    monitor.stop().await;
    printer.abort();
    Ok(())
}

fn firewall_command(action: FirewallAction) -> Result<()> {
    let ufw = Ufw::new();
    ufw.ensure_installed()?;
    let output = match action {
        FirewallAction::Enable => ufw.enable()?,
        FirewallAction::Disable => ufw.disable()?,
        FirewallAction::Reload => ufw.reload()?,
        FirewallAction::Status { verbose } => ufw.status(verbose)?,
        FirewallAction::List => {
            for rule in ufw.list_rules()? {
                let direction = rule
                    .direction
                    .map(|d| format!(" {d:?}").to_uppercase())
                    .unwrap_or_default();
                println!(
                    "[{}] {} {:?}{} {}",
                    rule.number, rule.matcher, rule.action, direction, rule.source
                );
            }
            return Ok(());
        }
        FirewallAction::AllowPort { port, proto } => ufw.allow_port(port, proto.as_deref())?,
        FirewallAction::DenyPort { port, proto } => ufw.deny_port(port, proto.as_deref())?,
        FirewallAction::AllowIp { ip } => ufw.allow_ip(&ip)?,
        FirewallAction::DenyIp { ip } => ufw.deny_ip(&ip)?,
        FirewallAction::AllowService { name } => ufw.allow_service(&name)?,
        FirewallAction::DenyService { name } => ufw.deny_service(&name)?,
        FirewallAction::Delete { rule } => ufw.remove_rule(&rule)?,
    };
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

fn add_path_command(
    path: PathBuf,
    data_dir_override: Option<PathBuf>,
    auto_lock: bool,
    no_write_alert: bool,
    no_delete_alert: bool,
) -> Result<()> {
    let data = resolve_data_dir(data_dir_override)?;
    let store = PathStore::new(path_store_file(&data));
    let mut records = store.load()?;
    if records.iter().any(|r| r.path == path) {
        anyhow::bail!("path already protected: {}", path.display());
    }
    let mut record = ProtectedPath::new(path);
    record.auto_lock = auto_lock;
    record.alert_on_write = !no_write_alert;
    record.alert_on_delete = !no_delete_alert;
    println!("protected: {} ({})", record.path.display(), record.id);
    records.push(record);
    store.save(&records)?;
    Ok(())
}

fn remove_path_command(path: PathBuf, data_dir_override: Option<PathBuf>) -> Result<()> {
    let data = resolve_data_dir(data_dir_override)?;
    let store = PathStore::new(path_store_file(&data));
    let mut records = store.load()?;
    let before = records.len();
    records.retain(|r| r.path != path);
    if records.len() == before {
        anyhow::bail!("path not protected: {}", path.display());
    }
    store.save(&records)?;
    println!("removed: {}", path.display());
    Ok(())
}

fn list_paths_command(data_dir_override: Option<PathBuf>) -> Result<()> {
    let data = resolve_data_dir(data_dir_override)?;
    let store = PathStore::new(path_store_file(&data));
    for record in store.load()? {
        println!(
            "{}\t{:?}\t{:?}\tattempts={}\tauto_lock={}",
            record.path.display(),
            record.kind,
            record.status,
            record.access_attempts,
            record.auto_lock
        );
    }
    Ok(())
}
