use crate::agent::TalosConnector;
use crate::cli::{Cli, Commands};
use crate::config::talosconfig::TalosConfig;
use crate::config::Config;
use crate::fleet::Registry;
use crate::machine::{AddressKind, MachineAggregator};
use crate::probe::IcmpEchoFactory;
use crate::{Result, TalosmonError};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

const DEFAULT_SERVICES: [&str; 3] = ["apid", "etcd", "kubelet"];

pub async fn handle_command(cli: Cli) -> Result<()> {
    let config_path = resolve_config_path(cli.config)?;
    let config = Config::load(&config_path)?;
    let cluster = cli.cluster.as_deref();

    match cli.command {
        Some(Commands::Status {
            settle_ms,
            services,
        }) => handle_status(&config, cluster, Duration::from_millis(settle_ms), services).await,
        Some(Commands::Watch {
            interval_ms,
            services,
        }) => handle_watch(&config, cluster, Duration::from_millis(interval_ms), services).await,
        Some(Commands::CheckConfig) => handle_check_config(&config, &config_path),
        None => Err(TalosmonError::InvalidArgument(
            "no command specified".to_string(),
        )),
    }
}

fn resolve_config_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    explicit.or_else(Config::default_path).ok_or_else(|| {
        TalosmonError::ConfigInvalid(
            "cannot determine the default config location; pass --config".to_string(),
        )
    })
}

async fn start_fleet(
    config: &Config,
    cluster: Option<&str>,
    shutdown: &CancellationToken,
) -> Result<Registry> {
    let cluster = config.cluster(cluster)?;

    let client_file = cluster.config.resolve_file()?;
    let client_config = TalosConfig::load(&client_file)?;
    let connector = TalosConnector::dial(client_config.context(cluster.config.context.as_deref())?)?;
    let echo = IcmpEchoFactory::new();

    info!(
        cluster = %cluster.name,
        machines = cluster.machines.len(),
        client_config = %client_file.display(),
        "Starting fleet"
    );

    Registry::build(
        cluster.machine_specs(),
        &connector,
        &echo,
        config.probe.timing(),
        shutdown,
    )
    .await
}

async fn handle_status(
    config: &Config,
    cluster: Option<&str>,
    settle: Duration,
    services: Vec<String>,
) -> Result<()> {
    let services = services_or_default(services);
    let shutdown = CancellationToken::new();
    let registry = start_fleet(config, cluster, &shutdown).await?;

    tokio::time::sleep(settle).await;
    print_table(&registry, &services);

    registry.stop().await;
    Ok(())
}

async fn handle_watch(
    config: &Config,
    cluster: Option<&str>,
    interval: Duration,
    services: Vec<String>,
) -> Result<()> {
    if interval.is_zero() {
        return Err(TalosmonError::InvalidArgument(
            "refresh interval must be greater than zero".to_string(),
        ));
    }

    let services = services_or_default(services);
    let shutdown = CancellationToken::new();
    let registry = start_fleet(config, cluster, &shutdown).await?;

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // Skip the immediate first tick so probes get one interval to report.
    ticker.tick().await;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                print_table(&registry, &services);
                println!();
            }
        }
    }

    shutdown.cancel();
    registry.stop().await;
    Ok(())
}

fn handle_check_config(config: &Config, path: &std::path::Path) -> Result<()> {
    println!("Configuration {} is valid", path.display());
    for cluster in &config.clusters {
        let client_file = cluster
            .config
            .resolve_file()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|e| format!("<{}>", e));
        println!(
            "  {:<20} {:>3} machines  client config {}{}",
            cluster.name,
            cluster.machines.len(),
            client_file,
            cluster
                .config
                .context
                .as_deref()
                .map(|c| format!(" (context {})", c))
                .unwrap_or_default()
        );
    }
    Ok(())
}

fn services_or_default(services: Vec<String>) -> Vec<String> {
    if services.is_empty() {
        DEFAULT_SERVICES.iter().map(|s| s.to_string()).collect()
    } else {
        services
    }
}

fn print_table(registry: &Registry, services: &[String]) {
    let mut header = format!(
        "{:<20} {:<5} {:<5} {:<5} {:<12}",
        "MACHINE", "MGMT", "V4", "V6", "VERSION"
    );
    for service in services {
        header.push_str(&format!(" {:<10}", service.to_uppercase()));
    }
    println!("{}", header);
    println!("{}", "-".repeat(header.len()));

    for machine in registry.iter() {
        println!("{}", format_row(machine, services));
    }
}

fn format_row(machine: &MachineAggregator, services: &[String]) -> String {
    let liveness = |kind: AddressKind| {
        if machine.spec().address(kind).is_none() {
            "-"
        } else if machine.ping_up(kind) {
            "up"
        } else {
            "down"
        }
    };

    let version = machine.version();
    let mut row = format!(
        "{:<20} {:<5} {:<5} {:<5} {:<12}",
        truncate(machine.name(), 20),
        liveness(AddressKind::Mgmt),
        liveness(AddressKind::V4),
        liveness(AddressKind::V6),
        if version.is_empty() { "-" } else { version.as_str() },
    );

    let facts = machine.facts();
    for service in services {
        row.push_str(&format!(" {:<10}", facts.service_state(service).as_str()));
    }
    row
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", head)
    }
}
