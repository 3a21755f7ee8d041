//! `parkgate`: controller for barriers and turnstiles on an RS-485 bus.
//!
//! ```text
//! parkgate --config parkgate.toml          # poll until Ctrl+C
//! parkgate --config parkgate.toml --once   # one cycle, JSON report on stdout
//! parkgate --demo                          # simulated bus
//! parkgate check                           # validate the configuration
//! parkgate ports                           # list serial ports
//! ```
//!
//! Logging goes to stderr through `tracing`. `RUST_LOG` overrides the
//! default `info` filter.

mod demo;

use crate::demo::DemoBus;
use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use parkgate_access::{AccessValidator, CredentialStore, MemoryStore};
use parkgate_core::ModuleAddress;
use parkgate_polling::{
    BusEvent, ControllerConfig, CycleReport, EventBus, ModuleRegistry, ModuleSnapshot,
    PollingScheduler, RegistryStats, SchedulerSettings,
};
use parkgate_transport::{Link, MockLink, SerialLink};
use serde::Serialize;
use serialport::SerialPortType;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Controller for the parking and access module bus
#[derive(Parser, Debug)]
#[command(name = "parkgate", version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "parkgate.toml", global = true)]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Poll every module once, print a JSON report and exit
    #[arg(long)]
    once: bool,

    /// Drive a simulated bus instead of the serial port
    #[arg(long)]
    demo: bool,

    /// Status reads between simulated credential presentations
    #[arg(long, default_value_t = 20, requires = "demo")]
    novelty_every: u32,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration and print the module table
    Check,
    /// List the serial ports of this machine
    Ports,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Some(Command::Ports) => list_ports(),
        Some(Command::Check) => check(&cli.config),
        None => run(&cli.config, &cli.run).await,
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: &Path) -> Result<ControllerConfig> {
    let config = ControllerConfig::load(path)
        .with_context(|| format!("could not load configuration {}", path.display()))?;
    info!(
        config_file = %path.display(),
        port = %config.serial.port,
        baud_rate = config.serial.baud_rate,
        modules = config.modules.len(),
        credentials = config.credentials.len(),
        "config_loaded"
    );
    Ok(config)
}

async fn run(path: &Path, args: &RunArgs) -> Result<()> {
    let config = load_config(path)?;
    let registry = ModuleRegistry::new(config.modules.clone(), &config.polling)?;
    if registry.is_empty() {
        bail!("{} declares no [[modules]]", path.display());
    }

    let validator = AccessValidator::new(
        MemoryStore::with_credentials(config.credentials.clone()),
        config.access,
    );
    let settings = SchedulerSettings {
        polling: config.polling,
        timeouts: config.timeouts,
        sequence: config.sequence,
    };
    let events = EventBus::new(config.polling.event_capacity);
    spawn_event_logger(events.subscribe());

    if args.demo {
        let (link, bus) = MockLink::new();
        let cards = config.credentials.iter().map(|c| c.identification.clone());
        DemoBus::new(registry.addresses(), cards, args.novelty_every).install(&bus);
        info!(novelty_every = args.novelty_every, "demo_bus_started");

        let scheduler = PollingScheduler::new(link, registry, validator, settings, events);
        drive(scheduler, args.once).await
    } else {
        let link = SerialLink::open(config.serial.clone())
            .with_context(|| format!("could not open {}", config.serial.port))?;

        let scheduler = PollingScheduler::new(link, registry, validator, settings, events);
        drive(scheduler, args.once).await
    }
}

async fn drive<L: Link, S: CredentialStore>(
    mut scheduler: PollingScheduler<L, S>,
    once: bool,
) -> Result<()> {
    if once {
        let cycle = scheduler.run_cycle().await?;
        let report = OnceReport::new(&scheduler, cycle);
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown_signal_received");
                shutdown.cancel();
            }
            Err(e) => warn!(error = %e, "ctrl_c_handler_unavailable"),
        }
    });

    let result = scheduler.run(token).await;

    let stats = scheduler.registry().stats();
    info!(
        commands_sent = stats.commands_sent,
        replies_received = stats.replies_received,
        success_rate = stats.success_rate,
        online = stats.online_modules,
        offline = stats.offline_modules,
        link_resets = stats.link_resets,
        "session_summary"
    );

    result.context("polling stopped")
}

/// Forward every bus event to the log as JSON.
fn spawn_event_logger(mut events: broadcast::Receiver<BusEvent>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(payload) => info!(event = event.name(), %payload, "bus_event"),
                    Err(e) => warn!(event = event.name(), error = %e, "event_not_serialized"),
                },
                Err(RecvError::Lagged(missed)) => warn!(missed, "event_logger_lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[derive(Serialize)]
struct ModuleLine<'a> {
    address: ModuleAddress,
    name: &'a str,
    state: ModuleSnapshot,
}

#[derive(Serialize)]
struct OnceReport<'a> {
    cycle: CycleReport,
    stats: RegistryStats,
    modules: Vec<ModuleLine<'a>>,
}

impl<'a> OnceReport<'a> {
    fn new<L: Link, S: CredentialStore>(
        scheduler: &'a PollingScheduler<L, S>,
        cycle: CycleReport,
    ) -> Self {
        let registry = scheduler.registry();
        let modules = registry
            .iter()
            .map(|(config, state)| ModuleLine {
                address: config.address,
                name: &config.name,
                state: state.snapshot(),
            })
            .collect();

        Self {
            cycle,
            stats: registry.stats(),
            modules,
        }
    }
}

fn check(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let registry = ModuleRegistry::new(config.modules, &config.polling)?;

    println!("{} modules in polling order:", registry.len());
    for (module, _) in registry.iter() {
        let ticket = if module.requires_ticket { "ticket" } else { "" };
        println!(
            "  {}  {:<24} order {:<4} group {:<4} {:<5} {}",
            module.address,
            module.name,
            module.order,
            module.group.to_string(),
            module.direction.to_string(),
            ticket
        );
    }
    println!("{} credentials", config.credentials.len());
    Ok(())
}

fn list_ports() -> Result<()> {
    let ports = serialport::available_ports().context("could not enumerate serial ports")?;
    if ports.is_empty() {
        println!("no serial ports found");
    }

    for port in ports {
        let kind = match port.port_type {
            SerialPortType::UsbPort(usb) => format!(
                "usb {:04x}:{:04x} {}",
                usb.vid,
                usb.pid,
                usb.product.unwrap_or_default()
            ),
            SerialPortType::PciPort => "pci".to_string(),
            SerialPortType::BluetoothPort => "bluetooth".to_string(),
            SerialPortType::Unknown => "unknown".to_string(),
        };
        println!("{:<20} {kind}", port.port_name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["parkgate"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("parkgate.toml"));
        assert!(!cli.run.once);
        assert!(!cli.run.demo);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_once_with_demo() {
        let cli = Cli::try_parse_from([
            "parkgate",
            "-c",
            "/etc/parkgate.toml",
            "--once",
            "--demo",
            "--novelty-every",
            "3",
        ])
        .unwrap();
        assert!(cli.run.once);
        assert_eq!(cli.run.novelty_every, 3);
        assert_eq!(cli.config, PathBuf::from("/etc/parkgate.toml"));
    }

    #[test]
    fn test_novelty_every_requires_demo() {
        assert!(Cli::try_parse_from(["parkgate", "--novelty-every", "3"]).is_err());
    }

    #[test]
    fn test_sample_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config/parkgate.toml");
        let config = ControllerConfig::load(&path).unwrap();
        let registry = ModuleRegistry::new(config.modules, &config.polling).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(config.credentials.len(), 2);
    }

    #[test]
    fn test_subcommand_with_global_config() {
        let cli = Cli::try_parse_from(["parkgate", "check", "--config", "site.toml"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Check)));
        assert_eq!(cli.config, PathBuf::from("site.toml"));
    }
}
