//! NetMapper CLI - discover and characterize hosts on the local subnet
//!
//! This binary can:
//! - Detect the local IPv4 network and its scan range
//! - Scan every address for liveness, hardware address, hostname and open ports
//! - Stream results as text or NDJSON while the scan runs

mod sink;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use netmapper_core::config::{self, ScanConfig};
use netmapper_core::scanner::{
    self, NetworkRange, ResultSink, ScanError, ScanOrchestrator, privileges,
};
use sink::{JsonSink, TextSink};

#[derive(Parser)]
#[command(name = "netmapper")]
#[command(author = "NetMapper Contributors")]
#[command(version)]
#[command(about = "Discover and characterize hosts on the local subnet")]
#[command(long_about = "
NetMapper pings every address of the local IPv4 subnet, then looks up the
hardware address, hostname and open well-known ports of each host that
answers. Results are printed as soon as each host completes.

Quick start:
  1. Show the detected network:  netmapper network
  2. Scan it:                    netmapper scan
  3. Scan another range:         netmapper scan --subnet 10.0.0.0/24
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting (one object per line while scanning)
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan the local network (or an explicit range)
    Scan(ScanArgs),

    /// Show the detected interface, scan range and probe capabilities
    Network,

    /// Show configuration paths and settings
    Config,
}

#[derive(clap::Args)]
pub struct ScanArgs {
    /// Scan this subnet instead of the detected one (e.g. 192.168.1.0/24)
    #[arg(long, conflicts_with = "range")]
    pub subnet: Option<String>,

    /// Scan an explicit address range (e.g. 192.168.1.10-192.168.1.50)
    #[arg(long)]
    pub range: Option<String>,

    /// Hosts scanned at once
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Comma separated ports to probe on alive hosts
    #[arg(short, long)]
    pub ports: Option<String>,

    /// Per-port connect timeout in milliseconds
    #[arg(long)]
    pub port_timeout_ms: Option<u64>,

    /// Ping reply timeout in milliseconds
    #[arg(long)]
    pub liveness_timeout_ms: Option<u64>,

    /// Maximum number of addresses to scan
    #[arg(long)]
    pub max_addresses: Option<u32>,

    /// Also list addresses that did not answer
    #[arg(long)]
    pub show_dead: bool,
}

impl ScanArgs {
    /// Layer command-line flags over the loaded settings
    fn apply(&self, config: &mut ScanConfig) -> Result<(), ScanError> {
        if let Some(limit) = self.concurrency {
            config.concurrency_limit = limit;
        }
        if let Some(ref ports) = self.ports {
            config.ports = config::parse_port_list(ports)?;
        }
        if let Some(ms) = self.port_timeout_ms {
            config.port_timeout_ms = ms;
        }
        if let Some(ms) = self.liveness_timeout_ms {
            config.liveness_timeout_ms = ms;
        }
        if let Some(max) = self.max_addresses {
            config.max_addresses = max;
        }
        config.validate()
    }

    fn target_range(&self) -> Result<NetworkRange, ScanError> {
        if let Some(ref cidr) = self.subnet {
            return NetworkRange::from_cidr(cidr);
        }
        if let Some(ref range) = self.range {
            return NetworkRange::from_range_str(range);
        }
        let network = scanner::detect_network()?;
        tracing::info!(
            "Detected {} on {} ({})",
            network.subnet(),
            network.interface,
            network.local_ip
        );
        Ok(network.range)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("netmapper={},netmapper_core={}", log_level, log_level).into()
            }),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Scan(ref args) => cmd_scan(&cli, args).await,
        Commands::Network => cmd_network(&cli).await,
        Commands::Config => cmd_config(&cli).await,
    };

    result.map_err(|e| match e.downcast::<ScanError>() {
        Ok(scan_error) => anyhow::anyhow!(scan_error.user_message()),
        Err(other) => other,
    })
}

async fn cmd_scan(cli: &Cli, args: &ScanArgs) -> Result<()> {
    let (mut scan_config, source) = config::load_scan_config();
    args.apply(&mut scan_config)?;
    tracing::debug!("Scan settings from {} with command-line overrides", source);

    let range = args.target_range()?;
    let orchestrator = ScanOrchestrator::from_config(&scan_config)?;

    let caps = privileges::detect_capabilities().await;
    if caps.mode == privileges::ScanMode::Limited {
        match cli.format {
            OutputFormat::Text => eprintln!("{}\n", privileges::format_capabilities_message(&caps)),
            OutputFormat::Json => {
                tracing::warn!("{}", caps.warning.as_deref().unwrap_or("limited capabilities"))
            }
        }
    }

    if let OutputFormat::Text = cli.format {
        println!(
            "Scanning {} ({} addresses, {} at a time)...",
            range,
            orchestrator.total_for(&range),
            orchestrator.concurrency_limit()
        );
        println!();
    }

    let sink: Box<dyn ResultSink> = match cli.format {
        OutputFormat::Text => Box::new(TextSink::new(args.show_dead)),
        OutputFormat::Json => Box::new(JsonSink::new(args.show_dead)),
    };

    let scan = orchestrator.run(&range, sink.as_ref());
    tokio::pin!(scan);

    let summary = tokio::select! {
        result = &mut scan => result?,
        _ = tokio::signal::ctrl_c() => {
            if let OutputFormat::Text = cli.format {
                eprintln!("\nCancelling; waiting for hosts in progress...");
            }
            orchestrator.cancel();
            scan.await?
        }
    };

    match cli.format {
        OutputFormat::Text => sink::print_text_summary(&summary),
        OutputFormat::Json => sink::print_json_summary(&summary),
    }

    Ok(())
}

async fn cmd_network(cli: &Cli) -> Result<()> {
    let network = scanner::detect_network()?;
    let caps = privileges::detect_capabilities().await;

    match cli.format {
        OutputFormat::Text => {
            println!("Interface:   {}", network.interface);
            println!("Local IP:    {}", network.local_ip);
            println!("Subnet:      {}", network.subnet());
            println!("Scan range:  {}", network.range);
            println!("Addresses:   {}", network.range.address_count());
            println!();
            println!(
                "Ping:            {}",
                if caps.can_ping { "available" } else { "unavailable" }
            );
            println!(
                "Neighbor cache:  {}",
                if caps.can_read_neighbors { "readable" } else { "unreadable" }
            );
            println!("Elevated:        {}", if caps.is_elevated { "yes" } else { "no" });
            println!();
            println!("{}", privileges::format_capabilities_message(&caps));
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "network": network,
                    "subnet": network.subnet(),
                    "capabilities": caps,
                })
            );
        }
    }

    Ok(())
}

async fn cmd_config(cli: &Cli) -> Result<()> {
    let (scan_config, source) = config::load_scan_config();
    let config_path = config::get_config_file_path_string();

    match cli.format {
        OutputFormat::Text => {
            let ports = scan_config
                .ports
                .iter()
                .map(u16::to_string)
                .collect::<Vec<_>>()
                .join(",");

            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file:        {}", config_path);
            println!("Settings from:      {}", source);
            println!("Ports:              {}", ports);
            println!("Port timeout:       {} ms", scan_config.port_timeout_ms);
            println!("Liveness timeout:   {} ms", scan_config.liveness_timeout_ms);
            println!("DNS timeout:        {} ms", scan_config.dns_timeout_ms);
            println!("Concurrency limit:  {}", scan_config.concurrency_limit);
            println!("Max addresses:      {}", scan_config.max_addresses);
            println!();
            println!("Environment variables:");
            println!("  NETMAPPER_CONCURRENCY     - Override concurrency limit");
            println!("  NETMAPPER_PORTS           - Override port list (comma separated)");
            println!("  NETMAPPER_PORT_TIMEOUT_MS - Override per-port timeout");
            println!();
            println!("Example config.toml:");
            println!();
            println!("{}", config::generate_example_config());
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "config_file": config_path,
                    "source": format!("{}", source),
                    "scan": scan_config,
                })
            );
        }
    }

    Ok(())
}
