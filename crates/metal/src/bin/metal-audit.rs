//! metal-audit CLI - ephemeral device provisioning and usage reports.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use metal_audit::capacity::CapacityLocator;
use metal_audit::config::{
    CostModel, PollConfig, ProvisioningConfig, ReconcileOptions, ScanWindow, DEFAULT_ID_PREFIX,
    DEFAULT_OS, DEFAULT_PLAN,
};
use metal_audit::providers::equinix::Equinix;
use metal_audit::providers::DeviceService;
use metal_audit::{EventReconciler, Host, ProvisioningController, UsageReport};

/// metal-audit - provision short-lived Equinix Metal devices and audit their cost.
#[derive(Parser)]
#[command(name = "metal-audit")]
#[command(about = "Provision ephemeral bare metal devices and report on their usage")]
struct Cli {
    /// Equinix Metal API token (or set `METAL_AUTH_TOKEN` env var).
    #[arg(long, env = "METAL_AUTH_TOKEN", hide_env_values = true)]
    auth_token: String,

    /// Equinix Metal project ID (or set `METAL_PROJECT_ID` env var).
    #[arg(long, env = "METAL_PROJECT_ID")]
    project_id: String,

    /// Override the API endpoint.
    #[arg(long, env = "METAL_API_URL")]
    api_url: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Device placement options shared by provisioning commands.
#[derive(Args)]
struct PlacementArgs {
    /// Device plan.
    #[arg(long, env = "METAL_PLAN", default_value = DEFAULT_PLAN)]
    plan: String,

    /// Operating system slug.
    #[arg(long, env = "METAL_OS", default_value = DEFAULT_OS)]
    os: String,

    /// Allowed metros (comma-separated). Empty allows any metro.
    #[arg(long, env = "METAL_METROS", value_delimiter = ',', default_value = "dc,ch,sv")]
    metros: Vec<String>,

    /// Seconds between two status checks.
    #[arg(long, default_value = "60", value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval_secs: u64,

    /// Seconds to wait for the device to become active.
    #[arg(long, default_value = "1800")]
    poll_timeout_secs: u64,
}

impl PlacementArgs {
    fn into_config(self) -> ProvisioningConfig {
        ProvisioningConfig {
            plan: self.plan,
            os: self.os,
            metros: self.metros.into_iter().filter(|m| !m.is_empty()).collect(),
            poll: PollConfig::from_secs(self.poll_interval_secs, self.poll_timeout_secs),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show the first allowed metro with capacity for a plan.
    Capacity {
        #[command(flatten)]
        placement: PlacementArgs,
    },

    /// List all devices in the project.
    List,

    /// Create (or reuse) a device and wait until it is active.
    Setup {
        /// Hostname prefix; a random numeric suffix is appended.
        #[arg(long, default_value = DEFAULT_ID_PREFIX)]
        prefix: String,

        /// Seed for the hostname suffix.
        #[arg(long)]
        seed: Option<u64>,

        #[command(flatten)]
        placement: PlacementArgs,
    },

    /// Delete a device by hostname. Succeeds if it is already gone.
    Teardown {
        /// Device hostname.
        #[arg(long)]
        hostname: String,
    },

    /// Scan the event log and report uptime, cost and leaks.
    Report {
        /// Days of history to scan (today excluded).
        #[arg(long, default_value = "8")]
        lookback_days: u32,

        /// Scan from this date (YYYY-MM-DD) instead of the lookback window.
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,

        /// Scan up to this date (YYYY-MM-DD), inclusive.
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,

        /// Maximum event pages to fetch.
        #[arg(long, default_value = "30")]
        max_pages: u32,

        /// Events per page.
        #[arg(long, default_value = "500")]
        page_size: u32,

        /// Only devices whose id starts with this prefix are analyzed.
        #[arg(long, default_value = DEFAULT_ID_PREFIX)]
        id_prefix: String,

        /// Price of one started device hour.
        #[arg(long, default_value = "2.0")]
        hourly_rate: f64,

        /// Devices up longer than this many hours count as leaks.
        #[arg(long, default_value = "4.0")]
        leak_hours: f64,

        /// Print the report as JSON.
        #[arg(long, default_value = "false")]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Create provider
    let mut provider = Equinix::new(&cli.auth_token, &cli.project_id)
        .context("Failed to create Equinix Metal provider")?;
    if let Some(url) = &cli.api_url {
        provider = provider
            .with_base_url(url)
            .context("Failed to set API URL")?;
    }

    match cli.command {
        Commands::Capacity { placement } => {
            let config = placement.into_config();
            let metro = CapacityLocator::new(&provider, &config.metros)
                .check_availability_for(&config.plan)
                .await?;
            println!("{} available in metro {metro}", config.plan);
        }

        Commands::List => {
            let devices = provider.list_devices().await?;
            println!(
                "\n{:<38} {:<20} {:<14} {:<8} {:<16}",
                "ID", "HOSTNAME", "STATE", "METRO", "IPv4"
            );
            println!("{}", "-".repeat(98));
            for device in devices {
                println!(
                    "{:<38} {:<20} {:<14} {:<8} {:<16}",
                    device.id,
                    device.hostname,
                    device.state,
                    device.metro,
                    device.ipv4()
                );
            }
        }

        Commands::Setup {
            prefix,
            seed,
            placement,
        } => {
            let names = seed.map_or_else(
                metal_audit::naming::HostnameGenerator::from_entropy,
                metal_audit::naming::HostnameGenerator::seeded,
            );
            let controller =
                ProvisioningController::with_names(provider, placement.into_config(), names);
            let device = controller
                .setup(&prefix)
                .await
                .context("Device setup failed")?;

            println!("\n✅ Device active!");
            println!("  ID:       {}", device.id());
            println!("  Hostname: {}", device.name());
            println!("  Metro:    {}", device.metro);
            println!("  IPv4:     {}", device.ipv4());
        }

        Commands::Teardown { hostname } => {
            info!("Tearing down device: {hostname}");
            let controller = ProvisioningController::new(provider, ProvisioningConfig::default());
            controller
                .teardown(&hostname)
                .await
                .context("Device teardown failed")?;
            println!("\n✅ Device removed: {hostname}");
        }

        Commands::Report {
            lookback_days,
            from,
            to,
            max_pages,
            page_size,
            id_prefix,
            hourly_rate,
            leak_hours,
            json,
        } => {
            let window = match (from, to) {
                (Some(from), Some(to)) => ScanWindow::range(from, to)?,
                _ => ScanWindow::LastDays(lookback_days),
            };
            let options = ReconcileOptions {
                window,
                max_pages,
                page_size,
                id_prefix,
            };
            let cost_model = CostModel {
                hourly_rate,
                leak_hours,
            };

            let reconciliation = EventReconciler::new(&provider, &options)
                .reconcile()
                .await
                .context("Failed to scan project events")?;
            let report = UsageReport::from_reconciliation(&reconciliation, cost_model);

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("\n{}", report.render());
            }
        }
    }

    Ok(())
}
