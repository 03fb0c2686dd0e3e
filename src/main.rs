use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use vpc_vpn_pivot::aws::{AwsNetworkApi, AwsProfile};
use vpc_vpn_pivot::config::LOCAL_CONFIG_FILE;
use vpc_vpn_pivot::openvpn::{self, ConnectionStatus};
use vpc_vpn_pivot::pivot::{CreateOptions, Pivot, create, purge, validate};
use vpc_vpn_pivot::pki::EasyRsa;
use vpc_vpn_pivot::state::{StateKey, StateRecord, StateValue};
use vpc_vpn_pivot::{Config, PivotError, StateStore};

const DEFAULT_PROFILE: &str = "default";

#[derive(Parser)]
#[command(name = "vpc-vpn-pivot")]
#[command(about = "Pivot into private AWS VPC networks through a temporary Client VPN endpoint")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the Client VPN endpoint and supporting resources
    Create {
        /// AWS profile from ~/.aws/credentials
        #[arg(short, long, default_value = DEFAULT_PROFILE)]
        profile: String,
        /// Subnet to attach the endpoint to
        #[arg(short, long)]
        subnet_id: String,
        /// Resume over an existing state file
        #[arg(short, long)]
        force: bool,
    },
    /// Connect to the VPN with OpenVPN (requires root)
    Connect {
        /// Stay attached until the client exits or Ctrl+C is pressed
        #[arg(long)]
        foreground: bool,
    },
    /// Stop the OpenVPN client, leaving AWS resources intact
    Disconnect,
    /// Remove every AWS resource created by `create`
    Purge,
    /// Show recorded resources and the VPN client state
    Status,
    /// Generate default config file
    Init,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Set up logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match run(cli.command).await {
        Ok(0) => Ok(()),
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{}", e);
            if let PivotError::MissingState(StateKey::VpnEndpointId) = e.root() {
                eprintln!("Call `create` first.");
            }
            std::process::exit(1);
        }
    }
}

async fn run(command: Commands) -> Result<i32, PivotError> {
    if let Commands::Init = command {
        info!("Generating default config...");
        let path = PathBuf::from(LOCAL_CONFIG_FILE);
        Config::default().save(&path)?;
        println!("Created default config: {}", LOCAL_CONFIG_FILE);
        return Ok(0);
    }

    let config = Config::discover()?;
    let store = StateStore::open_default()?;

    match command {
        Commands::Create {
            profile,
            subnet_id,
            force,
        } => {
            validate::ensure_no_conflict(&store, force)?;

            let aws_profile = AwsProfile::load(&profile, &config.aws.default_region)?;
            let api = AwsNetworkApi::from_profile(&aws_profile, config.aws.endpoint_url.clone())?;
            let ca = EasyRsa::new(&config.pki);
            let options = CreateOptions {
                profile,
                region: aws_profile.region.clone(),
                subnet_id,
                force,
            };

            info!("Creating Client VPN endpoint in {}", options.region);
            create::run(&Pivot::new(&api, &ca, &store, &config.vpn), &options).await?;

            let record = store.read_all()?;
            println!(
                "VPN endpoint {} is ready.",
                record.text(StateKey::VpnEndpointId).unwrap_or("-")
            );
            println!("Run `sudo vpc-vpn-pivot connect` to start the VPN client.");
            Ok(0)
        }
        Commands::Connect { foreground } => {
            let record = store.read_all()?;
            let api = api_for_record(&config, &record)?;

            let interrupted = Arc::new(AtomicBool::new(false));
            let flag = interrupted.clone();
            ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst)).map_err(|e| {
                PivotError::Subprocess(format!("Failed to install Ctrl+C handler: {}", e))
            })?;

            openvpn::connect(&api, &store, &config.vpn, foreground, &interrupted).await?;
            Ok(0)
        }
        Commands::Disconnect => {
            info!("Disconnecting from the VPN...");
            let timeout = Duration::from_secs(config.vpn.stop_timeout_secs);
            let outcome = openvpn::disconnect(&store, timeout).await?;
            println!("VPN client disconnected ({:?})", outcome);
            Ok(0)
        }
        Commands::Purge => {
            let record = store.read_all()?;
            if record.is_empty() {
                println!("The state file is empty, nothing to purge.");
                return Ok(0);
            }

            let timeout = Duration::from_secs(config.vpn.stop_timeout_secs);
            let stop_failure = openvpn::stop_before_purge(&store, &record, timeout).await;

            let api = api_for_record(&config, &record)?;
            let ca = EasyRsa::new(&config.pki);
            let summary = purge::run(&Pivot::new(&api, &ca, &store, &config.vpn)).await?;

            if let Some((pid, e)) = &stop_failure {
                println!(
                    "OpenVPN client {} could not be stopped ({}); stop it as root.",
                    pid, e
                );
            }

            if summary.is_clean() {
                println!("All VPN resources were removed.");
                Ok(if stop_failure.is_some() { 1 } else { 0 })
            } else {
                for (stage, e) in &summary.failed_stages {
                    error!("{} failed: {}", stage, e);
                }
                println!(
                    "{} stage(s) failed; their resources are still recorded in {}. Run purge again.",
                    summary.failed_stages.len(),
                    store.path().display()
                );
                Ok(1)
            }
        }
        Commands::Status => {
            let record = store.probe();
            print_record(&record);

            match openvpn::status(&record) {
                ConnectionStatus::NeverConnected => {
                    println!("The VPN connection was never initiated. Call the `connect` sub-command");
                    Ok(1)
                }
                ConnectionStatus::Alive { pid, .. } => {
                    println!("The VPN connection is alive (process {})", pid);
                    Ok(0)
                }
                ConnectionStatus::Dead { pid, log } => {
                    let log = log.unwrap_or_else(|| openvpn::log_path(&store));
                    println!(
                        "The OpenVPN process {} died! Check the {} log file",
                        pid,
                        log.display()
                    );
                    Ok(1)
                }
            }
        }
        Commands::Init => Ok(0),
    }
}

/// Client for the profile and region a previous `create` recorded.
fn api_for_record(config: &Config, record: &StateRecord) -> Result<AwsNetworkApi, PivotError> {
    let profile_name = record.text(StateKey::Profile).unwrap_or_else(|| {
        warn!("No profile recorded, using '{}'", DEFAULT_PROFILE);
        DEFAULT_PROFILE
    });
    let mut profile = AwsProfile::load(profile_name, &config.aws.default_region)?;
    if let Some(region) = record.text(StateKey::Region) {
        profile.region = region.to_string();
    }
    Ok(AwsNetworkApi::from_profile(
        &profile,
        config.aws.endpoint_url.clone(),
    )?)
}

fn print_record(record: &StateRecord) {
    if record.is_empty() {
        println!("State: empty");
        return;
    }

    println!("State:");
    for key in StateKey::ALL {
        let Some(value) = record.get(key) else {
            continue;
        };
        let value = match value {
            StateValue::Text(text) => text.clone(),
            StateValue::Number(n) => n.to_string(),
            StateValue::Flag(flag) => flag.to_string(),
            StateValue::List(items) => items.join(", "),
        };
        println!("  {}: {}", key, value);
    }
}
