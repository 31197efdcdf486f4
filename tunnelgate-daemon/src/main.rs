//! Tunnelgate - WireGuard device enrollment service
//!
//! Serves the device-facing `/get_config` endpoint and provides operator
//! commands for enrolling devices and maintaining the server config.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tunnelgate_core::{DeviceId, DeviceName, OwnerId};
use tunnelgate_daemon::artifacts::{ClientConfigDir, ServerConfigFile};
use tunnelgate_daemon::http::{self, AppState};
use tunnelgate_daemon::{Database, Enrollment, EnrollmentRateLimiter, Settings};
use tunnelgate_wg::{public_key_from_private, KeyMaterialProvider, X25519Provider};

// ============================================================================
// CLI Definition
// ============================================================================

/// Tunnelgate - WireGuard device enrollment service
#[derive(Parser)]
#[command(name = "tunnelgate", version, about)]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the enrollment server (default if no command given)
    Serve,

    /// Device management
    Device {
        #[command(subcommand)]
        action: DeviceAction,
    },

    /// WireGuard server config maintenance
    ServerConfig {
        #[command(subcommand)]
        action: ServerConfigAction,
    },

    /// Print a fresh WireGuard key pair
    Keygen,

    /// Print the public key of a base64 private key
    Pubkey { private_key: String },
}

#[derive(Subcommand)]
enum DeviceAction {
    /// Start enrolling a device and print its credential words
    Enroll {
        #[arg(long)]
        owner: i64,
        #[arg(long)]
        name: String,
    },

    /// List an owner's devices and their capabilities
    List {
        #[arg(long)]
        owner: i64,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Revoke a device's pending credential
    RevokeCredential { device_id: i64 },

    /// Check that a device exposes a route and print its address
    Route {
        #[arg(long)]
        owner: i64,
        #[arg(long)]
        device: i64,
        #[arg(long)]
        uri: String,
        #[arg(long, default_value = "GET")]
        method: String,
    },
}

#[derive(Subcommand)]
enum ServerConfigAction {
    /// Append every stored peer missing from the server config
    Sync,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Keygen) => cmd_keygen(),
        Some(Commands::Pubkey { private_key }) => {
            let public_key = public_key_from_private(private_key.trim())
                .context("invalid private key")?;
            println!("{public_key}");
            Ok(())
        }
        Some(Commands::Device { action }) => {
            let settings = load_settings(cli.config)?;
            cmd_device(&settings, action).await
        }
        Some(Commands::ServerConfig {
            action: ServerConfigAction::Sync,
        }) => {
            let settings = load_settings(cli.config)?;
            let enrollment = open_enrollment(&settings).await?;
            let added = enrollment
                .reconcile_server_config()
                .await
                .context("failed to reconcile server config")?;
            println!("Added {added} peer(s) to {}", settings.server_config_path.display());
            Ok(())
        }
        Some(Commands::Serve) | None => {
            let settings = load_settings(cli.config)?;
            cmd_serve(settings).await
        }
    }
}

fn load_settings(path: Option<PathBuf>) -> Result<Settings> {
    let settings = Settings::load(path.as_deref()).context("failed to load settings")?;
    settings.validate().context("invalid settings")?;
    Ok(settings)
}

async fn open_enrollment(settings: &Settings) -> Result<Enrollment> {
    let overlay = settings.overlay().context("invalid wireguard settings")?;

    tracing::info!(path = %settings.database_path.display(), "Opening database");
    let db = Database::open(&settings.database_path)
        .await
        .with_context(|| format!("failed to open {}", settings.database_path.display()))?;

    let client_configs = ClientConfigDir::new(&settings.client_config_dir).with_context(|| {
        format!(
            "failed to prepare {}",
            settings.client_config_dir.display()
        )
    })?;
    let server_config = ServerConfigFile::new(&settings.server_config_path);

    Ok(Enrollment::new(
        &db,
        client_configs,
        server_config,
        Arc::new(X25519Provider),
        overlay,
    ))
}

async fn cmd_serve(settings: Settings) -> Result<()> {
    let enrollment = open_enrollment(&settings).await?;

    let overlay = enrollment.overlay();
    let fingerprint = overlay.server_public_key.fingerprint();
    tracing::info!(
        server = %fingerprint.short(),
        network = %overlay.address_space.network(),
        "Overlay configured"
    );

    // Repair peers lost between a commit and its server config append.
    enrollment
        .reconcile_server_config()
        .await
        .context("failed to reconcile server config")?;

    let state = AppState {
        enrollment: Arc::new(enrollment),
        rate_limiter: EnrollmentRateLimiter::new(
            settings.rate_limit.per_second,
            settings.rate_limit.burst,
        ),
    };

    http::serve(settings.bind_addr, state)
        .await
        .with_context(|| format!("failed to serve on {}", settings.bind_addr))
}

async fn cmd_device(settings: &Settings, action: DeviceAction) -> Result<()> {
    let enrollment = open_enrollment(settings).await?;

    match action {
        DeviceAction::Enroll { owner, name } => {
            let result = enrollment
                .initiate(OwnerId::new(owner), DeviceName::new(name))
                .await
                .context("enrollment failed")?;

            println!("Device Enrollment Started");
            println!("=========================");
            println!();
            println!("Device:  {}", result.device_id);
            println!("Address: {}", result.network_address);
            println!(
                "Words:   {} {} {}",
                result.words.one, result.words.two, result.words.three
            );
            println!();
            println!("Give the words to the device out-of-band.");
            println!("They can be redeemed once at POST /get_config.");
            println!();
            print!("{}", result.client_config.as_str());
        }

        DeviceAction::List { owner, json } => {
            let devices = enrollment
                .list_devices(OwnerId::new(owner))
                .await
                .context("failed to list devices")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&devices)?);
                return Ok(());
            }

            if devices.is_empty() {
                println!("No devices.");
                return Ok(());
            }

            println!("{:<6} {:<20} {:<40} CAPABILITIES", "ID", "NAME", "ADDRESS");
            for summary in devices {
                let routes: Vec<String> = summary
                    .capabilities
                    .iter()
                    .map(|c| format!("{} {}", c.method, c.uri))
                    .collect();
                println!(
                    "{:<6} {:<20} {:<40} {}",
                    summary.device.id,
                    summary.device.name.as_str(),
                    summary.device.network_address,
                    routes.join(", ")
                );
            }
        }

        DeviceAction::RevokeCredential { device_id } => {
            let device_id = DeviceId::new(device_id);
            if enrollment.revoke_credential(device_id).await? {
                println!("Revoked credential for device {device_id}");
            } else {
                println!("Device {device_id} has no pending credential");
            }
        }

        DeviceAction::Route {
            owner,
            device,
            uri,
            method,
        } => {
            let route = enrollment
                .resolve_route(OwnerId::new(owner), DeviceId::new(device), &uri, &method)
                .await?;
            match route {
                Some(address) => println!("{address}"),
                None => {
                    anyhow::bail!("no route {method} {uri} on device {device} for owner {owner}")
                }
            }
        }
    }

    Ok(())
}

fn cmd_keygen() -> Result<()> {
    let material = X25519Provider.generate().context("key generation failed")?;
    println!("PrivateKey = {}", material.private_key.to_base64().as_str());
    println!("PublicKey  = {}", material.public_key);
    Ok(())
}
