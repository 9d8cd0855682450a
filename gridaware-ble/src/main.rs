//! BLE provisioning tool for GridAware charging boxes
//!
//! Scans for charging boxes, sends encrypted WiFi credentials and identity
//! tokens over BLE, and manages box registration on the GridAware backend.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use gridaware_api::{ApiClient, TokenStore};
use gridaware_ble_controller::{
    BleTransport, BtleplugTransport, PermissionOutcome, ProvisioningSession, ScanMode,
    ScanOptions, Scanner, request_permissions,
};
use gridaware_proto::CredentialPayload;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "gridaware-ble")]
#[command(about = "BLE provisioning tool for GridAware charging boxes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for charging boxes
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "10")]
        duration: u64,
        /// List every named BLE device, not just charging boxes
        #[arg(short, long)]
        all: bool,
    },
    /// Send WiFi credentials to a charging box
    Provision {
        /// WiFi credentials file (SSID on line 1, password on line 2)
        #[arg(short, long, default_value = "wifi_credentials.txt")]
        file: String,
    },
    /// Send the saved session token to a charging box
    SendToken,
    /// Log in to the GridAware backend and save the session token
    Login {
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    /// Forget the saved session token
    Logout,
    /// List charging boxes registered to the account
    Devices,
    /// Register a charging box to the account
    Register {
        /// Device MAC address
        mac: String,
    },
    /// Unregister a charging box from the account
    Unregister {
        /// Device MAC address
        mac: String,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let home = gridaware_api::gridaware_home()?;
    let config = Config::load_or_create(&home)?;

    match cli.command {
        Commands::Scan { duration, all } => {
            scan(open_transport().await?, &config, duration, all).await
        }
        Commands::Provision { file } => {
            let (ssid, password) = read_wifi_credentials(&file)?;
            let payload = CredentialPayload::wifi(ssid, password);
            provision(open_transport().await?, &config, payload).await
        }
        Commands::SendToken => {
            let token = TokenStore::new(&home).load()?;
            provision(open_transport().await?, &config, CredentialPayload::identity(token)).await
        }
        Commands::Login { email, password } => login(&config, &home, &email, &password).await,
        Commands::Logout => {
            TokenStore::new(&home).clear()?;
            println!("Logged out.");
            Ok(())
        }
        Commands::Devices => devices(&config, &home).await,
        Commands::Register { mac } => register(&config, &home, &mac).await,
        Commands::Unregister { mac } => unregister(&config, &home, &mac).await,
    }
}

fn read_wifi_credentials(file: &str) -> Result<(String, String), Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(file)?;
    let mut lines = content.lines();
    let ssid = lines
        .next()
        .ok_or("Missing SSID in credentials file")?
        .trim()
        .to_string();
    let password = lines
        .next()
        .ok_or("Missing password in credentials file")?
        .trim()
        .to_string();
    Ok((ssid, password))
}

async fn open_transport() -> Result<Arc<dyn BleTransport>, Box<dyn std::error::Error>> {
    Ok(Arc::new(BtleplugTransport::new().await?))
}

async fn scan(
    transport: Arc<dyn BleTransport>,
    config: &Config,
    duration: u64,
    all: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    // Release the adapter however the scan ends.
    let outcome = drive_scan(&transport, config, duration, all).await;
    transport.release().await?;
    outcome
}

async fn drive_scan(
    transport: &Arc<dyn BleTransport>,
    config: &Config,
    duration: u64,
    all: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if let PermissionOutcome::Denied(missing) = request_permissions(transport.as_ref()).await? {
        return Err(format!(
            "missing permissions: {}",
            missing
                .iter()
                .map(|k| k.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
        .into());
    }

    println!("Scanning for charging boxes ({duration} seconds)...");
    let scanner = Scanner::new(Arc::clone(transport));
    let mut scan = scanner
        .start(ScanOptions {
            prefix: if all {
                String::new()
            } else {
                config.device_prefix.clone()
            },
            timeout: Duration::from_secs(duration),
            mode: ScanMode::Collect,
        })
        .await?;

    let mut count = 0u32;
    while let Some(device) = scan.next().await? {
        let name = device.name.as_deref().unwrap_or("Unknown");
        let rssi = device
            .rssi
            .map(|r| format!("{r} dBm"))
            .unwrap_or_else(|| "N/A".to_string());
        let marker = if name.starts_with(&config.device_prefix) {
            " [GRIDAWARE]"
        } else {
            ""
        };
        println!("  {} ({}) RSSI: {}{}", name, device.id, rssi, marker);
        count += 1;
    }

    println!("\nFound {count} devices.");
    Ok(())
}

async fn provision(
    transport: Arc<dyn BleTransport>,
    config: &Config,
    payload: CredentialPayload,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = ProvisioningSession::new(Arc::clone(&transport), config.session_config()?);

    // Ctrl-C aborts the session at its next await point; the engine closes
    // whatever it was holding before the error comes back.
    let cancel = session.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, cancelling...");
            cancel.cancel();
        }
    });

    // Release the adapter however the session ends.
    let outcome = drive_session(&mut session, &payload).await;
    transport.release().await?;
    outcome
}

async fn drive_session(
    session: &mut ProvisioningSession,
    payload: &CredentialPayload,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("Scanning for a charging box...");
    let device = session.start().await?;
    println!(
        "Found device: {} ({})",
        device.name.as_deref().unwrap_or("Unknown"),
        device.id
    );

    println!("Sending {} payload...", payload.kind());
    session.submit_credentials(payload).await?;
    println!("Payload acknowledged.");

    session.disconnect().await?;
    println!("Done. The box will apply the new credentials.");
    Ok(())
}

async fn login(
    config: &Config,
    home: &Path,
    email: &str,
    password: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = ApiClient::new(&config.api_url, &config.api_key);
    let jwt = client.login(email, password).await?;
    TokenStore::new(home).save(&jwt)?;
    println!("Logged in. Session token saved.");
    Ok(())
}

async fn devices(config: &Config, home: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let token = TokenStore::new(home).load()?;
    let client = ApiClient::new(&config.api_url, &config.api_key);
    let devices = client.devices(&token).await?;

    if devices.is_empty() {
        println!("No charging boxes registered.");
    } else {
        println!("Registered charging boxes:");
        for device in devices {
            println!("  {}", device.device_mac_address);
        }
    }
    Ok(())
}

async fn register(config: &Config, home: &Path, mac: &str) -> Result<(), Box<dyn std::error::Error>> {
    let token = TokenStore::new(home).load()?;
    let client = ApiClient::new(&config.api_url, &config.api_key);
    client.register_device(&token, mac).await?;
    println!("Registered {mac}.");
    Ok(())
}

async fn unregister(
    config: &Config,
    home: &Path,
    mac: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let token = TokenStore::new(home).load()?;
    let client = ApiClient::new(&config.api_url, &config.api_key);
    client.unregister_device(&token, mac).await?;
    println!("Unregistered {mac}.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridaware_ble_controller::simulated::SimTransport;

    #[tokio::test(start_paused = true)]
    async fn scan_releases_the_adapter_when_the_radio_faults() {
        let sim = SimTransport::new();
        sim.fail_discovery("adapter vanished");

        let result = scan(Arc::new(sim.clone()), &Config::default(), 5, false).await;
        assert!(result.is_err());
        assert!(!sim.is_scanning());
    }
}
