//! Command-line tool for locks
//!
//! Scans for locks, claims new ones and manages their keys over BLE. Keys
//! are kept as JSON files in LOCK_HOME (default `~/.lock`).

mod keys;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use lock_ble_controller::{BtleCentral, BtleConfig, LockClient};
use lock_proto::{
    CreateNewKeyRequest, EventPredicate, KeyCredentials, KeyData, KeyKind, KeyListItem,
    ListEventsRequest, Permission, Schedule, TimeInterval, UnlockAction, Weekdays,
};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use keys::StoredKey;

#[derive(Parser)]
#[command(name = "lock-ble")]
#[command(about = "Set up, unlock and manage locks over BLE")]
struct Cli {
    /// Timeout for each BLE call, in seconds
    #[arg(long, global = true, default_value = "10")]
    timeout: u64,
    /// ATT MTU to assume for the connection
    #[arg(long, global = true, default_value = "185")]
    mtu: u16,
    /// Device name or address to connect to (default: first lock found)
    #[arg(short, long, global = true)]
    device: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for locks
    Scan {
        /// Scan duration in seconds
        #[arg(long, default_value = "5")]
        duration: u64,
    },
    /// Show lock identity and status
    Info,
    /// Claim a new lock with the key file shipped with it
    Setup {
        /// Shipped key file
        #[arg(short, long)]
        shipped: PathBuf,
    },
    Unlock {
        /// Key file
        #[arg(short, long)]
        key: PathBuf,
        #[arg(short, long, value_enum, default_value = "default")]
        action: Action,
    },
    /// List keys and pending invitations (administrators only)
    ListKeys {
        #[arg(short, long)]
        key: PathBuf,
    },
    ListEvents {
        #[arg(short, long)]
        key: PathBuf,
        #[arg(long, default_value = "0")]
        offset: u32,
        #[arg(long)]
        limit: Option<u32>,
        /// Only events by this key
        #[arg(long)]
        by: Option<Uuid>,
    },
    /// Invite a new key; writes the invitation file to hand to the invitee
    Invite {
        #[arg(short, long)]
        key: PathBuf,
        #[arg(short, long)]
        name: String,
        #[arg(short, long, value_enum, default_value = "anytime")]
        permission: Role,
        /// Daily window for scheduled keys, e.g. 08:00-18:00
        #[arg(long)]
        window: Option<String>,
        /// Days until the invitation expires
        #[arg(long, default_value = "7")]
        days: i64,
        /// Where to write the invitation
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Accept an invitation; the confirmed key is saved in LOCK_HOME
    Confirm {
        #[arg(short, long)]
        invitation: PathBuf,
    },
    /// Remove a key or withdraw an invitation
    Remove {
        #[arg(short, long)]
        key: PathBuf,
        /// Key to remove
        id: Uuid,
        /// Withdraw a pending invitation instead
        #[arg(long)]
        pending: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Action {
    Default,
    Button,
}

impl From<Action> for UnlockAction {
    fn from(action: Action) -> Self {
        match action {
            Action::Default => UnlockAction::Default,
            Action::Button => UnlockAction::Button,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Role {
    Admin,
    Anytime,
    Scheduled,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = BtleConfig {
        mtu: cli.mtu,
        timeout: Duration::from_secs(cli.timeout),
        ..Default::default()
    };
    if let Commands::Scan { duration } = cli.command {
        config.scan_duration = Duration::from_secs(duration);
    }

    let central = BtleCentral::with_default_adapter(config).await?;
    if let Commands::Scan { .. } = cli.command {
        return scan(&central).await;
    }

    let peripheral = central.find_device(cli.device.as_deref()).await?;
    let client = LockClient::new(Arc::new(central), peripheral);

    match cli.command {
        // Handled before connecting
        Commands::Scan { .. } => {}
        Commands::Info => {
            let info = client.read_information().await?;
            println!("Lock {}", info.id);
            println!("  Firmware: {} (build {})", info.version, info.build);
            println!("  Status: {:?}", info.status);
            println!("  Unlock actions: {:?}", info.unlock_actions);
        }
        Commands::Setup { shipped } => {
            let shipped = StoredKey::load(&shipped)?;
            let owner = KeyCredentials::new(Uuid::new_v4(), KeyData::generate());
            let info = client.setup(&shipped.credentials, &owner).await?;
            let path = StoredKey::new(info.id, owner).save_in_home()?;
            println!("Lock {} set up", info.id);
            println!("  Owner key saved to: {}", path.display());
        }
        Commands::Unlock { key, action } => {
            let key = StoredKey::load(&key)?;
            client.unlock(&key.credentials, action.into()).await?;
            println!("Unlocked");
        }
        Commands::ListKeys { key } => {
            let key = StoredKey::load(&key)?;
            let keys = client.list_keys(&key.credentials).await?;
            println!("{} keys:", keys.len());
            for item in keys {
                print_key(&item);
            }
        }
        Commands::ListEvents {
            key,
            offset,
            limit,
            by,
        } => {
            let key = StoredKey::load(&key)?;
            let request = ListEventsRequest {
                offset,
                limit,
                predicate: by.map(|id| EventPredicate {
                    keys: vec![id],
                    ..Default::default()
                }),
            };
            let events = client.list_events(&key.credentials, &request).await?;
            println!("{} events:", events.len());
            for event in events {
                println!("  {} {} {:?}", event.date.to_rfc3339(), event.key, event.kind);
            }
        }
        Commands::Invite {
            key,
            name,
            permission,
            window,
            days,
            out,
        } => {
            let key = StoredKey::load(&key)?;
            let expiration = Utc::now() + chrono::Duration::days(days);
            let permission = match permission {
                Role::Admin => Permission::Admin,
                Role::Anytime => Permission::Anytime,
                Role::Scheduled => Permission::Scheduled(Schedule {
                    expiry: None,
                    interval: match window {
                        Some(window) => parse_window(&window)?,
                        None => TimeInterval::ALL_DAY,
                    },
                    weekdays: Weekdays::all(),
                }),
            };
            let request = CreateNewKeyRequest {
                id: Uuid::new_v4(),
                name,
                permission,
                expiration,
                secret: KeyData::generate(),
            };
            client.create_new_key(&key.credentials, &request).await?;

            let invitation = StoredKey::new(
                key.lock,
                KeyCredentials::new(request.id, request.secret.clone()),
            );
            invitation.save(&out)?;
            println!("Invited {} ({})", request.name, request.id);
            println!("  Invitation saved to: {}", out.display());
        }
        Commands::Confirm { invitation } => {
            let invitation = StoredKey::load(&invitation)?;
            let credentials = client.confirm_new_key(&invitation.credentials).await?;
            let path = StoredKey::new(invitation.lock, credentials).save_in_home()?;
            println!("Key confirmed");
            println!("  Saved to: {}", path.display());
        }
        Commands::Remove { key, id, pending } => {
            let key = StoredKey::load(&key)?;
            let kind = if pending {
                KeyKind::NewKey
            } else {
                KeyKind::Key
            };
            client.remove_key(&key.credentials, id, kind).await?;
            println!("Removed {}", id);
        }
    }

    Ok(())
}

async fn scan(central: &BtleCentral) -> Result<(), Box<dyn std::error::Error>> {
    println!(
        "Scanning for locks ({} seconds)...",
        central.config().scan_duration.as_secs()
    );
    let devices = central.scan().await?;

    println!("\nFound {} devices:", devices.len());
    for device in devices {
        let rssi = device
            .rssi
            .map(|r| format!("{} dBm", r))
            .unwrap_or_else(|| "N/A".to_string());
        let marker = if device.is_lock { " [LOCK]" } else { "" };
        println!("  {} ({}) RSSI: {}{}", device.name, device.address, rssi, marker);
    }
    Ok(())
}

fn print_key(item: &KeyListItem) {
    let pending = match item {
        KeyListItem::Key(_) => "",
        KeyListItem::NewKey(_) => " (pending)",
    };
    println!(
        "  {} {} {:?}{}",
        item.id(),
        item.name(),
        item.permission(),
        pending
    );
}

/// `HH:MM-HH:MM` to seconds since midnight
fn parse_window(window: &str) -> Result<TimeInterval, Box<dyn std::error::Error>> {
    fn seconds(time: &str) -> Result<u32, Box<dyn std::error::Error>> {
        let (hours, minutes) = time
            .trim()
            .split_once(':')
            .ok_or_else(|| format!("expected HH:MM, got {time:?}"))?;
        let (hours, minutes) = (hours.parse::<u32>()?, minutes.parse::<u32>()?);
        if minutes > 59 {
            return Err(format!("minutes out of range in {time:?}").into());
        }
        hours
            .checked_mul(3600)
            .and_then(|seconds| seconds.checked_add(minutes * 60))
            .ok_or_else(|| format!("hours out of range in {time:?}").into())
    }

    let (lower, upper) = window
        .split_once('-')
        .ok_or_else(|| format!("expected HH:MM-HH:MM, got {window:?}"))?;
    Ok(TimeInterval::new(seconds(lower)?, seconds(upper)?)?)
}
