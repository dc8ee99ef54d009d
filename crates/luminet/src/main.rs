use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use luminet_core::{
    decode, ChannelRequest, ConfigManager, LightingConsole, Settings, ShowStore, UniverseConfig,
    ARTNET_PORT,
};
use tokio::net::UdpSocket;

/// Universe resolution and Art-Net output for the Luminet DMX console.
#[derive(Parser, Debug)]
#[command(name = "luminet")]
#[command(about = "Luminet DMX console")]
struct Args {
    /// Settings file (created with defaults when missing)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding presets, patches and the saved universe
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Art-Net universe for this run (not persisted)
    #[arg(long)]
    universe: Option<u16>,

    /// Destination address for this run (not persisted)
    #[arg(long)]
    broadcast_ip: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write one channel immediately
    Set { channel: i64, value: f64 },

    /// Write several `channel=value` pairs, optionally fading
    SetMany {
        #[arg(value_parser = parse_channel_value, required = true)]
        values: Vec<ChannelRequest>,
        #[arg(long)]
        fade: Option<u64>,
    },

    /// Apply a stored preset
    Apply {
        preset_id: String,
        #[arg(long)]
        fade: Option<u64>,
    },

    /// Zero every channel a stored preset drives
    Clear {
        preset_id: String,
        #[arg(long)]
        fade: Option<u64>,
    },

    /// Fade the whole universe to zero
    Blackout {
        #[arg(long)]
        fade: Option<u64>,
    },

    /// Drive a patched fixture to its home position
    Home {
        patch_id: String,
        #[arg(long)]
        fade: Option<u64>,
    },

    /// Print the non-zero channels of the current universe
    Values,

    /// Check whether fixtures of a template fit back to back
    CheckAddresses {
        template_id: String,
        quantity: usize,
        #[arg(long, default_value = "0")]
        universe: u16,
        #[arg(long)]
        start: Option<u16>,
    },

    /// List the address ranges taken by patched fixtures
    UsedAddresses {
        #[arg(long, default_value = "0")]
        universe: u16,
    },

    /// Show or persist the universe configuration
    Config {
        #[arg(long)]
        universe: Option<u16>,
        #[arg(long)]
        broadcast_ip: Option<String>,
    },

    /// Listen for ArtDMX frames and log them
    Monitor {
        #[arg(long, default_value_t = ARTNET_PORT)]
        port: u16,
    },
}

fn parse_channel_value(s: &str) -> Result<ChannelRequest, String> {
    let (channel, value) = s
        .split_once('=')
        .ok_or_else(|| format!("Expected channel=value, got '{}'", s))?;
    let channel = channel
        .trim()
        .parse::<i64>()
        .map_err(|e| format!("Invalid channel '{}': {}", channel, e))?;
    let value = value
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("Invalid value '{}': {}", value, e))?;
    Ok(ChannelRequest::new(channel, value))
}

fn load_settings(args: &Args) -> Result<Settings, anyhow::Error> {
    let mut settings = match &args.config {
        Some(path) => ConfigManager::new(Some(path.clone()))
            .load()
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => Settings::default(),
    };
    if let Some(dir) = &args.data_dir {
        settings.data_dir = dir.clone();
    }

    if let Err(errors) = ConfigManager::validate_settings(&settings) {
        bail!("Invalid settings: {}", errors.join(", "));
    }
    Ok(settings)
}

/// The persisted universe configuration with this run's overrides applied.
fn override_config(console: &LightingConsole, args: &Args) -> Option<UniverseConfig> {
    if args.universe.is_none() && args.broadcast_ip.is_none() {
        return None;
    }
    let mut config = console.universe_config();
    if let Some(universe) = args.universe {
        config.universe = universe;
    }
    if let Some(ip) = &args.broadcast_ip {
        config.broadcast_ip = ip.clone();
    }
    Some(config)
}

async fn monitor(port: u16) -> Result<(), anyhow::Error> {
    let socket = UdpSocket::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind Art-Net monitor on port {}", port))?;
    log::info!("Listening for Art-Net on port {}", port);

    let mut buf = [0u8; 1024];
    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, from) = received?;
                match decode(&buf[..len]) {
                    Ok(packet) => {
                        let first: Vec<u8> = packet.data.iter().take(10).copied().collect();
                        log::info!(
                            "ArtDMX from {} universe {} seq {} ({} channels) {:?}",
                            from,
                            packet.universe,
                            packet.sequence,
                            packet.data.len(),
                            first
                        );
                    }
                    Err(e) => log::debug!("Ignoring {} bytes from {}: {}", len, from, e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Monitor stopped");
                return Ok(());
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Command::Monitor { port } = &args.command {
        return monitor(*port).await;
    }

    let settings = load_settings(&args)?;
    let store = ShowStore::open(&settings.data_dir)
        .with_context(|| format!("Failed to open {}", settings.data_dir.display()))?;
    let mut console = LightingConsole::new(settings, store);

    if let Command::Config {
        universe,
        broadcast_ip,
    } = &args.command
    {
        let mut config = console.universe_config();
        if universe.is_none() && broadcast_ip.is_none() {
            println!("Universe: {}", config.universe);
            println!("Mode: {}", config.get_mode_string());
            println!(
                "Destination: {}",
                config.get_destination(console.settings().artnet_port)
            );
            return Ok(());
        }
        if let Some(universe) = universe {
            config.universe = *universe;
        }
        if let Some(ip) = broadcast_ip {
            config.broadcast_ip = ip.clone();
        }
        let config = console.update_universe_config(config).await?;
        println!("Saved universe {} -> {}", config.universe, config.broadcast_ip);
        return Ok(());
    }

    // Store-only queries never start the output.
    match &args.command {
        Command::CheckAddresses {
            template_id,
            quantity,
            universe,
            start,
        } => {
            let check = console.check_addresses(*universe, template_id, *quantity, *start)?;
            if check.can_fit {
                println!(
                    "{} x {} fit at {:?} ({} channels)",
                    quantity, template_id, check.addresses, check.total_channels
                );
            } else {
                println!(
                    "Does not fit: {} (placed {:?})",
                    check.error.unwrap_or_default(),
                    check.addresses
                );
            }
            return Ok(());
        }
        Command::UsedAddresses { universe } => {
            for range in console.used_addresses(*universe) {
                println!("{:>3}-{:<3} {}", range.start, range.end, range.patch_id);
            }
            return Ok(());
        }
        _ => {}
    }

    if let Some(config) = override_config(&console, &args) {
        console = console.with_universe_config(config);
    }
    console.initialize().await?;

    let result = run_command(&console, &args.command).await;
    console.wait_for_fades().await?;
    console.shutdown().await?;
    result
}

async fn run_command(console: &LightingConsole, command: &Command) -> Result<(), anyhow::Error> {
    match command {
        Command::Set { channel, value } => {
            let written = console.set_channel(*channel, *value).await?;
            println!("Channel {} = {}", written.channel, written.value);
        }
        Command::SetMany { values, fade } => {
            let count = console.set_channels(values, *fade).await?;
            println!("Updated {} channels", count);
        }
        Command::Apply { preset_id, fade } => {
            let applied = console.apply_preset(preset_id, *fade).await?;
            println!(
                "{} ({} channels, {} ms)",
                applied.message, applied.channels_updated, applied.fade_ms
            );
        }
        Command::Clear { preset_id, fade } => {
            let cleared = console.clear_preset(preset_id, *fade).await?;
            println!(
                "{} ({} channels, {} ms)",
                cleared.message, cleared.channels_updated, cleared.fade_ms
            );
        }
        Command::Blackout { fade } => {
            if !console.blackout(*fade).await? {
                println!("Already blacked out");
            }
        }
        Command::Home { patch_id, fade } => {
            let count = console.home_patch(patch_id, *fade).await?;
            println!("Homed {} channels", count);
        }
        Command::Values => {
            let values = console.current_values().await?;
            for (index, value) in values.iter().enumerate().filter(|(_, v)| **v > 0) {
                println!("{:>3}: {}", index + 1, value);
            }
        }
        Command::CheckAddresses { .. }
        | Command::UsedAddresses { .. }
        | Command::Config { .. }
        | Command::Monitor { .. } => bail!("{:?} does not run against a live console", command),
    }
    Ok(())
}
