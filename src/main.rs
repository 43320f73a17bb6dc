//! ota-sim: drive a complete OTA session against the in-process
//! peripheral.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  ota-sim                                                     │
//! │                                                              │
//! │  OtaEngine ──▶ TransportListener<SimLink> ──▶ SimulatedTarget│
//! │      ▲                                             │         │
//! │      └──── GattConnection (discovery + demux) ◀────┘ events  │
//! │                                                              │
//! │  host loop: pump events · tick(10 ms) · check observer       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Sequence: discover OTA service → read partition address → transfer
//! image → record image CRC in user data → reset target.

use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use log::{info, warn};

use otalink::OtaConfig;
use otalink::error::{DiscoveryError, TransferError};
use otalink::gatt::{GattConnection, TransportListener};
use otalink::ota::frame::crc16;
use otalink::ota::{FileKind, HmacStreamCipher, OtaEngine, OtaObserver, PartitionAddress, TargetStatus};
use otalink::sim::{Faults, SimEvent, SimLink, SimulatedTarget};

/// Simulated time per host-loop iteration.
const STEP: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    App,
    Config,
    Patch,
}

impl From<KindArg> for FileKind {
    fn from(k: KindArg) -> Self {
        match k {
            KindArg::App => FileKind::App,
            KindArg::Config => FileKind::Config,
            KindArg::Patch => FileKind::Patch,
        }
    }
}

#[derive(Debug, Parser)]
#[command(version, about = "Run an OTA transfer against a simulated BLE peripheral")]
struct Args {
    /// JSON engine configuration (defaults used when absent)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Image file to send; a synthetic image is generated when absent
    #[arg(short, long)]
    image: Option<PathBuf>,
    /// Size of the synthetic image in bytes
    #[arg(short, long, default_value_t = 4096)]
    size: usize,
    #[arg(short, long, value_enum, default_value_t = KindArg::App)]
    kind: KindArg,
    /// Encrypt data frames with this shared key
    #[arg(long)]
    key: Option<String>,
    /// Make the target drop the ack for this frame once
    #[arg(long)]
    drop_ack: Option<u16>,
}

// ── Observer ──────────────────────────────────────────────────

#[derive(Default)]
struct HostObserver {
    complete: bool,
    failed: Option<TransferError>,
    address: Option<PartitionAddress>,
    user_data: Option<Result<(), TargetStatus>>,
}

impl OtaObserver for HostObserver {
    fn on_read_address(&mut self, address: PartitionAddress) {
        info!(
            "Partition {}: 0x{:08x} (+0x{:x})",
            address.kind, address.address, address.length
        );
        self.address = Some(address);
    }

    fn on_user_data_written(&mut self, result: Result<(), TargetStatus>) {
        self.user_data = Some(result);
    }

    fn on_transfer_complete(&mut self, kind: FileKind) {
        info!("Transfer of {} image complete", kind);
        self.complete = true;
    }

    fn on_transfer_failed(&mut self, error: TransferError) {
        warn!("Transfer failed: {}", error);
        self.failed = Some(error);
    }
}

type Engine = OtaEngine<TransportListener<SimLink>, HostObserver>;

// ── Host loop ─────────────────────────────────────────────────

/// Deliver everything the target has queued.
fn pump(link: &SimLink, conn: &mut GattConnection<SimLink>, engine: &mut Engine) {
    while let Some(event) = link.poll_event() {
        match event {
            SimEvent::Services(services) => conn.on_services_discovered(Ok(services.as_slice())),
            SimEvent::Characteristics {
                service,
                characteristics,
            } => conn.on_characteristics_discovered(service, Ok(characteristics.as_slice())),
            SimEvent::Notify {
                characteristic,
                value,
            } => {
                conn.on_value_updated(characteristic, &value, &mut *engine);
            }
            SimEvent::Rssi(rssi) => conn.on_rssi_read(Ok(rssi)),
        }
    }
}

/// Pump and advance time until `done` holds or `limit` elapses.
fn run_until(
    link: &SimLink,
    conn: &mut GattConnection<SimLink>,
    engine: &mut Engine,
    limit: Duration,
    mut done: impl FnMut(&GattConnection<SimLink>, &Engine) -> bool,
) -> bool {
    let mut elapsed = Duration::ZERO;
    loop {
        pump(link, conn, engine);
        if done(conn, engine) {
            return true;
        }
        if elapsed >= limit {
            return false;
        }
        conn.tick(STEP);
        engine.tick(STEP);
        elapsed += STEP;
    }
}

fn load_config(path: Option<&Path>) -> Result<OtaConfig> {
    let Some(path) = path else {
        return Ok(OtaConfig::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let config: OtaConfig = serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    config.validate()?;
    info!("Config loaded from {}", path.display());
    Ok(config)
}

fn synthesize_image(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i.wrapping_mul(31) ^ (i >> 8)) as u8).collect()
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    info!("ota-sim v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(args.config.as_deref())?;
    let image = match &args.image {
        Some(path) => fs::read(path).with_context(|| format!("reading {}", path.display()))?,
        None => synthesize_image(args.size),
    };
    let kind = FileKind::from(args.kind);

    // ── 1. Peripheral + link ──────────────────────────────────
    let mut target = SimulatedTarget::new(&config).with_faults(Faults {
        drop_ack_at: args.drop_ack,
        ..Faults::default()
    });
    if let Some(key) = &args.key {
        target = target.with_cipher(Box::new(HmacStreamCipher::new(key.as_bytes())));
    }
    let link = SimLink::new(target);
    let mut conn = GattConnection::new(link.clone(), &config);
    conn.on_name_updated("ota-sim-target");

    let mut listener = TransportListener::new(link.clone());
    listener.subscribe()?;
    let mut engine = OtaEngine::new(config.clone(), listener).with_observer(HostObserver::default());
    if let Some(key) = &args.key {
        engine = engine.with_cipher(Box::new(HmacStreamCipher::new(key.as_bytes())));
        engine.set_encrypt(true);
    }

    // ── 2. Discovery ──────────────────────────────────────────
    let discovered: Rc<Cell<Option<Result<(), DiscoveryError>>>> = Rc::default();
    let slot = Rc::clone(&discovered);
    conn.discover_ota(move |r| slot.set(Some(r)));
    run_until(&link, &mut conn, &mut engine, config.discovery_timeout(), |_, _| {
        discovered.get().is_some()
    });
    match discovered.get() {
        Some(Ok(())) => info!("OTA service discovered"),
        Some(Err(e)) => bail!("discovery failed: {e}"),
        None => bail!("discovery never completed"),
    }
    conn.read_peripheral_rssi();
    pump(&link, &mut conn, &mut engine);
    if let Some(rssi) = conn.rssi() {
        info!("Link RSSI {} dBm", rssi);
    }

    // ── 3. Partition address ──────────────────────────────────
    engine.read_partition_addr(kind)?;
    run_until(&link, &mut conn, &mut engine, config.request_timeout(), |_, e| {
        e.observer().address.is_some()
    });

    // ── 4. Transfer ───────────────────────────────────────────
    engine.load_binary(&image, kind)?;
    let limit = config.ack_timeout() * 2 + STEP * image.len().div_ceil(usize::from(config.frame_payload_size)) as u32;
    let finished = run_until(&link, &mut conn, &mut engine, limit, |_, e| {
        e.observer().complete || e.observer().failed.is_some()
    });
    if let Some(err) = engine.observer().failed {
        bail!("transfer failed: {err}");
    }
    if !finished {
        engine.cancel();
        bail!("transfer did not finish");
    }
    // Let the target process End.
    pump(&link, &mut conn, &mut engine);
    match link.target().image(kind) {
        Some(stored) if stored == image.as_slice() => info!("Target verified {} bytes", stored.len()),
        _ => bail!("target did not commit the image"),
    }

    // ── 5. User data ──────────────────────────────────────────
    let mut tag = [0u8; 6];
    tag[..2].copy_from_slice(&crc16(&image).to_le_bytes());
    tag[2..].copy_from_slice(&(image.len() as u32).to_le_bytes());
    engine.write_user_data(&tag, config.user_data_base)?;
    run_until(&link, &mut conn, &mut engine, config.request_timeout(), |_, e| {
        e.observer().user_data.is_some()
    });
    match engine.observer().user_data {
        Some(Ok(())) => info!("Image tag written to user data"),
        Some(Err(status)) => warn!("User data write refused: {}", status),
        None => warn!("User data write unanswered"),
    }

    // ── 6. Reset ──────────────────────────────────────────────
    engine.reset_target();
    pump(&link, &mut conn, &mut engine);
    info!(
        "Done: {} packets sent, target reset count {}",
        engine.listener().packets_sent(),
        link.target().resets()
    );
    Ok(())
}
