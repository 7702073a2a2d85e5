use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use multicam::platform::{default_providers, CaptureBackend, NokhwaBackend};
use multicam::{
    CapabilityCache, CapabilityProbe, ChannelId, DeviceCatalog, DeviceIdentity, MultiCamConfig,
    MultiCamController, ProbeReport, RecordingSink, SurfaceSize,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;

#[derive(Parser)]
#[command(name = "multicam-cli")]
#[command(about = "Probe cameras and preview up to four of them headless")]
#[command(version)]
struct Cli {
    /// Configuration file (default: multicam.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached cameras
    ListDevices {
        #[arg(long)]
        json: bool,
    },

    /// Probe one camera for the modes it really honors
    Probe {
        /// Device index (from 'list-devices')
        index: u32,

        #[arg(long)]
        json: bool,

        /// Do not write the result to the capability cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Inspect or wipe the capability cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Stream every configured channel and keep the last frame of each
    Preview {
        /// Stop after this many ticks (default: run until Ctrl-C)
        #[arg(short, long)]
        ticks: Option<u64>,

        /// Write the last composed frame per channel here as PNG
        #[arg(short, long)]
        snapshot_dir: Option<PathBuf>,

        #[arg(long, default_value = "640")]
        width: u32,

        #[arg(long, default_value = "360")]
        height: u32,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    Show,
    Clear,
}

fn main() -> anyhow::Result<()> {
    multicam::init_logging();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => MultiCamConfig::load_from_file(path)?,
        None => MultiCamConfig::load_or_default(),
    };

    match cli.command {
        Commands::ListDevices { json } => cmd_list_devices(&config, json),
        Commands::Probe {
            index,
            json,
            no_cache,
        } => cmd_probe(&config, index, json, no_cache),
        Commands::Cache { action } => cmd_cache(&config, action),
        Commands::Preview {
            ticks,
            snapshot_dir,
            width,
            height,
        } => cmd_preview(config, ticks, snapshot_dir, SurfaceSize::new(width, height)),
    }
}

fn native_catalog(config: &MultiCamConfig) -> (Arc<dyn CaptureBackend>, DeviceCatalog) {
    let backend: Arc<dyn CaptureBackend> = Arc::new(NokhwaBackend::new());
    let providers = default_providers(backend.clone(), config.catalog.fallback_max_index);
    (backend, DeviceCatalog::new(providers, &config.catalog))
}

fn cmd_list_devices(config: &MultiCamConfig, json: bool) -> anyhow::Result<()> {
    let (_, mut catalog) = native_catalog(config);
    let devices = catalog.enumerate();
    if json {
        println!("{}", serde_json::to_string(&devices)?);
    } else if devices.is_empty() {
        println!("No cameras found");
    } else {
        for device in devices {
            println!("{}", device.display_name());
        }
    }
    Ok(())
}

fn cmd_probe(config: &MultiCamConfig, index: u32, json: bool, no_cache: bool) -> anyhow::Result<()> {
    let (backend, mut catalog) = native_catalog(config);
    catalog.enumerate();
    let device = match catalog.devices().iter().find(|d| d.index == index) {
        Some(device) => device.clone(),
        None => bail!("No camera at index {}", index),
    };

    let probe = CapabilityProbe::new(backend, config.probe.clone());
    let report = ProbeReport {
        outcome: probe.run(&device),
        device,
        probed_at: Utc::now(),
    };

    if !no_cache {
        report.persist(&CapabilityCache::new(config.cache.path.clone()))?;
    }

    if json {
        println!("{}", serde_json::to_string(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &ProbeReport) {
    println!("{}", report.device.display_name());
    let modes = report.outcome.modes();
    if modes.is_empty() {
        println!("  {:?}: no usable modes", report.outcome);
    }
    for mode in modes {
        println!("  {}", mode);
    }
}

fn cmd_cache(config: &MultiCamConfig, action: CacheAction) -> anyhow::Result<()> {
    let cache = CapabilityCache::new(config.cache.path.clone());
    match action {
        CacheAction::Show => {
            println!("{}", serde_json::to_string_pretty(&cache.load())?);
        }
        CacheAction::Clear => {
            cache.clear()?;
            println!("Cleared {}", cache.path().display());
        }
    }
    Ok(())
}

fn cmd_preview(
    config: MultiCamConfig,
    ticks: Option<u64>,
    snapshot_dir: Option<PathBuf>,
    surface: SurfaceSize,
) -> anyhow::Result<()> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
        .context("Failed to install Ctrl-C handler")?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let tick_interval = config.pipeline.tick_interval();
        let mut controller = MultiCamController::with_native_backend(config);
        let devices = controller.refresh_devices();
        log::info!("Found {} camera(s)", devices.len());
        controller.settle_probes().await;

        let report = controller.start()?;
        println!(
            "Streaming {} channel(s), {} failed",
            report.active.len(),
            report.failed.len()
        );

        let mut sink = RecordingSink::new(surface);
        let mut interval = tokio::time::interval(tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut done = 0u64;
        while !interrupted.load(Ordering::SeqCst) && ticks.map_or(true, |limit| done < limit) {
            interval.tick().await;
            controller.tick(&mut sink);
            done += 1;
        }

        for channel in ChannelId::all() {
            let slot = controller.channel(channel);
            let name = slot
                .device
                .as_ref()
                .map(DeviceIdentity::display_name)
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{}: {} [{}] {} frame(s)",
                channel,
                name,
                slot.status,
                sink.frames_presented(channel)
            );
        }

        controller.stop();

        if let Some(dir) = snapshot_dir {
            write_snapshots(&sink, &dir)?;
        }
        Ok::<(), anyhow::Error>(())
    })
}

fn write_snapshots(sink: &RecordingSink, dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    for channel in ChannelId::all() {
        if let Some(image) = sink.last_frame(channel) {
            let path = dir.join(format!("channel-{}.png", channel.index() + 1));
            image
                .save(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Saved {}", path.display());
        }
    }
    Ok(())
}
