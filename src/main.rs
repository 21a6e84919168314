//! # fbhwc - Framebuffer Hardware Composer daemon
//!
//! Opens the primary framebuffer, registers a logging callback table and
//! delivers vsync until interrupted. With `--headless` the framebuffer
//! devices are replaced by in-memory recording devices.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info};

use fbhwc::convert::LoggingConverter;
use fbhwc::fb::headless::HeadlessOpener;
use fbhwc::{DisplayId, HwComposer, HwcConfig, HwcProcs};

#[derive(Parser)]
#[command(name = "fbhwc")]
#[command(about = "Framebuffer hardware composer with video overlay and vsync delivery")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/fbhwc/fbhwc.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Use in-memory framebuffer devices instead of the device nodes
    #[arg(long, default_value_t = false)]
    headless: bool,

    /// Synthesize vsync instead of reading the kernel timestamp file
    #[arg(long)]
    fake_vsync: bool,

    /// Present decoder output on the video plane
    #[arg(long)]
    use_overlay: bool,

    /// Exit after this many seconds
    #[arg(long)]
    duration: Option<u64>,
}

/// Callback table that counts and logs ticks
#[derive(Default)]
struct TickLogger {
    ticks: AtomicU64,
    last: AtomicU64,
}

impl HwcProcs for TickLogger {
    fn vsync(&self, display: DisplayId, timestamp: i64) {
        let count = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        self.last.store(timestamp as u64, Ordering::Relaxed);
        debug!("vsync #{} on {} at {}", count, display, timestamp);
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    info!("🚀 Starting fbhwc - Framebuffer Hardware Composer");
    info!(
        "📄 Version: {} ({}, {}, built {})",
        fbhwc::VERSION,
        env!("FBHWC_GIT_COMMIT"),
        env!("FBHWC_TARGET"),
        env!("FBHWC_BUILD_DATE")
    );

    // Load configuration
    let mut config = match HwcConfig::load(&cli.config) {
        Ok(config) => {
            info!("✅ Configuration loaded from: {}", cli.config);
            config
        }
        Err(e) => {
            error!("❌ Failed to load configuration: {:#}", e);
            info!("📝 Using default configuration");
            HwcConfig::default()
        }
    };

    // Override config with CLI flags
    if cli.fake_vsync {
        config.vsync.fake = true;
        info!("⏱️  Synthetic vsync forced via CLI flag");
    }
    if cli.use_overlay {
        config.policy.use_overlay = true;
        info!("🎬 Video overlay enabled via CLI flag");
    }

    let mut composer = if cli.headless {
        info!("🖥️  Headless mode enabled - framebuffer calls are recorded, not issued");
        config.vsync.fake = true;
        HwComposer::with_backend(
            config,
            Box::new(HeadlessOpener::default()),
            Box::new(LoggingConverter::new()),
        )
    } else {
        HwComposer::open(config)
    }
    .context("Failed to open the composer")?;

    let procs = Arc::new(TickLogger::default());
    composer.register_procs(procs.clone());
    composer
        .set_vsync_enabled(DisplayId::Primary, true)
        .context("Failed to enable vsync")?;

    for line in composer.dump().lines() {
        info!("{}", line);
    }
    info!("✨ fbhwc is ready");

    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .context("Failed to install the Ctrl-C handler")?;

    let started = Instant::now();
    match cli.duration {
        Some(secs) => {
            let _ = stop_rx.recv_timeout(Duration::from_secs(secs));
        }
        None => {
            let _ = stop_rx.recv();
        }
    }

    if let Err(e) = composer.set_vsync_enabled(DisplayId::Primary, false) {
        error!("❌ Failed to disable vsync: {}", e);
    }
    composer.shutdown();

    let ticks = procs.ticks.load(Ordering::Relaxed);
    let elapsed = started.elapsed().as_secs_f64();
    info!(
        "📊 {} vsync ticks in {:.1}s ({:.1} Hz), last at {}",
        ticks,
        elapsed,
        if elapsed > 0.0 { ticks as f64 / elapsed } else { 0.0 },
        procs.last.load(Ordering::Relaxed)
    );
    info!("👋 fbhwc shutting down");
    Ok(())
}
