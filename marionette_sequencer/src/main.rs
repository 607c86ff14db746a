//! # Marionette Sequencer
//!
//! Keyframe playback engine for an animatronic replica prop.
//!
//! Loads a config directory (`config.toml` + `channels.toml` +
//! `sequences/*.json`), homes the rig, and either plays a named sequence
//! to completion or idles as a service until interrupted. The actuator
//! backend here is the simulation sink; the serial transport to real
//! hardware plugs in behind the same `ActuatorSink` trait.

use clap::Parser;
use marionette_common::sink::SimulatedSink;
use marionette_sequencer::config::load_config_dir;
use marionette_sequencer::cycle::rt_setup;
use marionette_sequencer::engine::SequencerEngine;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

/// Marionette Sequencer — keyframe playback for animatronic props
#[derive(Parser, Debug)]
#[command(name = "marionette_sequencer")]
#[command(version)]
#[command(about = "Animatronic motion sequencing with safety-limit enforcement")]
struct Args {
    /// Path to the config directory (config.toml + channels.toml + sequences/).
    #[arg(long, default_value = "config")]
    config_dir: PathBuf,

    /// Play this sequence and exit when it finishes.
    #[arg(long, value_name = "NAME")]
    play: Option<String>,

    /// List installed sequences and exit.
    #[arg(long)]
    list: bool,

    /// CPU core to pin the tick task to (rt feature only).
    #[arg(long, default_value_t = 1)]
    cpu_core: usize,

    /// SCHED_FIFO priority (rt feature only).
    #[arg(long, default_value_t = 80)]
    rt_priority: i32,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    setup_tracing(&args);

    info!(
        "Marionette Sequencer v{} starting...",
        env!("CARGO_PKG_VERSION")
    );

    if let Err(e) = run(&args) {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("Marionette Sequencer shutdown complete");
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let loaded = load_config_dir(&args.config_dir)?;
    info!(
        "Config OK: {} channels, {} sequences",
        loaded.table.len(),
        loaded.library.len()
    );

    if args.list {
        for name in loaded.library.names() {
            println!("{name}");
        }
        return Ok(());
    }

    // RT promotion for the process (no-op without the rt feature).
    rt_setup(args.cpu_core, args.rt_priority)?;

    let engine = SequencerEngine::from_config(loaded, Box::new(SimulatedSink::new()));

    // Park the rig at its home pose before any playback.
    let homed = engine.home_all()?;
    info!("Homed {homed} channels");

    // Ctrl-C → graceful stop.
    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    if let Some(name) = &args.play {
        engine.play(name)?;
        info!("Playing '{name}'");

        // Wait for completion or interrupt.
        while running.load(Ordering::SeqCst) {
            let snapshot = engine.status();
            if snapshot.status.is_terminal() {
                info!(
                    "Playback finished: {:?}, {} ticks, max {}µs",
                    snapshot.status, snapshot.stats.ticks, snapshot.stats.max_tick_us
                );
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        if !running.load(Ordering::SeqCst) {
            let _ = engine.stop();
        }
    } else {
        info!("No --play given; idling until interrupted");
        while running.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(100));
        }
    }

    engine.shutdown();
    Ok(())
}

/// Setup tracing subscriber based on CLI arguments.
fn setup_tracing(args: &Args) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
