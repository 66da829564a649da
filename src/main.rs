use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use racegym_sim::{Simulation, SimulationConfig, Track};

/// Runs one scripted episode and logs how the vehicle gets on.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// JSON track file. A circular track is generated when omitted.
    #[arg(long)]
    track: Option<PathBuf>,
    /// Radius of the generated circular track.
    #[arg(long, default_value_t = 200.0)]
    radius: f64,
    /// Segments of the generated circular track.
    #[arg(long, default_value_t = 16)]
    segments: usize,
    /// JSON simulation config.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Simulated seconds to run.
    #[arg(long, default_value_t = 10.0)]
    seconds: f64,
    #[arg(long, default_value_t = 1.0)]
    throttle: f64,
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    steer: f64,
    #[arg(long, default_value_t = 0.0)]
    brake: f64,
    /// Curve parameter to spawn at.
    #[arg(long, default_value_t = 0.0)]
    spawn: f64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => SimulationConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SimulationConfig::default(),
    };
    let mut sim = Simulation::new(config);

    match &args.track {
        Some(path) => sim
            .load_track_file(path)
            .with_context(|| format!("loading track {}", path.display()))?,
        None => {
            let width = sim.config().track_width;
            sim.set_track(Track::circle(args.radius, args.segments, width))
                .context("building circular track")?
        }
    }

    let id = sim.add_vehicle(args.spawn)?;
    let params = sim.vehicle(id)?.params();
    info!(id = id.raw(), mass = params.mass, max_power = params.max_power, "vehicle spawned");
    sim.set_vehicle_control(id, args.steer, args.throttle, args.brake)?;

    let frame = sim.config().dt * sim.config().substeps as f64;
    if frame <= 0.0 {
        bail!("config has a non-positive frame time ({frame} s)");
    }
    let frames = (args.seconds / frame).ceil() as usize;
    let per_second = ((1.0 / frame).round() as usize).max(1);

    for n in 1..=frames {
        sim.step();

        let crashed = sim.is_vehicle_crashed(id)?;
        let off_track = sim.is_vehicle_off_track(id)?;
        let elapsed = n as f64 * frame;

        if n % per_second == 0 || crashed || off_track {
            let speed = sim.vehicle_velocity(id)?.norm();
            let t = sim.vehicle_track_position(id)?;
            info!(elapsed, speed, t, "progress");
        }

        if crashed || off_track {
            info!(elapsed, crashed, off_track, "episode ended");
            return Ok(());
        }
    }

    info!(seconds = args.seconds, "episode finished");
    Ok(())
}
