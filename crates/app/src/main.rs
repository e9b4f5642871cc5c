use std::{path::PathBuf, rc::Rc, time::Duration};

use clap::{Parser, Subcommand};
use flames_fx_core::{
    AppConfig, CapabilityProbe, EnvironmentEvent, EventLoop, FlamesError, NoMemoryInfo, PerformanceMonitor,
    QualityController, QualityLevel, RevealConfig, StaggeredAnimation, StaticEnvironment,
    TimerHost,
};
use tracing_subscriber::EnvFilter;

/// Battery level reported when a drain is simulated.
const DRAINED_BATTERY: f64 = 0.1;

fn main() -> flames_fx_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::from_json_file(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Probe { env } => run_probe(&config, env),
        Commands::Simulate {
            env,
            fps,
            battery_drain_at,
        } => run_simulate(&config, env, &fps, battery_drain_at),
        Commands::Reveal {
            stages,
            delays,
            no_animate,
        } => run_reveal(&config, stages, delays, no_animate),
    }
}

fn load_environment(path: Option<PathBuf>) -> flames_fx_core::Result<StaticEnvironment> {
    match path {
        Some(path) => StaticEnvironment::from_json_file(path),
        None => Ok(StaticEnvironment::default()),
    }
}

fn run_probe(config: &AppConfig, env: Option<PathBuf>) -> flames_fx_core::Result<()> {
    let env = load_environment(env)?;
    let host = EventLoop::new();
    let probe = CapabilityProbe::new(Rc::new(env), Rc::new(host), config.probe.clone());
    let snapshot = probe.snapshot();
    let level = QualityLevel::seed_for(&snapshot);
    let budget = level
        .budget()
        .with_reduced_motion(snapshot.prefers_reduced_motion);
    tracing::info!(%level, max_particles = budget.max_particles, "capabilities probed");

    let report = serde_json::json!({
        "capabilities": snapshot,
        "quality_level": level,
        "budget": budget,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_simulate(
    config: &AppConfig,
    env: Option<PathBuf>,
    fps_trace: &[u32],
    battery_drain_at: Option<usize>,
) -> flames_fx_core::Result<()> {
    if fps_trace.is_empty() {
        return Err(FlamesError::msg("--fps needs at least one frame rate"));
    }
    if let Some(second) = battery_drain_at {
        if second >= fps_trace.len() {
            return Err(FlamesError::msg(format!(
                "--battery-drain-at {second} is past the end of a {}-second trace",
                fps_trace.len()
            )));
        }
    }

    let env = load_environment(env)?;
    let host = EventLoop::new();
    let probe = CapabilityProbe::new(Rc::new(env), Rc::new(host.clone()), config.probe.clone());
    let controller = QualityController::new(config.performance.clone(), &probe.snapshot());
    let monitor = Rc::new(PerformanceMonitor::start(
        Rc::new(host.clone()),
        controller,
        NoMemoryInfo,
    ));
    tracing::info!(level = %monitor.quality_level(), "simulation starting");

    monitor.on_quality_change(|change| {
        tracing::info!(from = %change.from, to = %change.to, reason = ?change.reason, "transition");
    });
    let weak = Rc::downgrade(&monitor);
    probe.on_change(move |snapshot| {
        if let Some(monitor) = weak.upgrade() {
            monitor.apply_capabilities(snapshot);
        }
    });

    // Anchor the first measurement window.
    host.run_frame(Duration::from_millis(16));

    for (second, &fps) in fps_trace.iter().enumerate() {
        if battery_drain_at == Some(second) {
            probe.handle(EnvironmentEvent::BatteryLevel(DRAINED_BATTERY));
        }

        let fps = u64::from(fps.max(1));
        let start = host.now();
        for frame in 1..=fps {
            let at = start + Duration::from_micros(frame * 1_000_000 / fps);
            host.run_frame(at.saturating_sub(host.now()));
        }

        // Assume the renderer fills whatever budget it is given.
        monitor.update_particle_count(monitor.budget().max_particles);
        let metrics = monitor.metrics();
        tracing::info!(
            second,
            measured = fps,
            average_fps = metrics.fps,
            level = %metrics.quality_level,
            max_particles = metrics.max_particles,
            low = metrics.is_performance_low,
            "window"
        );
    }

    monitor.stop();
    probe.shutdown();
    println!("{}", serde_json::to_string_pretty(&monitor.metrics())?);
    Ok(())
}

fn run_reveal(
    config: &AppConfig,
    stages: Option<Vec<String>>,
    delays: Option<Vec<u64>>,
    no_animate: bool,
) -> flames_fx_core::Result<()> {
    let mut reveal: RevealConfig = config.reveal.clone();
    if let Some(stages) = stages {
        reveal.stages = stages;
    }
    if let Some(delays) = delays {
        reveal.delays_ms = delays;
    }
    if no_animate {
        reveal.should_animate = false;
    }
    reveal.validate()?;

    let host = EventLoop::new();
    let animation = StaggeredAnimation::from_config(Rc::new(host.clone()), &reveal)?;
    let clock = host.clone();
    animation.on_stage_complete(move |stage| {
        tracing::info!(stage, at_ms = clock.now().as_millis() as u64, "stage complete");
    });

    animation.start_animation();
    let end = reveal.delays_ms.iter().copied().max().unwrap_or(0);
    host.advance(Duration::from_millis(end));

    tracing::info!(complete = animation.is_complete(), "reveal finished");
    println!("{}", serde_json::to_string_pretty(&animation.stages())?);
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "FLAMES effects runtime driver", long_about = None)]
struct Cli {
    /// JSON configuration file; defaults apply to anything omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sample an environment description and print the resulting capabilities.
    Probe {
        /// JSON environment description.
        #[arg(short, long)]
        env: Option<PathBuf>,
    },
    /// Replay a per-second frame-rate trace through the quality controller.
    Simulate {
        /// JSON environment description.
        #[arg(short, long)]
        env: Option<PathBuf>,
        /// Frames rendered in each simulated second.
        #[arg(long, value_delimiter = ',', default_values_t = [60, 60, 30, 30, 30, 30, 30, 30, 60, 60, 60, 60])]
        fps: Vec<u32>,
        /// Second at which the battery drops below the low-power threshold.
        #[arg(long)]
        battery_drain_at: Option<usize>,
    },
    /// Play a staggered reveal sequence on a virtual clock.
    Reveal {
        /// Stage names, overriding the configured reveal table.
        #[arg(long, value_delimiter = ',')]
        stages: Option<Vec<String>>,
        /// Stage offsets in milliseconds.
        #[arg(long, value_delimiter = ',')]
        delays: Option<Vec<u64>>,
        /// Complete every stage immediately.
        #[arg(long)]
        no_animate: bool,
    },
}
