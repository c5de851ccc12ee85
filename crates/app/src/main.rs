use std::net::UdpSocket;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use showsync_core::dmx::{
    open_sink, ArtNetRecorder, CaptureSink, DmxSequencer, DmxSink, DmxTransport,
};
use showsync_core::geometry::{CompiledMapping, PixelSample, WarpTransform};
use showsync_core::{
    AppConfig, HeadlessProvider, MonotonicClock, Orchestrator, PlaybackState, Point2, Project,
    Resolution, ShowPlayer, ShowSyncError, VideoMappingConfig,
};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

const STATUS_POLL: Duration = Duration::from_millis(100);

fn main() -> showsync_core::Result<()> {
    let cli = Cli::parse();
    let filter = init_tracing();
    let config = AppConfig::load(cli.config.as_deref())?;
    apply_log_level(filter.as_ref(), config.log_level.as_deref());

    match cli.command {
        Commands::Run {
            project,
            scene,
            seconds,
            dry_run,
        } => run_show(config, &project, scene.as_deref(), seconds, dry_run),
        Commands::Frame {
            project,
            sequence,
            at,
        } => print_frame(&project, &sequence, at),
        Commands::Mapping {
            file,
            samples,
            grid,
        } => print_mapping(&file, samples, grid.as_deref()),
        Commands::Record {
            out,
            universe,
            seconds,
            bind,
            name,
        } => record_take(&out, universe, seconds, &bind, name),
    }
}

fn run_show(
    mut config: AppConfig,
    project_path: &Path,
    scene: Option<&str>,
    seconds: Option<f64>,
    dry_run: bool,
) -> showsync_core::Result<()> {
    let project = Arc::new(load_project(project_path)?);
    project.artnet_config.apply_to(&mut config.dmx);
    config.validate()?;

    let sink: Box<dyn DmxSink> = if dry_run || !config.dmx.enabled {
        tracing::info!("DMX output captured in memory");
        Box::new(CaptureSink::new())
    } else {
        open_sink(&config.dmx)?
    };
    let frame_period = Duration::from_secs_f64(1.0 / f64::from(config.dmx.fps));
    let transport = DmxTransport::spawn(sink, frame_period)?;

    let orchestrator = Orchestrator::new(
        Arc::clone(&project),
        transport,
        Box::new(HeadlessProvider::new()),
        Arc::new(MonotonicClock::new()),
    )
    .with_default_universe(config.dmx.universe)
    .with_blackout_timeout(config.playback.blackout_timeout())
    .with_drift_tolerance(config.playback.drift_tolerance());
    let mut player = ShowPlayer::start(orchestrator, config.playback.tick_interval())?;

    let scene = scene
        .map(str::to_string)
        .or_else(|| config.playback.start_scene_id.clone());
    if scene.is_some() || config.playback.autoplay {
        let outcome = player.play(scene.as_deref())?;
        tracing::info!(?outcome, project = %project.id, "show started");
    }

    let deadline = seconds
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .map(|secs| Instant::now() + Duration::from_secs_f64(secs));
    loop {
        std::thread::sleep(STATUS_POLL);
        let status = player.status()?;
        if status.state == PlaybackState::Stopped {
            break;
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }
    }

    let stats = player.with_orchestrator(|orchestrator| orchestrator.transport_stats())?;
    player.shutdown()?;
    let report = serde_json::json!({
        "status": player.status()?,
        "transport": stats,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn print_frame(project_path: &Path, sequence_id: &str, at: f64) -> showsync_core::Result<()> {
    let project = load_project(project_path)?;
    let sequence = project
        .lighting_sequence(sequence_id)
        .ok_or_else(|| ShowSyncError::not_found(format!("lighting sequence {sequence_id}")))?;
    let sequencer = DmxSequencer::new(sequence, 0.0);
    let elapsed_ms = (at.max(0.0) * 1000.0).round() as u64;
    let fixtures = sequencer.sample(elapsed_ms);
    println!("{}", serde_json::to_string_pretty(&fixtures)?);
    Ok(())
}

fn print_mapping(path: &Path, samples: usize, grid: Option<&str>) -> showsync_core::Result<()> {
    let raw = std::fs::read_to_string(path)?;
    let config: VideoMappingConfig = serde_json::from_str(&raw)?;
    let mapping = CompiledMapping::compile(&config)?;

    let matrix = match mapping.transform() {
        WarpTransform::Perspective { forward, .. } => Some(forward.matrix()),
        _ => None,
    };
    let steps = samples.max(2);
    let mut points = Vec::with_capacity(steps * steps);
    for row in 0..steps {
        for col in 0..steps {
            let p = Point2 {
                x: col as f64 / (steps - 1) as f64,
                y: row as f64 / (steps - 1) as f64,
            };
            let sample = match mapping.sample(p) {
                PixelSample::Background(colour) => serde_json::json!({
                    "at": p,
                    "background": colour,
                }),
                PixelSample::Source { uv, alpha } => serde_json::json!({
                    "at": p,
                    "uv": uv,
                    "alpha": alpha,
                }),
            };
            points.push(sample);
        }
    }
    let faults: Vec<String> = mapping.faults().iter().map(ToString::to_string).collect();

    let resolution = match grid {
        Some(grid) => parse_grid(grid)?,
        None => mapping.resolution(),
    };
    let table = mapping.remap_table(resolution);
    let total = table.entries.len();
    let mapped = table.mapped_pixels();

    let report = serde_json::json!({
        "transform": mapping.transform().kind_name(),
        "matrix": matrix,
        "faults": faults,
        "coverage": {
            "width": table.width,
            "height": table.height,
            "mappedPixels": mapped,
            "ratio": if total == 0 { 0.0 } else { mapped as f64 / total as f64 },
        },
        "samples": points,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Parses a `WIDTHxHEIGHT` grid size.
fn parse_grid(grid: &str) -> showsync_core::Result<Resolution> {
    let invalid = || ShowSyncError::config(format!("grid {grid:?} is not WIDTHxHEIGHT"));
    let (width, height) = grid.split_once(['x', 'X']).ok_or_else(invalid)?;
    let width: u32 = width.trim().parse().map_err(|_| invalid())?;
    let height: u32 = height.trim().parse().map_err(|_| invalid())?;
    if width == 0 || height == 0 {
        return Err(invalid());
    }
    Ok(Resolution { width, height })
}

fn record_take(
    out: &Path,
    universe: u16,
    seconds: f64,
    bind: &str,
    name: Option<String>,
) -> showsync_core::Result<()> {
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(ShowSyncError::config("record length must be a positive number of seconds"));
    }
    let socket = UdpSocket::bind(bind)
        .map_err(|err| ShowSyncError::fatal(format!("cannot listen on {bind}: {err}")))?;
    let mut recorder = ArtNetRecorder::new(universe);
    recorder.listen(&socket, Duration::from_secs_f64(seconds))?;

    let id = out
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "recording".to_string());
    let name = name.unwrap_or_else(|| id.clone());
    let recording = recorder.finish(id, name);
    std::fs::write(out, serde_json::to_string_pretty(&recording)?)?;

    let report = serde_json::json!({
        "path": out.display().to_string(),
        "universe": recording.universe,
        "frames": recording.frames.len(),
        "durationMs": recording.duration_ms(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Reads a project file; relative media paths resolve against its directory.
fn load_project(path: &Path) -> showsync_core::Result<Project> {
    let raw = std::fs::read_to_string(path)?;
    let mut project: Project = serde_json::from_str(&raw)?;
    if project.base_path.is_none() {
        project.base_path = path.parent().map(Path::to_path_buf);
    }
    tracing::info!(
        path = %path.display(),
        scenes = project.scenes.len(),
        sequences = project.lighting_sequences.len(),
        "project loaded"
    );
    Ok(project)
}

/// Installs the subscriber before anything can log. Returns a handle for the
/// configured level unless `RUST_LOG` is set, which always wins.
fn init_tracing() -> Option<FilterHandle> {
    let from_env = std::env::var_os(EnvFilter::DEFAULT_ENV).is_some();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .ok()?;
    (!from_env).then_some(handle)
}

fn apply_log_level(handle: Option<&FilterHandle>, level: Option<&str>) {
    let (Some(handle), Some(level)) = (handle, level) else {
        return;
    };
    match EnvFilter::try_new(level) {
        Ok(filter) => {
            if let Err(err) = handle.reload(filter) {
                tracing::warn!(error = %err, "cannot apply configured log level");
            }
        }
        Err(err) => tracing::warn!(%level, error = %err, "ignoring invalid log level"),
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Synchronized video, lighting and projection mapping player", long_about = None)]
struct Cli {
    /// Player configuration file (JSON). Missing files fall back to defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a project headless, driving the configured DMX output.
    Run {
        /// Project file to load.
        project: PathBuf,
        /// Scene to start instead of the configured start scene.
        #[arg(short, long)]
        scene: Option<String>,
        /// Stop after this many seconds instead of at scene end.
        #[arg(long)]
        seconds: Option<f64>,
        /// Capture DMX frames in memory instead of sending them.
        #[arg(long)]
        dry_run: bool,
    },
    /// Print the channel values of a lighting sequence at a point in time.
    Frame {
        project: PathBuf,
        /// Lighting sequence id.
        sequence: String,
        /// Sequence time in seconds.
        #[arg(long, default_value_t = 0.0)]
        at: f64,
    },
    /// Compile a video mapping file and print its transform.
    Mapping {
        file: PathBuf,
        /// Sample points per axis.
        #[arg(long, default_value_t = 5)]
        samples: usize,
        /// Coverage grid as WIDTHxHEIGHT; defaults to the mapping resolution.
        #[arg(long)]
        grid: Option<String>,
    },
    /// Record Art-Net DMX from a console into a recording file.
    Record {
        /// Output recording file (JSON).
        out: PathBuf,
        #[arg(short, long, default_value_t = 0)]
        universe: u16,
        /// Take length in seconds.
        #[arg(long, default_value_t = 10.0)]
        seconds: f64,
        /// Address to listen on.
        #[arg(long, default_value = "0.0.0.0:6454")]
        bind: String,
        /// Recording name; defaults to the file name.
        #[arg(long)]
        name: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter_text(handle: &FilterHandle) -> String {
        handle.with_current(|filter| filter.to_string()).unwrap()
    }

    #[test]
    fn configured_log_level_applies_after_startup() {
        let (_layer, handle) = reload::Layer::new(EnvFilter::new("info"));
        apply_log_level(Some(&handle), None);
        assert_eq!(filter_text(&handle), "info");

        apply_log_level(Some(&handle), Some("debug"));
        assert_eq!(filter_text(&handle), "debug");

        apply_log_level(Some(&handle), Some("showsync=loud"));
        assert_eq!(filter_text(&handle), "debug");
    }

    #[test]
    fn grid_sizes_parse_as_width_by_height() {
        assert_eq!(
            parse_grid("64x36").unwrap(),
            Resolution {
                width: 64,
                height: 36
            }
        );
        assert!(parse_grid("64").is_err());
        assert!(parse_grid("0x10").is_err());
    }
}
