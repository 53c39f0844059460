//! pupiltrack CLI: track pupils in image sequences and calibrate gaze.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

use pupiltrack::{
    CalibrationEngine, CalibrationMapping, CalibrationParameters, CalibrationSample, CancelToken,
    DecayMode, FrameProcessingController, FrameSource, ImageSequenceSource, LocationTable,
    ManualCorrection, MatchMetric, PupilLocationRecord, RunObserver, RunOutcome, SearchWindow,
    TemplateLocator, TemplateSelection, TemplateStore, TrackerConfig,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "pupiltrack")]
#[command(about = "Locate pupils in recorded eye video and map them to stimulus coordinates")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Locate the pupil in every frame of an image sequence.
    Track(CliTrackArgs),

    /// Apply a manual correction to a location table.
    Correct(CliCorrectArgs),

    /// Fit a calibration mapping.
    Calibrate(CliCalibrateArgs),

    /// Map a location table through a calibration mapping.
    Map(CliMapArgs),
}

#[derive(Debug, Clone, Args)]
struct CliTrackArgs {
    /// Directory of frame images, processed in file-name order.
    #[arg(long)]
    frames_dir: PathBuf,

    /// Frame rate of the sequence.
    #[arg(long, default_value = "30.0")]
    fps: f64,

    /// Path to write the location table.
    #[arg(long)]
    out: PathBuf,

    /// Tracker configuration (JSON). Flags below override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Template bundle directory; synthetic disc templates when omitted.
    #[arg(long)]
    templates: Option<PathBuf>,

    /// Continue from an existing location table.
    #[arg(long)]
    resume: Option<PathBuf>,

    /// First frame to process.
    #[arg(long, default_value_t = 0)]
    start: usize,

    /// Number of frames to process (default: through the end).
    #[arg(long)]
    frames: Option<usize>,

    /// Search window as LEFT TOP RIGHT BOTTOM pixels.
    #[arg(long, num_args = 4, value_names = ["LEFT", "TOP", "RIGHT", "BOTTOM"])]
    window: Option<Vec<u32>>,

    /// Gaussian pre-blur sigma in pixels.
    #[arg(long)]
    blur_sigma: Option<f32>,

    /// Correlation metric.
    #[arg(long, value_enum)]
    metric: Option<MetricArg>,

    /// Match only the K most recent templates.
    #[arg(long)]
    recent_templates: Option<usize>,

    /// Number of best templates averaged per frame.
    #[arg(long)]
    top_k: Option<usize>,

    /// Keep going when confidence stays low.
    #[arg(long)]
    no_stop: bool,

    /// Directory for the end-of-run checkpoint.
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MetricArg {
    Sse,
    SseNormalized,
    Cc,
    CcNormalized,
}

impl MetricArg {
    fn to_core(self) -> MatchMetric {
        match self {
            Self::Sse => MatchMetric::SumOfSquaredErrors,
            Self::SseNormalized => MatchMetric::SumOfSquaredErrorsNormalized,
            Self::Cc => MatchMetric::CrossCorrelation,
            Self::CcNormalized => MatchMetric::CrossCorrelationNormalized,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct CliCorrectArgs {
    /// Location table to edit.
    #[arg(long)]
    table: PathBuf,

    /// Where to write the result (default: overwrite --table).
    #[arg(long)]
    out: Option<PathBuf>,

    /// Tracker configuration (JSON) supplying the decay settings.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    frame: usize,

    #[arg(long)]
    x: f64,

    #[arg(long)]
    y: f64,

    #[arg(long)]
    radius: f64,

    /// Frames over which the correction fades out.
    #[arg(long)]
    decay_frames: Option<usize>,

    #[arg(long, value_enum)]
    decay: Option<DecayArg>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DecayArg {
    Linear,
    Exponential,
}

impl DecayArg {
    fn to_core(self) -> DecayMode {
        match self {
            Self::Linear => DecayMode::Linear,
            Self::Exponential => DecayMode::Exponential,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct CliCalibrateArgs {
    /// Calibration samples (JSON list of {observed, target}).
    #[arg(long, conflicts_with_all = ["table", "schedule"])]
    samples: Option<PathBuf>,

    /// Location table recorded during the calibration sequence.
    #[arg(long, requires = "schedule")]
    table: Option<PathBuf>,

    /// Calibration parameters (JSON): targets, order, timing, search space.
    #[arg(long, requires = "table")]
    schedule: Option<PathBuf>,

    /// Frame at which the calibration sequence starts in --table.
    #[arg(long, default_value_t = 0)]
    start_frame: usize,

    #[arg(long, default_value = "30.0")]
    fps: f64,

    /// Tracker configuration (JSON) supplying the search space when no
    /// schedule is given.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to write the mapping (JSON).
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct CliMapArgs {
    #[arg(long)]
    table: PathBuf,

    #[arg(long)]
    mapping: PathBuf,

    /// Path to write mapped points (JSON, `null` for unlocated frames).
    #[arg(long)]
    out: PathBuf,
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Track(args) => run_track(&args),
        Commands::Correct(args) => run_correct(&args),
        Commands::Calibrate(args) => run_calibrate(&args),
        Commands::Map(args) => run_map(&args),
    }
}

fn load_config(path: Option<&Path>) -> CliResult<TrackerConfig> {
    match path {
        Some(p) => {
            tracing::info!("Loading config: {}", p.display());
            Ok(TrackerConfig::from_json_file(p)?)
        }
        None => Ok(TrackerConfig::default()),
    }
}

// ── track ──────────────────────────────────────────────────────────────

/// Logs progress every ten percent.
#[derive(Default)]
struct LogProgress {
    last_decile: Option<u8>,
}

impl RunObserver for LogProgress {
    fn on_progress(&mut self, percent: u8) {
        let decile = percent / 10;
        if self.last_decile != Some(decile) {
            self.last_decile = Some(decile);
            tracing::info!("{}%", percent);
        }
    }

    fn on_frame_committed(&mut self, frame: usize, record: &PupilLocationRecord) {
        tracing::debug!(
            "frame {}: ({:.2}, {:.2}) r={:.1} conf={:.3}",
            frame,
            record.x,
            record.y,
            record.radius,
            record.confidence
        );
    }

    fn on_run_completed(&mut self, outcome: &RunOutcome) {
        tracing::info!(
            "Run ended {:?} after {} frames",
            outcome.state,
            outcome.frames_processed
        );
    }
}

impl CliTrackArgs {
    fn apply_overrides(&self, config: &mut TrackerConfig) -> CliResult<()> {
        if let Some(w) = &self.window {
            let [left, top, right, bottom] = w.as_slice() else {
                return Err("--window takes exactly four values".into());
            };
            config.run.search_window = Some(SearchWindow::new(*left, *top, *right, *bottom));
        }
        if self.blur_sigma.is_some() {
            config.run.blur_sigma = self.blur_sigma;
        }
        if self.checkpoint_dir.is_some() {
            config.run.checkpoint_dir = self.checkpoint_dir.clone();
        }
        if let Some(m) = self.metric {
            config.matching.metric = m.to_core();
        }
        if let Some(k) = self.recent_templates {
            config.matching.selection = TemplateSelection::MostRecent(k);
        }
        if let Some(k) = self.top_k {
            config.consensus.top_k = k;
        }
        if self.no_stop {
            config.monitor.stop_on_low_confidence = false;
        }
        Ok(())
    }
}

fn run_track(args: &CliTrackArgs) -> CliResult<()> {
    let mut config = load_config(args.config.as_deref())?;
    args.apply_overrides(&mut config)?;

    let mut source = ImageSequenceSource::open(&args.frames_dir, args.fps)?;
    let store = match &args.templates {
        Some(dir) => {
            tracing::info!("Loading templates: {}", dir.display());
            TemplateStore::from_bundle(dir)?
        }
        None => TemplateStore::new(&config.auto_templates)?,
    };
    tracing::info!(
        "{} templates, {} anti-templates",
        store.templates().len(),
        store.anti_templates().len()
    );

    let mut controller = match &args.resume {
        Some(path) => {
            let table = LocationTable::load(path)?;
            if table.len() != source.frame_count() {
                return Err(format!(
                    "table {} has {} rows but the sequence has {} frames",
                    path.display(),
                    table.len(),
                    source.frame_count()
                )
                .into());
            }
            FrameProcessingController::with_table(table, config.run.clone(), config.monitor)
        }
        None => FrameProcessingController::new(
            source.frame_count(),
            config.run.clone(),
            config.monitor,
        ),
    };
    controller.seek(args.start)?;

    let locator = TemplateLocator::new(config.matching, config.consensus);
    let frames = args.frames.unwrap_or(usize::MAX);
    let outcome = controller.run(
        &mut source,
        &locator,
        &store,
        frames,
        &mut LogProgress::default(),
        &CancelToken::new(),
    )?;

    controller.table().save(&args.out)?;
    tracing::info!(
        "{}/{} frames located; table written to {} (last frame {:?})",
        controller.table().located_count(),
        controller.table().len(),
        args.out.display(),
        outcome.last_frame
    );
    Ok(())
}

// ── correct ────────────────────────────────────────────────────────────

fn run_correct(args: &CliCorrectArgs) -> CliResult<()> {
    let mut config = load_config(args.config.as_deref())?.correction;
    if let Some(n) = args.decay_frames {
        config.decay_frames = n;
    }
    if let Some(d) = args.decay {
        config.mode = d.to_core();
    }

    let mut table = LocationTable::load(&args.table)?;
    let summary = pupiltrack::apply_correction(
        &mut table,
        ManualCorrection {
            frame: args.frame,
            x: args.x,
            y: args.y,
            radius: args.radius,
        },
        &config,
    )?;
    let out = args.out.as_ref().unwrap_or(&args.table);
    table.save(out)?;
    tracing::info!(
        "Corrected frame {} (delta {:.2}, {:.2}); {} rows written to {}",
        args.frame,
        summary.delta[0],
        summary.delta[1],
        summary.frames_written,
        out.display()
    );
    Ok(())
}

// ── calibrate ──────────────────────────────────────────────────────────

fn run_calibrate(args: &CliCalibrateArgs) -> CliResult<()> {
    let (samples, space) = match (&args.samples, &args.table, &args.schedule) {
        (Some(path), _, _) => {
            let data = std::fs::read_to_string(path)?;
            let samples: Vec<CalibrationSample> = serde_json::from_str(&data)?;
            let space = load_config(args.config.as_deref())?.calibration;
            (samples, space)
        }
        (None, Some(table), Some(schedule)) => {
            let table = LocationTable::load(table)?;
            let data = std::fs::read_to_string(schedule)?;
            let params: CalibrationParameters = serde_json::from_str(&data)?;
            let samples = params.observed_samples(&table, args.start_frame, args.fps)?;
            (samples, params.search)
        }
        _ => return Err("provide --samples, or --table together with --schedule".into()),
    };
    tracing::info!("Calibrating from {} samples", samples.len());

    let mut engine = CalibrationEngine::new(space);
    let mapping = engine.calibrate(&samples)?;
    mapping.save_json(&args.out)?;
    tracing::info!(
        "Mapping written to {} (rms {:.4}; x {:?}; y {:?})",
        args.out.display(),
        mapping.rms(),
        mapping.x_model().params(),
        mapping.y_model().params()
    );
    Ok(())
}

// ── map ────────────────────────────────────────────────────────────────

fn run_map(args: &CliMapArgs) -> CliResult<()> {
    let table = LocationTable::load(&args.table)?;
    let mapping = CalibrationMapping::load_json(&args.mapping)?;
    let points = mapping.map_table(&table);
    let json = serde_json::to_string_pretty(&points)?;
    std::fs::write(&args.out, json)?;
    tracing::info!(
        "Mapped {} frames ({} located) to {}",
        points.len(),
        table.located_count(),
        args.out.display()
    );
    Ok(())
}
