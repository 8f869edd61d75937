//! CLI entry point for vidbatch
//!
//! Parses command line arguments, loads configuration and runs one of the
//! operator commands: scan, analyse, local transcode, distributed dispatch
//! or the remote worker server.

use clap::{Args, Parser, Subcommand};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vidbatch::dispatcher::cluster_client;
use vidbatch::hardware::{self, check_ffmpeg_available, HardwareAccel};
use vidbatch::notify;
use vidbatch::analysis::{DEFAULT_AUDIO_KBPS, DEFAULT_VIDEO_KBPS};
use vidbatch::prompt::{ask_bool, StdinPrompt};
use vidbatch::record::bytes_to_gib;
use vidbatch::{
    analyse, gather_settings, run_worker_server, scan_library, select_for_analysis,
    select_records, spawn_display_loop, spawn_metrics_server, spawn_detached, BatchRequest,
    Checkpoint, ConcurrencyPlan, Config, DispatchRequest, Dispatcher, DisplaySink, EstimateRates,
    FfmpegEncoder, JobExecutor, JsonFileStore, LocalScheduler, MetricsSource, ProgressTracker,
    ResolutionFilter, RunStats, Selection, SelectionError, SessionArgs, VideoRecord, VideoStore,
    WorkerState,
};

/// The run could not start (bad config, no ffmpeg, unreadable checkpoint).
const EXIT_START_FAILED: u8 = 1;
/// Every job in the run failed.
const EXIT_ALL_FAILED: u8 = 2;

const DEFAULT_CONFIG: &str = "vidbatch.toml";

/// vidbatch - batch video transcoding, locally or across worker nodes
#[derive(Parser, Debug)]
#[command(name = "vidbatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file (default: vidbatch.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Probe every video under ROOT and record it in the store
    Scan { root: PathBuf },

    /// Estimate the space a transcode of the selected videos would free
    Analyse {
        /// Video bitrate the estimate assumes, in kbps
        #[arg(long, default_value_t = DEFAULT_VIDEO_KBPS)]
        video_kbps: u32,

        /// Audio bitrate the estimate assumes, in kbps
        #[arg(long, default_value_t = DEFAULT_AUDIO_KBPS)]
        audio_kbps: u32,

        /// Transcode the analysed files afterwards (asked when omitted)
        #[arg(long)]
        then_transcode: Option<bool>,

        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Select videos and transcode them on this host
    Transcode {
        /// Detach and keep running after this command exits
        #[arg(long)]
        background: bool,

        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Run a checkpointed batch (started by `transcode --background`)
    #[command(hide = true)]
    Resume {
        #[arg(long)]
        checkpoint: PathBuf,
    },

    /// Select videos and spread them across the configured workers
    Dispatch {
        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// Serve transcode requests from a dispatcher
    Worker {
        /// Listen address (default: worker.bind)
        #[arg(long)]
        bind: Option<String>,

        /// Name used in logs (default: worker.name)
        #[arg(long)]
        name: Option<String>,
    },
}

/// Values that skip the matching prompt when given.
#[derive(Args, Debug, Clone, Default)]
struct SelectionArgs {
    /// Select this directory instead of navigating
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Include subdirectories of --dir
    #[arg(long)]
    recursive: bool,

    /// Minimum file size in GB
    #[arg(long)]
    min_size_gb: Option<f64>,

    /// Source resolution: 720p, 1080p, 4k, an exact WxH, or all
    #[arg(long)]
    source_res: Option<ResolutionFilter>,

    /// Minimum duration in seconds (asked for by analyse only)
    #[arg(long)]
    min_duration: Option<f64>,

    /// Output resolution, e.g. 1280x720
    #[arg(long)]
    resolution: Option<String>,

    /// Output bitrate in kbps
    #[arg(long)]
    bitrate: Option<u32>,

    /// Maximum concurrent jobs, 0 for automatic (local runs only)
    #[arg(long)]
    concurrent: Option<u32>,

    /// Delete originals after a successful transcode
    #[arg(long)]
    auto_delete: Option<bool>,
}

impl From<SelectionArgs> for SessionArgs {
    fn from(args: SelectionArgs) -> Self {
        SessionArgs {
            dir: args.dir,
            recursive: args.recursive,
            min_size_gib: args.min_size_gb,
            source_resolution: args.source_res,
            min_duration_secs: args.min_duration,
            resolution: args.resolution,
            bitrate_kbps: args.bitrate,
            max_concurrent: args.concurrent,
            auto_delete: args.auto_delete,
        }
    }
}

/// Logs go to stderr so they do not interleave with the progress display.
fn init_tracing(ansi: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(ansi)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    // A detached run writes into its log file.
    init_tracing(!matches!(cli.command, Command::Resume { .. }));

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let cfg = match Config::load(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load config {}: {}", config_path.display(), e);
            return ExitCode::from(EXIT_START_FAILED);
        }
    };

    match cli.command {
        Command::Scan { root } => scan(&cfg, &root),
        Command::Analyse {
            video_kbps,
            audio_kbps,
            then_transcode,
            selection,
        } => {
            let rates = EstimateRates {
                video_kbps,
                audio_kbps,
            };
            analyse_library(&cfg, rates, then_transcode, selection.into()).await
        }
        Command::Transcode {
            background,
            selection,
        } => transcode(&cfg, cli.config.as_deref(), background, selection.into()).await,
        Command::Resume { checkpoint } => resume(&cfg, &checkpoint).await,
        Command::Dispatch { selection } => dispatch(&cfg, selection.into()).await,
        Command::Worker { bind, name } => {
            let bind = bind.unwrap_or_else(|| cfg.worker.bind.clone());
            let name = name.unwrap_or_else(|| cfg.worker.name.clone());
            worker(&cfg, &bind, name).await
        }
    }
}

fn open_store(cfg: &Config) -> Option<Arc<JsonFileStore>> {
    match JsonFileStore::open(&cfg.store.path) {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            eprintln!("Failed to open store: {}", e);
            None
        }
    }
}

/// 0 when something succeeded or nothing ran, 2 when everything failed.
fn run_status(completed: u64, failed: u64) -> u8 {
    if completed == 0 && failed > 0 {
        EXIT_ALL_FAILED
    } else {
        0
    }
}

fn exit_for(completed: u64, failed: u64) -> ExitCode {
    ExitCode::from(run_status(completed, failed))
}

fn scan(cfg: &Config, root: &Path) -> ExitCode {
    let Some(store) = open_store(cfg) else {
        return ExitCode::from(EXIT_START_FAILED);
    };
    match scan_library(root, &cfg.encoder.ffprobe_bin, store.as_ref()) {
        Ok(summary) => {
            println!(
                "Found {} videos: {} indexed, {} unreadable",
                summary.found, summary.indexed, summary.failed
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Scan failed: {}", e);
            ExitCode::from(EXIT_START_FAILED)
        }
    }
}

type SelectFn = fn(
    Vec<VideoRecord>,
    &SessionArgs,
    &mut StdinPrompt,
    &mut io::Stdout,
) -> Result<Selection, SelectionError>;

/// Run the selection dialogue, restarting it after a recoverable error.
///
/// `Ok(None)` means the operator quit or nothing matched the flags.
fn choose(
    store: &dyn VideoStore,
    args: &SessionArgs,
    select: SelectFn,
) -> Result<Option<Selection>, ExitCode> {
    let mut prompt = StdinPrompt;
    let mut stdout = io::stdout();
    loop {
        let library = store.list_all().map_err(|e| {
            eprintln!("Failed to read store: {}", e);
            ExitCode::from(EXIT_START_FAILED)
        })?;
        match select(library, args, &mut prompt, &mut stdout) {
            Ok(selection) => {
                println!(
                    "Selected {} files ({:.2} GB)",
                    selection.len(),
                    bytes_to_gib(selection.total_bytes() as i64)
                );
                return Ok(Some(selection));
            }
            Err(SelectionError::Aborted) => {
                println!("Selection aborted.");
                return Ok(None);
            }
            Err(SelectionError::NoMatches) if args.dir.is_none() => {
                println!("No files found matching criteria. Starting over.");
            }
            Err(SelectionError::NoMatches) => {
                println!("No files found matching criteria.");
                return Ok(None);
            }
            Err(e) => {
                eprintln!("{}", e);
                return Err(ExitCode::from(EXIT_START_FAILED));
            }
        }
    }
}

async fn analyse_library(
    cfg: &Config,
    rates: EstimateRates,
    then_transcode: Option<bool>,
    args: SessionArgs,
) -> ExitCode {
    let Some(store) = open_store(cfg) else {
        return ExitCode::from(EXIT_START_FAILED);
    };
    let selection = match choose(store.as_ref(), &args, select_for_analysis) {
        Ok(Some(selection)) => selection,
        Ok(None) => return ExitCode::SUCCESS,
        Err(code) => return code,
    };
    println!("{}", analyse(&selection.records, rates));

    let proceed = match then_transcode {
        Some(v) => v,
        None => match ask_bool(&mut StdinPrompt, "Transcode the analysed files? (yes/no): ") {
            Ok(v) => v,
            Err(e) => {
                eprintln!("Failed to read answer: {}", e);
                return ExitCode::from(EXIT_START_FAILED);
            }
        },
    };
    if !proceed {
        println!("Exiting analysis.");
        return ExitCode::SUCCESS;
    }
    let (request, hardware) = match local_request(cfg, selection, &args) {
        Ok(prepared) => prepared,
        Err(code) => return code,
    };
    run_local(cfg, request, hardware, DisplaySink::Console, store).await
}

async fn transcode(
    cfg: &Config,
    config_path: Option<&Path>,
    background: bool,
    args: SessionArgs,
) -> ExitCode {
    let Some(store) = open_store(cfg) else {
        return ExitCode::from(EXIT_START_FAILED);
    };
    let selection = match choose(store.as_ref(), &args, select_records) {
        Ok(Some(selection)) => selection,
        Ok(None) => return ExitCode::SUCCESS,
        Err(code) => return code,
    };
    let (request, hardware) = match local_request(cfg, selection, &args) {
        Ok(prepared) => prepared,
        Err(code) => return code,
    };

    if background {
        return detach(cfg, config_path, &request);
    }
    run_local(cfg, request, hardware, DisplaySink::Console, store).await
}

/// Ask for the output settings and size the batch for this host.
fn local_request(
    cfg: &Config,
    selection: Selection,
    args: &SessionArgs,
) -> Result<(BatchRequest, HardwareAccel), ExitCode> {
    let settings = gather_settings(args, &mut StdinPrompt, true).map_err(|e| {
        eprintln!("Failed to read settings: {}", e);
        ExitCode::from(EXIT_START_FAILED)
    })?;

    let hardware = hardware::resolve(cfg.encoder.hardware);
    let plan = ConcurrencyPlan::derive(cfg, Some(settings.max_concurrent), hardware);
    let request = BatchRequest {
        selection: selection.records,
        output_resolution: settings.resolution,
        bitrate_kbps: settings.bitrate_kbps,
        max_concurrent: plan.max_concurrent_jobs,
        auto_delete: settings.auto_delete,
    };
    Ok((request, hardware))
}

fn detach(cfg: &Config, config_path: Option<&Path>, request: &BatchRequest) -> ExitCode {
    let checkpoint = Checkpoint::new(&cfg.scheduler.checkpoint_path);
    if let Err(e) = checkpoint.save(request) {
        eprintln!("{}", e);
        return ExitCode::from(EXIT_START_FAILED);
    }
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            eprintln!("Cannot locate the vidbatch executable: {}", e);
            return ExitCode::from(EXIT_START_FAILED);
        }
    };
    match spawn_detached(&exe, config_path, &checkpoint, &cfg.scheduler.log_path) {
        Ok(pid) => {
            println!(
                "Transcoding {} files in the background (pid {}). Log: {}",
                request.selection.len(),
                pid,
                cfg.scheduler.log_path.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{}", e);
            checkpoint.remove();
            ExitCode::from(EXIT_START_FAILED)
        }
    }
}

async fn resume(cfg: &Config, checkpoint_path: &Path) -> ExitCode {
    let checkpoint = Checkpoint::new(checkpoint_path);
    let request = match checkpoint.load() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "Cannot resume batch");
            return ExitCode::from(EXIT_START_FAILED);
        }
    };
    let Some(store) = open_store(cfg) else {
        return ExitCode::from(EXIT_START_FAILED);
    };
    info!(
        checkpoint = %checkpoint_path.display(),
        jobs = request.selection.len(),
        "Resuming batch"
    );

    let hardware = hardware::resolve(cfg.encoder.hardware);
    let code = run_local(cfg, request, hardware, DisplaySink::Log, store).await;
    checkpoint.remove();
    code
}

/// Start the metrics endpoint when enabled. A bind failure is logged and
/// the run continues without it.
async fn start_metrics(cfg: &Config, source: MetricsSource) -> Option<tokio::task::JoinHandle<()>> {
    if !cfg.metrics.enabled {
        return None;
    }
    match spawn_metrics_server(&cfg.metrics.bind, source).await {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Metrics endpoint disabled");
            None
        }
    }
}

async fn run_local(
    cfg: &Config,
    request: BatchRequest,
    hardware: HardwareAccel,
    sink: DisplaySink,
    store: Arc<JsonFileStore>,
) -> ExitCode {
    if let Err(e) = check_ffmpeg_available(&cfg.encoder.ffmpeg_bin) {
        error!(error = %e, "Cannot start batch");
        return ExitCode::from(EXIT_START_FAILED);
    }

    let tracker = Arc::new(ProgressTracker::new());
    let stats = Arc::new(RunStats::new(request.selection.len() as u64));
    let notifier = notify::from_config(&cfg.notify);
    let executor = Arc::new(JobExecutor::new(
        tracker.clone(),
        Arc::new(FfmpegEncoder::new(cfg.encoder.ffmpeg_bin.clone())),
        hardware,
        Some(store),
        notifier.clone(),
        stats.clone(),
    ));

    let metrics = start_metrics(cfg, MetricsSource::new(tracker.clone(), stats.clone())).await;
    let display = spawn_display_loop(
        tracker,
        sink,
        Duration::from_millis(cfg.scheduler.progress_interval_ms.max(1)),
    );

    notifier
        .notify(&format!(
            "Starting transcoding of {} videos",
            request.selection.len()
        ))
        .await;
    let summary = LocalScheduler::new(executor).run(&request).await;
    display.abort();
    if let Some(metrics) = metrics {
        metrics.abort();
    }

    let report = format!(
        "Batch finished: {} completed, {} failed, {:.2} GB saved",
        summary.completed,
        summary.failed,
        bytes_to_gib(summary.space_saved_bytes)
    );
    notifier.notify(&report).await;
    if sink == DisplaySink::Console {
        println!("{}", report);
    }
    exit_for(summary.completed as u64, summary.failed as u64)
}

async fn dispatch(cfg: &Config, args: SessionArgs) -> ExitCode {
    let Some(store) = open_store(cfg) else {
        return ExitCode::from(EXIT_START_FAILED);
    };
    // Refuse before the operator spends time selecting.
    if let Err(e) = cfg.validate_dispatch() {
        eprintln!("{}", e);
        return ExitCode::from(EXIT_START_FAILED);
    }
    let selection = match choose(store.as_ref(), &args, select_records) {
        Ok(Some(selection)) => selection,
        Ok(None) => return ExitCode::SUCCESS,
        Err(code) => return code,
    };
    let settings = match gather_settings(&args, &mut StdinPrompt, false) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Failed to read settings: {}", e);
            return ExitCode::from(EXIT_START_FAILED);
        }
    };

    let dispatcher = match Dispatcher::from_config(cfg, store, notify::from_config(&cfg.notify)) {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(EXIT_START_FAILED);
        }
    };
    let metrics = start_metrics(
        cfg,
        MetricsSource::new(Arc::new(ProgressTracker::new()), dispatcher.stats().clone()),
    )
    .await;

    let request = DispatchRequest {
        selection: selection.records,
        resolution: settings.resolution,
        bitrate_kbps: settings.bitrate_kbps,
        auto_delete: settings.auto_delete,
    };
    let result = dispatcher.dispatch(&request).await;
    if let Some(metrics) = metrics {
        metrics.abort();
    }

    match result {
        Ok(summary) => {
            println!(
                "Dispatch finished: {} completed, {} failed, {:.2} GB saved",
                summary.completed,
                summary.failed,
                bytes_to_gib(summary.space_saved_bytes)
            );
            exit_for(summary.completed, summary.failed)
        }
        Err(e) => {
            eprintln!("Dispatch failed: {}", e);
            ExitCode::from(EXIT_START_FAILED)
        }
    }
}

async fn worker(cfg: &Config, bind: &str, name: String) -> ExitCode {
    if let Err(e) = check_ffmpeg_available(&cfg.encoder.ffmpeg_bin) {
        error!(error = %e, "Cannot start worker");
        return ExitCode::from(EXIT_START_FAILED);
    }

    let tracker = Arc::new(ProgressTracker::new());
    let stats = Arc::new(RunStats::new(0));
    let executor = Arc::new(JobExecutor::new(
        tracker.clone(),
        Arc::new(FfmpegEncoder::new(cfg.encoder.ffmpeg_bin.clone())),
        hardware::resolve(cfg.encoder.hardware),
        None,
        notify::from_config(&cfg.notify),
        stats.clone(),
    ));
    let _metrics = start_metrics(cfg, MetricsSource::new(tracker, stats)).await;

    let state = WorkerState {
        name,
        executor,
        client: cluster_client(),
    };
    match run_worker_server(bind, state).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Worker server stopped");
            ExitCode::from(EXIT_START_FAILED)
        }
    }
}
