//! vidbatch engine
//!
//! Library index, interactive selection, size analysis, the local transcode scheduler, the
//! distributed dispatcher and the worker server behind the `vidbatch` CLI.

pub mod analysis;
pub mod callback_server;
pub mod checkpoint;
pub mod concurrency;
pub mod dispatcher;
pub mod encode;
pub mod hardware;
pub mod index;
pub mod job_executor;
pub mod metrics;
pub mod metrics_server;
pub mod navigate;
pub mod notify;
pub mod progress;
pub mod prompt;
pub mod record;
pub mod remote;
pub mod rename;
pub mod scan;
pub mod scheduler;
pub mod selection;
pub mod session;
pub mod stats;
pub mod store;
pub mod worker_server;

pub use vidbatch_config as config;
pub use vidbatch_config::Config;
pub use analysis::{analyse, select_for_analysis, AnalysisReport, EstimateRates};
pub use checkpoint::{spawn_detached, Checkpoint, CheckpointError};
pub use concurrency::{resolve_max_concurrent, ConcurrencyPlan};
pub use dispatcher::{DispatchError, DispatchRequest, Dispatcher, WorkerPool};
pub use encode::{EncodeError, EncodeParams, Encoder, FfmpegEncoder};
pub use hardware::{detect_hardware, HardwareAccel};
pub use index::DirectoryNode;
pub use job_executor::{JobError, JobExecutor, JobParams};
pub use metrics::{MetricsSnapshot, MetricsSource};
pub use metrics_server::{create_metrics_router, spawn_metrics_server, ServerError};
pub use navigate::{navigate, NavOutcome};
pub use notify::Notifier;
pub use progress::{spawn_display_loop, DisplaySink, JobProgress, ProgressTracker};
pub use record::{TranscodeResult, VideoRecord};
pub use scan::{scan_library, ScanError, ScanSummary};
pub use scheduler::{BatchRequest, LocalScheduler, RunSummary};
pub use selection::{
    ResolutionClass, ResolutionFilter, Selection, SelectionCriteria, SelectionError,
};
pub use session::{gather_settings, select_records, BatchSettings, SessionArgs};
pub use stats::{RunStats, StatsSnapshot};
pub use store::{JsonFileStore, StoreError, VideoStore};
pub use worker_server::{run_worker_server, worker_router, WorkerState};
