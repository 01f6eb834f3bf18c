//! Validation harness for nanopore translocation backbones.
//!
//! Two pre-trained networks, a pulse counter and a pulse-feature predictor,
//! are evaluated against a held-out pack of simulated translocation signals,
//! producing per-condition error statistics and diagnostic figures.
//!
//! - Pack storage: JSON manifest plus an mmap-backed binary signal shard
//! - Windowed iteration: deterministic shuffling, shard partitioning, batching
//! - Statistics: NaN-aware error grids over the 4-D condition space
//! - Reporting: PNG figures (error surfaces, summaries, training history)

pub mod backbone;
pub mod checkpoint;
pub mod dataset;
pub mod model;
pub mod pack;
pub mod report;
pub mod stats;
pub mod types;

/// Backend used for evaluation (CPU NdArray).
pub type EvalBackend = burn::backend::ndarray::NdArray<f32>;
/// Device type for [`EvalBackend`].
pub type EvalDevice = <EvalBackend as burn::tensor::backend::Backend>::Device;

pub use backbone::{Backbone, WindowMeasurement};
pub use checkpoint::{CounterMetadata, PredictorMetadata};
pub use dataset::{Shard, WindowBatch, WindowLoader};
pub use model::{
    FeaturePredictor, FeaturePredictorConfig, PulseCounter, PulseCounterConfig, AMPLITUDE_UNIT,
    DURATION_UNIT,
};
pub use pack::{write_pack, PackDType, PackManifest, ValidationPack};
pub use report::{
    render_batch_windows, render_error_summary, render_error_surfaces, render_training_history,
    MAX_BATCH_PANELS,
};
pub use stats::{
    compute_error_stats, summarize_batch, window_errors, BatchReport, ErrorGrid, ErrorStats,
    WindowOutcome,
};
pub use types::{EvalError, EvalResult, GridShape, PulseLabel, SignalWindow, WindowId};
