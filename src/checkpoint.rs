//! Checkpoint loading and saving.
//!
//! A checkpoint is a Burn `BinFileRecorder` weight file (`<stem>.bin`) plus a
//! JSON sidecar (`<stem>.json`) carrying the training state the evaluation
//! reports on: epoch, best validation error, and the history curves.

use crate::model::{FeaturePredictor, FeaturePredictorConfig, PulseCounter, PulseCounterConfig};
use crate::types::{EvalError, EvalResult};
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterMetadata {
    pub epoch: usize,
    pub best_error: f32,
    pub loss_history: Vec<f32>,
    pub count_error_history: Vec<f32>,
    pub total_time_s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorMetadata {
    pub epoch: usize,
    pub best_error: f32,
    pub loss_history: Vec<f32>,
    pub duration_error_history: Vec<f32>,
    pub amplitude_error_history: Vec<f32>,
    pub total_time_s: f64,
}

fn sidecar_path(weights: &Path) -> PathBuf {
    weights.with_extension("json")
}

fn load_sidecar<T: for<'de> Deserialize<'de>>(weights: &Path) -> EvalResult<T> {
    let path = sidecar_path(weights);
    let raw = fs::read(&path).map_err(|e| EvalError::Io {
        path: path.clone(),
        source: e,
    })?;
    serde_json::from_slice(&raw).map_err(|e| EvalError::Json { path, source: e })
}

fn save_sidecar<T: Serialize>(weights: &Path, meta: &T) -> EvalResult<()> {
    let path = sidecar_path(weights);
    let data = serde_json::to_vec_pretty(meta).map_err(|e| EvalError::Other(e.to_string()))?;
    fs::write(&path, data).map_err(|e| EvalError::Io { path, source: e })
}

/// Load the counter weights and sidecar from `<path>` / `<path minus .bin>.json`.
pub fn load_counter<B: Backend>(
    path: &Path,
    cfg: PulseCounterConfig,
    device: &B::Device,
) -> EvalResult<(PulseCounter<B>, CounterMetadata)> {
    if !path.is_file() {
        return Err(EvalError::Checkpoint {
            path: path.to_path_buf(),
            msg: "no counter checkpoint found".into(),
        });
    }
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    let model = PulseCounter::<B>::new(cfg, device)
        .load_file(path, &recorder, device)
        .map_err(|e| EvalError::Checkpoint {
            path: path.to_path_buf(),
            msg: format!("{e:?}"),
        })?;
    let meta = load_sidecar(path)?;
    Ok((model, meta))
}

/// Load the predictor weights and sidecar.
pub fn load_predictor<B: Backend>(
    path: &Path,
    cfg: FeaturePredictorConfig,
    device: &B::Device,
) -> EvalResult<(FeaturePredictor<B>, PredictorMetadata)> {
    if !path.is_file() {
        return Err(EvalError::Checkpoint {
            path: path.to_path_buf(),
            msg: "no predictor checkpoint found".into(),
        });
    }
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    let model = FeaturePredictor::<B>::new(cfg, device)
        .load_file(path, &recorder, device)
        .map_err(|e| EvalError::Checkpoint {
            path: path.to_path_buf(),
            msg: format!("{e:?}"),
        })?;
    let meta = load_sidecar(path)?;
    Ok((model, meta))
}

/// Save counter weights plus sidecar. Used by tooling and tests; the
/// evaluation itself never writes checkpoints.
pub fn save_counter<B: Backend>(
    path: &Path,
    model: &PulseCounter<B>,
    meta: &CounterMetadata,
) -> EvalResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| EvalError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(path, &recorder)
        .map_err(|e| EvalError::Checkpoint {
            path: path.to_path_buf(),
            msg: format!("{e:?}"),
        })?;
    save_sidecar(path, meta)
}

/// Save predictor weights plus sidecar.
pub fn save_predictor<B: Backend>(
    path: &Path,
    model: &FeaturePredictor<B>,
    meta: &PredictorMetadata,
) -> EvalResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| EvalError::Io {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(path, &recorder)
        .map_err(|e| EvalError::Checkpoint {
            path: path.to_path_buf(),
            msg: format!("{e:?}"),
        })?;
    save_sidecar(path, meta)
}
