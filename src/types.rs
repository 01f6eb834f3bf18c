//! Core types and error definitions for the validation harness.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type EvalResult<T> = Result<T, EvalError>;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json parse error at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("pack format error at {path}: {msg}")]
    Pack { path: PathBuf, msg: String },
    #[error("checkpoint error at {path}: {msg}")]
    Checkpoint { path: PathBuf, msg: String },
    #[error("window id {id} out of range (total {total})")]
    WindowOutOfRange { id: usize, total: usize },
    #[error("{0}")]
    Other(String),
}

/// Dimensions of the validation grid: one simulated signal per
/// (concentration, duration, diameter) condition, cut into fixed windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridShape {
    pub concentrations: usize,
    pub durations: usize,
    pub diameters: usize,
    pub windows: usize,
}

impl GridShape {
    pub fn conditions(&self) -> usize {
        self.concentrations * self.durations * self.diameters
    }

    pub fn total_windows(&self) -> usize {
        self.conditions() * self.windows
    }

    /// Row-major unravel of a linear window id into (cnp, dur, dnp, win).
    pub fn unravel(&self, id: usize) -> WindowId {
        let win = id % self.windows;
        let rest = id / self.windows;
        let dnp = rest % self.diameters;
        let rest = rest / self.diameters;
        let dur = rest % self.durations;
        let cnp = rest / self.durations;
        WindowId { cnp, dur, dnp, win }
    }

    pub fn ravel(&self, id: WindowId) -> usize {
        ((id.cnp * self.durations + id.dur) * self.diameters + id.dnp) * self.windows + id.win
    }
}

/// Position of one window inside the validation grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowId {
    pub cnp: usize,
    pub dur: usize,
    pub dnp: usize,
    pub win: usize,
}

/// Ground-truth label for a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseLabel {
    /// Number of translocation pulses in the window.
    pub count: f32,
    /// Mean translocation duration in seconds.
    pub duration_s: f32,
    /// Mean pulse amplitude in amperes.
    pub amplitude_a: f32,
}

impl PulseLabel {
    pub fn is_empty(&self) -> bool {
        self.count <= 0.0
    }
}

/// One window of the validation set, ready for the models.
#[derive(Debug, Clone)]
pub struct SignalWindow {
    pub id: WindowId,
    /// Absolute times within the condition signal, seconds.
    pub times: Vec<f32>,
    pub noisy: Vec<f32>,
    pub clean: Vec<f32>,
    pub label: PulseLabel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unravel_is_row_major_and_inverts_ravel() {
        let shape = GridShape {
            concentrations: 3,
            durations: 2,
            diameters: 4,
            windows: 5,
        };
        assert_eq!(shape.total_windows(), 120);
        // Last index varies fastest.
        let first = shape.unravel(0);
        assert_eq!((first.cnp, first.dur, first.dnp, first.win), (0, 0, 0, 0));
        let second = shape.unravel(1);
        assert_eq!((second.cnp, second.dur, second.dnp, second.win), (0, 0, 0, 1));
        for id in 0..shape.total_windows() {
            assert_eq!(shape.ravel(shape.unravel(id)), id);
        }
    }
}
