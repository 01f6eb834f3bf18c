//! Per-condition error statistics for the evaluated backbone.
//!
//! Errors live on the same 4-D grid as the dataset (concentration x duration
//! x diameter x window-index). Cells hold percentage errors, 0.0 for empty
//! windows the counter got right, and NaN for improper measures; all
//! reductions are NaN-aware.

use crate::backbone::{Backbone, WindowMeasurement};
use crate::dataset::{Shard, WindowLoader};
use crate::model::{AMPLITUDE_UNIT, DURATION_UNIT};
use crate::pack::ValidationPack;
use crate::types::{EvalResult, GridShape, PulseLabel, WindowId};
use crate::EvalBackend;
use burn::tensor::backend::Backend;
use rayon::prelude::*;

/// Dense f32 grid over the full window space.
#[derive(Debug, Clone)]
pub struct ErrorGrid {
    shape: GridShape,
    data: Vec<f32>,
}

impl ErrorGrid {
    pub fn zeros(shape: GridShape) -> Self {
        Self {
            shape,
            data: vec![0.0; shape.total_windows()],
        }
    }

    pub fn shape(&self) -> GridShape {
        self.shape
    }

    pub fn get(&self, id: WindowId) -> f32 {
        self.data[self.shape.ravel(id)]
    }

    pub fn set(&mut self, id: WindowId, value: f32) {
        let idx = self.shape.ravel(id);
        self.data[idx] = value;
    }

    /// Elementwise sum merge. Shards write disjoint cells on a zero
    /// background, so summation recovers the full grid (the all-reduce).
    pub fn merge_add(&mut self, other: &ErrorGrid) {
        debug_assert_eq!(self.shape, other.shape);
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += b;
        }
    }

    /// NaN-mean over the window axis, one value per condition.
    pub fn mean_over_windows(&self) -> ConditionGrid {
        self.reduce_over_windows(|vals| nan_mean(vals))
    }

    /// NaN-std (population) over the window axis, one value per condition.
    pub fn std_over_windows(&self) -> ConditionGrid {
        self.reduce_over_windows(|vals| nan_std(vals))
    }

    fn reduce_over_windows(&self, f: impl Fn(&[f32]) -> f32) -> ConditionGrid {
        let w = self.shape.windows;
        let data = self.data.chunks_exact(w).map(|chunk| f(chunk)).collect();
        ConditionGrid {
            shape: self.shape,
            data,
        }
    }

    /// NaN-mean and NaN-std per duration, over every other axis.
    pub fn duration_profile(&self) -> Vec<(f32, f32)> {
        (0..self.shape.durations)
            .map(|dur| {
                let vals: Vec<f32> = self.duration_values(dur).collect();
                (nan_mean(&vals), nan_std(&vals))
            })
            .collect()
    }

    fn duration_values(&self, dur: usize) -> impl Iterator<Item = f32> + '_ {
        let shape = self.shape;
        (0..shape.total_windows())
            .filter(move |id| shape.unravel(*id).dur == dur)
            .map(move |id| self.data[id])
    }

    /// NaN-mean over the entire grid.
    pub fn nan_mean_all(&self) -> f32 {
        nan_mean(&self.data)
    }
}

/// One value per (concentration, duration, diameter) condition.
#[derive(Debug, Clone)]
pub struct ConditionGrid {
    shape: GridShape,
    data: Vec<f32>,
}

impl ConditionGrid {
    pub fn value(&self, cnp: usize, dur: usize, dnp: usize) -> f32 {
        self.data[(cnp * self.shape.durations + dur) * self.shape.diameters + dnp]
    }

    pub fn shape(&self) -> GridShape {
        self.shape
    }

    /// Largest finite value, for chart scaling.
    pub fn finite_max(&self) -> f32 {
        self.data
            .iter()
            .copied()
            .filter(|v| v.is_finite())
            .fold(0.0f32, f32::max)
    }
}

/// Outcome of measuring one window against its ground truth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowOutcome {
    /// Percentage errors for a window with at least one true pulse.
    Measured {
        count_error: f32,
        duration_error: f32,
        amplitude_error: f32,
    },
    /// Zero true pulses and the counter agreed.
    EmptyCorrect,
    /// Zero true pulses but the counter predicted one or more.
    Improper,
}

/// Compare model output against ground truth for one window. Predictions are
/// in model units; label units are recovered through the unit scales.
pub fn window_errors(label: &PulseLabel, m: &WindowMeasurement) -> WindowOutcome {
    if label.is_empty() {
        if m.rounded_count > 0.0 {
            return WindowOutcome::Improper;
        }
        return WindowOutcome::EmptyCorrect;
    }
    let count_error = ((label.count - m.rounded_count) / label.count).abs() * 100.0;
    let duration_error =
        ((label.duration_s - m.duration * DURATION_UNIT) / label.duration_s).abs() * 100.0;
    let amplitude_error =
        ((label.amplitude_a - m.amplitude * AMPLITUDE_UNIT) / label.amplitude_a).abs() * 100.0;
    WindowOutcome::Measured {
        count_error,
        duration_error,
        amplitude_error,
    }
}

/// Full-grid error statistics plus the improper-measure tally.
pub struct ErrorStats {
    pub count: ErrorGrid,
    pub duration: ErrorGrid,
    pub amplitude: ErrorGrid,
    pub improper_measures: usize,
}

/// Walk every window of the pack through the backbone, one shard per worker,
/// and merge the per-shard grids by summation.
pub fn compute_error_stats(
    backbone: &Backbone<EvalBackend>,
    pack: &ValidationPack,
    workers: usize,
    seed: u64,
    device: &<EvalBackend as Backend>::Device,
    verbose: bool,
) -> EvalResult<ErrorStats> {
    let workers = workers.max(1);
    let shape = pack.shape();

    // Each worker owns its backbone clone; Burn modules hold lazy-init
    // parameter state that cannot be shared across threads.
    let shard_workers: Vec<(usize, Backbone<EvalBackend>)> =
        (0..workers).map(|rank| (rank, backbone.clone())).collect();

    let shard_results: Vec<(ErrorGrid, ErrorGrid, ErrorGrid, usize)> = shard_workers
        .into_par_iter()
        .map(|(rank, backbone)| -> EvalResult<_> {
            let shard = Shard {
                rank,
                world: workers,
            };
            let loader = WindowLoader::new(pack, shard, seed)?;
            let mut count = ErrorGrid::zeros(shape);
            let mut duration = ErrorGrid::zeros(shape);
            let mut amplitude = ErrorGrid::zeros(shape);
            let mut improper = 0usize;
            let mut evaluated = 0usize;

            for linear in (0..shape.total_windows()).filter(|id| shard.owns(*id)) {
                let id = shape.unravel(linear);
                let window = loader.signal_window(id);
                if window.label.is_empty() {
                    let raw = backbone.count_window(&window, device)?;
                    if raw.round() > 0.0 {
                        count.set(id, f32::NAN);
                        duration.set(id, f32::NAN);
                        amplitude.set(id, f32::NAN);
                        improper += 1;
                    } else {
                        count.set(id, 0.0);
                        duration.set(id, 0.0);
                        amplitude.set(id, 0.0);
                    }
                } else {
                    let m = backbone.measure_window(&window, device)?;
                    if let WindowOutcome::Measured {
                        count_error,
                        duration_error,
                        amplitude_error,
                    } = window_errors(&window.label, &m)
                    {
                        count.set(id, count_error);
                        duration.set(id, duration_error);
                        amplitude.set(id, amplitude_error);
                    }
                }
                evaluated += 1;
            }

            if verbose {
                eprintln!(
                    "[stats] shard {}/{} evaluated {} windows ({} improper)",
                    rank, workers, evaluated, improper
                );
            }
            Ok((count, duration, amplitude, improper))
        })
        .collect::<EvalResult<Vec<_>>>()?;

    let mut count = ErrorGrid::zeros(shape);
    let mut duration = ErrorGrid::zeros(shape);
    let mut amplitude = ErrorGrid::zeros(shape);
    let mut improper_measures = 0usize;
    for (c, d, a, imp) in &shard_results {
        count.merge_add(c);
        duration.merge_add(d);
        amplitude.merge_add(a);
        improper_measures += imp;
    }

    Ok(ErrorStats {
        count,
        duration,
        amplitude,
        improper_measures,
    })
}

/// Batch-level summary used by run mode: mean percentage errors over the
/// windows that produced a valid measure.
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchReport {
    pub count_error: f32,
    pub duration_error: f32,
    pub amplitude_error: f32,
    pub measures: usize,
    pub improper_measures: usize,
}

pub fn summarize_batch(labels: &[PulseLabel], measurements: &[WindowMeasurement]) -> BatchReport {
    let mut report = BatchReport::default();
    let mut count_sum = 0.0f64;
    let mut duration_sum = 0.0f64;
    let mut amplitude_sum = 0.0f64;
    for (label, m) in labels.iter().zip(measurements.iter()) {
        match window_errors(label, m) {
            WindowOutcome::Measured {
                count_error,
                duration_error,
                amplitude_error,
            } => {
                count_sum += count_error as f64;
                duration_sum += duration_error as f64;
                amplitude_sum += amplitude_error as f64;
                report.measures += 1;
            }
            WindowOutcome::EmptyCorrect => report.measures += 1,
            WindowOutcome::Improper => report.improper_measures += 1,
        }
    }
    if report.measures > 0 {
        report.count_error = (count_sum / report.measures as f64) as f32;
        report.duration_error = (duration_sum / report.measures as f64) as f32;
        report.amplitude_error = (amplitude_sum / report.measures as f64) as f32;
    }
    report
}

fn nan_mean(values: &[f32]) -> f32 {
    let mut sum = 0.0f64;
    let mut n = 0usize;
    for v in values {
        if !v.is_nan() {
            sum += *v as f64;
            n += 1;
        }
    }
    if n == 0 {
        f32::NAN
    } else {
        (sum / n as f64) as f32
    }
}

/// Population standard deviation ignoring NaNs.
fn nan_std(values: &[f32]) -> f32 {
    let mean = nan_mean(values);
    if mean.is_nan() {
        return f32::NAN;
    }
    let mut sum = 0.0f64;
    let mut n = 0usize;
    for v in values {
        if !v.is_nan() {
            let d = (*v - mean) as f64;
            sum += d * d;
            n += 1;
        }
    }
    ((sum / n as f64) as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(count: f32, duration_s: f32, amplitude_a: f32) -> PulseLabel {
        PulseLabel {
            count,
            duration_s,
            amplitude_a,
        }
    }

    fn measurement(rounded: f32, duration: f32, amplitude: f32) -> WindowMeasurement {
        WindowMeasurement {
            raw_count: rounded,
            rounded_count: rounded,
            duration,
            amplitude,
        }
    }

    #[test]
    fn percentage_errors_use_label_units() {
        // Truth: 4 pulses, 2 ms, 3e-10 A. Prediction exact in model units.
        let outcome = window_errors(&label(4.0, 2e-3, 3e-10), &measurement(4.0, 2.0, 3.0));
        match outcome {
            WindowOutcome::Measured {
                count_error,
                duration_error,
                amplitude_error,
            } => {
                assert!(count_error.abs() < 1e-4);
                assert!(duration_error.abs() < 1e-3);
                assert!(amplitude_error.abs() < 1e-3);
            }
            other => panic!("expected measured outcome, got {other:?}"),
        }

        // Off by one pulse out of four: 25%.
        let outcome = window_errors(&label(4.0, 2e-3, 3e-10), &measurement(3.0, 2.0, 3.0));
        match outcome {
            WindowOutcome::Measured { count_error, .. } => {
                assert!((count_error - 25.0).abs() < 1e-3);
            }
            other => panic!("expected measured outcome, got {other:?}"),
        }
    }

    #[test]
    fn empty_windows_split_into_proper_and_improper() {
        let empty = label(0.0, 0.0, 0.0);
        assert_eq!(
            window_errors(&empty, &measurement(0.0, 0.0, 0.0)),
            WindowOutcome::EmptyCorrect
        );
        assert_eq!(
            window_errors(&empty, &measurement(2.0, 0.5, 0.1)),
            WindowOutcome::Improper
        );
    }

    #[test]
    fn grid_reductions_ignore_nan() {
        let shape = GridShape {
            concentrations: 1,
            durations: 1,
            diameters: 1,
            windows: 4,
        };
        let mut grid = ErrorGrid::zeros(shape);
        for (w, v) in [10.0, 20.0, f32::NAN, 30.0].iter().enumerate() {
            grid.set(
                WindowId {
                    cnp: 0,
                    dur: 0,
                    dnp: 0,
                    win: w,
                },
                *v,
            );
        }
        let mean = grid.mean_over_windows();
        assert!((mean.value(0, 0, 0) - 20.0).abs() < 1e-4);
        let std = grid.std_over_windows();
        // Population std of {10, 20, 30}.
        assert!((std.value(0, 0, 0) - (200.0f32 / 3.0).sqrt()).abs() < 1e-3);
        assert!((grid.nan_mean_all() - 20.0).abs() < 1e-4);
    }

    #[test]
    fn shard_grids_merge_by_summation() {
        let shape = GridShape {
            concentrations: 1,
            durations: 1,
            diameters: 1,
            windows: 4,
        };
        let mut even = ErrorGrid::zeros(shape);
        let mut odd = ErrorGrid::zeros(shape);
        for w in 0..4 {
            let id = WindowId {
                cnp: 0,
                dur: 0,
                dnp: 0,
                win: w,
            };
            if w % 2 == 0 {
                even.set(id, (w + 1) as f32);
            } else {
                odd.set(id, (w + 1) as f32);
            }
        }
        even.merge_add(&odd);
        for w in 0..4 {
            let id = WindowId {
                cnp: 0,
                dur: 0,
                dnp: 0,
                win: w,
            };
            assert_eq!(even.get(id), (w + 1) as f32);
        }
    }

    #[test]
    fn batch_report_averages_over_valid_measures() {
        let labels = [
            label(2.0, 1e-3, 1e-10),
            label(0.0, 0.0, 0.0),
            label(0.0, 0.0, 0.0),
        ];
        let measurements = [
            measurement(1.0, 1.0, 1.0), // 50% count error, exact features
            measurement(0.0, 0.0, 0.0), // empty, correct
            measurement(3.0, 0.2, 0.1), // improper
        ];
        let report = summarize_batch(&labels, &measurements);
        assert_eq!(report.measures, 2);
        assert_eq!(report.improper_measures, 1);
        assert!((report.count_error - 25.0).abs() < 1e-3);
    }
}
