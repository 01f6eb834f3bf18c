//! Chained evaluation of the two networks over signal windows.
//!
//! The counter runs first; its rounded output conditions the predictor, the
//! same way the training pipeline feeds the predictor an external pulse count.

use crate::dataset::WindowBatch;
use crate::model::{FeaturePredictor, PulseCounter};
use crate::types::{EvalError, EvalResult, SignalWindow};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// The two pre-trained networks evaluated as one unit.
#[derive(Clone)]
pub struct Backbone<B: Backend> {
    pub counter: PulseCounter<B>,
    pub predictor: FeaturePredictor<B>,
}

/// Raw model outputs for one window, in model units (duration in ms,
/// amplitude in 1e-10 A). Conversion to label units happens in the stats
/// layer.
#[derive(Debug, Clone, Copy)]
pub struct WindowMeasurement {
    pub raw_count: f32,
    pub rounded_count: f32,
    pub duration: f32,
    pub amplitude: f32,
}

impl<B: Backend> Backbone<B> {
    pub fn new(counter: PulseCounter<B>, predictor: FeaturePredictor<B>) -> Self {
        Self { counter, predictor }
    }

    /// Run only the counter on one window. Used when the ground truth holds
    /// zero pulses and the predictor has nothing meaningful to condition on.
    pub fn count_window(&self, window: &SignalWindow, device: &B::Device) -> EvalResult<f32> {
        let input = window_tensor::<B>(window, device);
        let counts = self.counter.forward(input);
        first_value(counts)
    }

    /// Run the full counter -> predictor chain on one window.
    pub fn measure_window(
        &self,
        window: &SignalWindow,
        device: &B::Device,
    ) -> EvalResult<WindowMeasurement> {
        let input = window_tensor::<B>(window, device);
        let counts = self.counter.forward(input.clone());
        let raw_count = first_value(counts)?;
        let rounded_count = raw_count.round();

        let external = Tensor::<B, 1>::from_floats([rounded_count].as_slice(), device)
            .reshape([1usize, 1usize]);
        let features = self.predictor.forward(input, external);
        let values = features
            .to_data()
            .to_vec::<f32>()
            .map_err(|e| EvalError::Other(format!("predictor output read failed: {e:?}")))?;

        Ok(WindowMeasurement {
            raw_count,
            rounded_count,
            duration: values[0],
            amplitude: values[1],
        })
    }

    /// Run the chain over a whole batch. Predictor outputs for rows whose
    /// rounded count is zero are forced to zero, matching the single-window
    /// path where the predictor never runs for empty windows.
    pub fn measure_batch(
        &self,
        batch: &WindowBatch<B>,
        device: &B::Device,
    ) -> EvalResult<Vec<WindowMeasurement>> {
        let [batch_len, win_samples] = batch.noisy.dims();
        let mean = batch.noisy.clone().mean_dim(1);
        let centered = (batch.noisy.clone() - mean).reshape([batch_len, 1, win_samples]);

        let counts = self.counter.forward(centered.clone());
        let raw_counts = counts
            .to_data()
            .to_vec::<f32>()
            .map_err(|e| EvalError::Other(format!("counter output read failed: {e:?}")))?;
        let rounded: Vec<f32> = raw_counts.iter().map(|c| c.round()).collect();

        let external =
            Tensor::<B, 1>::from_floats(rounded.as_slice(), device).reshape([batch_len, 1]);
        let features = self.predictor.forward(centered, external);
        let values = features
            .to_data()
            .to_vec::<f32>()
            .map_err(|e| EvalError::Other(format!("predictor output read failed: {e:?}")))?;

        Ok((0..batch_len)
            .map(|i| {
                let zero_pulses = rounded[i] == 0.0;
                WindowMeasurement {
                    raw_count: raw_counts[i],
                    rounded_count: rounded[i],
                    duration: if zero_pulses { 0.0 } else { values[i * 2] },
                    amplitude: if zero_pulses { 0.0 } else { values[i * 2 + 1] },
                }
            })
            .collect())
    }
}

/// Mean-subtract a window's noisy signal and shape it as `[1, 1, L]`.
fn window_tensor<B: Backend>(window: &SignalWindow, device: &B::Device) -> Tensor<B, 3> {
    let mean = window.noisy.iter().sum::<f32>() / window.noisy.len().max(1) as f32;
    let centered: Vec<f32> = window.noisy.iter().map(|v| v - mean).collect();
    let len = centered.len();
    Tensor::<B, 1>::from_floats(centered.as_slice(), device).reshape([1usize, 1usize, len])
}

fn first_value<B: Backend>(tensor: Tensor<B, 2>) -> EvalResult<f32> {
    tensor
        .to_data()
        .to_vec::<f32>()
        .map_err(|e| EvalError::Other(format!("counter output read failed: {e:?}")))?
        .first()
        .copied()
        .ok_or_else(|| EvalError::Other("counter produced no output".into()))
}
