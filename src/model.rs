//! Burn modules for the two backbone networks.
//!
//! Shapes:
//! - Input windows: `[B, 1, L]` (mean-subtracted noisy signal)
//! - Counter output: `[B, 1]` predicted pulse count (regression)
//! - Predictor output: `[B, 2]` (duration in ms, amplitude in 1e-10 A),
//!   conditioned on the rounded counter output `[B, 1]`
//!
//! Compact conv nets. Checkpoints fix the weights; this crate only evaluates
//! them.

use burn::module::Module;
use burn::nn;
use burn::nn::conv::{Conv1d, Conv1dConfig};
use burn::nn::pool::{AdaptiveAvgPool1d, AdaptiveAvgPool1dConfig};
use burn::nn::PaddingConfig1d;
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

/// Predictor duration output unit: milliseconds -> seconds.
pub const DURATION_UNIT: f32 = 1e-3;
/// Predictor amplitude output unit: 1e-10 A -> amperes.
pub const AMPLITUDE_UNIT: f32 = 1e-10;

#[derive(Debug, Clone, Copy)]
pub struct PulseCounterConfig {
    pub channels: usize,
}

impl Default for PulseCounterConfig {
    fn default() -> Self {
        Self { channels: 16 }
    }
}

/// Strided 1-D conv feature extractor shared by both networks.
#[derive(Module, Debug)]
struct ConvTrunk<B: Backend> {
    stem: Conv1d<B>,
    mid: Conv1d<B>,
    tail: Conv1d<B>,
    pool: AdaptiveAvgPool1d,
}

impl<B: Backend> ConvTrunk<B> {
    fn new(channels: usize, device: &B::Device) -> Self {
        let stem = Conv1dConfig::new(1, channels, 7)
            .with_stride(2)
            .with_padding(PaddingConfig1d::Explicit(3))
            .init(device);
        let mid = Conv1dConfig::new(channels, channels * 2, 5)
            .with_stride(2)
            .with_padding(PaddingConfig1d::Explicit(2))
            .init(device);
        let tail = Conv1dConfig::new(channels * 2, channels * 4, 5)
            .with_stride(2)
            .with_padding(PaddingConfig1d::Explicit(2))
            .init(device);
        let pool = AdaptiveAvgPool1dConfig::new(1).init();
        Self {
            stem,
            mid,
            tail,
            pool,
        }
    }

    fn out_features(channels: usize) -> usize {
        channels * 4
    }

    /// `[B, 1, L]` -> `[B, channels * 4]` pooled features.
    fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 2> {
        let x = relu(self.stem.forward(input));
        let x = relu(self.mid.forward(x));
        let x = relu(self.tail.forward(x));
        let x = self.pool.forward(x);
        let [batch, features, _] = x.dims();
        x.reshape([batch, features])
    }
}

/// Network predicting the number of translocation pulses in a window.
#[derive(Module, Debug)]
pub struct PulseCounter<B: Backend> {
    trunk: ConvTrunk<B>,
    head: nn::Linear<B>,
}

impl<B: Backend> PulseCounter<B> {
    pub fn new(cfg: PulseCounterConfig, device: &B::Device) -> Self {
        let trunk = ConvTrunk::new(cfg.channels, device);
        let head = nn::LinearConfig::new(ConvTrunk::<B>::out_features(cfg.channels), 1).init(device);
        Self { trunk, head }
    }

    /// `[B, 1, L]` -> `[B, 1]` pulse count.
    pub fn forward(&self, input: Tensor<B, 3>) -> Tensor<B, 2> {
        let features = self.trunk.forward(input);
        self.head.forward(features)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FeaturePredictorConfig {
    pub channels: usize,
    pub hidden: usize,
}

impl Default for FeaturePredictorConfig {
    fn default() -> Self {
        Self {
            channels: 16,
            hidden: 64,
        }
    }
}

/// Network predicting mean pulse duration and amplitude of a window,
/// conditioned on an externally supplied pulse count.
#[derive(Module, Debug)]
pub struct FeaturePredictor<B: Backend> {
    trunk: ConvTrunk<B>,
    fuse: nn::Linear<B>,
    head: nn::Linear<B>,
}

impl<B: Backend> FeaturePredictor<B> {
    pub fn new(cfg: FeaturePredictorConfig, device: &B::Device) -> Self {
        let trunk = ConvTrunk::new(cfg.channels, device);
        let fuse =
            nn::LinearConfig::new(ConvTrunk::<B>::out_features(cfg.channels) + 1, cfg.hidden)
                .init(device);
        let head = nn::LinearConfig::new(cfg.hidden, 2).init(device);
        Self { trunk, fuse, head }
    }

    /// `[B, 1, L]` signal plus `[B, 1]` external count -> `[B, 2]` features.
    pub fn forward(&self, input: Tensor<B, 3>, external: Tensor<B, 2>) -> Tensor<B, 2> {
        let features = self.trunk.forward(input);
        let fused = Tensor::cat(vec![features, external], 1);
        let x = relu(self.fuse.forward(fused));
        self.head.forward(x)
    }
}
