//! Windowed iteration over a validation pack.
//!
//! The pack is a fixed 4-D grid (concentration x duration x diameter x
//! window-index). Windows are addressed by linear id; a [`Shard`] owns every
//! n-th id, which is how the evaluation splits across parallel workers.

use crate::pack::ValidationPack;
use crate::types::{EvalError, EvalResult, GridShape, SignalWindow, WindowId};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// One worker's slice of the window grid: ids with `id % world == rank`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shard {
    pub rank: usize,
    pub world: usize,
}

impl Shard {
    pub fn single() -> Self {
        Shard { rank: 0, world: 1 }
    }

    pub fn owns(&self, id: usize) -> bool {
        id % self.world == self.rank
    }
}

/// A batch of windows assembled into Burn tensors.
pub struct WindowBatch<B: Backend> {
    /// `[B, L]` sample times, seconds.
    pub times: Tensor<B, 2>,
    /// `[B, L]` noisy signals.
    pub noisy: Tensor<B, 2>,
    /// `[B, L]` clean signals.
    pub clean: Tensor<B, 2>,
    /// `[B, 3]` labels: count, duration (s), amplitude (A).
    pub labels: Tensor<B, 2>,
    pub ids: Vec<WindowId>,
}

impl<B: Backend> WindowBatch<B> {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Sequential-access loader over one shard of the validation grid.
///
/// `reset_available_windows(epoch)` deterministically reshuffles the shard's
/// sampling order; `next_batch` then draws windows without replacement.
pub struct WindowLoader<'a> {
    pack: &'a ValidationPack,
    shape: GridShape,
    shard: Shard,
    seed: u64,
    order: Vec<usize>,
    cursor: usize,
}

impl<'a> WindowLoader<'a> {
    pub fn new(pack: &'a ValidationPack, shard: Shard, seed: u64) -> EvalResult<Self> {
        if shard.world == 0 || shard.rank >= shard.world {
            return Err(EvalError::Other(format!(
                "invalid shard rank {} of {}",
                shard.rank, shard.world
            )));
        }
        let shape = pack.shape();
        let mut loader = Self {
            pack,
            shape,
            shard,
            seed,
            order: Vec::new(),
            cursor: 0,
        };
        loader.reset_available_windows(0);
        Ok(loader)
    }

    pub fn shape(&self) -> GridShape {
        self.shape
    }

    pub fn shard(&self) -> Shard {
        self.shard
    }

    pub fn total_windows(&self) -> usize {
        self.shape.total_windows()
    }

    /// Windows still drawable in this epoch (shard-local).
    pub fn available_windows(&self) -> usize {
        self.order.len() - self.cursor
    }

    /// Reshuffle the shard's draw order for a new epoch. Same seed and epoch
    /// give the same order on every rank, so shards never overlap.
    pub fn reset_available_windows(&mut self, epoch: usize) {
        self.order = (0..self.shape.total_windows())
            .filter(|id| self.shard.owns(*id))
            .collect();
        let mut rng =
            rand::rngs::StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
        self.order.shuffle(&mut rng);
        self.cursor = 0;
    }

    /// Fetch one window by grid position.
    pub fn signal_window(&self, id: WindowId) -> SignalWindow {
        SignalWindow {
            id,
            times: self.pack.window_times(id),
            noisy: self.pack.noisy_window(id),
            clean: self.pack.clean_window(id),
            label: self.pack.label(id),
        }
    }

    /// Fetch one window by linear id.
    pub fn signal_window_linear(&self, id: usize) -> EvalResult<SignalWindow> {
        if id >= self.shape.total_windows() {
            return Err(EvalError::WindowOutOfRange {
                id,
                total: self.shape.total_windows(),
            });
        }
        Ok(self.signal_window(self.shape.unravel(id)))
    }

    /// Draw the next batch without replacement. Returns `None` once the shard
    /// cannot fill a batch this epoch. With `skip_empty_windows`, windows whose
    /// ground truth holds zero pulses are discarded during the draw.
    pub fn next_batch<B: Backend>(
        &mut self,
        batch_size: usize,
        skip_empty_windows: bool,
        device: &B::Device,
    ) -> Option<WindowBatch<B>> {
        let win_samples = self.pack.window_samples();
        let mut windows: Vec<SignalWindow> = Vec::with_capacity(batch_size);
        while windows.len() < batch_size {
            if self.cursor >= self.order.len() {
                return None;
            }
            let id = self.shape.unravel(self.order[self.cursor]);
            self.cursor += 1;
            let window = self.signal_window(id);
            if skip_empty_windows && window.label.is_empty() {
                continue;
            }
            windows.push(window);
        }

        let batch_len = windows.len();
        let mut times_buf = Vec::with_capacity(batch_len * win_samples);
        let mut noisy_buf = Vec::with_capacity(batch_len * win_samples);
        let mut clean_buf = Vec::with_capacity(batch_len * win_samples);
        let mut labels_buf = Vec::with_capacity(batch_len * 3);
        let mut ids = Vec::with_capacity(batch_len);
        for w in windows {
            times_buf.extend_from_slice(&w.times);
            noisy_buf.extend_from_slice(&w.noisy);
            clean_buf.extend_from_slice(&w.clean);
            labels_buf.extend_from_slice(&[w.label.count, w.label.duration_s, w.label.amplitude_a]);
            ids.push(w.id);
        }

        let times = Tensor::<B, 1>::from_floats(times_buf.as_slice(), device)
            .reshape([batch_len, win_samples]);
        let noisy = Tensor::<B, 1>::from_floats(noisy_buf.as_slice(), device)
            .reshape([batch_len, win_samples]);
        let clean = Tensor::<B, 1>::from_floats(clean_buf.as_slice(), device)
            .reshape([batch_len, win_samples]);
        let labels =
            Tensor::<B, 1>::from_floats(labels_buf.as_slice(), device).reshape([batch_len, 3]);

        Some(WindowBatch {
            times,
            noisy,
            clean,
            labels,
            ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shards_partition_the_id_space() {
        let world = 4;
        let total = 37;
        let mut owned = vec![0usize; total];
        for rank in 0..world {
            let shard = Shard { rank, world };
            for (id, count) in owned.iter_mut().enumerate() {
                if shard.owns(id) {
                    *count += 1;
                }
            }
        }
        assert!(owned.iter().all(|c| *c == 1));
    }
}
