//! Synthesize a validation pack (and optionally demo checkpoints).
//!
//! The real validation sets come from the translocation simulator; this tool
//! produces structurally identical packs with square-pulse blockades and
//! Gaussian noise, with exact labels, for demos and harness tests.

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use translocation_eval::{
    checkpoint, write_pack, CounterMetadata, EvalBackend, EvalDevice, FeaturePredictor,
    FeaturePredictorConfig, PackDType, PackManifest, PredictorMetadata, PulseCounter,
    PulseCounterConfig,
};

#[derive(Parser, Debug)]
#[command(name = "packgen", about = "Generate a synthetic validation pack")]
struct PackgenArgs {
    /// Output dataset root; the pack lands under <out>/val/.
    #[arg(long, default_value = "assets/validation")]
    out: PathBuf,
    /// Generate the toy grid (2 x 2 x 4) as validation_toy.json.
    #[arg(long)]
    toy: bool,
    #[arg(long, default_value_t = 20)]
    concentrations: usize,
    #[arg(long, default_value_t = 5)]
    durations: usize,
    #[arg(long, default_value_t = 15)]
    diameters: usize,
    /// Samples per second.
    #[arg(long, default_value_t = 10_000.0)]
    sampling_rate: f32,
    /// Window length, seconds.
    #[arg(long, default_value_t = 0.5)]
    window_secs: f32,
    /// Condition signal length, seconds.
    #[arg(long, default_value_t = 10.0)]
    signal_secs: f32,
    /// Noise standard deviation, amperes.
    #[arg(long, default_value_t = 5e-12)]
    noise_sigma: f32,
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Also write randomly initialised demo checkpoints under <out>/checkpoints/.
    #[arg(long)]
    emit_checkpoints: bool,
}

const BASELINE_A: f32 = 1e-9;

fn main() -> Result<()> {
    let args = PackgenArgs::parse();

    let (concentrations, durations, diameters, manifest_name) = if args.toy {
        (2, 2, 4, "validation_toy.json")
    } else {
        (
            args.concentrations,
            args.durations,
            args.diameters,
            "validation.json",
        )
    };

    let mut manifest = PackManifest {
        sampling_rate: args.sampling_rate,
        window_secs: args.window_secs,
        signal_secs: args.signal_secs,
        concentrations,
        durations,
        diameters,
        relative_path: manifest_name.replace(".json", ".npv"),
        shard_version: 0, // set by write_pack
        dtype: PackDType::F32,
        checksum_sha256: None,
        created_at_ms: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0),
    };

    let shape = manifest.shape();
    let signal_samples = manifest.signal_samples();
    let window_samples = manifest.window_samples();
    let conditions = shape.conditions();

    println!(
        "[packgen] grid {}x{}x{} with {} windows per signal ({} samples each)",
        concentrations, durations, diameters, shape.windows, window_samples
    );

    let mut rng = StdRng::seed_from_u64(args.seed);
    let noise = Normal::new(0.0f32, args.noise_sigma)
        .map_err(|e| anyhow::anyhow!("invalid noise sigma: {e}"))?;

    let mut noisy = vec![0.0f32; conditions * signal_samples];
    let mut clean = vec![0.0f32; conditions * signal_samples];
    let mut labels = vec![0.0f32; conditions * shape.windows * 3];

    let mut condition = 0usize;
    for cnp in 0..concentrations {
        for dur in 0..durations {
            for dnp in 0..diameters {
                let signal = &mut clean[condition * signal_samples..(condition + 1) * signal_samples];
                signal.fill(BASELINE_A);

                // Pulse statistics scale with the grid position: more pulses at
                // higher concentration, longer blockades at higher duration
                // index, deeper blockades at larger diameter.
                let max_pulses = 1 + cnp / 4;
                let base_duration_s = (dur as f32 + 1.0) * 2e-4;
                let base_amplitude_a = (dnp as f32 + 1.0) * 2e-11;

                for win in 0..shape.windows {
                    let count = rng.gen_range(0..=max_pulses);
                    let mut duration_sum = 0.0f32;
                    let mut amplitude_sum = 0.0f32;
                    for _ in 0..count {
                        let duration_s = base_duration_s * rng.gen_range(0.8..1.2);
                        let amplitude_a = base_amplitude_a * rng.gen_range(0.8..1.2);
                        let pulse_samples =
                            ((duration_s * args.sampling_rate) as usize).clamp(1, window_samples);
                        let start = win * window_samples
                            + rng.gen_range(0..window_samples - pulse_samples + 1);
                        for s in &mut signal[start..start + pulse_samples] {
                            *s -= amplitude_a;
                        }
                        duration_sum += duration_s;
                        amplitude_sum += amplitude_a;
                    }
                    let label_base = (condition * shape.windows + win) * 3;
                    labels[label_base] = count as f32;
                    if count > 0 {
                        labels[label_base + 1] = duration_sum / count as f32;
                        labels[label_base + 2] = amplitude_sum / count as f32;
                    }
                }

                let noisy_signal =
                    &mut noisy[condition * signal_samples..(condition + 1) * signal_samples];
                for (n, c) in noisy_signal.iter_mut().zip(
                    clean[condition * signal_samples..(condition + 1) * signal_samples].iter(),
                ) {
                    *n = c + noise.sample(&mut rng);
                }
                condition += 1;
            }
        }
    }

    let manifest_path = args.out.join("val").join(manifest_name);
    write_pack(&manifest_path, &mut manifest, &noisy, &clean, &labels)
        .with_context(|| format!("failed to write pack {}", manifest_path.display()))?;
    println!("[packgen] wrote pack {}", manifest_path.display());

    if args.emit_checkpoints {
        emit_checkpoints(&args)?;
    }
    Ok(())
}

fn emit_checkpoints(args: &PackgenArgs) -> Result<()> {
    let device = EvalDevice::default();
    let dir = args.out.join("checkpoints");

    let counter = PulseCounter::<EvalBackend>::new(PulseCounterConfig::default(), &device);
    let counter_meta = CounterMetadata {
        epoch: 0,
        best_error: 100.0,
        loss_history: vec![1.0, 0.7, 0.5],
        count_error_history: vec![80.0, 60.0, 45.0],
        total_time_s: 0.0,
    };
    let counter_path = dir.join("counter.bin");
    checkpoint::save_counter(&counter_path, &counter, &counter_meta)
        .with_context(|| format!("failed to save {}", counter_path.display()))?;

    let predictor =
        FeaturePredictor::<EvalBackend>::new(FeaturePredictorConfig::default(), &device);
    let predictor_meta = PredictorMetadata {
        epoch: 0,
        best_error: 100.0,
        loss_history: vec![1.0, 0.8, 0.6],
        duration_error_history: vec![90.0, 70.0, 55.0],
        amplitude_error_history: vec![85.0, 65.0, 50.0],
        total_time_s: 0.0,
    };
    let predictor_path = dir.join("predictor.bin");
    checkpoint::save_predictor(&predictor_path, &predictor, &predictor_meta)
        .with_context(|| format!("failed to save {}", predictor_path.display()))?;

    println!("[packgen] wrote demo checkpoints under {}", dir.display());
    Ok(())
}
