use anyhow::{bail, Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use translocation_eval::{
    checkpoint, compute_error_stats, report, summarize_batch, Backbone, EvalBackend, EvalDevice,
    FeaturePredictorConfig, PulseCounterConfig, Shard, ValidationPack, WindowLoader,
};

#[derive(Parser, Debug)]
#[command(
    name = "validate",
    about = "Evaluate a translocation counter/predictor backbone on a validation pack"
)]
struct ValidateArgs {
    /// Path to the validation dataset root (expects <data>/val/validation.json).
    #[arg(long)]
    data: PathBuf,
    /// Counter checkpoint (.bin weights with a .json sidecar).
    #[arg(long)]
    counter: PathBuf,
    /// Predictor checkpoint (.bin weights with a .json sidecar).
    #[arg(long)]
    predictor: PathBuf,
    /// Counter trunk width.
    #[arg(long, default_value_t = 16)]
    counter_channels: usize,
    /// Predictor trunk width.
    #[arg(long, default_value_t = 16)]
    predictor_channels: usize,
    /// Predictor fusion layer width.
    #[arg(long, default_value_t = 64)]
    predictor_hidden: usize,
    /// Mini-batch size for run mode.
    #[arg(long, short = 'b', default_value_t = 6)]
    batch_size: usize,
    /// Compute error statistics over the whole validation grid.
    #[arg(long)]
    statistics: bool,
    /// Run one batch and plot predictions over the noisy signals.
    #[arg(long)]
    run: bool,
    /// Only plot the training history stored in the checkpoint sidecars.
    #[arg(long)]
    plot_history: bool,
    /// Number of parallel evaluation shards.
    #[arg(long, default_value_t = 1)]
    workers: usize,
    /// Seed for the window draw order.
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Verify the pack checksum before evaluating.
    #[arg(long)]
    verify_checksum: bool,
    /// Directory for rendered figures.
    #[arg(long, default_value = "plots")]
    plot_dir: PathBuf,
    /// Use the toy validation pack (validation_toy.json).
    #[arg(long, short = 't')]
    test: bool,
    /// Provide additional details as to what the program is doing.
    #[arg(long, short = 'v')]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = ValidateArgs::parse();
    if !args.statistics && !args.run && !args.plot_history {
        bail!("no mode selected; pass --statistics, --run, or --plot-history");
    }

    let device = EvalDevice::default();

    println!("=> loading counter '{}'", args.counter.display());
    let (counter, counter_meta) = checkpoint::load_counter::<EvalBackend>(
        &args.counter,
        PulseCounterConfig {
            channels: args.counter_channels,
        },
        &device,
    )
    .with_context(|| format!("failed to load counter from {}", args.counter.display()))?;
    println!(
        "=> loaded counter '{}' (epoch {})",
        args.counter.display(),
        counter_meta.epoch
    );
    println!("Model best precision saved was {}", counter_meta.best_error);

    println!("=> loading predictor '{}'", args.predictor.display());
    let (predictor, predictor_meta) = checkpoint::load_predictor::<EvalBackend>(
        &args.predictor,
        FeaturePredictorConfig {
            channels: args.predictor_channels,
            hidden: args.predictor_hidden,
        },
        &device,
    )
    .with_context(|| format!("failed to load predictor from {}", args.predictor.display()))?;
    println!(
        "=> loaded predictor '{}' (epoch {})",
        args.predictor.display(),
        predictor_meta.epoch
    );
    println!("Model best precision saved was {}", predictor_meta.best_error);

    fs::create_dir_all(&args.plot_dir)
        .with_context(|| format!("failed to create {}", args.plot_dir.display()))?;

    if args.plot_history {
        let out = args.plot_dir.join("training_history.png");
        report::render_training_history(&out, &counter_meta, &predictor_meta)?;
        println!("Wrote training history to {}", out.display());
        return Ok(());
    }

    let manifest_name = if args.test {
        "validation_toy.json"
    } else {
        "validation.json"
    };
    let manifest_path = args.data.join("val").join(manifest_name);
    let pack = ValidationPack::open(&manifest_path, args.verify_checksum)
        .with_context(|| format!("failed to open pack {}", manifest_path.display()))?;
    if args.verbose {
        let shard = Shard {
            rank: 0,
            world: args.workers.max(1),
        };
        let loader = WindowLoader::new(&pack, shard, args.seed)?;
        println!(
            "Validation pack {:?}: shard 0 holds {} of {} windows",
            pack.shape(),
            loader.available_windows(),
            loader.total_windows()
        );
    }

    let backbone = Backbone::new(counter, predictor);

    if args.run {
        return run_batch(&args, &backbone, &pack, &device);
    }

    // --statistics
    let stats = compute_error_stats(
        &backbone,
        &pack,
        args.workers,
        args.seed,
        &device,
        args.verbose,
    )?;
    report::render_error_surfaces(
        &args.plot_dir.join("count_error_surfaces.png"),
        "Count Error",
        &stats.count,
    )?;
    report::render_error_surfaces(
        &args.plot_dir.join("duration_error_surfaces.png"),
        "Duration Error",
        &stats.duration,
    )?;
    report::render_error_surfaces(
        &args.plot_dir.join("amplitude_error_surfaces.png"),
        "Amplitude Error",
        &stats.amplitude,
    )?;
    report::render_error_summary(&args.plot_dir.join("error_summary.png"), &stats)?;
    println!("Wrote error figures to {}", args.plot_dir.display());
    println!(
        "This backbone produces {} improper measures.\nImproper measures are produced when the ground truth establishes 0 number of pulses but the network predicts one or more pulses.",
        stats.improper_measures
    );
    Ok(())
}

fn run_batch(
    args: &ValidateArgs,
    backbone: &Backbone<EvalBackend>,
    pack: &ValidationPack,
    device: &EvalDevice,
) -> Result<()> {
    let mut loader = WindowLoader::new(pack, Shard::single(), args.seed)?;
    loader.reset_available_windows(0);
    let Some(batch) = loader.next_batch::<EvalBackend>(args.batch_size, false, device) else {
        bail!(
            "pack holds fewer than {} windows; lower --batch-size",
            args.batch_size
        );
    };
    let measurements = backbone.measure_batch(&batch, device)?;
    let windows: Vec<_> = batch.ids.iter().map(|id| loader.signal_window(*id)).collect();
    let labels: Vec<_> = windows.iter().map(|w| w.label).collect();

    if args.batch_size <= report::MAX_BATCH_PANELS {
        let out = args.plot_dir.join("batch_predictions.png");
        report::render_batch_windows(&out, &windows, &measurements)?;
        println!("Wrote batch figure to {}", out.display());
    } else {
        println!(
            "This will not show more than {} plots",
            report::MAX_BATCH_PANELS
        );
    }

    let summary = summarize_batch(&labels, &measurements);
    println!(
        "Average translocation duration error: {:.1}%\nAverage translocation amplitude error: {:.1}%\nAverage translocation counter error: {:.1}%",
        summary.duration_error, summary.amplitude_error, summary.count_error
    );
    println!(
        "In this batch we had {} improper measures.\nImproper measures are produced when the ground truth establishes 0 number of pulses but the network predicts one or more pulses.",
        summary.improper_measures
    );
    Ok(())
}
