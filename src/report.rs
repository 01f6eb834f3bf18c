//! Diagnostic figures rendered with plotters.
//!
//! Every figure is written as a PNG under the chosen output directory, so the
//! harness runs headless.

use crate::backbone::WindowMeasurement;
use crate::checkpoint::{CounterMetadata, PredictorMetadata};
use crate::model::{AMPLITUDE_UNIT, DURATION_UNIT};
use crate::stats::{ConditionGrid, ErrorGrid, ErrorStats};
use crate::types::{EvalError, EvalResult, SignalWindow};
use plotters::prelude::*;
use std::error::Error;
use std::path::Path;

/// Run mode renders at most this many window panels.
pub const MAX_BATCH_PANELS: usize = 20;

fn wrap(result: Result<(), Box<dyn Error>>, path: &Path) -> EvalResult<()> {
    result.map_err(|e| EvalError::Other(format!("plot {} failed: {e}", path.display())))
}

/// Mean/std surfaces over (concentration x diameter), one row per duration.
pub fn render_error_surfaces(out_path: &Path, title: &str, grid: &ErrorGrid) -> EvalResult<()> {
    wrap(surfaces_impl(out_path, title, grid), out_path)
}

fn surfaces_impl(out_path: &Path, title: &str, grid: &ErrorGrid) -> Result<(), Box<dyn Error>> {
    let shape = grid.shape();
    let mean = grid.mean_over_windows();
    let std = grid.std_over_windows();

    let rows = shape.durations.max(1) as u32;
    let root = BitMapBackend::new(out_path, (1200, 400 * rows)).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((shape.durations.max(1), 2));

    for dur in 0..shape.durations {
        draw_surface(
            &panels[dur * 2],
            &format!("Mean {title} for Duration {}", dur + 1),
            &mean,
            dur,
            false,
        )?;
        draw_surface(
            &panels[dur * 2 + 1],
            &format!("STD {title} for Duration {}", dur + 1),
            &std,
            dur,
            true,
        )?;
    }

    root.present()?;
    Ok(())
}

fn draw_surface(
    area: &DrawingArea<BitMapBackend<'_>, plotters::coord::Shift>,
    caption: &str,
    values: &ConditionGrid,
    dur: usize,
    red: bool,
) -> Result<(), Box<dyn Error>> {
    let shape = values.shape();
    let max = values.finite_max().max(1e-6);

    let mut chart = ChartBuilder::on(area)
        .caption(caption, ("sans-serif", 18))
        .margin(8)
        .x_label_area_size(36)
        .y_label_area_size(40)
        .build_cartesian_2d(0i32..shape.concentrations as i32, 0i32..shape.diameters as i32)?;
    chart
        .configure_mesh()
        .x_desc("Cnp")
        .y_desc("Dnp")
        .disable_mesh()
        .draw()?;

    chart.draw_series((0..shape.concentrations).flat_map(|cnp| {
        (0..shape.diameters).map(move |dnp| (cnp, dnp))
    }).map(|(cnp, dnp)| {
        let v = values.value(cnp, dur, dnp);
        let style = if v.is_nan() {
            // Improper-only cells have no statistic; leave them gray.
            RGBColor(180, 180, 180).filled()
        } else {
            let t = (v / max).clamp(0.0, 1.0) as f64;
            let hue = if red { 0.0 } else { 0.62 };
            HSLColor(hue, 0.85, 0.9 - 0.6 * t).filled()
        };
        Rectangle::new(
            [(cnp as i32, dnp as i32), (cnp as i32 + 1, dnp as i32 + 1)],
            style,
        )
    }))?;
    Ok(())
}

/// 3x2 summary: per-duration mean and std curves for count, duration, and
/// amplitude errors, with the global NaN-mean in each mean-panel caption.
pub fn render_error_summary(out_path: &Path, stats: &ErrorStats) -> EvalResult<()> {
    wrap(summary_impl(out_path, stats), out_path)
}

fn summary_impl(out_path: &Path, stats: &ErrorStats) -> Result<(), Box<dyn Error>> {
    let root = BitMapBackend::new(out_path, (1000, 1500)).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((3, 2));

    let kinds: [(&str, &ErrorGrid); 3] = [
        ("count error", &stats.count),
        ("duration error", &stats.duration),
        ("amplitude error", &stats.amplitude),
    ];
    for (row, (name, grid)) in kinds.iter().enumerate() {
        let profile = grid.duration_profile();
        let means: Vec<f32> = profile.iter().map(|(m, _)| *m).collect();
        let stds: Vec<f32> = profile.iter().map(|(_, s)| *s).collect();
        draw_duration_curve(
            &panels[row * 2],
            &format!("Average {name}: {:.3}", grid.nan_mean_all()),
            "Average Error",
            &means,
            &BLUE,
        )?;
        draw_duration_curve(
            &panels[row * 2 + 1],
            &format!("STD {name}"),
            "STD Error",
            &stds,
            &RED,
        )?;
    }

    root.present()?;
    Ok(())
}

fn draw_duration_curve(
    area: &DrawingArea<BitMapBackend<'_>, plotters::coord::Shift>,
    caption: &str,
    y_desc: &str,
    values: &[f32],
    color: &RGBColor,
) -> Result<(), Box<dyn Error>> {
    let y_max = values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(0.0f32, f32::max)
        .max(1e-6)
        * 1.1;
    let x_max = values.len().saturating_sub(1).max(1) as f32;

    let mut chart = ChartBuilder::on(area)
        .caption(caption, ("sans-serif", 18))
        .margin(8)
        .x_label_area_size(36)
        .y_label_area_size(50)
        .build_cartesian_2d(0.0f32..x_max, 0.0f32..y_max)?;
    chart
        .configure_mesh()
        .x_desc("Duration")
        .y_desc(y_desc)
        .draw()?;
    chart.draw_series(LineSeries::new(
        values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .map(|(i, v)| (i as f32, *v)),
        color.stroke_width(2),
    ))?;
    chart.draw_series(
        values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .map(|(i, v)| Circle::new((i as f32, *v), 3, color.filled())),
    )?;
    Ok(())
}

/// Loss and validation-error curves from the two checkpoint sidecars.
pub fn render_training_history(
    out_path: &Path,
    counter: &CounterMetadata,
    predictor: &PredictorMetadata,
) -> EvalResult<()> {
    wrap(history_impl(out_path, counter, predictor), out_path)
}

fn history_impl(
    out_path: &Path,
    counter: &CounterMetadata,
    predictor: &PredictorMetadata,
) -> Result<(), Box<dyn Error>> {
    let root = BitMapBackend::new(out_path, (1200, 900)).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((2, 2));

    draw_history_curves(
        &panels[0],
        "Counter loss",
        &[("loss", &counter.loss_history, BLUE)],
    )?;
    draw_history_curves(
        &panels[1],
        "Counter validation error",
        &[("count error", &counter.count_error_history, RED)],
    )?;
    draw_history_curves(
        &panels[2],
        "Predictor loss",
        &[("loss", &predictor.loss_history, BLUE)],
    )?;
    draw_history_curves(
        &panels[3],
        "Predictor validation errors",
        &[
            ("duration error", &predictor.duration_error_history, RED),
            ("amplitude error", &predictor.amplitude_error_history, GREEN),
        ],
    )?;

    root.present()?;
    Ok(())
}

fn draw_history_curves(
    area: &DrawingArea<BitMapBackend<'_>, plotters::coord::Shift>,
    caption: &str,
    series: &[(&str, &Vec<f32>, RGBColor)],
) -> Result<(), Box<dyn Error>> {
    let y_max = series
        .iter()
        .flat_map(|(_, vals, _)| vals.iter().copied())
        .filter(|v| v.is_finite())
        .fold(0.0f32, f32::max)
        .max(1e-6)
        * 1.1;
    let x_max = series
        .iter()
        .map(|(_, vals, _)| vals.len())
        .max()
        .unwrap_or(1)
        .max(2) as f32;

    let mut chart = ChartBuilder::on(area)
        .caption(caption, ("sans-serif", 18))
        .margin(8)
        .x_label_area_size(36)
        .y_label_area_size(50)
        .build_cartesian_2d(0.0f32..x_max, 0.0f32..y_max)?;
    chart.configure_mesh().x_desc("Epoch").draw()?;
    for (name, values, color) in series {
        chart
            .draw_series(LineSeries::new(
                values.iter().enumerate().map(|(i, v)| (i as f32, *v)),
                color.stroke_width(2),
            ))?
            .label(*name)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], *color));
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    Ok(())
}

/// One panel per window: noisy and clean traces plus predicted vs true
/// count/duration/amplitude in the caption.
pub fn render_batch_windows(
    out_path: &Path,
    windows: &[SignalWindow],
    measurements: &[WindowMeasurement],
) -> EvalResult<()> {
    wrap(batch_impl(out_path, windows, measurements), out_path)
}

fn batch_impl(
    out_path: &Path,
    windows: &[SignalWindow],
    measurements: &[WindowMeasurement],
) -> Result<(), Box<dyn Error>> {
    let n = windows.len().min(MAX_BATCH_PANELS);
    if n == 0 {
        return Ok(());
    }
    let root = BitMapBackend::new(out_path, (1000, 300 * n as u32)).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((n, 1));

    for (panel, (window, m)) in panels.iter().zip(windows.iter().zip(measurements.iter())) {
        let noisy_mean = window.noisy.iter().sum::<f32>() / window.noisy.len().max(1) as f32;
        let clean_mean = window.clean.iter().sum::<f32>() / window.clean.len().max(1) as f32;
        let noisy: Vec<f32> = window.noisy.iter().map(|v| v - noisy_mean).collect();
        let clean: Vec<f32> = window.clean.iter().map(|v| v - clean_mean).collect();

        let y_min = noisy
            .iter()
            .chain(clean.iter())
            .copied()
            .fold(f32::INFINITY, f32::min);
        let y_max = noisy
            .iter()
            .chain(clean.iter())
            .copied()
            .fold(f32::NEG_INFINITY, f32::max);
        let pad = ((y_max - y_min).abs() * 0.05).max(1e-12);
        let (y_min, y_max) = (y_min - pad, y_max + pad);
        let (t0, t1) = (
            *window.times.first().unwrap_or(&0.0),
            *window.times.last().unwrap_or(&1.0),
        );

        let caption = format!(
            "true duration {:.2e} s, predicted {:.2e} s | true amplitude {:.2e} A, predicted {:.2e} A | pulses {} vs {}",
            window.label.duration_s,
            m.duration * DURATION_UNIT,
            window.label.amplitude_a,
            m.amplitude * AMPLITUDE_UNIT,
            window.label.count.round() as i64,
            m.raw_count.round() as i64,
        );

        let mut chart = ChartBuilder::on(panel)
            .caption(caption, ("sans-serif", 14))
            .margin(8)
            .x_label_area_size(28)
            .y_label_area_size(50)
            .build_cartesian_2d(t0..t1, y_min..y_max)?;
        chart.configure_mesh().x_desc("time [s]").draw()?;
        chart.draw_series(LineSeries::new(
            window.times.iter().copied().zip(noisy.iter().copied()),
            BLUE.mix(0.6),
        ))?;
        chart.draw_series(LineSeries::new(
            window.times.iter().copied().zip(clean.iter().copied()),
            RED.stroke_width(2),
        ))?;
    }

    root.present()?;
    Ok(())
}
