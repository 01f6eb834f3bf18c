use translocation_eval::{
    render_batch_windows, render_error_summary, render_error_surfaces, render_training_history,
    CounterMetadata, ErrorGrid, ErrorStats, GridShape, PredictorMetadata, PulseLabel,
    SignalWindow, WindowId, WindowMeasurement,
};

fn toy_stats() -> ErrorStats {
    let shape = GridShape {
        concentrations: 3,
        durations: 2,
        diameters: 2,
        windows: 4,
    };
    let mut count = ErrorGrid::zeros(shape);
    let mut duration = ErrorGrid::zeros(shape);
    let mut amplitude = ErrorGrid::zeros(shape);
    for linear in 0..shape.total_windows() {
        let id = shape.unravel(linear);
        if id.win == 0 {
            // One improper cell per condition.
            count.set(id, f32::NAN);
            duration.set(id, f32::NAN);
            amplitude.set(id, f32::NAN);
        } else {
            count.set(id, (linear % 7) as f32 * 5.0);
            duration.set(id, (linear % 5) as f32 * 8.0);
            amplitude.set(id, (linear % 3) as f32 * 12.0);
        }
    }
    ErrorStats {
        count,
        duration,
        amplitude,
        improper_measures: shape.conditions(),
    }
}

fn assert_png(path: &std::path::Path) {
    let meta = std::fs::metadata(path).expect("figure written");
    assert!(meta.len() > 0);
}

#[test]
fn surfaces_and_summary_render_with_nan_cells() {
    let tmp = tempfile::tempdir().unwrap();
    let stats = toy_stats();

    let surfaces = tmp.path().join("count_error.png");
    render_error_surfaces(&surfaces, "count error", &stats.count).unwrap();
    assert_png(&surfaces);

    let summary = tmp.path().join("error_summary.png");
    render_error_summary(&summary, &stats).unwrap();
    assert_png(&summary);
}

#[test]
fn training_history_renders_both_models() {
    let tmp = tempfile::tempdir().unwrap();
    let counter = CounterMetadata {
        epoch: 5,
        best_error: 12.0,
        loss_history: vec![1.0, 0.6, 0.4, 0.3, 0.25],
        count_error_history: vec![60.0, 40.0, 25.0, 15.0, 12.0],
        total_time_s: 300.0,
    };
    let predictor = PredictorMetadata {
        epoch: 5,
        best_error: 18.0,
        loss_history: vec![1.2, 0.9, 0.7, 0.5, 0.45],
        duration_error_history: vec![70.0, 50.0, 35.0, 25.0, 18.0],
        amplitude_error_history: vec![65.0, 45.0, 32.0, 24.0, 20.0],
        total_time_s: 410.0,
    };

    let path = tmp.path().join("training_history.png");
    render_training_history(&path, &counter, &predictor).unwrap();
    assert_png(&path);
}

#[test]
fn batch_panels_render_traces_and_captions() {
    let tmp = tempfile::tempdir().unwrap();
    let samples = 50;
    let windows: Vec<SignalWindow> = (0..3)
        .map(|w| {
            let times: Vec<f32> = (0..samples).map(|s| s as f32 * 1e-4).collect();
            let clean: Vec<f32> = (0..samples)
                .map(|s| if s > 10 && s < 20 { 0.8e-9 } else { 1e-9 })
                .collect();
            let noisy: Vec<f32> = clean
                .iter()
                .enumerate()
                .map(|(s, v)| v + ((s * 7 + w) % 5) as f32 * 1e-12)
                .collect();
            SignalWindow {
                id: WindowId {
                    cnp: 0,
                    dur: 0,
                    dnp: 0,
                    win: w,
                },
                times,
                noisy,
                clean,
                label: PulseLabel {
                    count: 1.0,
                    duration_s: 1e-3,
                    amplitude_a: 2e-10,
                },
            }
        })
        .collect();
    let measurements: Vec<WindowMeasurement> = (0..3)
        .map(|w| WindowMeasurement {
            raw_count: 0.9 + w as f32 * 0.1,
            rounded_count: 1.0,
            duration: 1.1,
            amplitude: 2.2,
        })
        .collect();

    let path = tmp.path().join("batch_predictions.png");
    render_batch_windows(&path, &windows, &measurements).unwrap();
    assert_png(&path);
}
