use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use translocation_eval::{
    write_pack, EvalBackend, EvalDevice, PackDType, PackManifest, Shard, ValidationPack,
    WindowLoader,
};

/// Pack with 2 x 1 x 2 conditions, 4 windows each; window labels alternate
/// between empty (count 0) and two pulses.
fn build_pack(dir: &std::path::Path) -> PathBuf {
    let manifest_path = dir.join("val").join("validation_toy.json");
    let mut manifest = PackManifest {
        sampling_rate: 100.0,
        window_secs: 0.1,
        signal_secs: 0.4,
        concentrations: 2,
        durations: 1,
        diameters: 2,
        relative_path: "validation_toy.npv".into(),
        shard_version: 0,
        dtype: PackDType::F32,
        checksum_sha256: None,
        created_at_ms: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0),
    };
    let shape = manifest.shape();
    let n = shape.conditions() * manifest.signal_samples();
    let signals = vec![1.0f32; n];
    let mut labels = Vec::new();
    for _c in 0..shape.conditions() {
        for w in 0..shape.windows {
            if w % 2 == 0 {
                labels.extend_from_slice(&[0.0, 0.0, 0.0]);
            } else {
                labels.extend_from_slice(&[2.0, 1e-3, 1e-10]);
            }
        }
    }
    write_pack(&manifest_path, &mut manifest, &signals, &signals, &labels).unwrap();
    manifest_path
}

#[test]
fn shards_split_the_grid_without_overlap() {
    let tmp = tempfile::tempdir().unwrap();
    let manifest_path = build_pack(tmp.path());
    let pack = ValidationPack::open(&manifest_path, false).unwrap();
    let total = pack.shape().total_windows();
    assert_eq!(total, 16);

    let world = 3;
    let mut sum = 0;
    for rank in 0..world {
        let loader = WindowLoader::new(&pack, Shard { rank, world }, 7).unwrap();
        sum += loader.available_windows();
    }
    assert_eq!(sum, total);
}

#[test]
fn reshuffle_is_deterministic_per_epoch() {
    let tmp = tempfile::tempdir().unwrap();
    let manifest_path = build_pack(tmp.path());
    let pack = ValidationPack::open(&manifest_path, false).unwrap();
    let device = EvalDevice::default();

    let draw_ids = |epoch: usize| {
        let mut loader = WindowLoader::new(&pack, Shard::single(), 42).unwrap();
        loader.reset_available_windows(epoch);
        let batch = loader
            .next_batch::<EvalBackend>(8, false, &device)
            .expect("batch");
        batch.ids
    };

    assert_eq!(draw_ids(0), draw_ids(0));
    assert_ne!(draw_ids(0), draw_ids(1));
}

#[test]
fn batches_draw_without_replacement_until_exhausted() {
    let tmp = tempfile::tempdir().unwrap();
    let manifest_path = build_pack(tmp.path());
    let pack = ValidationPack::open(&manifest_path, false).unwrap();
    let device = EvalDevice::default();

    let mut loader = WindowLoader::new(&pack, Shard::single(), 0).unwrap();
    let mut seen = Vec::new();
    while let Some(batch) = loader.next_batch::<EvalBackend>(5, false, &device) {
        assert_eq!(batch.len(), 5);
        seen.extend(batch.ids.iter().map(|id| pack.shape().ravel(*id)));
    }
    // 16 windows, batches of 5: three full batches, remainder dropped.
    assert_eq!(seen.len(), 15);
    seen.sort_unstable();
    seen.dedup();
    assert_eq!(seen.len(), 15);
}

#[test]
fn skipping_empty_windows_filters_zero_count_labels() {
    let tmp = tempfile::tempdir().unwrap();
    let manifest_path = build_pack(tmp.path());
    let pack = ValidationPack::open(&manifest_path, false).unwrap();
    let device = EvalDevice::default();

    let mut loader = WindowLoader::new(&pack, Shard::single(), 0).unwrap();
    let mut drawn = 0;
    while let Some(batch) = loader.next_batch::<EvalBackend>(4, true, &device) {
        for id in &batch.ids {
            assert!(pack.label(*id).count > 0.0);
        }
        drawn += batch.len();
    }
    // Half of the 16 windows carry pulses.
    assert_eq!(drawn, 8);
}

#[test]
fn batch_tensors_carry_window_payloads() {
    let tmp = tempfile::tempdir().unwrap();
    let manifest_path = build_pack(tmp.path());
    let pack = ValidationPack::open(&manifest_path, false).unwrap();
    let device = EvalDevice::default();

    let mut loader = WindowLoader::new(&pack, Shard::single(), 0).unwrap();
    let batch = loader
        .next_batch::<EvalBackend>(3, false, &device)
        .expect("batch");
    assert_eq!(batch.noisy.dims(), [3, 10]);
    assert_eq!(batch.labels.dims(), [3, 3]);

    let labels = batch.labels.to_data().to_vec::<f32>().unwrap();
    for (i, id) in batch.ids.iter().enumerate() {
        let expected = pack.label(*id);
        assert_eq!(labels[i * 3], expected.count);
    }
}
