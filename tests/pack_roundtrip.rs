use std::time::{SystemTime, UNIX_EPOCH};
use translocation_eval::{
    write_pack, PackDType, PackManifest, ValidationPack, WindowId,
};

fn toy_manifest() -> PackManifest {
    PackManifest {
        sampling_rate: 100.0,
        window_secs: 0.1,
        signal_secs: 0.4,
        concentrations: 1,
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
    }
}

#[test]
fn pack_round_trips_signals_and_labels() {
    let tmp = tempfile::tempdir().unwrap();
    let manifest_path = tmp.path().join("val").join("validation_toy.json");

    let mut manifest = toy_manifest();
    let shape = manifest.shape();
    assert_eq!(shape.windows, 4);
    let signal_samples = manifest.signal_samples();
    assert_eq!(signal_samples, 40);

    // Condition c gets the constant signal c+1 (noisy) / -(c+1) (clean);
    // window w of condition c gets label (w, w as seconds, w as amperes).
    let conditions = shape.conditions();
    let mut noisy = Vec::new();
    let mut clean = Vec::new();
    for c in 0..conditions {
        noisy.extend(std::iter::repeat((c + 1) as f32).take(signal_samples));
        clean.extend(std::iter::repeat(-((c + 1) as f32)).take(signal_samples));
    }
    let mut labels = Vec::new();
    for _c in 0..conditions {
        for w in 0..shape.windows {
            labels.extend_from_slice(&[w as f32, w as f32 * 1e-3, w as f32 * 1e-10]);
        }
    }

    write_pack(&manifest_path, &mut manifest, &noisy, &clean, &labels).unwrap();
    assert!(manifest.checksum_sha256.is_some());

    let pack = ValidationPack::open(&manifest_path, true).unwrap();
    assert_eq!(pack.shape(), shape);
    assert_eq!(pack.window_samples(), 10);

    let id = WindowId {
        cnp: 0,
        dur: 0,
        dnp: 1,
        win: 2,
    };
    let noisy_win = pack.noisy_window(id);
    assert_eq!(noisy_win.len(), 10);
    assert!(noisy_win.iter().all(|v| *v == 2.0));
    let clean_win = pack.clean_window(id);
    assert!(clean_win.iter().all(|v| *v == -2.0));

    let label = pack.label(id);
    assert_eq!(label.count, 2.0);
    assert!((label.duration_s - 2e-3).abs() < 1e-9);
    assert!((label.amplitude_a - 2e-10).abs() < 1e-15);

    // Times are absolute within the condition signal.
    let times = pack.window_times(id);
    assert!((times[0] - 0.2).abs() < 1e-6);
    assert!((times[9] - 0.29).abs() < 1e-6);
}

#[test]
fn corrupted_shard_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let manifest_path = tmp.path().join("val").join("validation_toy.json");

    let mut manifest = toy_manifest();
    let shape = manifest.shape();
    let n = shape.conditions() * manifest.signal_samples();
    let signals = vec![0.0f32; n];
    let labels = vec![0.0f32; shape.conditions() * shape.windows * 3];
    write_pack(&manifest_path, &mut manifest, &signals, &signals, &labels).unwrap();

    // Flip one payload byte; the checksum check must fail.
    let shard_path = tmp.path().join("val").join("validation_toy.npv");
    let mut bytes = std::fs::read(&shard_path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    std::fs::write(&shard_path, &bytes).unwrap();

    assert!(ValidationPack::open(&manifest_path, true).is_err());
    // Without verification the pack still opens (header is intact).
    assert!(ValidationPack::open(&manifest_path, false).is_ok());
}

#[test]
fn windows_overrunning_the_signal_are_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let manifest_path = tmp.path().join("val").join("validation_toy.json");

    // 1.0 s / 0.35 s rounds to 3 windows of 350 samples each, more than the
    // 1000-sample condition signal holds.
    let mut manifest = toy_manifest();
    manifest.sampling_rate = 1000.0;
    manifest.window_secs = 0.35;
    manifest.signal_secs = 1.0;
    let shape = manifest.shape();
    assert_eq!(shape.windows, 3);
    assert_eq!(manifest.window_samples(), 350);

    let n = shape.conditions() * manifest.signal_samples();
    let signals = vec![0.0f32; n];
    let labels = vec![0.0f32; shape.conditions() * shape.windows * 3];
    write_pack(&manifest_path, &mut manifest, &signals, &signals, &labels).unwrap();

    assert!(ValidationPack::open(&manifest_path, false).is_err());
}

#[test]
fn mismatched_section_sizes_are_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let manifest_path = tmp.path().join("val").join("validation_toy.json");
    let mut manifest = toy_manifest();
    let shape = manifest.shape();
    let n = shape.conditions() * manifest.signal_samples();
    let signals = vec![0.0f32; n];
    let labels = vec![0.0f32; 1]; // wrong
    assert!(write_pack(&manifest_path, &mut manifest, &signals, &signals, &labels).is_err());
}
