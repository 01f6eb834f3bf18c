//! Validation pack storage: JSON manifest plus one binary signal shard.
//!
//! The shard holds, for every (concentration, duration, diameter) condition,
//! a full simulated signal (noisy and clean variants) and per-window label
//! triples. Layout is little-endian f32 behind a fixed header:
//!
//! ```text
//! 0..4    magic "NPV1"
//! 4..8    format version (u32)
//! 8..12   dtype (u32, 0 = f32)
//! 12..16  reserved
//! 16..32  grid dims: concentrations, durations, diameters, windows (u32 each)
//! 32..40  samples per condition signal (u64)
//! 40..64  section offsets: noisy, clean, labels (u64 each)
//! ```

use crate::types::{EvalError, EvalResult, GridShape, PulseLabel, WindowId};
use memmap2::{Mmap, MmapOptions};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const PACK_MAGIC: &[u8; 4] = b"NPV1";
pub const PACK_VERSION: u32 = 1;
const HEADER_LEN: usize = 64;
const LABEL_WIDTH: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackDType {
    F32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackManifest {
    /// Samples per second of the stored signals.
    pub sampling_rate: f32,
    /// Length of one evaluation window, seconds.
    pub window_secs: f32,
    /// Length of one full condition signal, seconds.
    pub signal_secs: f32,
    pub concentrations: usize,
    pub durations: usize,
    pub diameters: usize,
    /// Path to the signal shard, relative to the manifest (UTF-8).
    pub relative_path: String,
    pub shard_version: u32,
    pub dtype: PackDType,
    /// Hex-encoded SHA256 of the shard contents (optional until populated).
    pub checksum_sha256: Option<String>,
    pub created_at_ms: u64,
}

impl PackManifest {
    pub fn shape(&self) -> GridShape {
        GridShape {
            concentrations: self.concentrations,
            durations: self.durations,
            diameters: self.diameters,
            windows: (self.signal_secs / self.window_secs).round() as usize,
        }
    }

    pub fn window_samples(&self) -> usize {
        (self.window_secs * self.sampling_rate).round() as usize
    }

    pub fn signal_samples(&self) -> usize {
        (self.signal_secs * self.sampling_rate).round() as usize
    }

    pub fn save(&self, path: &Path) -> EvalResult<()> {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| EvalError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let data = serde_json::to_vec_pretty(self).map_err(|e| EvalError::Other(e.to_string()))?;
        fs::write(path, data).map_err(|e| EvalError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    pub fn load(path: &Path) -> EvalResult<Self> {
        let raw = fs::read(path).map_err(|e| EvalError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        serde_json::from_slice(&raw).map_err(|e| EvalError::Json {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Mmap-backed reader over a validation pack.
pub struct ValidationPack {
    manifest: PackManifest,
    shape: GridShape,
    signal_samples: usize,
    mmap: Mmap,
    noisy_offset: usize,
    clean_offset: usize,
    labels_offset: usize,
}

impl ValidationPack {
    /// Open a pack from its manifest path and map the shard.
    pub fn open(manifest_path: &Path, verify_checksum: bool) -> EvalResult<Self> {
        let manifest = PackManifest::load(manifest_path)?;
        let root = manifest_path.parent().unwrap_or_else(|| Path::new("."));
        let shard_path = root.join(&manifest.relative_path);

        let file = File::open(&shard_path).map_err(|e| EvalError::Io {
            path: shard_path.clone(),
            source: e,
        })?;
        let mmap = unsafe {
            MmapOptions::new().map(&file).map_err(|e| EvalError::Io {
                path: shard_path.clone(),
                source: std::io::Error::other(e.to_string()),
            })?
        };
        let data = &mmap[..];
        if data.len() < HEADER_LEN {
            return Err(EvalError::Pack {
                path: shard_path,
                msg: "shard too small for header".into(),
            });
        }
        if &data[0..4] != PACK_MAGIC {
            return Err(EvalError::Pack {
                path: shard_path,
                msg: "bad magic".into(),
            });
        }
        let version = read_u32_le(&data[4..8]);
        if version != manifest.shard_version {
            return Err(EvalError::Pack {
                path: shard_path,
                msg: format!("shard version mismatch {} vs {}", version, manifest.shard_version),
            });
        }
        let dtype = read_u32_le(&data[8..12]);
        if dtype != 0 {
            return Err(EvalError::Pack {
                path: shard_path,
                msg: format!("unsupported dtype {dtype}"),
            });
        }
        let shape = GridShape {
            concentrations: read_u32_le(&data[16..20]) as usize,
            durations: read_u32_le(&data[20..24]) as usize,
            diameters: read_u32_le(&data[24..28]) as usize,
            windows: read_u32_le(&data[28..32]) as usize,
        };
        if shape != manifest.shape() {
            return Err(EvalError::Pack {
                path: shard_path,
                msg: format!("grid dims {shape:?} disagree with manifest {:?}", manifest.shape()),
            });
        }
        let signal_samples = read_u64_le(&data[32..40]) as usize;
        if signal_samples != manifest.signal_samples() {
            return Err(EvalError::Pack {
                path: shard_path,
                msg: format!(
                    "signal length {} disagrees with manifest {}",
                    signal_samples,
                    manifest.signal_samples()
                ),
            });
        }
        let window_samples = manifest.window_samples();
        if shape.windows * window_samples > signal_samples {
            return Err(EvalError::Pack {
                path: shard_path,
                msg: format!(
                    "{} windows of {} samples overrun the {}-sample signal",
                    shape.windows, window_samples, signal_samples
                ),
            });
        }
        let noisy_offset = read_u64_le(&data[40..48]) as usize;
        let clean_offset = read_u64_le(&data[48..56]) as usize;
        let labels_offset = read_u64_le(&data[56..64]) as usize;

        let signal_bytes = shape
            .conditions()
            .checked_mul(signal_samples)
            .and_then(|v| v.checked_mul(4))
            .ok_or_else(|| EvalError::Pack {
                path: shard_path.clone(),
                msg: "overflow computing signal section size".into(),
            })?;
        let label_bytes = shape
            .conditions()
            .checked_mul(shape.windows * LABEL_WIDTH * 4)
            .ok_or_else(|| EvalError::Pack {
                path: shard_path.clone(),
                msg: "overflow computing label section size".into(),
            })?;
        if noisy_offset + signal_bytes > data.len()
            || clean_offset + signal_bytes > data.len()
            || labels_offset + label_bytes > data.len()
        {
            return Err(EvalError::Pack {
                path: shard_path,
                msg: "shard truncated".into(),
            });
        }

        if verify_checksum {
            if let Some(expected) = &manifest.checksum_sha256 {
                use sha2::Digest;
                let actual = format!("{:x}", sha2::Sha256::digest(data));
                if &actual != expected {
                    return Err(EvalError::Pack {
                        path: shard_path,
                        msg: format!("checksum mismatch: {actual} vs {expected}"),
                    });
                }
            }
        }

        Ok(Self {
            manifest,
            shape,
            signal_samples,
            mmap,
            noisy_offset,
            clean_offset,
            labels_offset,
        })
    }

    pub fn manifest(&self) -> &PackManifest {
        &self.manifest
    }

    pub fn shape(&self) -> GridShape {
        self.shape
    }

    pub fn window_samples(&self) -> usize {
        self.manifest.window_samples()
    }

    fn condition_index(&self, id: WindowId) -> usize {
        (id.cnp * self.shape.durations + id.dur) * self.shape.diameters + id.dnp
    }

    fn signal_slice(&self, section_offset: usize, id: WindowId) -> Vec<f32> {
        let win_samples = self.window_samples();
        let start = self.condition_index(id) * self.signal_samples + id.win * win_samples;
        let byte_start = section_offset + start * 4;
        read_f32_section(&self.mmap[byte_start..byte_start + win_samples * 4])
    }

    /// Noisy signal slice for one window.
    pub fn noisy_window(&self, id: WindowId) -> Vec<f32> {
        self.signal_slice(self.noisy_offset, id)
    }

    /// Clean (noise-free) signal slice for one window.
    pub fn clean_window(&self, id: WindowId) -> Vec<f32> {
        self.signal_slice(self.clean_offset, id)
    }

    /// Absolute sample times for one window, seconds within the condition signal.
    pub fn window_times(&self, id: WindowId) -> Vec<f32> {
        let win_samples = self.window_samples();
        let start = id.win * win_samples;
        (start..start + win_samples)
            .map(|s| s as f32 / self.manifest.sampling_rate)
            .collect()
    }

    pub fn label(&self, id: WindowId) -> PulseLabel {
        let idx = (self.condition_index(id) * self.shape.windows + id.win) * LABEL_WIDTH;
        let byte_start = self.labels_offset + idx * 4;
        let vals = read_f32_section(&self.mmap[byte_start..byte_start + LABEL_WIDTH * 4]);
        PulseLabel {
            count: vals[0],
            duration_s: vals[1],
            amplitude_a: vals[2],
        }
    }
}

/// Write a pack shard and its manifest. Signals are `[conditions][samples]`
/// row-major, labels `[conditions][windows][3]`.
pub fn write_pack(
    manifest_path: &Path,
    manifest: &mut PackManifest,
    noisy: &[f32],
    clean: &[f32],
    labels: &[f32],
) -> EvalResult<()> {
    let shape = manifest.shape();
    let signal_elems = shape.conditions() * manifest.signal_samples();
    let label_elems = shape.conditions() * shape.windows * LABEL_WIDTH;
    if noisy.len() != signal_elems || clean.len() != signal_elems || labels.len() != label_elems {
        return Err(EvalError::Other(format!(
            "pack section sizes disagree with manifest: noisy {} clean {} labels {} (want {} / {})",
            noisy.len(),
            clean.len(),
            labels.len(),
            signal_elems,
            label_elems
        )));
    }

    let noisy_offset = HEADER_LEN as u64;
    let clean_offset = noisy_offset + (signal_elems * 4) as u64;
    let labels_offset = clean_offset + (signal_elems * 4) as u64;

    let mut buf = Vec::with_capacity(HEADER_LEN + (2 * signal_elems + label_elems) * 4);
    buf.extend_from_slice(PACK_MAGIC);
    buf.extend_from_slice(&PACK_VERSION.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes()); // dtype f32
    buf.extend_from_slice(&0u32.to_le_bytes()); // reserved
    buf.extend_from_slice(&(shape.concentrations as u32).to_le_bytes());
    buf.extend_from_slice(&(shape.durations as u32).to_le_bytes());
    buf.extend_from_slice(&(shape.diameters as u32).to_le_bytes());
    buf.extend_from_slice(&(shape.windows as u32).to_le_bytes());
    buf.extend_from_slice(&(manifest.signal_samples() as u64).to_le_bytes());
    buf.extend_from_slice(&noisy_offset.to_le_bytes());
    buf.extend_from_slice(&clean_offset.to_le_bytes());
    buf.extend_from_slice(&labels_offset.to_le_bytes());
    for v in noisy.iter().chain(clean.iter()).chain(labels.iter()) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    use sha2::Digest;
    manifest.shard_version = PACK_VERSION;
    manifest.checksum_sha256 = Some(format!("{:x}", sha2::Sha256::digest(&buf)));

    let root = manifest_path.parent().unwrap_or_else(|| Path::new("."));
    if !root.exists() {
        fs::create_dir_all(root).map_err(|e| EvalError::Io {
            path: root.to_path_buf(),
            source: e,
        })?;
    }
    let shard_path: PathBuf = root.join(&manifest.relative_path);
    let mut file = File::create(&shard_path).map_err(|e| EvalError::Io {
        path: shard_path.clone(),
        source: e,
    })?;
    file.write_all(&buf).map_err(|e| EvalError::Io {
        path: shard_path,
        source: e,
    })?;

    manifest.save(manifest_path)
}

fn read_u32_le(data: &[u8]) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(data);
    u32::from_le_bytes(arr)
}

fn read_u64_le(data: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(data);
    u64::from_le_bytes(arr)
}

fn read_f32_section(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(4)
        .map(|c| {
            let mut arr = [0u8; 4];
            arr.copy_from_slice(c);
            f32::from_le_bytes(arr)
        })
        .collect()
}
