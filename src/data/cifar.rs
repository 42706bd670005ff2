// ============================================================
// Layer 4 — CIFAR-10 Binary Reader
// ============================================================
// Reads the "binary version" of CIFAR-10:
//
//   <data_dir>/[cifar-10-batches-bin/]
//     data_batch_1.bin ... data_batch_5.bin   ← 50 000 training images
//     test_batch.bin                          ← 10 000 test images
//
// Each file is a sequence of 3073-byte records:
//   byte 0        label (0..9)
//   bytes 1..3073 1024 red, 1024 green, 1024 blue pixels (row-major)
//
// Reference: https://www.cs.toronto.edu/~kriz/cifar.html

use anyhow::{bail, Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::data::dataset::{ImageItem, CHANNELS};

pub const IMAGE_SIZE:  usize = 32;
pub const NUM_CLASSES: usize = 10;
const PIXELS:          usize = CHANNELS * IMAGE_SIZE * IMAGE_SIZE;
const RECORD_LEN:      usize = 1 + PIXELS;

const TRAIN_FILES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
const TEST_FILE: &str = "test_batch.bin";
const SUBDIR:    &str = "cifar-10-batches-bin";

/// Parse one batch file's bytes into images
pub fn parse_records(bytes: &[u8]) -> Result<Vec<ImageItem>> {
    if bytes.len() % RECORD_LEN != 0 {
        bail!(
            "CIFAR-10 batch has {} bytes, not a multiple of the {}-byte record",
            bytes.len(),
            RECORD_LEN
        );
    }

    bytes
        .chunks_exact(RECORD_LEN)
        .map(|record| {
            let label = record[0] as usize;
            if label >= NUM_CLASSES {
                bail!("CIFAR-10 label {label} out of range");
            }
            let pixels = record[1..].iter().map(|&b| b as f32 / 255.0).collect();
            Ok(ImageItem::new(pixels, label))
        })
        .collect()
}

/// Directory that actually holds the .bin files
fn batches_dir(data_dir: &Path) -> PathBuf {
    let nested = data_dir.join(SUBDIR);
    if nested.is_dir() { nested } else { data_dir.to_path_buf() }
}

fn read_file(path: &Path) -> Result<Vec<ImageItem>> {
    let bytes = fs::read(path)
        .with_context(|| format!("Cannot read CIFAR-10 batch '{}'", path.display()))?;
    parse_records(&bytes).with_context(|| format!("Malformed CIFAR-10 batch '{}'", path.display()))
}

/// Load (train, test) images from `data_dir`
pub fn load(data_dir: &Path) -> Result<(Vec<ImageItem>, Vec<ImageItem>)> {
    let dir = batches_dir(data_dir);

    let mut train = Vec::with_capacity(50_000);
    for name in TRAIN_FILES {
        train.extend(read_file(&dir.join(name))?);
    }
    let test = read_file(&dir.join(TEST_FILE))?;

    tracing::info!(
        "Loaded CIFAR-10 from '{}': {} train / {} test images",
        dir.display(),
        train.len(),
        test.len()
    );
    Ok((train, test))
}
