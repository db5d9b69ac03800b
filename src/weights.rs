//! VGG19 weight persistence and lookup.
//!
//! Weights live in a single raw blob: for each of the 16 convolutions
//! in forward order, the `[out, in, 3, 3]` kernel followed by the
//! `[out]` bias, all little-endian f32. The element count is fixed by
//! the architecture, so a length check is the only validation the
//! format needs.
//!
//! Lookup order: explicit path, the `IMPASTO_VGG19` environment
//! variable, `~/.impasto/vgg19.bin`, then the bundled `data/vgg19.bin`.

use std::path::{Path, PathBuf};

use burn::module::Param;
use burn::prelude::*;
use burn::tensor::TensorData;

use crate::error::{StyleError, StyleResult};
use crate::perceptual::layers::CONV_CHANNELS;
use crate::perceptual::Vgg19Stack;

/// Environment variable naming a weight file, checked when no
/// explicit path is given.
pub const WEIGHTS_ENV: &str = "IMPASTO_VGG19";

/// File name expected in the user and bundled directories.
pub const WEIGHTS_FILE: &str = "vgg19.bin";

/// f32 count of the full blob: kernels plus biases of all 16 convs.
pub fn expected_len() -> usize {
    CONV_CHANNELS
        .iter()
        .map(|&(c_in, c_out)| c_out * c_in * 9 + c_out)
        .sum()
}

/// Read a raw little-endian f32 blob.
pub fn load_raw(path: &Path) -> StyleResult<Vec<f32>> {
    let bytes = std::fs::read(path)?;
    if bytes.len() % 4 != 0 {
        return Err(StyleError::WeightsFormat(format!(
            "{} is not a whole number of f32 values ({} bytes)",
            path.display(),
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// Write a raw little-endian f32 blob, creating parent directories.
pub fn save_raw(values: &[f32], path: &Path) -> StyleResult<()> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, &bytes)?;
    Ok(())
}

/// BLAKE3 digest of a weight file, as full hex.
pub fn hash_file(path: &Path) -> StyleResult<String> {
    let bytes = std::fs::read(path)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

/// Install blob values into a stack.
///
/// The blob must carry exactly the VGG19 parameter count; anything
/// else is rejected before any parameter moves.
pub fn apply<B: Backend>(stack: Vgg19Stack<B>, values: &[f32]) -> StyleResult<Vgg19Stack<B>> {
    if values.len() != expected_len() {
        return Err(StyleError::WeightsFormat(format!(
            "expected {} f32 values, found {}",
            expected_len(),
            values.len()
        )));
    }

    let mut stack = stack;
    let device = stack.convs[0].weight.val().device();
    let mut offset = 0;
    for (conv, &(c_in, c_out)) in stack.convs.iter_mut().zip(CONV_CHANNELS.iter()) {
        let kernel_len = c_out * c_in * 9;
        let kernel: Tensor<B, 4> = Tensor::from_data(
            TensorData::new(
                values[offset..offset + kernel_len].to_vec(),
                [c_out, c_in, 3, 3],
            ),
            &device,
        );
        offset += kernel_len;

        let bias: Tensor<B, 1> = Tensor::from_data(
            TensorData::new(values[offset..offset + c_out].to_vec(), [c_out]),
            &device,
        );
        offset += c_out;

        conv.weight = Param::from_tensor(kernel);
        conv.bias = Some(Param::from_tensor(bias));
    }
    Ok(stack)
}

/// Find a weight file.
///
/// An explicit path is authoritative: if it is missing, the fallback
/// chain is not consulted.
pub fn resolve(explicit: Option<&Path>) -> StyleResult<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        return Err(StyleError::WeightsNotFound {
            searched: vec![path.to_path_buf()],
        });
    }

    let mut searched = Vec::new();

    if let Ok(env_path) = std::env::var(WEIGHTS_ENV) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        searched.push(path);
    }

    let local = local_dir().join(WEIGHTS_FILE);
    if local.exists() {
        return Ok(local);
    }
    searched.push(local);

    let bundled = bundled_dir().join(WEIGHTS_FILE);
    if bundled.exists() {
        return Ok(bundled);
    }
    searched.push(bundled);

    Err(StyleError::WeightsNotFound { searched })
}

/// Resolve, read, validate and install pretrained weights.
pub fn load_stack<B: Backend>(
    device: &B::Device,
    explicit: Option<&Path>,
) -> StyleResult<Vgg19Stack<B>> {
    let path = resolve(explicit)?;
    let values = load_raw(&path)?;
    apply(Vgg19Stack::init(device), &values)
}

/// Per-user weight directory: ~/.impasto
fn local_dir() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".impasto")
}

/// Weights shipped next to the crate: data/
fn bundled_dir() -> PathBuf {
    let manifest = env!("CARGO_MANIFEST_DIR");
    PathBuf::from(manifest).join("data")
}
