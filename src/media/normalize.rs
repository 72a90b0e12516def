//! Image normalizer — keep photos under fixed pixel and byte ceilings.
//!
//! Works in place: an oversized photo is downscaled and/or re-encoded as
//! JPEG over the original file. Failures never propagate; they come back as
//! [`NormalizeOutcome::Failed`] with the file left untouched.

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{GenericImageView, ImageReader};

use super::{encode_jpeg, flatten_to_rgb};
use crate::config::{JPEG_QUALITY, MAX_IMAGE_BYTES, MAX_IMAGE_DIMENSION};

/// Limits applied by [`normalize_image`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    pub max_dimension: u32,
    pub max_bytes: u64,
    pub jpeg_quality: u8,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            max_dimension: MAX_IMAGE_DIMENSION,
            max_bytes: MAX_IMAGE_BYTES,
            jpeg_quality: JPEG_QUALITY,
        }
    }
}

/// What happened to one photo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeOutcome {
    /// Already within limits; file not rewritten.
    Unchanged { width: u32, height: u32 },
    /// Rewritten as JPEG, possibly downscaled.
    Recompressed {
        width: u32,
        height: u32,
        bytes_before: u64,
        bytes_after: u64,
    },
    /// Could not be processed; original bytes kept.
    Failed { reason: String },
}

impl NormalizeOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Normalize the photo at `path` in place.
pub fn normalize_image(path: &Path, options: &NormalizeOptions) -> NormalizeOutcome {
    match try_normalize(path, options) {
        Ok(outcome) => {
            tracing::debug!(path = %path.display(), ?outcome, "Photo normalized");
            outcome
        }
        Err(reason) => {
            tracing::error!(path = %path.display(), %reason, "Error compressing photo");
            NormalizeOutcome::Failed { reason }
        }
    }
}

fn try_normalize(path: &Path, options: &NormalizeOptions) -> Result<NormalizeOutcome, String> {
    let bytes_before = std::fs::metadata(path)
        .map_err(|e| format!("stat failed: {e}"))?
        .len();

    let img = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| format!("open failed: {e}"))?
        .decode()
        .map_err(|e| format!("decode failed: {e}"))?;

    let (width, height) = img.dimensions();
    let (target_w, target_h) = fit_within(width, height, options.max_dimension);
    let resized = (target_w, target_h) != (width, height);

    if !resized && bytes_before <= options.max_bytes {
        return Ok(NormalizeOutcome::Unchanged { width, height });
    }

    let img = if resized {
        img.resize_exact(target_w, target_h, FilterType::Lanczos3)
    } else {
        img
    };
    let rgb = flatten_to_rgb(img);
    let encoded =
        encode_jpeg(&rgb, options.jpeg_quality).map_err(|e| format!("encode failed: {e}"))?;

    replace_file(path, &encoded).map_err(|e| format!("write failed: {e}"))?;

    Ok(NormalizeOutcome::Recompressed {
        width: target_w,
        height: target_h,
        bytes_before,
        bytes_after: encoded.len() as u64,
    })
}

/// Dimensions after a uniform downscale so neither side exceeds `max`.
/// Images already within bounds are returned as-is.
pub fn fit_within(width: u32, height: u32, max: u32) -> (u32, u32) {
    if width <= max && height <= max {
        return (width, height);
    }

    let scale_side = |side: u32, longer: u32| -> u32 {
        ((u64::from(side) * u64::from(max)) / u64::from(longer)).max(1) as u32
    };

    if width >= height {
        (max, scale_side(height, width))
    } else {
        (scale_side(width, height), max)
    }
}

/// Write through a sibling temp file so a failed write leaves the original.
fn replace_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = temp_sibling(path);
    let result = (|| {
        let mut writer = BufWriter::new(std::fs::File::create(&tmp)?);
        writer.write_all(bytes)?;
        writer.flush()?;
        std::fs::rename(&tmp, path)
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "photo".into());
    path.with_file_name(format!(".{name}.tmp"))
}
