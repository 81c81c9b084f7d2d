//! PDF compressor library.
//!
//! Shrinks a PDF by recompressing its embedded raster images: every page's
//! image XObjects are decoded, downsampled toward a target DPI and
//! re-encoded as JPEG, then the document is pruned and rewritten with
//! compact serialization options. Per-image failures are logged and the
//! original bytes kept; only open/save failures abort the call.

pub mod document;
pub mod error;
pub mod image;
pub mod store;

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use document::PdfDocument;
pub use error::{CompressError, ImageError, StoreError};
pub use store::FileStore;

/// Options for PDF compression
#[derive(Debug, Clone)]
pub struct CompressOptions {
    /// JPEG quality (1-100)
    pub quality: u8,
    /// Target DPI for images; images above it are downsampled
    pub target_dpi: f32,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            quality: 85,
            target_dpi: 150.0,
        }
    }
}

/// Outcome of a successful compression call.
#[derive(Debug, Clone)]
pub struct CompressionStats {
    pub original_bytes: u64,
    pub compressed_bytes: u64,
    pub total_images: usize,
    pub recompressed_images: usize,
    pub skipped_images: usize,
}

impl CompressionStats {
    pub fn original_mb(&self) -> f64 {
        round2(mb(self.original_bytes))
    }

    pub fn compressed_mb(&self) -> f64 {
        round2(mb(self.compressed_bytes))
    }

    /// original / compressed, with the divisor floored at 0.01 MB. Can fall
    /// below 1 when the output ends up larger than the input.
    pub fn ratio(&self) -> f64 {
        round2(mb(self.original_bytes) / mb(self.compressed_bytes).max(0.01))
    }

    /// Size reduction in percent; negative when the output grew.
    pub fn percent_reduction(&self) -> f64 {
        round2((1.0 - mb(self.compressed_bytes) / mb(self.original_bytes)) * 100.0)
    }
}

fn mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Compress the PDF at `input`, writing the result to `output`.
///
/// The output is staged in a scoped temporary directory and only copied to
/// `output` after a successful save, so a failed call never leaves a
/// partial or truncated file behind.
pub fn compress_file(
    input: &Path,
    output: &Path,
    options: &CompressOptions,
) -> Result<CompressionStats, CompressError> {
    if options.quality == 0 || options.quality > 100 {
        return Err(CompressError::InvalidQuality);
    }

    let workdir = tempfile::tempdir()
        .map_err(|e| CompressError::Save(format!("failed to create working directory: {}", e)))?;

    let result = compress_into(input, output, workdir.path(), options);
    if result.is_err() {
        let _ = fs::remove_file(output);
    }
    // workdir (and the staged file in it) is removed on drop, on every path.
    result
}

fn compress_into(
    input: &Path,
    output: &Path,
    workdir: &Path,
    options: &CompressOptions,
) -> Result<CompressionStats, CompressError> {
    let mut doc = PdfDocument::open(input)?;

    let mut total_images = 0;
    let mut recompressed_images = 0;
    let mut skipped_images = 0;
    let mut visited = HashSet::new();

    for (page_num, page_id) in doc.pages() {
        for (name, image_id) in doc.page_images(page_id) {
            // An image shared across pages is processed once.
            if !visited.insert(image_id) {
                continue;
            }
            let (meta, content) = match doc.image_parts(image_id) {
                Some(parts) => parts,
                None => continue,
            };
            total_images += 1;

            match image::recompress(&meta, &content, options.quality, options.target_dpi) {
                Ok(Some(jpeg)) => {
                    log::debug!(
                        "page {} /{}: {}x{} {} -> {}x{} JPEG ({} -> {} bytes)",
                        page_num,
                        name,
                        meta.width,
                        meta.height,
                        meta.filters.first().map(String::as_str).unwrap_or("raw"),
                        jpeg.width,
                        jpeg.height,
                        content.len(),
                        jpeg.data.len()
                    );
                    doc.replace_image(image_id, &jpeg);
                    recompressed_images += 1;
                }
                Ok(None) => {
                    skipped_images += 1;
                }
                Err(e) => {
                    log::warn!("page {} image /{}: {}", page_num, name, e);
                    skipped_images += 1;
                }
            }
        }
    }

    let staged = workdir.join("compressed.pdf");
    doc.finish(&staged)?;

    fs::copy(&staged, output)
        .map_err(|e| CompressError::Save(format!("{}: {}", output.display(), e)))?;

    let original_bytes = fs::metadata(input).map(|m| m.len()).unwrap_or(0);
    let compressed_bytes = fs::metadata(output)
        .map(|m| m.len())
        .map_err(|e| CompressError::Save(format!("{}: {}", output.display(), e)))?;

    Ok(CompressionStats {
        original_bytes,
        compressed_bytes,
        total_images,
        recompressed_images,
        skipped_images,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(original_bytes: u64, compressed_bytes: u64) -> CompressionStats {
        CompressionStats {
            original_bytes,
            compressed_bytes,
            total_images: 0,
            recompressed_images: 0,
            skipped_images: 0,
        }
    }

    #[test]
    fn ratio_and_reduction_are_rounded_to_two_decimals() {
        let s = stats(3 * 1024 * 1024, 1024 * 1024);
        assert_eq!(s.ratio(), 3.0);
        assert_eq!(s.percent_reduction(), 66.67);
    }

    #[test]
    fn larger_output_yields_sub_one_ratio_and_negative_reduction() {
        let s = stats(1024 * 1024, 2 * 1024 * 1024);
        assert_eq!(s.ratio(), 0.5);
        assert_eq!(s.percent_reduction(), -100.0);
    }

    #[test]
    fn tiny_compressed_size_is_floored_in_the_divisor() {
        let s = stats(1024 * 1024, 1);
        assert_eq!(s.ratio(), 100.0);
    }

    #[test]
    fn zero_quality_is_rejected() {
        let options = CompressOptions {
            quality: 0,
            ..Default::default()
        };
        let err = compress_file(
            Path::new("does-not-matter.pdf"),
            Path::new("out.pdf"),
            &options,
        )
        .unwrap_err();
        assert!(matches!(err, CompressError::InvalidQuality));
    }
}
