//! Image recompression engine.
//!
//! Given one image XObject's metadata and raw stored bytes, decides whether
//! the image is worth touching, decodes it, downsamples it toward a target
//! DPI and re-encodes it as JPEG. Anything the engine does not recognize is
//! reported as a skip so the caller leaves the original bytes in place.

use flate2::read::ZlibDecoder;
use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use std::io::Read;

use crate::error::ImageError;

/// Images below this pixel count are icon-sized; recompressing them saves
/// next to nothing and risks visible degradation.
const MIN_PIXELS: u64 = 10_000;

/// Resolution assumed when an image declares none.
const DEFAULT_DPI: f32 = 72.0;

/// Metadata of an image XObject, extracted from its stream dictionary.
#[derive(Debug, Clone)]
pub struct ImageMeta {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Bits per component
    pub bits_per_component: u32,
    /// Color space name (e.g. "DeviceRGB", "DeviceGray")
    pub color_space: String,
    /// Filter chain in application order (e.g. ["FlateDecode"])
    pub filters: Vec<String>,
    /// Whether /DecodeParms declares a predictor > 1 on the deflate stream
    pub has_predictor: bool,
    /// Declared resolution (x, y) in dots per inch, if the container knows it
    pub dpi: Option<(f32, f32)>,
}

impl ImageMeta {
    fn has_filter(&self, name: &str) -> bool {
        self.filters.iter().any(|f| f == name)
    }

    fn channels(&self) -> Option<u32> {
        match self.color_space.as_str() {
            "DeviceRGB" | "RGB" => Some(3),
            "DeviceGray" | "Gray" => Some(1),
            _ => None,
        }
    }
}

/// A re-encoded image ready to be written back into the document.
#[derive(Debug, Clone)]
pub struct EncodedJpeg {
    /// JPEG bytes (DCTDecode payload)
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// True for single-channel output (DeviceGray), false for DeviceRGB
    pub grayscale: bool,
}

/// Recompress a single image.
///
/// Returns `Ok(Some(_))` with the replacement JPEG, `Ok(None)` when the
/// image is deliberately left alone (too small, or a format we do not
/// reinterpret), and `Err` when decode/encode fails. The caller treats an
/// error the same as a skip; it must never abort the document pass.
pub fn recompress(
    meta: &ImageMeta,
    content: &[u8],
    quality: u8,
    target_dpi: f32,
) -> Result<Option<EncodedJpeg>, ImageError> {
    if (meta.width as u64) * (meta.height as u64) < MIN_PIXELS {
        log::debug!(
            "skipping {}x{} image: below {} pixels",
            meta.width,
            meta.height,
            MIN_PIXELS
        );
        return Ok(None);
    }

    let (img, declared_dpi) = if meta.has_filter("DCTDecode") {
        let img = image::load_from_memory_with_format(content, ImageFormat::Jpeg)
            .map_err(|e| ImageError::Decode(e.to_string()))?;
        (img, meta.dpi.or_else(|| jfif_density(content)))
    } else if raw_samples_usable(meta) {
        (decode_raw_samples(meta, content)?, meta.dpi)
    } else {
        log::debug!(
            "skipping image: unsupported filter chain {:?} / color space {}",
            meta.filters,
            meta.color_space
        );
        return Ok(None);
    };

    let resolution = declared_dpi
        .map(|(x, y)| x.max(y))
        .unwrap_or(DEFAULT_DPI);

    // Never upscale: only shrink when the image exceeds the target DPI.
    let scale = target_dpi / resolution;
    let img = if scale < 1.0 {
        let new_width = ((img.width() as f32 * scale) as u32).max(1);
        let new_height = ((img.height() as f32 * scale) as u32).max(1);
        log::debug!(
            "downsampling {}x{} -> {}x{} ({:.0} dpi -> {:.0} dpi)",
            img.width(),
            img.height(),
            new_width,
            new_height,
            resolution,
            target_dpi
        );
        img.resize_exact(new_width, new_height, image::imageops::FilterType::Lanczos3)
    } else {
        img
    };

    encode_jpeg(&img, quality).map(Some)
}

/// Whether the stored bytes can be reinterpreted as planar pixel samples
/// once any deflate layer is stripped.
fn raw_samples_usable(meta: &ImageMeta) -> bool {
    let deflate_or_raw = meta.filters.is_empty() || meta.has_filter("FlateDecode");
    // A PNG-style predictor on the deflate stream means the inflated bytes
    // are not plain samples; reinterpreting them would corrupt the image.
    deflate_or_raw && !meta.has_predictor && meta.bits_per_component == 8 && meta.channels().is_some()
}

/// Reconstruct a pixel buffer from raw (optionally deflated) samples.
fn decode_raw_samples(meta: &ImageMeta, content: &[u8]) -> Result<DynamicImage, ImageError> {
    let data = if meta.has_filter("FlateDecode") {
        let mut decoder = ZlibDecoder::new(content);
        let mut decoded = Vec::new();
        decoder
            .read_to_end(&mut decoded)
            .map_err(|e| ImageError::Inflate(e.to_string()))?;
        decoded
    } else {
        content.to_vec()
    };

    let channels = meta.channels().ok_or_else(|| {
        ImageError::Decode(format!("unsupported color space {}", meta.color_space))
    })?;
    let expected = (meta.width as usize) * (meta.height as usize) * (channels as usize);
    if data.len() < expected {
        return Err(ImageError::PayloadMismatch {
            got: data.len(),
            expected,
            width: meta.width,
            height: meta.height,
            channels,
        });
    }

    // Tolerate trailing padding bytes; use exactly width*height*channels.
    let samples = data[..expected].to_vec();
    match channels {
        1 => GrayImage::from_raw(meta.width, meta.height, samples)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(|| ImageError::Decode("failed to build grayscale buffer".to_string())),
        _ => RgbImage::from_raw(meta.width, meta.height, samples)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| ImageError::Decode("failed to build RGB buffer".to_string())),
    }
}

/// Encode a pixel buffer as an optimized JPEG. Grayscale input stays
/// single-channel; everything else is flattened to RGB.
fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<EncodedJpeg, ImageError> {
    let (width, height) = (img.width(), img.height());
    if width > u16::MAX as u32 || height > u16::MAX as u32 {
        return Err(ImageError::Encode(format!(
            "{}x{} exceeds JPEG dimension limit",
            width, height
        )));
    }

    let mut jpeg_bytes = Vec::new();
    match img {
        DynamicImage::ImageLuma8(gray) => {
            let mut encoder = jpeg_encoder::Encoder::new(&mut jpeg_bytes, quality);
            encoder.set_optimized_huffman_tables(true);
            encoder
                .encode(
                    gray.as_raw(),
                    width as u16,
                    height as u16,
                    jpeg_encoder::ColorType::Luma,
                )
                .map_err(|e| ImageError::Encode(e.to_string()))?;
            Ok(EncodedJpeg {
                data: jpeg_bytes,
                width,
                height,
                grayscale: true,
            })
        }
        _ => {
            let rgb = img.to_rgb8();
            let mut encoder = jpeg_encoder::Encoder::new(&mut jpeg_bytes, quality);
            encoder.set_sampling_factor(jpeg_encoder::SamplingFactor::R_4_2_0);
            encoder.set_optimized_huffman_tables(true);
            encoder
                .encode(
                    rgb.as_raw(),
                    width as u16,
                    height as u16,
                    jpeg_encoder::ColorType::Rgb,
                )
                .map_err(|e| ImageError::Encode(e.to_string()))?;
            Ok(EncodedJpeg {
                data: jpeg_bytes,
                width,
                height,
                grayscale: false,
            })
        }
    }
}

/// Read the declared density from a JPEG's JFIF APP0 segment, if any.
///
/// Returns dots-per-inch for unit codes 1 (dpi) and 2 (dots/cm); a unit
/// code of 0 only declares an aspect ratio, which is not a resolution.
pub fn jfif_density(jpeg: &[u8]) -> Option<(f32, f32)> {
    if jpeg.len() < 4 || jpeg[0] != 0xFF || jpeg[1] != 0xD8 {
        return None;
    }

    let mut pos = 2;
    while pos + 4 <= jpeg.len() {
        if jpeg[pos] != 0xFF {
            return None;
        }
        let marker = jpeg[pos + 1];
        // Start of scan: no more metadata segments.
        if marker == 0xDA {
            return None;
        }
        let len = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
        if len < 2 || pos + 2 + len > jpeg.len() {
            return None;
        }
        let payload = &jpeg[pos + 4..pos + 2 + len];

        if marker == 0xE0 && payload.len() >= 12 && &payload[..5] == b"JFIF\0" {
            let units = payload[7];
            let x = u16::from_be_bytes([payload[8], payload[9]]) as f32;
            let y = u16::from_be_bytes([payload[10], payload[11]]) as f32;
            return match units {
                1 => Some((x, y)),
                2 => Some((x * 2.54, y * 2.54)),
                _ => None,
            };
        }

        pos += 2 + len;
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn rgb_meta(width: u32, height: u32, dpi: Option<(f32, f32)>) -> ImageMeta {
        ImageMeta {
            width,
            height,
            bits_per_component: 8,
            color_space: "DeviceRGB".to_string(),
            filters: vec!["FlateDecode".to_string()],
            has_predictor: false,
            dpi,
        }
    }

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn gradient_rgb(width: u32, height: u32) -> Vec<u8> {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                data.push((x % 256) as u8);
                data.push((y % 256) as u8);
                data.push(((x + y) % 256) as u8);
            }
        }
        data
    }

    #[test]
    fn small_images_are_skipped() {
        let meta = rgb_meta(50, 50, None);
        let content = deflate(&gradient_rgb(50, 50));
        let result = recompress(&meta, &content, 85, 150.0).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn raw_rgb_at_300_dpi_is_halved_to_target() {
        let meta = rgb_meta(2000, 2000, Some((300.0, 300.0)));
        let content = deflate(&gradient_rgb(2000, 2000));
        let jpeg = recompress(&meta, &content, 85, 150.0).unwrap().unwrap();
        assert_eq!(jpeg.width, 1000);
        assert_eq!(jpeg.height, 1000);
        assert!(!jpeg.grayscale);
        assert!(jpeg.data.starts_with(&[0xFF, 0xD8]));
    }

    #[test]
    fn images_below_target_dpi_keep_their_dimensions() {
        // No declared resolution defaults to 72 dpi, below the 150 target.
        let meta = rgb_meta(200, 200, None);
        let content = deflate(&gradient_rgb(200, 200));
        let jpeg = recompress(&meta, &content, 85, 150.0).unwrap().unwrap();
        assert_eq!(jpeg.width, 200);
        assert_eq!(jpeg.height, 200);
    }

    #[test]
    fn grayscale_output_stays_single_channel() {
        let meta = ImageMeta {
            color_space: "DeviceGray".to_string(),
            ..rgb_meta(200, 200, None)
        };
        let samples: Vec<u8> = (0..200u32 * 200).map(|i| (i % 256) as u8).collect();
        let content = deflate(&samples);
        let jpeg = recompress(&meta, &content, 85, 150.0).unwrap().unwrap();
        assert!(jpeg.grayscale);
    }

    #[test]
    fn cmyk_color_space_is_skipped() {
        let meta = ImageMeta {
            color_space: "DeviceCMYK".to_string(),
            ..rgb_meta(200, 200, None)
        };
        let content = deflate(&vec![0u8; 200 * 200 * 4]);
        let result = recompress(&meta, &content, 85, 150.0).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn predictor_streams_are_skipped() {
        let meta = ImageMeta {
            has_predictor: true,
            ..rgb_meta(200, 200, None)
        };
        let content = deflate(&gradient_rgb(200, 200));
        let result = recompress(&meta, &content, 85, 150.0).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn short_payload_is_an_error() {
        let meta = rgb_meta(200, 200, None);
        let content = deflate(&vec![0u8; 100]);
        let err = recompress(&meta, &content, 85, 150.0).unwrap_err();
        assert!(matches!(err, ImageError::PayloadMismatch { .. }));
    }

    #[test]
    fn corrupt_jpeg_is_an_error() {
        let meta = ImageMeta {
            filters: vec!["DCTDecode".to_string()],
            ..rgb_meta(200, 200, None)
        };
        let err = recompress(&meta, b"not a jpeg at all", 85, 150.0).unwrap_err();
        assert!(matches!(err, ImageError::Decode(_)));
    }

    #[test]
    fn recompressing_twice_does_not_balloon() {
        let meta = rgb_meta(400, 400, None);
        let content = deflate(&gradient_rgb(400, 400));
        let first = recompress(&meta, &content, 85, 150.0).unwrap().unwrap();

        let second_meta = ImageMeta {
            filters: vec!["DCTDecode".to_string()],
            ..rgb_meta(400, 400, None)
        };
        let second = recompress(&second_meta, &first.data, 85, 150.0)
            .unwrap()
            .unwrap();
        assert_eq!(second.width, 400);
        // Lossy round trips stabilize; allow a small bounded epsilon.
        assert!(second.data.len() <= first.data.len() + first.data.len() / 10);
    }

    #[test]
    fn jfif_density_reads_dpi_units() {
        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x10]);
        jpeg.extend_from_slice(b"JFIF\0");
        jpeg.extend_from_slice(&[1, 1]); // version
        jpeg.push(1); // units: dpi
        jpeg.extend_from_slice(&300u16.to_be_bytes());
        jpeg.extend_from_slice(&150u16.to_be_bytes());
        jpeg.push(0); // x thumbnail
        jpeg.push(0); // y thumbnail
        assert_eq!(jfif_density(&jpeg), Some((300.0, 150.0)));
    }

    #[test]
    fn jfif_aspect_ratio_units_declare_no_resolution() {
        let mut jpeg = vec![0xFF, 0xD8];
        jpeg.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x10]);
        jpeg.extend_from_slice(b"JFIF\0");
        jpeg.extend_from_slice(&[1, 1]);
        jpeg.push(0); // units: aspect ratio only
        jpeg.extend_from_slice(&1u16.to_be_bytes());
        jpeg.extend_from_slice(&1u16.to_be_bytes());
        jpeg.push(0);
        jpeg.push(0);
        assert_eq!(jfif_density(&jpeg), None);
    }
}
