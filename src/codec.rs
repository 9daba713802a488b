//! Pure transform stage: fit a decoded image into a target geometry and
//! encode it.
//!
//! [`ImageCodec`] is the capability seam; orchestration code only depends on
//! the trait. [`NativeCodec`] backs it with the `image` crate. All
//! intermediate pixel buffers are owned values scoped to the call, so they
//! are released on every exit path.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{imageops, DynamicImage, Rgba, RgbaImage};

use crate::models::{CropShape, DecodedImage, EncodedImage, FitMode, OutputFormat, TransformSpec};

/// Errors while transforming or encoding.
#[derive(Debug)]
pub enum TransformError {
    /// The requested encoder is not available in this build.
    EncodeUnavailable(String),
    /// Encoding ran but produced no usable output.
    EncodeFailed(String),
}

impl std::fmt::Display for TransformError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransformError::EncodeUnavailable(msg) => write!(f, "Encoder unavailable: {}", msg),
            TransformError::EncodeFailed(msg) => write!(f, "Encoding failed: {}", msg),
        }
    }
}

impl std::error::Error for TransformError {}

impl TransformError {
    pub fn user_message(&self) -> String {
        "The image could not be processed for upload.".to_string()
    }
}

/// Encodes a decoded image according to a [`TransformSpec`].
pub trait ImageCodec {
    fn encode(
        &self,
        decoded: &DecodedImage,
        spec: &TransformSpec,
    ) -> Result<EncodedImage, TransformError>;
}

/// [`ImageCodec`] backed by the `image` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeCodec;

impl ImageCodec for NativeCodec {
    fn encode(
        &self,
        decoded: &DecodedImage,
        spec: &TransformSpec,
    ) -> Result<EncodedImage, TransformError> {
        let (target_width, target_height) = clamp_target_box(spec);

        let fitted = match spec.fit_mode {
            FitMode::Cover => {
                // Scale to fill the box, center-cropping the overflow.
                decoded
                    .pixels()
                    .resize_to_fill(target_width, target_height, FilterType::Lanczos3)
            }
            FitMode::Contain => letterbox(decoded.pixels(), target_width, target_height),
        };

        if spec.shape == CropShape::Circle {
            // Circular presentation is a consumer concern; the bitmap stays
            // rectangular.
            log::debug!("Circle shape requested; emitting rectangular bitmap");
        }

        let bytes = write_encoded(&fitted, spec)?;
        if bytes.is_empty() {
            return Err(TransformError::EncodeFailed(
                "encoder produced an empty buffer".to_string(),
            ));
        }

        log::debug!(
            "Encoded {}x{} -> {}x{} {} ({} bytes)",
            decoded.width(),
            decoded.height(),
            fitted.width(),
            fitted.height(),
            spec.output_format.content_type(),
            bytes.len()
        );

        Ok(EncodedImage {
            bytes,
            content_type: spec.output_format.content_type(),
            width: fitted.width(),
            height: fitted.height(),
        })
    }
}

/// Shrinks the target box (aspect preserved) until both sides fit under
/// `max_dimension`.
fn clamp_target_box(spec: &TransformSpec) -> (u32, u32) {
    let width = spec.target_width.max(1);
    let height = spec.target_height.max(1);
    let max = spec.max_dimension.max(1);

    if width <= max && height <= max {
        return (width, height);
    }

    let scale = (max as f32 / width as f32).min(max as f32 / height as f32);
    let clamped_width = ((width as f32 * scale).round() as u32).clamp(1, max);
    let clamped_height = ((height as f32 * scale).round() as u32).clamp(1, max);
    (clamped_width, clamped_height)
}

/// Scale to fit inside the box, then center on a canvas of exactly the
/// target dimensions. Letterbox bars are transparent; JPEG output flattens
/// them to black.
fn letterbox(pixels: &DynamicImage, target_width: u32, target_height: u32) -> DynamicImage {
    let fitted = pixels.resize(target_width, target_height, FilterType::Lanczos3);
    if fitted.width() == target_width && fitted.height() == target_height {
        return fitted;
    }

    let mut canvas = RgbaImage::from_pixel(target_width, target_height, Rgba([0, 0, 0, 0]));
    let offset_x = i64::from((target_width - fitted.width()) / 2);
    let offset_y = i64::from((target_height - fitted.height()) / 2);
    imageops::overlay(&mut canvas, &fitted.to_rgba8(), offset_x, offset_y);
    DynamicImage::ImageRgba8(canvas)
}

fn write_encoded(pixels: &DynamicImage, spec: &TransformSpec) -> Result<Vec<u8>, TransformError> {
    let mut buffer = Cursor::new(Vec::new());

    match spec.output_format {
        OutputFormat::Webp => {
            let encoder = WebPEncoder::new_lossless(&mut buffer);
            pixels
                .to_rgba8()
                .write_with_encoder(encoder)
                .map_err(map_encode_error)?;
        }
        OutputFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut buffer, jpeg_quality(spec.quality));
            pixels
                .to_rgb8()
                .write_with_encoder(encoder)
                .map_err(map_encode_error)?;
        }
    }

    Ok(buffer.into_inner())
}

fn map_encode_error(err: image::ImageError) -> TransformError {
    match err {
        image::ImageError::Unsupported(e) => TransformError::EncodeUnavailable(e.to_string()),
        other => TransformError::EncodeFailed(other.to_string()),
    }
}

/// Maps the 0.0..=1.0 spec quality onto the JPEG 1-100 scale.
fn jpeg_quality(quality: f32) -> u8 {
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn solid_image(width: u32, height: u32) -> DecodedImage {
        DecodedImage::new(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            image::Rgb([200, 40, 40]),
        )))
    }

    fn spec(
        width: u32,
        height: u32,
        max: u32,
        format: OutputFormat,
        fit: FitMode,
    ) -> TransformSpec {
        TransformSpec::new(width, height, max, format, 0.8, CropShape::Square, fit)
    }

    #[test]
    fn cover_output_matches_target_exactly() {
        let codec = NativeCodec;
        for (source_w, source_h) in [(1000, 400), (400, 1000), (257, 255), (64, 64)] {
            let encoded = codec
                .encode(
                    &solid_image(source_w, source_h),
                    &spec(256, 256, 256, OutputFormat::Webp, FitMode::Cover),
                )
                .unwrap();
            assert_eq!((encoded.width, encoded.height), (256, 256));
        }
    }

    #[test]
    fn contain_output_matches_target_exactly() {
        let codec = NativeCodec;
        let encoded = codec
            .encode(
                &solid_image(1000, 400),
                &spec(200, 200, 200, OutputFormat::Webp, FitMode::Contain),
            )
            .unwrap();
        assert_eq!((encoded.width, encoded.height), (200, 200));
    }

    #[test]
    fn contain_letterboxes_without_cropping() {
        let codec = NativeCodec;
        let encoded = codec
            .encode(
                &solid_image(200, 100),
                &spec(100, 100, 100, OutputFormat::Webp, FitMode::Contain),
            )
            .unwrap();

        // WebP here is lossless, so the output is inspectable.
        let round_tripped = image::load_from_memory(&encoded.bytes).unwrap().to_rgba8();
        assert_eq!(round_tripped.dimensions(), (100, 100));
        // Top edge is letterbox (transparent), the center is source content.
        assert_eq!(round_tripped.get_pixel(50, 0)[3], 0);
        assert_eq!(round_tripped.get_pixel(50, 50)[3], 255);
        assert_eq!(round_tripped.get_pixel(50, 50)[0], 200);
    }

    #[test]
    fn output_never_exceeds_max_dimension() {
        let codec = NativeCodec;
        let encoded = codec
            .encode(
                &solid_image(3000, 2000),
                &spec(1536, 2048, 1024, OutputFormat::Webp, FitMode::Cover),
            )
            .unwrap();
        assert!(encoded.width <= 1024);
        assert!(encoded.height <= 1024);
        // Aspect of the requested box (3:4) survives the clamp.
        assert_eq!((encoded.width, encoded.height), (768, 1024));
    }

    #[test]
    fn jpeg_output_is_rectangular_and_non_empty() {
        let codec = NativeCodec;
        let encoded = codec
            .encode(
                &solid_image(300, 300),
                &spec(256, 256, 256, OutputFormat::Jpeg, FitMode::Cover),
            )
            .unwrap();
        assert_eq!(encoded.content_type, "image/jpeg");
        assert!(!encoded.bytes.is_empty());
        let round_tripped = image::load_from_memory(&encoded.bytes).unwrap();
        assert_eq!((round_tripped.width(), round_tripped.height()), (256, 256));
    }

    #[test]
    fn circle_shape_does_not_change_the_bitmap() {
        let codec = NativeCodec;
        let decoded = solid_image(300, 300);
        let rect_spec = spec(128, 128, 128, OutputFormat::Webp, FitMode::Cover);
        let mut circle_spec = rect_spec.clone();
        circle_spec.shape = CropShape::Circle;

        let rect = codec.encode(&decoded, &rect_spec).unwrap();
        let circle = codec.encode(&decoded, &circle_spec).unwrap();
        assert_eq!(rect.bytes, circle.bytes);
    }

    #[test]
    fn jpeg_quality_maps_to_percent_scale() {
        assert_eq!(jpeg_quality(0.82), 82);
        assert_eq!(jpeg_quality(0.0), 1);
        assert_eq!(jpeg_quality(1.0), 100);
    }

    #[test]
    fn clamp_keeps_small_boxes_untouched() {
        let untouched = spec(256, 256, 1024, OutputFormat::Webp, FitMode::Cover);
        assert_eq!(clamp_target_box(&untouched), (256, 256));
    }
}
