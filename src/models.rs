use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Where an image enters the pipeline from.
///
/// Exactly one variant is active per acquisition; the variant determines
/// which validation rules `SourceResolver` applies.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Bytes picked from the local device, with the content type the picker
    /// declared for them.
    LocalFile { bytes: Vec<u8>, declared_type: String },
    /// A user-pasted URL, fetched through the sanitizing proxy.
    RemoteUrl { url: String },
    /// The output of a finished generation job, fetched like a remote URL.
    GeneratedResult { job_id: String, result_url: String },
}

/// Target encoding for the pipeline output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Webp,
    Jpeg,
}

impl OutputFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Webp => "image/webp",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Webp => "webp",
            OutputFormat::Jpeg => "jpg",
        }
    }
}

/// Policy for reconciling the source aspect ratio with the target box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitMode {
    /// Scale so the target box is filled, then center-crop the overflow.
    Cover,
    /// Scale so the whole source fits, then center it on the target canvas.
    Contain,
}

/// Intended presentation shape of the artifact.
///
/// The codec always emits a rectangular bitmap; `Circle` is carried so the
/// consuming view can apply a mask at display time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CropShape {
    Square,
    Circle,
    CustomAspect,
}

/// Immutable per-call description of the transform the codec performs.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformSpec {
    pub target_width: u32,
    pub target_height: u32,
    /// Hard ceiling on either output dimension; the target box is scaled
    /// down (aspect preserved) if it exceeds this.
    pub max_dimension: u32,
    pub output_format: OutputFormat,
    /// Encoder quality in 0.0..=1.0. Mapped to the JPEG 1-100 scale;
    /// advisory for WebP, which this build encodes losslessly.
    pub quality: f32,
    pub shape: CropShape,
    pub fit_mode: FitMode,
}

impl TransformSpec {
    pub fn new(
        target_width: u32,
        target_height: u32,
        max_dimension: u32,
        output_format: OutputFormat,
        quality: f32,
        shape: CropShape,
        fit_mode: FitMode,
    ) -> Self {
        Self {
            target_width,
            target_height,
            max_dimension,
            output_format,
            quality: quality.clamp(0.0, 1.0),
            shape,
            fit_mode,
        }
    }

    /// 256×256 circular avatar, WebP.
    pub fn avatar() -> Self {
        Self::new(
            256,
            256,
            256,
            OutputFormat::Webp,
            0.82,
            CropShape::Circle,
            FitMode::Cover,
        )
    }

    /// 3:4 portrait cover image, capped at 1024px height, WebP.
    pub fn cover() -> Self {
        Self::new(
            768,
            1024,
            1024,
            OutputFormat::Webp,
            0.85,
            CropShape::CustomAspect,
            FitMode::Cover,
        )
    }
}

/// In-memory pixel buffer with known dimensions, prior to re-encoding.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pixels: DynamicImage,
}

impl DecodedImage {
    pub fn new(pixels: DynamicImage) -> Self {
        Self { pixels }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }
}

/// A byte buffer in the target format/quality, ready for upload.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    pub fn byte_size(&self) -> usize {
        self.bytes.len()
    }
}

/// Outcome of a successful pipeline run, handed to the completion callback.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadResult {
    pub url: String,
    pub content_type: String,
    pub byte_size: usize,
}

/// Optional correlation fields attached to the multipart upload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadMeta {
    pub character_id: Option<String>,
    pub draft_id: Option<String>,
}

/// Which product slot a generated image is destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratedImageKind {
    Avatar,
    Cover,
}

/// Server-side state of a generation job, as reported by the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Active,
    Completed,
    Failed,
}

impl JobState {
    /// A job never transitions out of a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Client-side record of one server-tracked generation job.
///
/// Created when a generation request is submitted and mutated only by the
/// poller; a new request always gets a fresh job rather than reusing one.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationJob {
    pub id: String,
    pub state: JobState,
    pub result_url: Option<String>,
    pub failure_reason: Option<String>,
    pub attempts_made: u32,
    pub started_at: DateTime<Utc>,
}

impl GenerationJob {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: JobState::Queued,
            result_url: None,
            failure_reason: None,
            attempts_made: 0,
            started_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_is_clamped_on_construction() {
        let spec = TransformSpec::new(
            100,
            100,
            100,
            OutputFormat::Jpeg,
            1.7,
            CropShape::Square,
            FitMode::Cover,
        );
        assert_eq!(spec.quality, 1.0);

        let spec = TransformSpec::new(
            100,
            100,
            100,
            OutputFormat::Jpeg,
            -0.2,
            CropShape::Square,
            FitMode::Cover,
        );
        assert_eq!(spec.quality, 0.0);
    }

    #[test]
    fn avatar_preset_is_square_webp() {
        let spec = TransformSpec::avatar();
        assert_eq!(spec.target_width, 256);
        assert_eq!(spec.target_height, 256);
        assert_eq!(spec.output_format, OutputFormat::Webp);
        assert_eq!(spec.shape, CropShape::Circle);
        assert_eq!(spec.fit_mode, FitMode::Cover);
    }

    #[test]
    fn job_states_parse_from_wire_strings() {
        let state: JobState = serde_json::from_str("\"active\"").unwrap();
        assert_eq!(state, JobState::Active);
        assert!(!state.is_terminal());
        let state: JobState = serde_json::from_str("\"completed\"").unwrap();
        assert!(state.is_terminal());
    }

    #[test]
    fn fresh_job_starts_queued_with_no_attempts() {
        let job = GenerationJob::new("job-1");
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.attempts_made, 0);
        assert!(job.result_url.is_none());
        assert!(job.failure_reason.is_none());
    }
}
