//! Turns an [`ImageSource`] into a decoded image ready for the codec.
//!
//! Validation is per variant: local files are gated on the declared content
//! type, remote URLs on their scheme (checked before any network I/O) and on
//! the content type the proxy reports. Network failures stay distinct from
//! decode failures so the UI can word them differently.

use crate::api::{ApiError, MediaApi};
use crate::models::{DecodedImage, ImageSource};

/// Upper bound on either decoded dimension. Larger images are rejected as
/// hostile input before any pixel work happens.
const MAX_DECODE_DIMENSION: u32 = 16_384;

/// Errors while acquiring and decoding a source image.
#[derive(Debug)]
pub enum AcquisitionError {
    /// URL scheme is not http/https, or the URL is empty.
    InvalidUrl(String),
    /// Declared content type of a local file is not an image type.
    InvalidType(String),
    /// Bytes arrived but are not a decodable image.
    NotAnImage(String),
    /// The proxy fetch itself failed.
    NetworkFailure(String),
}

impl std::fmt::Display for AcquisitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AcquisitionError::InvalidUrl(url) => write!(f, "Invalid image URL: {}", url),
            AcquisitionError::InvalidType(ty) => write!(f, "Not an image content type: {}", ty),
            AcquisitionError::NotAnImage(msg) => write!(f, "Not a decodable image: {}", msg),
            AcquisitionError::NetworkFailure(msg) => write!(f, "Image fetch failed: {}", msg),
        }
    }
}

impl std::error::Error for AcquisitionError {}

impl From<ApiError> for AcquisitionError {
    fn from(err: ApiError) -> Self {
        AcquisitionError::NetworkFailure(err.to_string())
    }
}

impl AcquisitionError {
    /// User-facing copy; acquisition failures are always recoverable by
    /// retrying with different input.
    pub fn user_message(&self) -> String {
        "Could not load this image. Please try a different file or URL.".to_string()
    }
}

/// Resolves the three source variants into a [`DecodedImage`].
pub struct SourceResolver<A> {
    api: A,
}

impl<A: MediaApi> SourceResolver<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    /// Resolve one source. No bytes are cached beyond this call.
    pub async fn resolve(&self, source: ImageSource) -> Result<DecodedImage, AcquisitionError> {
        match source {
            ImageSource::LocalFile {
                bytes,
                declared_type,
            } => {
                if !declared_type.starts_with("image/") {
                    log::warn!("Rejected local file with declared type {}", declared_type);
                    return Err(AcquisitionError::InvalidType(declared_type));
                }
                decode_bytes(&bytes)
            }
            ImageSource::RemoteUrl { url } => self.resolve_remote(&url).await,
            ImageSource::GeneratedResult { job_id, result_url } => {
                if result_url.trim().is_empty() {
                    return Err(AcquisitionError::InvalidUrl(format!(
                        "empty result URL for job {}",
                        job_id
                    )));
                }
                log::debug!("Resolving result of job {} from {}", job_id, result_url);
                self.resolve_remote(&result_url).await
            }
        }
    }

    async fn resolve_remote(&self, url: &str) -> Result<DecodedImage, AcquisitionError> {
        // Scheme check happens before any network call is issued.
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(AcquisitionError::InvalidUrl(url.to_string()));
        }

        let fetched = self.api.fetch_proxied(url).await?;
        if !fetched.content_type.starts_with("image/") {
            log::warn!(
                "Proxy returned non-image content type {} for {}",
                fetched.content_type,
                url
            );
            return Err(AcquisitionError::NotAnImage(fetched.content_type));
        }

        decode_bytes(&fetched.bytes)
    }
}

fn decode_bytes(bytes: &[u8]) -> Result<DecodedImage, AcquisitionError> {
    let pixels = image::load_from_memory(bytes)
        .map_err(|e| AcquisitionError::NotAnImage(e.to_string()))?;

    let (width, height) = (pixels.width(), pixels.height());
    if width == 0 || height == 0 {
        return Err(AcquisitionError::NotAnImage("image has no pixels".to_string()));
    }
    if width > MAX_DECODE_DIMENSION || height > MAX_DECODE_DIMENSION {
        return Err(AcquisitionError::NotAnImage(format!(
            "image dimensions {}x{} exceed the {}px limit",
            width, height, MAX_DECODE_DIMENSION
        )));
    }

    log::debug!("Decoded source image {}x{}", width, height);
    Ok(DecodedImage::new(pixels))
}
