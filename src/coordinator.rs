//! Sequences one "pick → transform → persist" interaction.
//!
//! A coordinator instance allows at most one in-flight run; a second call
//! fails fast instead of racing. The whole run is one atomic attempt: the
//! first stage failure aborts the rest, nothing is retried.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::api::{ApiError, MediaApi};
use crate::codec::{ImageCodec, NativeCodec, TransformError};
use crate::models::{EncodedImage, ImageSource, TransformSpec, UploadMeta, UploadResult};
use crate::source::{AcquisitionError, SourceResolver};

/// Which pipeline stage a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Acquire,
    Transform,
    Persist,
}

/// Aggregated failure of one pipeline run.
#[derive(Debug)]
pub enum PipelineError {
    /// A run is already in flight on this coordinator.
    AlreadyInProgress,
    /// A stage failed; the run was aborted at that point.
    Stage {
        stage: PipelineStage,
        message: String,
    },
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::AlreadyInProgress => write!(f, "An upload is already in progress"),
            PipelineError::Stage { stage, message } => {
                write!(f, "Pipeline failed at {:?}: {}", stage, message)
            }
        }
    }
}

impl std::error::Error for PipelineError {}

impl From<AcquisitionError> for PipelineError {
    fn from(err: AcquisitionError) -> Self {
        PipelineError::Stage {
            stage: PipelineStage::Acquire,
            message: err.to_string(),
        }
    }
}

impl From<TransformError> for PipelineError {
    fn from(err: TransformError) -> Self {
        PipelineError::Stage {
            stage: PipelineStage::Transform,
            message: err.to_string(),
        }
    }
}

impl PipelineError {
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::AlreadyInProgress => "Please wait for the current upload.".to_string(),
            PipelineError::Stage {
                stage: PipelineStage::Acquire,
                ..
            } => "Could not load this image. Please try a different file or URL.".to_string(),
            PipelineError::Stage { .. } => "Upload failed. Please try again.".to_string(),
        }
    }
}

/// Resets the in-flight flag on every exit path of a run.
struct InFlightReset<'a>(&'a AtomicBool);

impl Drop for InFlightReset<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Orchestrates resolver → codec → persistence for a single uploader.
pub struct UploadCoordinator<A, C = NativeCodec> {
    api: A,
    resolver: SourceResolver<A>,
    codec: C,
    in_flight: AtomicBool,
}

impl<A: MediaApi + Clone> UploadCoordinator<A> {
    pub fn new(api: A) -> Self {
        Self::with_codec(api, NativeCodec)
    }
}

impl<A: MediaApi + Clone, C: ImageCodec> UploadCoordinator<A, C> {
    pub fn with_codec(api: A, codec: C) -> Self {
        Self {
            resolver: SourceResolver::new(api.clone()),
            api,
            codec,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Run the full pipeline with an injected persistence step.
    pub async fn run<F, Fut>(
        &self,
        source: ImageSource,
        spec: &TransformSpec,
        persist: F,
    ) -> Result<UploadResult, PipelineError>
    where
        F: FnOnce(EncodedImage) -> Fut,
        Fut: Future<Output = Result<UploadResult, ApiError>>,
    {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            log::debug!("Rejecting pipeline run: another is in flight");
            return Err(PipelineError::AlreadyInProgress);
        }
        let _reset = InFlightReset(&self.in_flight);

        let decoded = self.resolver.resolve(source).await?;
        let encoded = self.codec.encode(&decoded, spec)?;
        let result = persist(encoded).await.map_err(|e| PipelineError::Stage {
            stage: PipelineStage::Persist,
            message: e.to_string(),
        })?;

        log::info!(
            "Pipeline run persisted {} ({} bytes)",
            result.url,
            result.byte_size
        );
        Ok(result)
    }

    /// [`run`](Self::run) with persistence bound to the multipart upload
    /// endpoint, carrying the optional correlation fields.
    pub async fn run_and_upload(
        &self,
        source: ImageSource,
        spec: &TransformSpec,
        meta: &UploadMeta,
    ) -> Result<UploadResult, PipelineError> {
        let api = &self.api;
        self.run(source, spec, |encoded| async move {
            api.upload_image(&encoded, meta).await
        })
        .await
    }
}
