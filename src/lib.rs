//! # Media Pipeline
//!
//! Image acquisition and transformation for the uploader and AI-generation
//! flows of a character-roleplay platform.
//!
//! The pipeline accepts an image from one of three sources (local file,
//! remote URL via a sanitizing proxy, or a finished generation job),
//! normalizes it into a target geometry and encoding, and persists the
//! result:
//! - Source validation and decoding ([`SourceResolver`])
//! - Geometry fitting and WebP/JPEG encoding ([`ImageCodec`] / [`NativeCodec`])
//! - Generation-job tracking with bounded polling and cooperative
//!   cancellation ([`JobPoller`])
//! - Single-flight orchestration of one pick/crop/save interaction
//!   ([`UploadCoordinator`])
//! - The generation dialog lifecycle ([`GenerationStateMachine`])
//!
//! ## Concurrency model
//!
//! Each pipeline instance owns its state exclusively and runs cooperatively
//! on a single task; polls and pipeline stages are strictly sequential.
//! Cancellation is a checked flag, consulted before every scheduled poll.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use media_pipeline::{
//!     HttpMediaApi, ImageSource, TransformSpec, UploadCoordinator, UploadMeta,
//! };
//!
//! let api = HttpMediaApi::new("https://backend.example");
//! let coordinator = UploadCoordinator::new(api);
//! let result = coordinator
//!     .run_and_upload(
//!         ImageSource::RemoteUrl { url: picked_url },
//!         &TransformSpec::avatar(),
//!         &UploadMeta::default(),
//!     )
//!     .await?;
//! ```

pub mod api;
pub mod codec;
pub mod coordinator;
pub mod generation;
pub mod models;
pub mod poller;
pub mod source;

pub use api::{ApiError, GenerationRequest, HttpMediaApi, JobStatus, MediaApi, ProxiedImage};
pub use codec::{ImageCodec, NativeCodec, TransformError};
pub use coordinator::{PipelineError, PipelineStage, UploadCoordinator};
pub use generation::{DialogState, GenerationError, GenerationForm, GenerationStateMachine};
pub use models::{
    CropShape, DecodedImage, EncodedImage, FitMode, GeneratedImageKind, GenerationJob,
    ImageSource, JobState, OutputFormat, TransformSpec, UploadMeta, UploadResult,
};
pub use poller::{CancelFlag, JobPoller, PollConfig, TrackOutcome, TIMEOUT_REASON};
pub use source::{AcquisitionError, SourceResolver};
