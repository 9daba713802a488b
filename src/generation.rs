//! Drives the AI-generation dialog: form, generating, result.
//!
//! A submission optionally uploads a reference image first, starts a
//! generation job, tracks it with [`JobPoller`], and on completion runs the
//! result URL back through the upload pipeline so the persisted artifact is
//! ours rather than the generator's. Failures return the dialog to the form
//! so the user can adjust inputs and retry; closing the dialog cancels the
//! tracking cooperatively.

use std::sync::{Mutex, MutexGuard};

use crate::api::{ApiError, GenerationRequest, MediaApi};
use crate::codec::{ImageCodec, NativeCodec};
use crate::coordinator::{PipelineError, UploadCoordinator};
use crate::models::{
    GeneratedImageKind, ImageSource, JobState, TransformSpec, UploadMeta, UploadResult,
};
use crate::poller::{CancelFlag, JobPoller, PollConfig, TrackOutcome, TIMEOUT_REASON};

/// Lifecycle state of the generation dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogState {
    Form,
    Generating,
    Result,
}

/// Everything one submission carries.
#[derive(Debug, Clone)]
pub struct GenerationForm {
    pub prompt: Option<String>,
    /// Optional reference/sample image, uploaded before the job starts.
    pub reference_image: Option<ImageSource>,
    pub image_type: GeneratedImageKind,
    /// Transform applied both to the reference image and to the result.
    pub spec: TransformSpec,
    pub meta: UploadMeta,
}

/// Errors ending one submission.
#[derive(Debug)]
pub enum GenerationError {
    /// A submission is already running on this dialog.
    AlreadyGenerating,
    /// Reference upload or result persistence failed.
    Pipeline(PipelineError),
    /// The generation trigger itself failed.
    Api(ApiError),
    /// The job reached a failure, or the poller gave up on it.
    Job { reason: String, timed_out: bool },
    /// The dialog was closed while generating.
    Cancelled,
}

impl std::fmt::Display for GenerationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GenerationError::AlreadyGenerating => write!(f, "A generation is already running"),
            GenerationError::Pipeline(e) => write!(f, "Pipeline error: {}", e),
            GenerationError::Api(e) => write!(f, "Generation request failed: {}", e),
            GenerationError::Job { reason, timed_out } => {
                if *timed_out {
                    write!(f, "Generation timed out ({})", reason)
                } else {
                    write!(f, "Generation failed: {}", reason)
                }
            }
            GenerationError::Cancelled => write!(f, "Generation cancelled"),
        }
    }
}

impl std::error::Error for GenerationError {}

impl From<PipelineError> for GenerationError {
    fn from(err: PipelineError) -> Self {
        GenerationError::Pipeline(err)
    }
}

impl From<ApiError> for GenerationError {
    fn from(err: ApiError) -> Self {
        GenerationError::Api(err)
    }
}

impl GenerationError {
    pub fn user_message(&self) -> String {
        match self {
            GenerationError::AlreadyGenerating => "Please wait for the current image.".to_string(),
            GenerationError::Pipeline(e) => e.user_message(),
            GenerationError::Api(_) => "Could not start the generation.".to_string(),
            GenerationError::Job { reason, .. } => reason.clone(),
            GenerationError::Cancelled => String::new(),
        }
    }
}

/// The dialog's state machine, shared with the UI via interior mutability
/// so `close()` can run while a submission is awaited.
pub struct GenerationStateMachine<A, C = NativeCodec> {
    api: A,
    coordinator: UploadCoordinator<A, C>,
    poll: PollConfig,
    state: Mutex<DialogState>,
    cancel: Mutex<CancelFlag>,
}

impl<A: MediaApi + Clone> GenerationStateMachine<A> {
    pub fn new(api: A) -> Self {
        Self::with_codec(api, NativeCodec, PollConfig::default())
    }
}

impl<A: MediaApi + Clone, C: ImageCodec> GenerationStateMachine<A, C> {
    pub fn with_codec(api: A, codec: C, poll: PollConfig) -> Self {
        Self {
            coordinator: UploadCoordinator::with_codec(api.clone(), codec),
            api,
            poll,
            state: Mutex::new(DialogState::Form),
            cancel: Mutex::new(CancelFlag::new()),
        }
    }

    pub fn state(&self) -> DialogState {
        *lock(&self.state)
    }

    /// Close the dialog. Cancels any in-flight tracking and resets to the
    /// form; idempotent.
    pub fn close(&self) {
        lock(&self.cancel).cancel();
        *lock(&self.state) = DialogState::Form;
        log::debug!("Generation dialog closed");
    }

    /// Run one submission to completion. Valid from `Form` and, as the
    /// regenerate action, from `Result`.
    pub async fn submit(
        &self,
        form: GenerationForm,
        on_progress: impl FnMut(JobState),
    ) -> Result<UploadResult, GenerationError> {
        {
            let mut state = lock(&self.state);
            if *state == DialogState::Generating {
                return Err(GenerationError::AlreadyGenerating);
            }
            *state = DialogState::Generating;
        }

        // A fresh flag per submission; a stale cancel must not leak in.
        let cancel = CancelFlag::new();
        *lock(&self.cancel) = cancel.clone();

        let outcome = self.drive(form, &cancel, on_progress).await;
        *lock(&self.state) = match outcome {
            Ok(_) => DialogState::Result,
            Err(_) => DialogState::Form,
        };
        outcome
    }

    async fn drive(
        &self,
        form: GenerationForm,
        cancel: &CancelFlag,
        on_progress: impl FnMut(JobState),
    ) -> Result<UploadResult, GenerationError> {
        let reference_image_url = match form.reference_image {
            Some(source) => {
                let uploaded = self
                    .coordinator
                    .run_and_upload(source, &form.spec, &form.meta)
                    .await?;
                log::debug!("Reference image persisted at {}", uploaded.url);
                Some(uploaded.url)
            }
            None => None,
        };

        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }

        let request = GenerationRequest {
            prompt: form.prompt,
            reference_image_url,
            image_type: form.image_type,
        };
        let job_id = self.api.start_generation(&request).await?;

        let poller = JobPoller::new(self.api.clone(), self.poll);
        match poller.track(&job_id, cancel, on_progress).await {
            TrackOutcome::Completed(job) => {
                if cancel.is_cancelled() {
                    return Err(GenerationError::Cancelled);
                }
                let result_url = match job.result_url {
                    Some(url) => url,
                    None => {
                        return Err(GenerationError::Job {
                            reason: "generation failed".to_string(),
                            timed_out: false,
                        })
                    }
                };
                let artifact = self
                    .coordinator
                    .run_and_upload(
                        ImageSource::GeneratedResult {
                            job_id: job.id,
                            result_url,
                        },
                        &form.spec,
                        &form.meta,
                    )
                    .await?;
                // The dialog may have been closed while the persist upload
                // was in flight; its outcome must not surface then.
                if cancel.is_cancelled() {
                    return Err(GenerationError::Cancelled);
                }
                log::info!("Generated artifact persisted at {}", artifact.url);
                Ok(artifact)
            }
            TrackOutcome::Failed(job) => Err(GenerationError::Job {
                reason: job
                    .failure_reason
                    .unwrap_or_else(|| "generation failed".to_string()),
                timed_out: false,
            }),
            TrackOutcome::TimedOut(_) => Err(GenerationError::Job {
                reason: TIMEOUT_REASON.to_string(),
                timed_out: true,
            }),
            TrackOutcome::Abandoned => Err(GenerationError::Cancelled),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
