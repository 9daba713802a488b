//! Fixed HTTP contracts of the media backend.
//!
//! The pipeline talks to four endpoints: the sanitizing image proxy, the
//! multipart upload endpoint, the generation trigger and the job-status
//! endpoint. They are modeled as the [`MediaApi`] trait so the orchestration
//! code stays transport-agnostic; [`HttpMediaApi`] is the reqwest-backed
//! implementation used in production.

use serde::{Deserialize, Serialize};

use crate::models::{EncodedImage, GeneratedImageKind, JobState, UploadMeta, UploadResult};

/// Errors that can occur talking to the media backend.
#[derive(Debug)]
pub enum ApiError {
    /// Transport-level failure (connect, TLS, body read).
    Http(reqwest::Error),
    /// Non-success HTTP status from the backend.
    Server(u16),
    /// Response body did not match the expected shape.
    Decode(String),
    /// Anything else (also used by test doubles).
    Other(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Http(e) => write!(f, "HTTP error: {}", e),
            ApiError::Server(code) => write!(f, "Server returned status {}", code),
            ApiError::Decode(msg) => write!(f, "Decode error: {}", msg),
            ApiError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        ApiError::Http(err)
    }
}

/// Binary body returned by the sanitizing proxy, with the content type the
/// proxy sniffed for it.
#[derive(Debug, Clone)]
pub struct ProxiedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Request body for the generation trigger endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference_image_url: Option<String>,
    pub image_type: GeneratedImageKind,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerationStarted {
    job_id: String,
}

/// One observation from the job-status endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub state: JobState,
    #[serde(default)]
    pub result: Option<JobResult>,
    #[serde(default)]
    pub failed_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub image_url: String,
}

#[derive(Debug, Clone, Deserialize)]
struct UploadResponse {
    url: String,
}

/// The four backend operations the pipeline depends on.
///
/// Methods take `&self` and the futures are not required to be `Send`: each
/// pipeline instance owns its state exclusively and runs on a cooperative
/// single-task model.
#[allow(async_fn_in_trait)]
pub trait MediaApi {
    /// `GET /media/proxy?url=<url>` — fetch a remote image through the
    /// sanitizing proxy. Never fetches the origin directly.
    async fn fetch_proxied(&self, url: &str) -> Result<ProxiedImage, ApiError>;

    /// Multipart upload of an encoded image, with optional correlation
    /// fields. Returns the persisted artifact.
    async fn upload_image(
        &self,
        image: &EncodedImage,
        meta: &UploadMeta,
    ) -> Result<UploadResult, ApiError>;

    /// Submit a generation request; returns the opaque job id.
    async fn start_generation(&self, request: &GenerationRequest) -> Result<String, ApiError>;

    /// `GET` the current status of a generation job.
    async fn job_status(&self, job_id: &str) -> Result<JobStatus, ApiError>;
}

/// reqwest-backed [`MediaApi`] rooted at a backend base URL.
#[derive(Debug, Clone)]
pub struct HttpMediaApi {
    http: reqwest::Client,
    base_url: String,
}

impl HttpMediaApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/webp" => "webp",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        _ => "bin",
    }
}

impl MediaApi for HttpMediaApi {
    async fn fetch_proxied(&self, url: &str) -> Result<ProxiedImage, ApiError> {
        log::debug!("Proxy fetch for {}", url);
        let response = self
            .http
            .get(self.endpoint("/media/proxy"))
            .query(&[("url", url)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ApiError::Server(response.status().as_u16()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = response.bytes().await?.to_vec();

        Ok(ProxiedImage {
            bytes,
            content_type,
        })
    }

    async fn upload_image(
        &self,
        image: &EncodedImage,
        meta: &UploadMeta,
    ) -> Result<UploadResult, ApiError> {
        let file_name = format!(
            "{}.{}",
            uuid::Uuid::new_v4(),
            extension_for(image.content_type)
        );

        let part = reqwest::multipart::Part::bytes(image.bytes.clone())
            .file_name(file_name)
            .mime_str(image.content_type)?;
        let mut form = reqwest::multipart::Form::new().part("file", part);
        if let Some(character_id) = &meta.character_id {
            form = form.text("characterId", character_id.clone());
        }
        if let Some(draft_id) = &meta.draft_id {
            form = form.text("draftId", draft_id.clone());
        }

        let response = self
            .http
            .post(self.endpoint("/media/upload"))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ApiError::Server(response.status().as_u16()));
        }

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(format!("Upload response: {}", e)))?;

        log::info!("Uploaded {} bytes to {}", image.byte_size(), body.url);

        Ok(UploadResult {
            url: body.url,
            content_type: image.content_type.to_string(),
            byte_size: image.byte_size(),
        })
    }

    async fn start_generation(&self, request: &GenerationRequest) -> Result<String, ApiError> {
        let response = self
            .http
            .post(self.endpoint("/media/generation"))
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ApiError::Server(response.status().as_u16()));
        }

        let body: GenerationStarted = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(format!("Generation response: {}", e)))?;

        log::info!("Generation job started: {}", body.job_id);
        Ok(body.job_id)
    }

    async fn job_status(&self, job_id: &str) -> Result<JobStatus, ApiError> {
        let response = self
            .http
            .get(self.endpoint(&format!("/media/generation/{}", job_id)))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ApiError::Server(response.status().as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::Decode(format!("Status response: {}", e)))
    }
}

/// Scripted in-memory backend shared by the crate's tests.
#[cfg(test)]
pub(crate) mod mock {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use tokio::sync::Notify;

    use super::*;

    #[derive(Default)]
    struct Inner {
        fetch_calls: AtomicUsize,
        upload_calls: AtomicUsize,
        start_calls: AtomicUsize,
        status_calls: AtomicUsize,
        fetched_urls: Mutex<Vec<String>>,
        fetch_body: Mutex<Option<(Vec<u8>, String)>>,
        statuses: Mutex<VecDeque<JobStatus>>,
        generation_requests: Mutex<Vec<GenerationRequest>>,
        job_id: Mutex<String>,
        upload_url: Mutex<String>,
        fail_uploads: AtomicBool,
        upload_gate: Mutex<Option<Arc<Notify>>>,
    }

    /// A [`MediaApi`] double whose responses are queued up front and whose
    /// per-endpoint call counts are observable.
    #[derive(Clone, Default)]
    pub(crate) struct ScriptedApi {
        inner: Arc<Inner>,
    }

    impl ScriptedApi {
        pub(crate) fn new() -> Self {
            let api = Self::default();
            *api.inner.job_id.lock().unwrap() = "job-1".to_string();
            *api.inner.upload_url.lock().unwrap() = "https://cdn.example/stored.webp".to_string();
            api
        }

        /// Script the proxy to serve these bytes with this content type.
        pub(crate) fn serve_fetch(&self, bytes: Vec<u8>, content_type: &str) {
            *self.inner.fetch_body.lock().unwrap() = Some((bytes, content_type.to_string()));
        }

        /// Queue one job-status observation; once the queue is drained the
        /// last queued status repeats (a job that "never finishes" is a
        /// single queued `active`).
        pub(crate) fn push_status(&self, status: JobStatus) {
            self.inner.statuses.lock().unwrap().push_back(status);
        }

        pub(crate) fn fail_uploads(&self) {
            self.inner.fail_uploads.store(true, Ordering::SeqCst);
        }

        /// Make every upload wait on `gate` before resolving, so tests can
        /// hold a persist call in flight.
        pub(crate) fn gate_uploads(&self, gate: Arc<Notify>) {
            *self.inner.upload_gate.lock().unwrap() = Some(gate);
        }

        pub(crate) fn fetch_calls(&self) -> usize {
            self.inner.fetch_calls.load(Ordering::SeqCst)
        }

        pub(crate) fn upload_calls(&self) -> usize {
            self.inner.upload_calls.load(Ordering::SeqCst)
        }

        pub(crate) fn status_calls(&self) -> usize {
            self.inner.status_calls.load(Ordering::SeqCst)
        }

        pub(crate) fn start_calls(&self) -> usize {
            self.inner.start_calls.load(Ordering::SeqCst)
        }

        pub(crate) fn fetched_urls(&self) -> Vec<String> {
            self.inner.fetched_urls.lock().unwrap().clone()
        }

        pub(crate) fn generation_requests(&self) -> Vec<GenerationRequest> {
            self.inner.generation_requests.lock().unwrap().clone()
        }
    }

    impl MediaApi for ScriptedApi {
        async fn fetch_proxied(&self, url: &str) -> Result<ProxiedImage, ApiError> {
            self.inner.fetch_calls.fetch_add(1, Ordering::SeqCst);
            self.inner
                .fetched_urls
                .lock()
                .unwrap()
                .push(url.to_string());
            match self.inner.fetch_body.lock().unwrap().clone() {
                Some((bytes, content_type)) => Ok(ProxiedImage {
                    bytes,
                    content_type,
                }),
                None => Err(ApiError::Other("no fetch scripted".to_string())),
            }
        }

        async fn upload_image(
            &self,
            image: &EncodedImage,
            _meta: &UploadMeta,
        ) -> Result<UploadResult, ApiError> {
            self.inner.upload_calls.fetch_add(1, Ordering::SeqCst);
            let gate = self.inner.upload_gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if self.inner.fail_uploads.load(Ordering::SeqCst) {
                return Err(ApiError::Server(500));
            }
            Ok(UploadResult {
                url: self.inner.upload_url.lock().unwrap().clone(),
                content_type: image.content_type.to_string(),
                byte_size: image.byte_size(),
            })
        }

        async fn start_generation(&self, request: &GenerationRequest) -> Result<String, ApiError> {
            self.inner.start_calls.fetch_add(1, Ordering::SeqCst);
            self.inner
                .generation_requests
                .lock()
                .unwrap()
                .push(request.clone());
            Ok(self.inner.job_id.lock().unwrap().clone())
        }

        async fn job_status(&self, _job_id: &str) -> Result<JobStatus, ApiError> {
            self.inner.status_calls.fetch_add(1, Ordering::SeqCst);
            let mut statuses = self.inner.statuses.lock().unwrap();
            if statuses.len() > 1 {
                Ok(statuses.pop_front().expect("non-empty queue"))
            } else {
                statuses
                    .front()
                    .cloned()
                    .ok_or_else(|| ApiError::Other("no status scripted".to_string()))
            }
        }
    }

    pub(crate) fn status(state: JobState) -> JobStatus {
        JobStatus {
            state,
            result: None,
            failed_reason: None,
        }
    }

    pub(crate) fn completed_status(image_url: &str) -> JobStatus {
        JobStatus {
            state: JobState::Completed,
            result: Some(JobResult {
                image_url: image_url.to_string(),
            }),
            failed_reason: None,
        }
    }

    pub(crate) fn failed_status(reason: Option<&str>) -> JobStatus {
        JobStatus {
            state: JobState::Failed,
            result: None,
            failed_reason: reason.map(|r| r.to_string()),
        }
    }

    /// A tiny valid PNG for feeding the decoder in tests.
    pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
        use image::{DynamicImage, ImageFormat, RgbImage};
        use std::io::Cursor;

        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            image::Rgb([120, 80, 200]),
        ));
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageFormat::Png)
            .expect("encode sample png");
        buffer.into_inner()
    }
}
