//! External collaborator contracts.
//!
//! The core never talks to a provider directly; it calls these traits and
//! lets the composition root decide which adapters to plug in. Mock
//! implementations live in the test tree. Transient failures (rate limits,
//! timeouts) are retried with backoff by the stages before they surface to
//! the engine as external call failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Failure kinds shared by all collaborators.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    /// The provider throttled the call. Transient.
    #[error("rate limited by provider")]
    RateLimited,

    /// The provider rejected or failed the call.
    #[error("provider error: {0}")]
    Provider(String),

    /// The call exceeded its deadline. Transient.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl CollaboratorError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CollaboratorError::RateLimited | CollaboratorError::Timeout(_)
        )
    }
}

/// One result from the search collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub content: String,
    pub score: Option<f64>,
}

/// One result from an image search.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageResult {
    pub url: String,
    pub description: String,
}

/// A freshly generated video clip. The retrieval URL is time-limited and
/// must be consumed before `expires_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipHandle {
    pub retrieval_url: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, prompt: &str, context: &str) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, CollaboratorError>;

    async fn search_images(&self, query: &str) -> Result<Vec<ImageResult>, CollaboratorError>;
}

#[async_trait]
pub trait TtsClient: Send + Sync {
    /// Synthesize one narration chunk. Chunking long text is the caller's
    /// responsibility; stages submit per-scene narration.
    async fn synthesize(&self, text: &str, voice: &str) -> Result<Vec<u8>, CollaboratorError>;
}

#[async_trait]
pub trait VideoClient: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        duration_secs: f64,
        resolution: &str,
    ) -> Result<ClipHandle, CollaboratorError>;

    /// Fetch the clip bytes behind a retrieval URL before it expires.
    async fn download(&self, retrieval_url: &str) -> Result<Vec<u8>, CollaboratorError>;
}

/// The full collaborator bundle handed to stages.
#[derive(Clone)]
pub struct Collaborators {
    pub llm: Arc<dyn LlmClient>,
    pub search: Arc<dyn SearchClient>,
    pub tts: Arc<dyn TtsClient>,
    pub video: Arc<dyn VideoClient>,
}

/// Errors from the artifact writer.
#[derive(Error, Debug)]
pub enum WriterError {
    #[error("failed to write artifact at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Persists artifacts under a run-scoped directory.
///
/// The core depends only on "write succeeded / failed", not on the storage
/// medium.
#[async_trait]
pub trait ArtifactWriter: Send + Sync {
    /// Write `bytes` at `rel_path` inside the run's directory, returning the
    /// path as recorded in artifacts.
    async fn write(
        &self,
        run_id: Uuid,
        rel_path: &str,
        bytes: &[u8],
    ) -> Result<String, WriterError>;
}

/// Filesystem-backed artifact writer rooted at `<base>/<run_id>/`.
pub struct FsArtifactWriter {
    base: PathBuf,
}

impl FsArtifactWriter {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

#[async_trait]
impl ArtifactWriter for FsArtifactWriter {
    async fn write(
        &self,
        run_id: Uuid,
        rel_path: &str,
        bytes: &[u8],
    ) -> Result<String, WriterError> {
        let path = self.base.join(run_id.to_string()).join(rel_path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| WriterError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&path, bytes).map_err(|source| WriterError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(rel_path.to_string())
    }
}

struct Unconfigured(&'static str);

#[async_trait]
impl LlmClient for Unconfigured {
    async fn generate(&self, _prompt: &str, _context: &str) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::Provider(format!(
            "no {} provider configured",
            self.0
        )))
    }
}

#[async_trait]
impl SearchClient for Unconfigured {
    async fn search(&self, _query: &str) -> Result<Vec<SearchResult>, CollaboratorError> {
        Err(CollaboratorError::Provider(format!(
            "no {} provider configured",
            self.0
        )))
    }

    async fn search_images(&self, _query: &str) -> Result<Vec<ImageResult>, CollaboratorError> {
        Err(CollaboratorError::Provider(format!(
            "no {} provider configured",
            self.0
        )))
    }
}

#[async_trait]
impl TtsClient for Unconfigured {
    async fn synthesize(&self, _text: &str, _voice: &str) -> Result<Vec<u8>, CollaboratorError> {
        Err(CollaboratorError::Provider(format!(
            "no {} provider configured",
            self.0
        )))
    }
}

#[async_trait]
impl VideoClient for Unconfigured {
    async fn generate(
        &self,
        _prompt: &str,
        _duration_secs: f64,
        _resolution: &str,
    ) -> Result<ClipHandle, CollaboratorError> {
        Err(CollaboratorError::Provider(format!(
            "no {} provider configured",
            self.0
        )))
    }

    async fn download(&self, _retrieval_url: &str) -> Result<Vec<u8>, CollaboratorError> {
        Err(CollaboratorError::Provider(format!(
            "no {} provider configured",
            self.0
        )))
    }
}

impl Collaborators {
    /// A bundle whose every call fails with a provider error.
    ///
    /// This is the seam where the composition root plugs in real adapters;
    /// starting a run against it records an external call failure at the
    /// first stage rather than panicking.
    pub fn unconfigured() -> Self {
        Self {
            llm: Arc::new(Unconfigured("llm")),
            search: Arc::new(Unconfigured("search")),
            tts: Arc::new(Unconfigured("tts")),
            video: Arc::new(Unconfigured("video")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(CollaboratorError::RateLimited.is_transient());
        assert!(CollaboratorError::Timeout(Duration::from_secs(30)).is_transient());
        assert!(!CollaboratorError::Provider("boom".to_string()).is_transient());
    }

    #[tokio::test]
    async fn fs_writer_is_run_scoped() {
        let dir = tempfile::tempdir().unwrap();
        let writer = FsArtifactWriter::new(dir.path());
        let run_id = Uuid::new_v4();

        let recorded = writer
            .write(run_id, "audio/scene-0.mp3", b"bytes")
            .await
            .unwrap();
        assert_eq!(recorded, "audio/scene-0.mp3");

        let on_disk = dir.path().join(run_id.to_string()).join("audio/scene-0.mp3");
        assert_eq!(std::fs::read(on_disk).unwrap(), b"bytes");
    }

    #[tokio::test]
    async fn unconfigured_bundle_fails_with_provider_error() {
        let collaborators = Collaborators::unconfigured();
        let err = collaborators.llm.generate("p", "c").await.unwrap_err();
        assert!(matches!(err, CollaboratorError::Provider(_)));
    }
}
