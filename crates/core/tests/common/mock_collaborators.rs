//! Scriptable collaborator doubles for integration tests.
//!
//! Each mock counts its calls so tests can assert which stages actually hit
//! the external APIs (and which were replayed from checkpoints).

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use reel_core::collaborators::{
    ClipHandle, CollaboratorError, Collaborators, ImageResult, LlmClient, SearchClient,
    SearchResult, TtsClient, VideoClient,
};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// LLM double: answers storyboard prompts with a JSON scene array and every
/// other prompt with a script of a fixed word count.
pub struct MockLlm {
    pub calls: AtomicU32,
    pub prompts: Mutex<Vec<String>>,
    script_words: usize,
    scene_count: usize,
    fail_remaining: AtomicU32,
    latency: Duration,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MockLlm {
    pub fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
            script_words: 250,
            scene_count: 3,
            fail_remaining: AtomicU32::new(0),
            latency: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Every script reply will have exactly this many words.
    pub fn with_script_words(mut self, words: usize) -> Self {
        self.script_words = words;
        self
    }

    pub fn with_scene_count(mut self, scenes: usize) -> Self {
        self.scene_count = scenes;
        self
    }

    /// The first `n` calls fail with a non-transient provider error.
    pub fn with_fail_first(mut self, n: u32) -> Self {
        self.fail_remaining = AtomicU32::new(n);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn storyboard_json(&self) -> String {
        let scenes: Vec<serde_json::Value> = (0..self.scene_count)
            .map(|i| {
                serde_json::json!({
                    "narration": format!("Narration for scene {i}."),
                    "visual_prompt": format!("visual direction {i}"),
                    "duration_secs": 4.0,
                })
            })
            .collect();
        serde_json::to_string(&scenes).unwrap()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn generate(&self, prompt: &str, _context: &str) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let remaining = self.fail_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(CollaboratorError::Provider("llm offline".to_string()));
        }

        if prompt.contains("Split the provided narration script") {
            Ok(self.storyboard_json())
        } else {
            Ok(vec!["word"; self.script_words].join(" "))
        }
    }
}

/// Search double returning deterministic, globally unique URLs.
pub struct MockSearch {
    pub searches: AtomicU32,
    pub image_searches: AtomicU32,
    counter: AtomicU32,
    results_per_query: usize,
    images_per_query: usize,
}

impl MockSearch {
    pub fn new() -> Self {
        Self {
            searches: AtomicU32::new(0),
            image_searches: AtomicU32::new(0),
            counter: AtomicU32::new(0),
            results_per_query: 3,
            images_per_query: 4,
        }
    }
}

#[async_trait]
impl SearchClient for MockSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, CollaboratorError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        Ok((0..self.results_per_query)
            .map(|i| {
                let id = self.counter.fetch_add(1, Ordering::SeqCst);
                SearchResult {
                    title: format!("Result {i} for {query}"),
                    url: format!("https://source.example/{id}"),
                    content: format!("Facts about {query}."),
                    score: Some(1.0 - i as f64 * 0.1),
                }
            })
            .collect())
    }

    async fn search_images(&self, query: &str) -> Result<Vec<ImageResult>, CollaboratorError> {
        self.image_searches.fetch_add(1, Ordering::SeqCst);
        Ok((0..self.images_per_query)
            .map(|_| {
                let id = self.counter.fetch_add(1, Ordering::SeqCst);
                ImageResult {
                    url: format!("https://images.example/{id}"),
                    description: format!("Image for {query}"),
                }
            })
            .collect())
    }
}

pub struct MockTts {
    pub calls: AtomicU32,
}

impl MockTts {
    pub fn new() -> Self {
        Self {
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl TtsClient for MockTts {
    async fn synthesize(&self, text: &str, _voice: &str) -> Result<Vec<u8>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(text.as_bytes().to_vec())
    }
}

pub struct MockVideo {
    pub generations: AtomicU32,
    pub downloads: AtomicU32,
    counter: AtomicU32,
}

impl MockVideo {
    pub fn new() -> Self {
        Self {
            generations: AtomicU32::new(0),
            downloads: AtomicU32::new(0),
            counter: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl VideoClient for MockVideo {
    async fn generate(
        &self,
        _prompt: &str,
        _duration_secs: f64,
        _resolution: &str,
    ) -> Result<ClipHandle, CollaboratorError> {
        self.generations.fetch_add(1, Ordering::SeqCst);
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(ClipHandle {
            retrieval_url: format!("https://clips.example/{id}"),
            expires_at: Utc::now() + ChronoDuration::hours(1),
        })
    }

    async fn download(&self, retrieval_url: &str) -> Result<Vec<u8>, CollaboratorError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(retrieval_url.as_bytes().to_vec())
    }
}

/// One bundle of mocks with the handles kept for assertions.
pub struct MockSet {
    pub llm: Arc<MockLlm>,
    pub search: Arc<MockSearch>,
    pub tts: Arc<MockTts>,
    pub video: Arc<MockVideo>,
}

impl MockSet {
    pub fn new() -> Self {
        Self::with_llm(MockLlm::new())
    }

    pub fn with_llm(llm: MockLlm) -> Self {
        Self {
            llm: Arc::new(llm),
            search: Arc::new(MockSearch::new()),
            tts: Arc::new(MockTts::new()),
            video: Arc::new(MockVideo::new()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            llm: Arc::clone(&self.llm) as _,
            search: Arc::clone(&self.search) as _,
            tts: Arc::clone(&self.tts) as _,
            video: Arc::clone(&self.video) as _,
        }
    }
}
