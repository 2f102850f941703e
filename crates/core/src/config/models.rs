//! Configuration models.
//!
//! `EngineConfig` aggregates every tunable the engine reads: per-stage retry
//! budgets and approval flags, validator bounds, backoff shape, per-API
//! governor limits, and output layout. All fields carry serde defaults so a
//! partial `config.toml` only overrides what it names.

use crate::governor::ApiLimits;
use reel_protocol::StageKind;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Per-stage execution settings.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct StageSettings {
    /// Validation-gate retry budget for the stage.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Whether the stage's artifact must be approved by a human before the
    /// engine advances.
    #[serde(default)]
    pub require_approval: bool,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            require_approval: false,
        }
    }
}

/// Validator bounds applied by the stage gates.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ValidationConfig {
    /// Inclusive lower bound on script word count.
    #[serde(default = "default_script_min_words")]
    pub script_min_words: usize,

    /// Inclusive upper bound on script word count.
    #[serde(default = "default_script_max_words")]
    pub script_max_words: usize,

    /// Minimum number of storyboard scenes.
    #[serde(default = "default_min_scenes")]
    pub min_scenes: usize,

    /// Minimum number of collected images across all scenes.
    #[serde(default = "default_min_images")]
    pub min_images: usize,

    /// If set, the best research source must score at least this highly
    /// (provider relevance scores are in `0.0..=1.0`).
    #[serde(default)]
    pub research_min_score: Option<f64>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            script_min_words: default_script_min_words(),
            script_max_words: default_script_max_words(),
            min_scenes: default_min_scenes(),
            min_images: default_min_images(),
            research_min_score: None,
        }
    }
}

/// Exponential backoff shape shared by validation retries and transient
/// collaborator retries.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct BackoffPolicy {
    #[serde(default = "default_backoff_base_ms")]
    pub base_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,

    #[serde(default = "default_backoff_max_ms")]
    pub max_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: default_backoff_base_ms(),
            multiplier: default_backoff_multiplier(),
            max_ms: default_backoff_max_ms(),
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next attempt after `attempts_used` failures.
    ///
    /// The first retry waits `base_ms`, each further retry multiplies the
    /// delay, capped at `max_ms`.
    pub fn delay(&self, attempts_used: u32) -> Duration {
        let exponent = attempts_used.saturating_sub(1);
        let scaled = self.base_ms as f64 * self.multiplier.powi(exponent as i32);
        let capped = scaled.min(self.max_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Unified engine configuration loaded from `.reelsmith/config.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root directory for run-scoped artifacts and checkpoints.
    pub output_dir: PathBuf,

    /// Per-stage overrides; stages not listed use `StageSettings::default()`
    /// plus the built-in approval defaults.
    pub stages: BTreeMap<StageKind, StageSettings>,

    pub validation: ValidationConfig,

    pub backoff: BackoffPolicy,

    /// Governor limits per API name (`llm`, `search`, `tts`, `video`).
    pub limits: BTreeMap<String, ApiLimits>,

    /// Voice handed to the TTS collaborator.
    pub tts_voice: String,

    /// Resolution handed to the video collaborator.
    pub video_resolution: String,

    /// How many times a transient collaborator failure (rate limit, timeout)
    /// is retried before surfacing as an external call failure.
    pub transient_attempts: u32,

    /// How long terminal background tasks are retained before a sweep
    /// collects them.
    pub task_retention_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut stages = BTreeMap::new();
        stages.insert(
            StageKind::SynthesizeScript,
            StageSettings {
                max_retries: 3,
                require_approval: true,
            },
        );
        stages.insert(
            StageKind::Storyboard,
            StageSettings {
                max_retries: 2,
                require_approval: true,
            },
        );
        stages.insert(
            StageKind::CollectImages,
            StageSettings {
                max_retries: 2,
                require_approval: false,
            },
        );

        Self {
            output_dir: PathBuf::from("output"),
            stages,
            validation: ValidationConfig::default(),
            backoff: BackoffPolicy::default(),
            limits: default_limits(),
            tts_voice: "alloy".to_string(),
            video_resolution: "1280x720".to_string(),
            transient_attempts: 3,
            task_retention_secs: 900,
        }
    }
}

impl EngineConfig {
    /// Effective settings for `stage`.
    pub fn stage(&self, stage: StageKind) -> StageSettings {
        self.stages.get(&stage).copied().unwrap_or_default()
    }

    /// Retention window for terminal background tasks.
    pub fn task_retention(&self) -> Duration {
        Duration::from_secs(self.task_retention_secs)
    }

    /// Cross-field consistency checks the TOML schema cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.validation.script_min_words >= self.validation.script_max_words {
            return Err(format!(
                "script_min_words ({}) must be less than script_max_words ({})",
                self.validation.script_min_words, self.validation.script_max_words
            ));
        }
        if self.backoff.multiplier < 1.0 {
            return Err(format!(
                "backoff multiplier ({}) must be at least 1.0",
                self.backoff.multiplier
            ));
        }
        if self.transient_attempts == 0 {
            return Err("transient_attempts must be at least 1".to_string());
        }
        if let Some(min) = self.validation.research_min_score {
            if !(0.0..=1.0).contains(&min) {
                return Err(format!(
                    "research_min_score ({min}) must be within 0.0..=1.0"
                ));
            }
        }
        for (api, limits) in &self.limits {
            if limits.max_concurrent == 0 || limits.max_per_minute == 0 {
                return Err(format!("limits for api '{api}' must be non-zero"));
            }
        }
        Ok(())
    }
}

fn default_limits() -> BTreeMap<String, ApiLimits> {
    let mut limits = BTreeMap::new();
    limits.insert(
        "llm".to_string(),
        ApiLimits {
            max_concurrent: 10,
            max_per_minute: 500,
        },
    );
    limits.insert(
        "search".to_string(),
        ApiLimits {
            max_concurrent: 5,
            max_per_minute: 100,
        },
    );
    limits.insert(
        "tts".to_string(),
        ApiLimits {
            max_concurrent: 4,
            max_per_minute: 100,
        },
    );
    limits.insert(
        "video".to_string(),
        ApiLimits {
            max_concurrent: 2,
            max_per_minute: 20,
        },
    );
    limits
}

fn default_max_retries() -> u32 {
    3
}

fn default_script_min_words() -> usize {
    200
}

fn default_script_max_words() -> usize {
    500
}

fn default_min_scenes() -> usize {
    3
}

fn default_min_images() -> usize {
    10
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_backoff_max_ms() -> u64 {
    30_000
}
