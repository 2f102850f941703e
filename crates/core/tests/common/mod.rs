//! Shared harness for engine integration tests.

pub mod mock_collaborators;

use mock_collaborators::MockSet;
use reel_core::checkpoint::{CheckpointStore, FsCheckpointStore};
use reel_core::collaborators::FsArtifactWriter;
use reel_core::config::EngineConfig;
use reel_core::engine::PipelineEngine;
use reel_core::governor::RateGovernor;
use reel_core::stages::{standard_set, StageContext};
use reel_protocol::{Event, ReviewDecision, RunState};
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// One assembled engine with the pieces tests assert against.
pub struct Harness {
    pub engine: Arc<PipelineEngine>,
    pub store: Arc<FsCheckpointStore>,
    pub dir: tempfile::TempDir,
}

impl Harness {
    /// Build an engine over `mocks` with a fresh artifact/checkpoint root.
    pub fn new(mocks: &MockSet, config: EngineConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self::rooted(mocks, config, dir)
    }

    /// Build an engine over an existing root, sharing its checkpoints.
    /// Used to model a process restart.
    pub fn rooted(mocks: &MockSet, config: EngineConfig, dir: tempfile::TempDir) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(FsCheckpointStore::new(dir.path()));
        let ctx = StageContext {
            collaborators: mocks.collaborators(),
            writer: Arc::new(FsArtifactWriter::new(dir.path())),
            governor: Arc::new(RateGovernor::new(config.limits.clone())),
            config,
        };
        let engine = Arc::new(PipelineEngine::new(
            standard_set(),
            Arc::clone(&store) as Arc<dyn CheckpointStore>,
            ctx,
        ));
        Self { engine, store, dir }
    }

    /// Run `state` to its next pause with no reviewer attached, collecting
    /// the emitted events.
    pub async fn run_unattended(
        &self,
        state: RunState,
    ) -> (
        Arc<Mutex<RunState>>,
        Result<(), reel_core::errors::EngineError>,
        Vec<Event>,
    ) {
        let shared = Arc::new(Mutex::new(state));
        let (events_tx, mut events_rx) = mpsc::channel(1024);
        let (review_tx, mut review_rx) = mpsc::channel(8);
        // No reviewer: a pending approval suspends instead of blocking.
        drop(review_tx);
        let abort = AtomicBool::new(false);

        let result = self
            .engine
            .run(Arc::clone(&shared), &mut review_rx, &abort, &events_tx)
            .await;

        drop(events_tx);
        let mut events = Vec::new();
        while let Some(event) = events_rx.recv().await {
            events.push(event);
        }
        (shared, result, events)
    }

    /// Run `state` with a scripted reviewer: each `AwaitingReview` event
    /// consumes the next decision from `decisions` (approving once the
    /// script runs out).
    pub async fn run_reviewed(
        &self,
        state: RunState,
        decisions: Vec<ReviewDecision>,
    ) -> (
        Arc<Mutex<RunState>>,
        Result<(), reel_core::errors::EngineError>,
        Vec<Event>,
    ) {
        let shared = Arc::new(Mutex::new(state));
        let (events_tx, mut events_rx) = mpsc::channel(1024);
        let (review_tx, mut review_rx) = mpsc::channel(8);
        let abort = AtomicBool::new(false);

        let engine = Arc::clone(&self.engine);
        let runner = {
            let shared = Arc::clone(&shared);
            tokio::spawn(
                async move { engine.run(shared, &mut review_rx, &abort, &events_tx).await },
            )
        };

        let mut decisions = decisions.into_iter();
        let mut events = Vec::new();
        while let Some(event) = events_rx.recv().await {
            let awaiting = matches!(event, Event::AwaitingReview { .. });
            events.push(event);
            if awaiting {
                let decision = decisions.next().unwrap_or(ReviewDecision::Approve);
                review_tx.send(decision).await.unwrap();
            }
        }
        let result = runner.await.unwrap();
        (shared, result, events)
    }
}

/// Default configuration with every approval gate switched off.
pub fn no_approval_config() -> EngineConfig {
    EngineConfig {
        stages: BTreeMap::new(),
        ..EngineConfig::default()
    }
}
