//! Crash recovery: resuming runs from their latest checkpoint.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::mock_collaborators::{MockLlm, MockSet};
use common::{no_approval_config, Harness};
use reel_core::checkpoint::CheckpointStore;
use reel_core::config::EngineConfig;
use reel_protocol::{
    Event, ResearchSource, ReviewDecision, RunState, RunStatus, Scene, StageArtifact, StageKind,
    VideoClip,
};
use std::sync::atomic::Ordering;

#[tokio::test]
async fn resume_after_outage_replays_completed_stages() {
    // First process: the LLM is down, the run halts at script synthesis.
    let failing = MockSet::with_llm(MockLlm::new().with_fail_first(u32::MAX));
    let harness = Harness::new(&failing, no_approval_config());

    let (shared, result, _events) = harness.run_unattended(RunState::new("ocean currents")).await;
    assert!(result.is_err());
    let run_id = shared.lock().await.run_id;
    assert_eq!(failing.search.searches.load(Ordering::SeqCst), 3);
    drop(shared);

    // Second process over the same checkpoint root, provider recovered.
    let healthy = MockSet::new();
    let harness = Harness::rooted(&healthy, no_approval_config(), harness.dir);
    let resumed = harness.store.load_latest(run_id).await.unwrap().unwrap();
    assert_eq!(resumed.status, RunStatus::Error);
    assert_eq!(resumed.current_stage, StageKind::SynthesizeScript);

    let (shared, result, events) = harness.run_unattended(resumed).await;
    result.unwrap();

    assert_eq!(shared.lock().await.status, RunStatus::Complete);
    // The run picked up at the failed stage; research came back from the
    // checkpoint, not from the API.
    assert_eq!(healthy.search.searches.load(Ordering::SeqCst), 0);
    assert!(!events.iter().any(|e| matches!(
        e,
        Event::StageStarted {
            stage: StageKind::Research,
            ..
        }
    )));
}

#[tokio::test]
async fn suspended_review_resumes_into_the_same_review() {
    let mocks = MockSet::new();
    let harness = Harness::new(&mocks, EngineConfig::default());

    // No reviewer attached: the run suspends at the script approval gate.
    let (shared, result, events) = harness.run_unattended(RunState::new("ocean currents")).await;
    result.unwrap();
    let run_id = shared.lock().await.run_id;
    assert_eq!(shared.lock().await.status, RunStatus::AwaitingReview);
    assert!(events.iter().any(|e| matches!(
        e,
        Event::AwaitingReview {
            stage: StageKind::SynthesizeScript,
            ..
        }
    )));
    let llm_before = mocks.llm.calls.load(Ordering::SeqCst);
    assert_eq!(llm_before, 1);
    drop(shared);

    // Restart: the checkpoint re-enters the review wait without rework.
    let harness = Harness::rooted(&mocks, EngineConfig::default(), harness.dir);
    let resumed = harness.store.load_latest(run_id).await.unwrap().unwrap();
    assert_eq!(resumed.status, RunStatus::AwaitingReview);
    assert!(resumed.pending_review.is_some());

    let (shared, result, _events) = harness
        .run_reviewed(resumed, vec![ReviewDecision::Approve, ReviewDecision::Approve])
        .await;
    result.unwrap();

    assert_eq!(shared.lock().await.status, RunStatus::Complete);
    // The suspended script was approved as-is; only the storyboard needed a
    // new LLM call. Research was replayed.
    assert_eq!(mocks.llm.calls.load(Ordering::SeqCst), llm_before + 1);
    assert_eq!(mocks.search.searches.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn expired_undownloaded_clips_are_regenerated_on_resume() {
    let mocks = MockSet::new();
    let harness = Harness::new(&mocks, no_approval_config());

    // A checkpoint taken mid-crash: clips were generated but never
    // downloaded, and their retrieval URLs have expired since.
    let mut state = RunState::new("ocean currents");
    state.record_artifact(StageArtifact::Research {
        sources: vec![ResearchSource {
            title: "t".to_string(),
            url: "https://source.example/0".to_string(),
            content: "c".to_string(),
            score: None,
        }],
    });
    state.record_artifact(StageArtifact::Script {
        text: vec!["word"; 250].join(" "),
        word_count: 250,
    });
    let scenes: Vec<Scene> = (0..2)
        .map(|index| Scene {
            index,
            narration: format!("Narration {index}."),
            visual_prompt: format!("visual {index}"),
            duration_secs: 4.0,
        })
        .collect();
    state.record_artifact(StageArtifact::Storyboard {
        scenes: scenes.clone(),
    });
    state.record_artifact(StageArtifact::Videos {
        clips: scenes
            .iter()
            .map(|scene| VideoClip {
                scene_index: scene.index,
                retrieval_url: format!("https://clips.example/stale-{}", scene.index),
                expires_at: Utc::now() - ChronoDuration::minutes(10),
                local_path: None,
            })
            .collect(),
    });
    state.current_stage = StageKind::GenerateVideos;
    state.status = RunStatus::Running;

    let (shared, result, events) = harness.run_unattended(state).await;
    result.unwrap();

    let state = shared.lock().await;
    assert_eq!(state.status, RunStatus::Complete);
    // The stale artifact was not replayed; both clips were regenerated and
    // downloaded this time.
    assert_eq!(mocks.video.generations.load(Ordering::SeqCst), 2);
    assert_eq!(mocks.video.downloads.load(Ordering::SeqCst), 2);
    let Some(StageArtifact::Videos { clips }) = state.artifact(StageKind::GenerateVideos) else {
        panic!("missing videos artifact");
    };
    assert!(clips.iter().all(|c| c.local_path.is_some()));
    assert!(!events.iter().any(|e| matches!(
        e,
        Event::StageReplayed {
            stage: StageKind::GenerateVideos,
            ..
        }
    )));
}
