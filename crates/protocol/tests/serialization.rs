//! Serialization round-trip tests for the checkpoint-facing models.
//!
//! RunState is the on-disk checkpoint payload, so its serialized shape is a
//! compatibility contract: map keys are stage names, enums are stable string
//! tags, timestamps are RFC 3339.

use reel_protocol::*;

#[test]
fn run_status_serializes_as_screaming_snake_case() {
    let json = serde_json::to_value(RunStatus::AwaitingReview).unwrap();
    assert_eq!(json, "AWAITING_REVIEW");

    let back: RunStatus = serde_json::from_value(json).unwrap();
    assert_eq!(back, RunStatus::AwaitingReview);
}

#[test]
fn stage_kind_serializes_as_snake_case_name() {
    let json = serde_json::to_value(StageKind::SynthesizeScript).unwrap();
    assert_eq!(json, "synthesize_script");
    assert_eq!(StageKind::SynthesizeScript.as_str(), "synthesize_script");
}

#[test]
fn stage_outputs_map_keys_are_stage_names() {
    let mut state = RunState::new("the water cycle");
    state.record_artifact(StageArtifact::Script {
        text: "a short script".to_string(),
        word_count: 3,
    });

    let json = serde_json::to_value(&state).unwrap();
    assert!(json["stage_outputs"]["synthesize_script"].is_object());
    assert_eq!(
        json["stage_outputs"]["synthesize_script"]["kind"],
        "script"
    );
}

#[test]
fn run_state_round_trips() {
    let mut state = RunState::new("volcanoes");
    state.status = RunStatus::Running;
    state.current_stage = StageKind::CollectImages;
    state.record_artifact(StageArtifact::Research {
        sources: vec![ResearchSource {
            title: "Volcanism".to_string(),
            url: "https://example.org/volcanism".to_string(),
            content: "magma, mostly".to_string(),
            score: Some(0.92),
        }],
    });
    state.bump_retry(StageKind::SynthesizeScript);
    state.record_error(
        RunErrorKind::ExternalCallFailure,
        StageKind::CollectImages,
        "search timed out",
    );

    let json = serde_json::to_string(&state).unwrap();
    let back: RunState = serde_json::from_str(&json).unwrap();
    assert_eq!(back, state);
}

#[test]
fn review_decision_tags() {
    let approve = serde_json::to_value(ReviewDecision::Approve).unwrap();
    assert_eq!(approve["decision"], "approve");

    let reject = serde_json::to_value(ReviewDecision::Reject {
        feedback: "tighten the intro".to_string(),
    })
    .unwrap();
    assert_eq!(reject["decision"], "reject");
    assert_eq!(reject["feedback"], "tighten the intro");
}

#[test]
fn run_summary_reflects_state() {
    let mut state = RunState::new("glaciers");
    state.status = RunStatus::Error;
    state.record_artifact(StageArtifact::Research { sources: vec![ResearchSource {
        title: "Ice".to_string(),
        url: "https://example.org/ice".to_string(),
        content: "cold".to_string(),
        score: None,
    }] });
    state.record_error(
        RunErrorKind::ValidationExhausted,
        StageKind::SynthesizeScript,
        "word count out of range",
    );

    let summary = RunSummary::from(&state);
    assert_eq!(summary.run_id, state.run_id);
    assert_eq!(summary.stages_done, 1);
    assert_eq!(
        summary.last_error.as_ref().map(|e| e.kind),
        Some(RunErrorKind::ValidationExhausted)
    );
}

#[test]
fn task_round_trips() {
    let mut task = Task::new("start_run");
    task.status = TaskStatus::Done;
    task.result = Some(serde_json::json!({ "run_id": "abc" }));
    task.finished_at = Some(chrono::Utc::now());

    let json = serde_json::to_string(&task).unwrap();
    let back: Task = serde_json::from_str(&json).unwrap();
    assert_eq!(back, task);
}
