//! The engine's stage state machine.
//!
//! Control flow between stages is a closed transition table rather than
//! conditionals scattered through the run loop: every (state, event) pair is
//! enumerated here, and the run loop only feeds events in. Unreachable pairs
//! halt rather than advance, so a bookkeeping bug can never skip a stage.

use reel_protocol::StageKind;

/// Where the run loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Executing `0`'s gate.
    Run(StageKind),

    /// Suspended on `0`'s human-approval gate.
    Review(StageKind),

    /// Halted with a recorded error.
    Halted,

    /// All stages complete.
    Done,
}

/// What just happened at the current stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageEvent {
    /// The gate passed and no approval is required.
    Succeeded,

    /// The gate passed and the stage requires human approval.
    ApprovalRequired,

    /// The gate spent its retry budget without a passing artifact.
    Exhausted,

    /// A non-validation failure (external call, persistence).
    Failed,

    /// The reviewer approved the artifact.
    Approved,

    /// The reviewer rejected the artifact with feedback.
    Rejected,

    /// The run was aborted.
    Aborted,
}

/// Advance one stage, falling off the end into `Done`.
fn advance(stage: StageKind) -> EngineState {
    match stage.next() {
        Some(next) => EngineState::Run(next),
        None => EngineState::Done,
    }
}

/// The complete transition table.
pub fn next_state(state: EngineState, event: StageEvent) -> EngineState {
    match (state, event) {
        (EngineState::Run(stage), StageEvent::Succeeded) => advance(stage),
        (EngineState::Run(stage), StageEvent::ApprovalRequired) => EngineState::Review(stage),
        (EngineState::Run(_), StageEvent::Exhausted) => EngineState::Halted,
        (EngineState::Run(_), StageEvent::Failed) => EngineState::Halted,
        (EngineState::Run(_), StageEvent::Aborted) => EngineState::Halted,

        (EngineState::Review(stage), StageEvent::Approved) => advance(stage),
        (EngineState::Review(stage), StageEvent::Rejected) => EngineState::Run(stage),
        (EngineState::Review(_), StageEvent::Aborted) => EngineState::Halted,

        // Terminal states absorb everything; unreachable pairs halt.
        _ => EngineState::Halted,
    }
}
