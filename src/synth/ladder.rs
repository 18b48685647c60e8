//! Fallback ladder state machine.
//!
//! Transitions are a pure function of the current state, the observed event,
//! and the ladder length, so every edge can be tested without a subprocess.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "strategy_index")]
pub enum LadderState {
    NotStarted,
    Attempting(usize),
    Succeeded,
    FailedFatal,
    FailedExhausted,
    Cancelled,
}

impl LadderState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, LadderState::NotStarted | LadderState::Attempting(_))
    }
}

/// What the orchestrator observed for the current rung.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LadderEvent {
    Start,
    Succeeded,
    Fatal,
    Retryable,
    TimedOut,
    Cancelled,
}

pub fn transition(state: LadderState, event: LadderEvent, ladder_len: usize) -> LadderState {
    match (state, event) {
        (LadderState::NotStarted, LadderEvent::Start) if ladder_len == 0 => {
            LadderState::FailedExhausted
        }
        (LadderState::NotStarted, LadderEvent::Start) => LadderState::Attempting(0),
        (LadderState::NotStarted, LadderEvent::Cancelled) => LadderState::Cancelled,
        (LadderState::NotStarted, _) => LadderState::NotStarted,
        (LadderState::Attempting(_), LadderEvent::Succeeded) => LadderState::Succeeded,
        (LadderState::Attempting(_), LadderEvent::Fatal) => LadderState::FailedFatal,
        (LadderState::Attempting(_), LadderEvent::Cancelled) => LadderState::Cancelled,
        (LadderState::Attempting(index), LadderEvent::Retryable | LadderEvent::TimedOut) => {
            if index + 1 < ladder_len {
                LadderState::Attempting(index + 1)
            } else {
                LadderState::FailedExhausted
            }
        }
        (LadderState::Attempting(index), LadderEvent::Start) => LadderState::Attempting(index),
        (terminal, _) => terminal,
    }
}
