//! The repair cycle as a pure state machine.
//!
//! ```text
//! Init -> InitialTest -> DoneClean
//!                     -> Repairing -> RepairFailed
//!                                  -> Repaired -> FinalTest -> DoneSuccess
//!                                                           -> DoneRegressed
//! ```
//!
//! The orchestrator performs the side effects; this module only decides which
//! state a given event leads to, and rejects anything else.

use serde::Serialize;
use thiserror::Error;

use crate::core::types::{TerminalState, Verdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Init,
    InitialTest,
    DoneClean,
    Repairing,
    RepairFailed,
    Repaired,
    FinalTest,
    DoneSuccess,
    DoneRegressed,
}

/// Something the orchestrator observed that moves the cycle forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleEvent {
    Start,
    InitialVerdict(Verdict),
    PatchApplied,
    PatchFailed,
    BeginFinalTest,
    FinalVerdict(Verdict),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition from {from:?} on {event:?}")]
pub struct InvalidTransition {
    pub from: CycleState,
    pub event: CycleEvent,
}

impl CycleState {
    pub fn terminal(self) -> Option<TerminalState> {
        match self {
            CycleState::DoneClean => Some(TerminalState::Clean),
            CycleState::RepairFailed => Some(TerminalState::RepairFailed),
            CycleState::DoneSuccess => Some(TerminalState::Success),
            CycleState::DoneRegressed => Some(TerminalState::Regressed),
            _ => None,
        }
    }
}

pub fn advance(from: CycleState, event: CycleEvent) -> Result<CycleState, InvalidTransition> {
    use CycleEvent as E;
    use CycleState as S;

    let next = match (from, event) {
        (S::Init, E::Start) => S::InitialTest,
        (S::InitialTest, E::InitialVerdict(Verdict::Passed)) => S::DoneClean,
        (S::InitialTest, E::InitialVerdict(Verdict::Failed)) => S::Repairing,
        (S::Repairing, E::PatchFailed) => S::RepairFailed,
        (S::Repairing, E::PatchApplied) => S::Repaired,
        (S::Repaired, E::BeginFinalTest) => S::FinalTest,
        (S::FinalTest, E::FinalVerdict(Verdict::Passed)) => S::DoneSuccess,
        (S::FinalTest, E::FinalVerdict(Verdict::Failed)) => S::DoneRegressed,
        _ => return Err(InvalidTransition { from, event }),
    };
    Ok(next)
}

/// Ordered record of every state a cycle visited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTrail {
    states: Vec<CycleState>,
}

impl Default for StateTrail {
    fn default() -> Self {
        Self {
            states: vec![CycleState::Init],
        }
    }
}

impl StateTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> CycleState {
        *self.states.last().unwrap_or(&CycleState::Init)
    }

    pub fn advance(&mut self, event: CycleEvent) -> Result<CycleState, InvalidTransition> {
        let next = advance(self.current(), event)?;
        self.states.push(next);
        Ok(next)
    }

    pub fn states(&self) -> &[CycleState] {
        &self.states
    }
}
