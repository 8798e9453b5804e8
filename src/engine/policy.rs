//! Termination policy for the decode loop.
//!
//! The policy is consulted at the top of every iteration, before any
//! work, and is the loop's only exit. Warm-up passes run the same loop
//! but are additionally capped at a fixed number of steps.

use std::fmt;

use super::state::TerminationCounters;

/// Steps a warm-up pass is allowed before it stops, budget permitting.
pub const DEFAULT_WARMUP_STEP_CAP: usize = 2;

/// Which kind of generation pass is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// Executor warm-up; tokens produced here are not counted against
    /// the budget.
    WarmUp,
    /// A measured pass.
    Measure,
}

impl fmt::Display for PassKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PassKind::WarmUp => "warm_up",
            PassKind::Measure => "measure",
        };
        write!(f, "{}", s)
    }
}

/// Why a generation pass stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The new-token budget is exhausted.
    MaxNewTokens,
    /// A warm-up pass hit its step cap.
    WarmupStepCap,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopReason::MaxNewTokens => "max_new_tokens",
            StopReason::WarmupStepCap => "warmup_step_cap",
        };
        write!(f, "{}", s)
    }
}

/// Decides when the decode loop stops.
#[derive(Debug, Clone, Copy)]
pub struct TerminationPolicy {
    pub max_new_tokens: usize,
    pub warmup_step_cap: usize,
}

impl TerminationPolicy {
    pub fn new(max_new_tokens: usize) -> Self {
        Self {
            max_new_tokens,
            warmup_step_cap: DEFAULT_WARMUP_STEP_CAP,
        }
    }

    /// The reason to stop now, if any. The token budget is checked first,
    /// then the warm-up cap.
    pub fn stop_reason(
        &self,
        counters: &TerminationCounters,
        pass: PassKind,
    ) -> Option<StopReason> {
        if counters.new_tokens_produced >= self.max_new_tokens {
            return Some(StopReason::MaxNewTokens);
        }
        if pass == PassKind::WarmUp && counters.steps_so_far >= self.warmup_step_cap {
            return Some(StopReason::WarmupStepCap);
        }
        None
    }

    pub fn should_stop(&self, counters: &TerminationCounters, pass: PassKind) -> bool {
        self.stop_reason(counters, pass).is_some()
    }
}
