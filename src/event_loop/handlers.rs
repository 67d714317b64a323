//! Handler traits plugged into the event loop

use crate::error::Result;
use crate::state::CarState;

/// Throttle and steering pair threaded through the AI pipeline
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControlValues {
    pub throttle: f64,
    pub steering: f64,
}

impl ControlValues {
    pub const fn new(throttle: f64, steering: f64) -> Self {
        Self { throttle, steering }
    }
}

/// Result of one AI handler
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AiOutcome {
    /// Keep the cumulative values as they are
    NoChange,
    /// Replace the cumulative values
    Update(ControlValues),
}

/// Autonomous driving behaviour
///
/// Handlers run in registration order on the AI worker thread. Each one sees
/// the tick's snapshot and the values produced by the handlers before it.
pub trait AiHandler: Send + Sync {
    /// Name used in log messages
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Compute new control values, or leave `current` unchanged.
    ///
    /// An `Err` abandons the whole pipeline for this tick.
    fn perform_ai_work(&self, state: &CarState, current: ControlValues) -> Result<AiOutcome>;
}

/// Safety predicate checked every tick before any AI work is scheduled
///
/// Returning `true` halts the car: throttle goes to zero and the loop stops.
pub trait InterruptHandler: Send + Sync {
    /// Name used in log messages
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn should_interrupt(&self, state: &CarState) -> bool;
}

impl<F> InterruptHandler for F
where
    F: Fn(&CarState) -> bool + Send + Sync,
{
    fn should_interrupt(&self, state: &CarState) -> bool {
        self(state)
    }
}
