//! Bounded polling convergence towards a device target.
//!
//! The controller issues at most one corrective write per run and then polls
//! until the plant reports convergence, the deadline passes, or shutdown is
//! requested. Waiting happens through [`Clock::sleep`] so other work can be
//! serviced between polls.

use std::time::Duration;

use tracing::{debug, trace};

use crate::clock::Clock;
use crate::shutdown::ShutdownSignal;
use crate::traits::Result;

/// What a convergence run is aiming for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceTarget {
    /// Requested value.
    pub target_value: f64,
    /// Allowed distance between measured and requested value.
    pub tolerance: f64,
    /// Time budget measured from the start of the run.
    pub deadline: Duration,
}

/// How a convergence run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceOutcome {
    /// The plant reported convergence in time.
    Converged,
    /// The deadline passed first.
    TimedOut,
    /// Shutdown was requested while waiting.
    Aborted,
}

/// The device-facing side of a convergence run.
pub trait ConvergencePlant {
    /// Current measured value.
    fn read(&mut self) -> Result<f64>;

    /// Ask the device to move towards `target`.
    fn apply(&mut self, target: f64) -> Result<()>;

    /// Whether `current` counts as converged on `target`.
    fn is_converged(&mut self, current: f64, target: &ConvergenceTarget) -> bool;
}

/// Polls a [`ConvergencePlant`] at a fixed interval.
pub struct ConvergenceController<'a> {
    clock: &'a dyn Clock,
    shutdown: &'a ShutdownSignal,
    poll_interval: Duration,
}

impl<'a> ConvergenceController<'a> {
    /// Create a controller polling every `poll_interval`.
    pub fn new(
        clock: &'a dyn Clock,
        shutdown: &'a ShutdownSignal,
        poll_interval: Duration,
    ) -> Self {
        Self {
            clock,
            shutdown,
            poll_interval,
        }
    }

    /// Drive `plant` towards `target`.
    ///
    /// `apply` is skipped only when the first reading is exactly equal to the
    /// target; any other reading gets one write, even if it is already within
    /// tolerance. The write is never repeated inside the wait loop.
    pub fn run<P>(&self, plant: &mut P, target: &ConvergenceTarget) -> Result<ConvergenceOutcome>
    where
        P: ConvergencePlant + ?Sized,
    {
        let start = self.clock.now();

        let initial = plant.read()?;
        #[allow(clippy::float_cmp)]
        let needs_write = initial != target.target_value;
        if needs_write {
            debug!(
                current = initial,
                target = target.target_value,
                "applying correction"
            );
            plant.apply(target.target_value)?;
        }

        let mut current = initial;
        let mut polls = 0usize;
        loop {
            if polls > 0 || needs_write {
                current = plant.read()?;
            }
            if plant.is_converged(current, target) {
                debug!(current, polls, "converged");
                return Ok(ConvergenceOutcome::Converged);
            }
            if self.clock.now().duration_since(start) > target.deadline {
                debug!(current, polls, "convergence deadline passed");
                return Ok(ConvergenceOutcome::TimedOut);
            }
            if self.shutdown.is_requested() {
                return Ok(ConvergenceOutcome::Aborted);
            }

            trace!(current, "waiting for convergence");
            self.clock.sleep(self.poll_interval);
            polls += 1;
        }
    }
}
