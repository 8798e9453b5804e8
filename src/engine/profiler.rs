//! Optional per-step profiling around a generation pass.
//!
//! The runner notifies the profiler once after every completed step and
//! once when the pass ends. Profiling is observational only; it never
//! changes what the loop does.

use std::time::Instant;

use tracing::{debug, info};

use super::policy::PassKind;

/// Hook notified as a generation pass progresses.
pub trait Profiler: Send {
    /// Called once after each completed step.
    fn step(&mut self);

    /// Called once after the pass ends.
    fn finish(&mut self) {}
}

/// Profiler used whenever profiling is off.
#[derive(Debug, Default)]
pub struct NoopProfiler;

impl Profiler for NoopProfiler {
    fn step(&mut self) {}
}

/// Wall-clock lap timer, one lap per step.
#[derive(Debug)]
pub struct StepTimer {
    pass: PassKind,
    started: Instant,
    last: Instant,
    laps_ms: Vec<f64>,
}

impl StepTimer {
    pub fn new(pass: PassKind) -> Self {
        let now = Instant::now();
        Self {
            pass,
            started: now,
            last: now,
            laps_ms: Vec::new(),
        }
    }

    /// Lap durations recorded so far, in milliseconds.
    pub fn laps_ms(&self) -> &[f64] {
        &self.laps_ms
    }
}

impl Profiler for StepTimer {
    fn step(&mut self) {
        let now = Instant::now();
        let lap_ms = now.duration_since(self.last).as_secs_f64() * 1000.0;
        self.last = now;
        self.laps_ms.push(lap_ms);
        debug!(pass = %self.pass, step = self.laps_ms.len(), lap_ms, "profiler lap");
    }

    fn finish(&mut self) {
        let total_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let steps = self.laps_ms.len();
        let mean_step_ms = if steps > 0 {
            self.laps_ms.iter().sum::<f64>() / steps as f64
        } else {
            0.0
        };
        info!(
            pass = %self.pass,
            steps,
            total_ms,
            mean_step_ms,
            "profiler summary"
        );
    }
}

fn wants_timer(enabled: bool, pass: PassKind) -> bool {
    // Warm-up passes are never profiled.
    enabled && pass == PassKind::Measure
}

/// Profiler for one generation pass.
pub fn for_pass(enabled: bool, pass: PassKind) -> Box<dyn Profiler> {
    if wants_timer(enabled, pass) {
        Box::new(StepTimer::new(pass))
    } else {
        Box::new(NoopProfiler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_timer_records_one_lap_per_step() {
        let mut timer = StepTimer::new(PassKind::Measure);
        timer.step();
        timer.step();
        timer.step();
        assert_eq!(timer.laps_ms().len(), 3);
        assert!(timer.laps_ms().iter().all(|&ms| ms >= 0.0));
        timer.finish();
    }

    #[test]
    fn test_timer_only_for_enabled_measure_pass() {
        assert!(wants_timer(true, PassKind::Measure));
        assert!(!wants_timer(true, PassKind::WarmUp));
        assert!(!wants_timer(false, PassKind::Measure));
        assert!(!wants_timer(false, PassKind::WarmUp));
    }

    #[test]
    fn test_noop_profiler_ignores_notifications() {
        let mut prof = for_pass(false, PassKind::Measure);
        prof.step();
        prof.finish();
    }

    #[test]
    fn test_finish_without_steps() {
        let mut timer = StepTimer::new(PassKind::Measure);
        timer.finish();
        assert!(timer.laps_ms().is_empty());
    }
}
