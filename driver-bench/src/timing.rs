//! Timer discipline.
//!
//! A [`TimingWindow`] accumulates wall time only inside
//! [`TimingWindow::measure_during`]. Work wrapped in
//! [`TimingWindow::exclude_during`] is tracked separately so reports can show
//! how much setup was kept out of the measurement. Both helpers are scoped:
//! the clock stops when the closure returns, including early returns through
//! `?`, so a start can never be left without its stop.

use std::time::{Duration, Instant};

#[derive(Debug, Default, Clone)]
pub struct TimingWindow {
    measured: Duration,
    excluded: Duration,
    spans: u64,
}

impl TimingWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with the clock running.
    pub fn measure_during<T>(&mut self, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let out = f();
        self.measured += start.elapsed();
        self.spans += 1;
        out
    }

    /// Run `f` with the clock stopped. `f` may open a measured span of its
    /// own (e.g. a cursor is opened and closed outside the clock, and only
    /// the scan in between is timed); that span is not counted as excluded.
    pub fn exclude_during<T>(&mut self, f: impl FnOnce(&mut Self) -> T) -> T {
        let measured_before = self.measured;
        let start = Instant::now();
        let out = f(self);
        let inner = self.measured - measured_before;
        self.excluded += start.elapsed().saturating_sub(inner);
        out
    }

    /// Time counted toward the result.
    pub fn measured(&self) -> Duration {
        self.measured
    }

    /// Time deliberately kept out of the result.
    pub fn excluded(&self) -> Duration {
        self.excluded
    }

    /// Number of completed measured spans.
    pub fn spans(&self) -> u64 {
        self.spans
    }
}
