use std::time::{Duration, Instant};

/// Snapshot handed to the update callback.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FrameTime {
    /// Time covered by this update, in seconds.
    pub elapsed_seconds: f64,

    /// Time covered by all updates so far, in seconds.
    pub total_seconds: f64,

    /// Number of updates run so far, including this one.
    pub frame_count: u64,
}

/// Frame-pacing timer.
///
/// In the default variable-timestep mode every [`tick`](Self::tick) runs the
/// update callback exactly once with the real elapsed time. In fixed-timestep
/// mode the callback runs as many times as needed to catch up, each time with
/// the fixed step, and possibly not at all when the frame came early.
///
/// Delta time is clamped so that a long stall (debugger, minimised window)
/// does not produce one enormous step.
#[derive(Debug, Clone)]
pub struct StepTimer {
    last: Instant,
    max_delta: Duration,

    elapsed: Duration,
    total: Duration,
    left_over: Duration,

    frame_count: u64,
    frames_this_second: u32,
    frames_per_second: u32,
    second_counter: Duration,

    fixed_step: Option<Duration>,
}

/// Fixed-step deltas this close to the target are snapped to it, so a
/// display running at nearly the step rate does not slowly drift.
const FIXED_STEP_SNAP: Duration = Duration::from_micros(250);

impl StepTimer {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
            max_delta: Duration::from_millis(250),
            elapsed: Duration::ZERO,
            total: Duration::ZERO,
            left_over: Duration::ZERO,
            frame_count: 0,
            frames_this_second: 0,
            frames_per_second: 0,
            second_counter: Duration::ZERO,
            fixed_step: None,
        }
    }

    /// Switches to fixed-timestep updates of `step`, or back to variable
    /// updates with `None`.
    pub fn set_fixed_time_step(&mut self, step: Option<Duration>) {
        debug_assert!(step.is_none_or(|s| !s.is_zero()));
        self.fixed_step = step;
        self.left_over = Duration::ZERO;
    }

    pub fn is_fixed_time_step(&self) -> bool {
        self.fixed_step.is_some()
    }

    /// Forgets time spent since the last tick, e.g. after a long blocking
    /// load, so the next tick does not try to catch up on it.
    pub fn reset_elapsed_time(&mut self) {
        self.last = Instant::now();
        self.left_over = Duration::ZERO;
        self.frames_this_second = 0;
        self.second_counter = Duration::ZERO;
    }

    /// Measures wall time since the previous tick and runs `update`.
    pub fn tick(&mut self, update: impl FnMut(FrameTime)) {
        let now = Instant::now();
        let delta = now.saturating_duration_since(self.last);
        self.last = now;
        self.advance(delta, update);
    }

    /// Advances the timer by an explicit `delta` and runs `update`.
    pub fn advance(&mut self, delta: Duration, mut update: impl FnMut(FrameTime)) {
        let mut delta = delta.min(self.max_delta);
        let start_frame = self.frame_count;

        self.second_counter += delta;

        match self.fixed_step {
            Some(step) => {
                if delta.abs_diff(step) < FIXED_STEP_SNAP {
                    delta = step;
                }
                self.left_over += delta;

                while self.left_over >= step {
                    self.elapsed = step;
                    self.total += step;
                    self.left_over -= step;
                    self.frame_count += 1;
                    update(self.frame_time());
                }
            }
            None => {
                self.elapsed = delta;
                self.total += delta;
                self.left_over = Duration::ZERO;
                self.frame_count += 1;
                update(self.frame_time());
            }
        }

        if self.frame_count != start_frame {
            self.frames_this_second += 1;
        }
        if self.second_counter >= Duration::from_secs(1) {
            self.frames_per_second = self.frames_this_second;
            self.frames_this_second = 0;
            self.second_counter = Duration::from_nanos(
                (self.second_counter.as_nanos() % 1_000_000_000) as u64,
            );
        }
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    pub fn total_seconds(&self) -> f64 {
        self.total.as_secs_f64()
    }

    /// Number of updates run since creation.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn frames_per_second(&self) -> u32 {
        self.frames_per_second
    }

    fn frame_time(&self) -> FrameTime {
        FrameTime {
            elapsed_seconds: self.elapsed_seconds(),
            total_seconds: self.total_seconds(),
            frame_count: self.frame_count,
        }
    }
}

impl Default for StepTimer {
    fn default() -> Self {
        Self::new()
    }
}
