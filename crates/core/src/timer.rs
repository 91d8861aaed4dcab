//! Frame clock: delta time between ticks and the remaining budget of a
//! fixed-rate frame.

use std::time::{Duration, Instant};

/// Monotonic clock driving the application loop.
#[derive(Debug)]
pub struct FrameClock {
    start: Instant,
    last_tick: Instant,
    target_frame: Option<Duration>,
}

impl FrameClock {
    /// Create a clock pacing frames at `target_fps`. Zero disables pacing.
    pub fn new(target_fps: u32) -> Self {
        let now = Instant::now();
        let target_frame =
            (target_fps > 0).then(|| Duration::from_nanos(1_000_000_000 / u64::from(target_fps)));
        Self {
            start: now,
            last_tick: now,
            target_frame,
        }
    }

    /// Total time since the clock was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time since the previous tick, in seconds. Marks the start of a new frame.
    pub fn tick(&mut self) -> f32 {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        delta.as_secs_f32()
    }

    /// Target duration of one frame, if pacing is enabled.
    pub fn target_frame(&self) -> Option<Duration> {
        self.target_frame
    }

    /// Time left in the current frame budget given the time already spent.
    pub fn remaining(&self, spent: Duration) -> Option<Duration> {
        self.target_frame
            .and_then(|target| target.checked_sub(spent))
            .filter(|left| !left.is_zero())
    }

    /// Sleep off whatever is left of the frame budget since the last tick.
    pub fn sleep_remaining(&self) {
        if let Some(left) = self.remaining(self.last_tick.elapsed()) {
            std::thread::sleep(left);
        }
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new(60)
    }
}
