use std::time::Instant;

/// Monotonic time base shared by every link of a channel.
pub struct Epoch {
    time_base: Instant,
}

impl Epoch {
    pub fn new() -> Self {
        Self {
            time_base: Instant::now(),
        }
    }

    /// Returns the number of seconds elapsed since the epoch was created.
    pub fn time_now(&self) -> f64 {
        self.time_base.elapsed().as_secs_f64()
    }
}
