use std::time::{Duration, Instant};

/// Wall-clock budget, `None` never expires.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    pub fn start(limit: Option<Duration>) -> Self {
        Self {
            start: Instant::now(),
            limit: limit.filter(|limit| !limit.is_zero()),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn expired(&self) -> bool {
        match self.limit {
            Some(limit) => self.elapsed() > limit,
            None => false,
        }
    }
}
