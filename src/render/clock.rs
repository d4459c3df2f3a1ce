use std::time::{Duration, Instant};

/// Source of display-refresh ticks
pub trait FrameClock {
    /// Block until the next refresh and return its monotonic timestamp in ms
    fn next_tick(&mut self) -> u64;
}

/// Sleeps to hold a target frame rate
pub struct PacedClock {
    origin: Instant,
    frame_duration: Duration,
    next_deadline: Option<Instant>,
    last_timestamp_ms: Option<u64>,
}

impl PacedClock {
    pub fn new(target_fps: u32) -> Self {
        Self {
            origin: Instant::now(),
            frame_duration: Duration::from_secs_f64(1.0 / target_fps.max(1) as f64),
            next_deadline: None,
            last_timestamp_ms: None,
        }
    }
}

impl FrameClock for PacedClock {
    fn next_tick(&mut self) -> u64 {
        let now = Instant::now();
        if let Some(deadline) = self.next_deadline {
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
        }

        let tick = Instant::now();
        // Late ticks re-anchor instead of bursting to catch up
        self.next_deadline = Some(match self.next_deadline {
            Some(deadline) if deadline + self.frame_duration > tick => deadline + self.frame_duration,
            _ => tick + self.frame_duration,
        });

        // Strictly increasing even when two ticks land in the same millisecond
        let mut timestamp_ms = tick.duration_since(self.origin).as_millis() as u64;
        if let Some(last) = self.last_timestamp_ms {
            timestamp_ms = timestamp_ms.max(last + 1);
        }
        self.last_timestamp_ms = Some(timestamp_ms);
        timestamp_ms
    }
}
