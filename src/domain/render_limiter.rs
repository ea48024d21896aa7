use std::time::{Duration, Instant};

/// Caps how often the display is asked to redraw.
#[derive(Debug, Clone)]
pub struct RenderLimiter {
    previous_update: Option<Instant>,
    minimum_interval: Duration,
}

impl RenderLimiter {
    /// `max_frequency` in Hz, truncated to a whole-millisecond interval.
    pub fn new(max_frequency: f32) -> Self {
        let millis = if max_frequency > 0.0 {
            (1000.0 / max_frequency) as u64
        } else {
            0
        };
        Self {
            previous_update: None,
            minimum_interval: Duration::from_millis(millis),
        }
    }

    pub fn minimum_interval(&self) -> Duration {
        self.minimum_interval
    }

    pub fn can_request_render(&mut self) -> bool {
        self.can_request_render_at(Instant::now())
    }

    pub fn can_request_render_at(&mut self, now: Instant) -> bool {
        let due = match self.previous_update {
            None => true,
            Some(previous) => now.saturating_duration_since(previous) > self.minimum_interval,
        };
        if due {
            self.previous_update = Some(now);
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_is_whole_milliseconds() {
        assert_eq!(RenderLimiter::new(60.0).minimum_interval(), Duration::from_millis(16));
        assert_eq!(RenderLimiter::new(4.0).minimum_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_first_request_passes() {
        let mut limiter = RenderLimiter::new(60.0);
        assert!(limiter.can_request_render_at(Instant::now()));
    }

    #[test]
    fn test_requests_within_interval_are_dropped() {
        let mut limiter = RenderLimiter::new(10.0);
        let start = Instant::now();
        assert!(limiter.can_request_render_at(start));
        assert!(!limiter.can_request_render_at(start + Duration::from_millis(50)));
        // Exactly one interval is not enough
        assert!(!limiter.can_request_render_at(start + Duration::from_millis(100)));
        assert!(limiter.can_request_render_at(start + Duration::from_millis(101)));
        assert!(!limiter.can_request_render_at(start + Duration::from_millis(150)));
    }
}
