use std::time::Duration;

pub(crate) const MINUTE: Duration = Duration::from_secs(60);

/// One-minute tick source driven by the controller's monotonic time
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct MinuteTimer {
    next_due: Option<Duration>,
}

impl MinuteTimer {
    pub fn start(&mut self, now: Duration) {
        self.next_due = Some(now + MINUTE);
    }

    pub fn stop(&mut self) {
        self.next_due = None;
    }

    pub fn is_active(&self) -> bool {
        self.next_due.is_some()
    }

    /// Whole minutes that fell due since the last poll
    pub fn poll(&mut self, now: Duration) -> u32 {
        let Some(mut due) = self.next_due else {
            return 0;
        };
        let mut fired = 0;
        while now >= due {
            fired += 1;
            due += MINUTE;
        }
        self.next_due = Some(due);
        fired
    }
}

/// Schedules the periodic heartbeat record
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct HeartbeatScheduler {
    last_sent: Duration,
    initial_from: Option<Duration>,
    forced: bool,
}

impl HeartbeatScheduler {
    /// Send on the next check regardless of interval
    pub fn force(&mut self) {
        self.forced = true;
    }

    /// Restart the interval, e.g. when a charge starts
    pub fn suppress(&mut self, now: Duration) {
        self.last_sent = now;
        self.forced = false;
    }

    /// Send one heartbeat once the initial delay has passed
    pub fn delay_initial(&mut self, now: Duration) {
        self.initial_from = Some(now);
    }

    pub fn due(&mut self, now: Duration, interval: Duration, initial_delay: Duration) -> bool {
        if let Some(from) = self.initial_from {
            if now.saturating_sub(from) >= initial_delay {
                self.initial_from = None;
                self.forced = true;
            }
        }
        let due = self.forced || now.saturating_sub(self.last_sent) >= interval;
        if due {
            self.last_sent = now;
            self.forced = false;
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minute_timer_catches_up() {
        let mut t = MinuteTimer::default();
        assert_eq!(t.poll(Duration::from_secs(600)), 0);
        t.start(Duration::from_secs(10));
        assert_eq!(t.poll(Duration::from_secs(69)), 0);
        assert_eq!(t.poll(Duration::from_secs(70)), 1);
        assert_eq!(t.poll(Duration::from_secs(250)), 3);
        t.stop();
        assert!(!t.is_active());
    }

    #[test]
    fn test_heartbeat_initial_delay_forces_one() {
        let mut h = HeartbeatScheduler::default();
        let minute = Duration::from_secs(60);
        let delay = Duration::from_secs(40);
        h.suppress(Duration::ZERO);
        h.delay_initial(Duration::ZERO);
        assert!(!h.due(Duration::from_secs(30), minute, delay));
        assert!(h.due(Duration::from_secs(41), minute, delay));
        assert!(!h.due(Duration::from_secs(60), minute, delay));
        assert!(h.due(Duration::from_secs(101), minute, delay));
    }
}
