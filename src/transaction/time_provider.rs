//! Local logical clock for commit timestamps

use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::Timestamp;

/// Source of strictly increasing timestamps for one executor
pub trait TimeProvider: Send {
    /// Next timestamp, larger than every value returned before
    fn get_time(&mut self) -> Timestamp;

    /// Move the clock forward to at least `time` (never backwards)
    fn set_time(&mut self, time: Timestamp);
}

/// Microseconds since the Unix epoch
pub fn wall_clock_micros() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as Timestamp)
        .unwrap_or(0)
}

/// Wall clock read once every `interval` ticks, counting up in between.
///
/// Between two reads the clock hands out `time, time + 1, ...`. A resync
/// never goes below the last value handed out, so a slow or skewed wall
/// clock cannot make timestamps repeat.
pub struct LocalTimeProvider {
    time: Timestamp,
    count: u32,
    interval: u32,
    clock: fn() -> Timestamp,
}

impl LocalTimeProvider {
    pub fn new(interval: u32) -> Self {
        Self::with_clock(interval, wall_clock_micros)
    }

    /// Use `clock` instead of the system clock
    pub fn with_clock(interval: u32, clock: fn() -> Timestamp) -> Self {
        Self {
            time: clock(),
            count: 0,
            interval: interval.max(1),
            clock,
        }
    }
}

impl TimeProvider for LocalTimeProvider {
    fn get_time(&mut self) -> Timestamp {
        if self.count >= self.interval {
            let next = self.time + self.count as Timestamp;
            self.time = next.max((self.clock)());
            self.count = 0;
        }
        let now = self.time + self.count as Timestamp;
        self.count += 1;
        now
    }

    fn set_time(&mut self, time: Timestamp) {
        self.time = (self.time + self.count as Timestamp).max(time);
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frozen() -> Timestamp {
        1_000
    }

    #[test]
    fn test_counts_between_resyncs() {
        let mut clock = LocalTimeProvider::with_clock(3, frozen);
        let times: Vec<_> = (0..7).map(|_| clock.get_time()).collect();
        // a frozen wall clock must not pull time backwards at resync
        assert_eq!(times, vec![1000, 1001, 1002, 1003, 1004, 1005, 1006]);
    }

    #[test]
    fn test_set_time_never_moves_backwards() {
        let mut clock = LocalTimeProvider::with_clock(100, frozen);
        clock.get_time();
        clock.get_time();
        clock.set_time(5);
        assert_eq!(clock.get_time(), 1002);

        clock.set_time(50_000);
        assert_eq!(clock.get_time(), 50_000);
        assert_eq!(clock.get_time(), 50_001);
    }

    #[test]
    fn test_wall_clock_is_strictly_increasing() {
        let mut clock = LocalTimeProvider::new(10);
        let mut last = clock.get_time();
        for _ in 0..1000 {
            let next = clock.get_time();
            assert!(next > last);
            last = next;
        }
    }
}
