use crate::timer::{Millis, MonotonicTimer};

pub const DEFAULT_RETRY_INTERVAL_MS: Millis = 5 * 60 * 1000;

/// Shortest retry interval accepted; keeps a flapping link from turning into
/// a reconnect storm.
pub const MIN_RETRY_INTERVAL_MS: Millis = 1_000;

/// Fixed-interval reconnect gate for the telemetry link.
#[derive(Debug, Clone)]
pub struct ConnectivityRetryPolicy {
    retry_timer: MonotonicTimer,
    connected: bool,
}

impl Default for ConnectivityRetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_INTERVAL_MS)
    }
}

impl ConnectivityRetryPolicy {
    pub fn new(interval_ms: Millis) -> Self {
        Self {
            retry_timer: MonotonicTimer::new(interval_ms.max(MIN_RETRY_INTERVAL_MS)),
            connected: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn interval(&self) -> Millis {
        self.retry_timer.delay()
    }

    pub fn set_interval(&mut self, interval_ms: Millis) {
        self.retry_timer
            .set_delay(interval_ms.max(MIN_RETRY_INTERVAL_MS));
    }

    pub fn should_retry_now(&self, now: Millis) -> bool {
        !self.connected && self.retry_timer.is_it_time(now)
    }

    /// Milliseconds until the next attempt is allowed; zero when connected
    /// or already due.
    pub fn next_attempt_in(&self, now: Millis) -> Millis {
        if self.connected {
            0
        } else {
            self.retry_timer.remaining(now)
        }
    }

    pub fn on_attempt_result(&mut self, success: bool, now: Millis) {
        if success {
            self.connected = true;
        }
        self.retry_timer.reset(now);
    }

    /// Marks the link down and defers the next attempt by a full interval.
    pub fn on_disconnect_detected(&mut self, now: Millis) {
        self.connected = false;
        self.retry_timer.reset(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_attempt_is_immediate() {
        let policy = ConnectivityRetryPolicy::new(5_000);
        assert!(policy.should_retry_now(0));
        assert!(policy.should_retry_now(12));
    }

    #[test]
    fn failed_attempt_defers_by_full_interval() {
        let mut policy = ConnectivityRetryPolicy::new(5_000);
        assert!(policy.should_retry_now(100));
        policy.on_attempt_result(false, 100);

        assert!(!policy.should_retry_now(101));
        assert!(!policy.should_retry_now(5_100));
        assert!(policy.should_retry_now(5_101));
        assert_eq!(policy.next_attempt_in(4_100), 1_001);
    }

    #[test]
    fn success_stops_retries() {
        let mut policy = ConnectivityRetryPolicy::new(5_000);
        policy.on_attempt_result(true, 10);

        assert!(policy.is_connected());
        assert!(!policy.should_retry_now(1_000_000));
        assert_eq!(policy.next_attempt_in(20), 0);
    }

    #[test]
    fn disconnect_waits_an_interval_before_retrying() {
        let mut policy = ConnectivityRetryPolicy::new(5_000);
        policy.on_attempt_result(true, 10);
        policy.on_disconnect_detected(20_000);

        assert!(!policy.is_connected());
        assert!(!policy.should_retry_now(20_001));
        assert!(!policy.should_retry_now(25_000));
        assert!(policy.should_retry_now(25_001));
    }

    #[test]
    fn interval_has_a_floor() {
        let mut policy = ConnectivityRetryPolicy::new(10);
        assert_eq!(policy.interval(), MIN_RETRY_INTERVAL_MS);

        policy.set_interval(0);
        assert_eq!(policy.interval(), MIN_RETRY_INTERVAL_MS);

        policy.set_interval(60_000);
        assert_eq!(policy.interval(), 60_000);
    }

    #[test]
    fn maximum_interval_never_reports_due_early() {
        let mut policy = ConnectivityRetryPolicy::new(u32::MAX);
        policy.on_attempt_result(false, 1_000);

        assert!(!policy.should_retry_now(1_000));
        assert_eq!(policy.next_attempt_in(1_000), u32::MAX);
    }

    #[test]
    fn retry_cadence_survives_counter_wrap() {
        let mut policy = ConnectivityRetryPolicy::new(5_000);
        policy.on_attempt_result(false, u32::MAX - 1_000);

        assert!(!policy.should_retry_now(3_000));
        assert!(policy.should_retry_now(4_000));
    }
}
