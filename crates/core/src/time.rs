use chrono::{DateTime, Duration, Utc};

/// Wall-clock source for timestamps on log entries, submissions and deadlines.
///
/// Timers themselves run on the async runtime; this only stamps events.
#[derive(Debug, Clone, Copy, Default)]
pub enum Clock {
    #[default]
    System,
    Fixed(DateTime<Utc>),
}

impl Clock {
    #[must_use]
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self::Fixed(at)
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Clock::System => Utc::now(),
            Clock::Fixed(t) => *t,
        }
    }

    /// Move a fixed clock forward. No effect on `Clock::System`.
    pub fn advance(&mut self, delta: Duration) {
        if let Clock::Fixed(t) = self {
            *t += delta;
        }
    }

    /// Time left until `deadline`, clamped at zero.
    #[must_use]
    pub fn remaining_until(&self, deadline: DateTime<Utc>) -> Duration {
        let left = deadline.signed_duration_since(self.now());
        if left < Duration::zero() {
            Duration::zero()
        } else {
            left
        }
    }
}

/// Deterministic timestamp for tests (2023-11-14T22:13:20Z).
pub const FIXED_TEST_TIMESTAMP: i64 = 1_700_000_000;

/// Returns a deterministic `DateTime<Utc>` for tests.
///
/// # Panics
///
/// Panics if the fixed timestamp cannot be represented.
#[must_use]
pub fn fixed_now() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(FIXED_TEST_TIMESTAMP, 0)
        .expect("fixed timestamp should be valid")
}

#[must_use]
pub fn fixed_clock() -> Clock {
    Clock::fixed(fixed_now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remaining_time_is_clamped() {
        let mut clock = fixed_clock();
        let deadline = fixed_now() + Duration::minutes(10);
        assert_eq!(clock.remaining_until(deadline), Duration::minutes(10));

        clock.advance(Duration::minutes(11));
        assert_eq!(clock.remaining_until(deadline), Duration::zero());
    }
}
