use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

/// Single injectable time source.
///
/// Every expiry decision in the server reads this clock, so tests can move
/// time forward without sleeping. The offset is shared across clones.
#[derive(Clone, Debug, Default)]
pub struct Clock {
    offset_secs: Arc<AtomicI64>,
}

impl Clock {
    pub fn system() -> Self {
        Self::default()
    }

    pub fn now(&self) -> DateTime<Utc> {
        Utc::now() + Duration::seconds(self.offset_secs.load(Ordering::Relaxed))
    }

    /// Shift the clock forward. Visible to all clones of this clock.
    #[cfg(test)]
    pub fn advance(&self, delta: Duration) {
        self.offset_secs
            .fetch_add(delta.num_seconds(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_moves_all_clones() {
        let clock = Clock::system();
        let other = clock.clone();
        let before = other.now();

        clock.advance(Duration::seconds(3600));

        assert!(other.now() >= before + Duration::seconds(3600));
    }
}
