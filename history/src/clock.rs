use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

/// Source of turn timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock that never hands out the same nanosecond twice in a process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(now_nano())
    }
}

static LAST_NANO: AtomicI64 = AtomicI64::new(0);

/// Return a monotonically increasing Unix nanosecond timestamp.
pub fn now_nano() -> i64 {
    let now = Utc::now().timestamp_nanos_opt().unwrap_or(0);
    loop {
        let old = LAST_NANO.load(Ordering::Relaxed);
        let next = if now > old { now } else { old + 1 };
        if LAST_NANO
            .compare_exchange_weak(old, next, Ordering::Release, Ordering::Relaxed)
            .is_ok()
        {
            return next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_nano_strictly_increasing() {
        let mut last = now_nano();
        for _ in 0..10_000 {
            let next = now_nano();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn test_system_clock_concurrent_unique() {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                std::thread::spawn(|| {
                    (0..1000).map(|_| SystemClock.now()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<DateTime<Utc>> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total);
    }
}
