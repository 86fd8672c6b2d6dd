//! Time-windowed event counter.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Granularity of the window.
pub const EPOCH: Duration = Duration::from_secs(5);

/// Counts events over a sliding window made of fixed [`EPOCH`]s.
///
/// Events older than the window fall out as epochs rotate; reads see the sum
/// of the current epoch and the ones still inside the window.
#[derive(Debug)]
pub struct RecentCounter {
    inner: Mutex<Epochs>,
}

#[derive(Debug)]
struct Epochs {
    counts: Vec<u64>,
    current: usize,
    current_start: Instant,
}

impl RecentCounter {
    /// Counter covering `window`, rounded up to whole epochs.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        let epochs = window.as_nanos().div_ceil(EPOCH.as_nanos()).max(1);
        let epochs = usize::try_from(epochs).unwrap_or(usize::MAX).min(1024);
        Self {
            inner: Mutex::new(Epochs {
                counts: vec![0; epochs],
                current: 0,
                current_start: Instant::now(),
            }),
        }
    }

    /// Record `n` events now.
    pub fn add(&self, n: u64) {
        let mut epochs = self.inner.lock();
        epochs.rotate(Instant::now());
        let current = epochs.current;
        epochs.counts[current] += n;
    }

    /// Events recorded within the window.
    #[must_use]
    pub fn get(&self) -> u64 {
        let mut epochs = self.inner.lock();
        epochs.rotate(Instant::now());
        epochs.counts.iter().sum()
    }
}

impl Epochs {
    fn rotate(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.current_start);
        let steps = elapsed.as_nanos() / EPOCH.as_nanos();
        if steps == 0 {
            return;
        }

        let len = self.counts.len();
        let clear = usize::try_from(steps).unwrap_or(usize::MAX).min(len);
        for _ in 0..clear {
            self.current = (self.current + 1) % len;
            self.counts[self.current] = 0;
        }

        let remainder = elapsed.as_nanos() % EPOCH.as_nanos();
        self.current_start = now - Duration::from_nanos(u64::try_from(remainder).unwrap_or(0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_counts_within_window() {
        let counter = RecentCounter::new(Duration::from_secs(15));
        counter.add(1);
        counter.add(2);
        tokio::time::advance(Duration::from_secs(6)).await;
        counter.add(4);

        assert_eq!(counter.get(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_epochs_expire() {
        let counter = RecentCounter::new(Duration::from_secs(10));
        counter.add(3);
        tokio::time::advance(Duration::from_secs(6)).await;
        counter.add(1);
        assert_eq!(counter.get(), 4);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(counter.get(), 1);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(counter.get(), 0);
    }
}
