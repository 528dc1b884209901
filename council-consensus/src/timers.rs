use std::{future::Future, time::Duration};

use rand::Rng;
use tokio::{sync::Mutex, task::JoinHandle};

/// Background jobs owned by one engine.
///
/// Every job is a plain tokio task; `cancel_all` aborts them, which is how an
/// engine stops its election timer, heartbeats, watchdogs and tickers.
#[derive(Debug, Default)]
pub struct TimerSet {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `task` repeatedly, sleeping `period` (plus up to `jitter`) before
    /// each run. The sleep is redrawn every iteration.
    pub async fn every<F, Fut>(&self, period: Duration, jitter: Option<Duration>, mut task: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(with_jitter(period, jitter)).await;
                task().await;
            }
        });
        self.handles.lock().await.push(handle);
    }

    pub async fn cancel_all(&self) -> usize {
        let mut handles = self.handles.lock().await;
        let count = handles.len();
        for handle in handles.drain(..) {
            handle.abort();
        }
        count
    }

    pub async fn len(&self) -> usize {
        self.handles.lock().await.len()
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        for handle in self.handles.get_mut().drain(..) {
            handle.abort();
        }
    }
}

/// `base` plus a uniformly drawn extra in `[0, jitter]`.
pub fn with_jitter(base: Duration, jitter: Option<Duration>) -> Duration {
    match jitter {
        Some(j) if !j.is_zero() => {
            let extra = rand::thread_rng().gen_range(0..=j.as_millis() as u64);
            base + Duration::from_millis(extra)
        }
        _ => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[test]
    fn test_jitter_stays_in_range() {
        let base = Duration::from_millis(150);
        for _ in 0..100 {
            let d = with_jitter(base, Some(Duration::from_millis(150)));
            assert!(d >= base && d <= Duration::from_millis(300));
        }
        assert_eq!(with_jitter(base, None), base);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_stops_recurring_job() {
        let timers = TimerSet::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        timers
            .every(Duration::from_millis(10), None, move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        tokio::time::sleep(Duration::from_millis(55)).await;
        let seen = hits.load(Ordering::SeqCst);
        assert!(seen >= 4);

        assert_eq!(timers.cancel_all().await, 1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(hits.load(Ordering::SeqCst), seen);
        assert_eq!(timers.len().await, 0);
    }
}
