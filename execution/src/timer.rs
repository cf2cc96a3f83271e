//! Cancellable one-shot timers.
//!
//! A [Timer] owns the task that will run its action; dropping or replacing the
//! handle aborts that task. Aborting can lose the race against a task that has
//! already woken, so every action receives the generation of the handle that
//! scheduled it and must check that the state it is about to touch still holds a
//! handle with that generation. Generations come from one process-wide counter and
//! are never reused.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tokio::{task::JoinHandle, time::Instant};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Longest delay any configured or announced timer may use.
pub const MAX_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug)]
pub struct Timer {
    generation: u64,
    deadline: Instant,
    handle: JoinHandle<()>,
}

impl Timer {
    /// Run `action` once `delay` has elapsed. Must be called within a tokio runtime.
    pub fn after<F>(delay: Duration, action: F) -> Self
    where
        F: FnOnce(u64) + Send + 'static,
    {
        Self::at(Instant::now() + delay, action)
    }

    /// Run `action` at `deadline` (immediately if it already passed).
    pub fn at<F>(deadline: Instant, action: F) -> Self
    where
        F: FnOnce(u64) + Send + 'static,
    {
        let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            action(generation);
        });
        Self {
            generation,
            deadline,
            handle,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Whether `slot` still holds the handle that produced `generation`.
pub fn is_current(slot: &Option<Timer>, generation: u64) -> bool {
    slot.as_ref().map(Timer::generation) == Some(generation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let _timer = Timer::after(Duration::from_secs(5), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sleep(Duration::from_millis(4_999)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        sleep(Duration::from_millis(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_timer_never_fires() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let timer = Timer::after(Duration::from_secs(1), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(timer);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generations_are_unique_and_checked() {
        let first = Timer::after(Duration::from_secs(1), |_| {});
        let second = Timer::after(Duration::from_secs(1), |_| {});
        assert_ne!(first.generation(), second.generation());

        let stale = first.generation();
        let slot = Some(second);
        assert!(!is_current(&slot, stale));
        assert!(is_current(&slot, slot.as_ref().unwrap().generation()));
        assert!(!is_current(&None, stale));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remaining_counts_down() {
        let timer = Timer::after(Duration::from_secs(10), |_| {});
        sleep(Duration::from_secs(4)).await;
        assert_eq!(timer.remaining(Instant::now()), Duration::from_secs(6));
    }
}
