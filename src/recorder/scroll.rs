//! Teleprompter scroll driver
//!
//! Advances the script offset at a constant rate while running. The driver
//! knows nothing about the script length; bounding or wrapping the offset is
//! up to the caller.

use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Nominal display refresh interval (~60Hz)
pub const TICK_INTERVAL: Duration = Duration::from_micros(16_667);

struct ScrollInner {
    offset: f64,
    speed: f64,
    running: bool,
    last_tick: Option<Instant>,
    task: Option<JoinHandle<()>>,
}

/// Shared handle to the scroll state; clones observe the same offset
#[derive(Clone)]
pub struct ScrollDriver {
    inner: Arc<Mutex<ScrollInner>>,
}

impl ScrollDriver {
    /// Create a stopped driver scrolling at `speed` points per second
    pub fn new(speed: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ScrollInner {
                offset: 0.0,
                speed,
                running: false,
                last_tick: None,
                task: None,
            })),
        }
    }

    /// Current offset in points; decreases while scrolling
    pub fn offset(&self) -> f64 {
        self.inner.lock().offset
    }

    pub fn speed(&self) -> f64 {
        self.inner.lock().speed
    }

    /// Change the speed; applies from the next tick
    pub fn set_speed(&self, speed: f64) {
        self.inner.lock().speed = speed;
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    /// Start advancing on the refresh timer
    ///
    /// No-op if already running. Must be called within a tokio runtime.
    pub fn play(&self) {
        let mut inner = self.inner.lock();
        if inner.running {
            return;
        }
        inner.running = true;
        inner.last_tick = Some(Instant::now());

        let weak = Arc::downgrade(&self.inner);
        inner.task = Some(tokio::spawn(run_ticks(weak)));
        tracing::debug!("Scroll driver started at {} pt/s", inner.speed);
    }

    /// Halt advancement, keeping the offset
    pub fn pause(&self) {
        let mut inner = self.inner.lock();
        inner.running = false;
        inner.last_tick = None;
        if let Some(task) = inner.task.take() {
            task.abort();
        }
    }

    /// Halt advancement and reset the offset to zero
    pub fn stop(&self) {
        self.pause();
        self.inner.lock().offset = 0.0;
    }

    /// Advance by `elapsed` if running
    pub fn tick(&self, elapsed: Duration) {
        let mut inner = self.inner.lock();
        if inner.running {
            inner.offset -= inner.speed * elapsed.as_secs_f64();
        }
    }
}

impl Default for ScrollDriver {
    fn default() -> Self {
        Self::new(0.0)
    }
}

async fn run_ticks(inner: Weak<Mutex<ScrollInner>>) {
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let Some(shared) = inner.upgrade() else {
            break;
        };
        let mut state = shared.lock();
        if !state.running {
            break;
        }
        let now = Instant::now();
        let elapsed = state.last_tick.map(|t| now - t).unwrap_or_default();
        state.last_tick = Some(now);
        state.offset -= state.speed * elapsed.as_secs_f64();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tick_only_advances_while_running() {
        let driver = ScrollDriver::new(30.0);
        driver.tick(Duration::from_secs(1));
        assert_eq!(driver.offset(), 0.0);

        driver.play();
        driver.tick(Duration::from_secs(2));
        assert!((driver.offset() + 60.0).abs() < 1e-9);

        driver.pause();
        driver.tick(Duration::from_secs(2));
        assert!((driver.offset() + 60.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_stop_resets_offset() {
        let driver = ScrollDriver::new(45.0);
        driver.play();
        driver.tick(Duration::from_millis(1234));
        assert!(driver.offset() < 0.0);

        driver.stop();
        assert_eq!(driver.offset(), 0.0);
        assert!(!driver.is_running());
    }

    #[tokio::test]
    async fn test_play_twice_is_noop() {
        let driver = ScrollDriver::new(10.0);
        driver.play();
        driver.tick(Duration::from_secs(1));
        driver.play();
        assert!((driver.offset() + 10.0).abs() < 1e-9);
        assert!(driver.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_five_seconds_at_thirty_points() {
        let driver = ScrollDriver::new(30.0);
        driver.play();
        tokio::time::sleep(Duration::from_secs(5)).await;
        driver.pause();

        assert!((driver.offset().abs() - 150.0).abs() < 1.0, "offset {}", driver.offset());
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_change_applies_to_next_tick() {
        let driver = ScrollDriver::new(10.0);
        driver.play();
        tokio::time::sleep(Duration::from_secs(1)).await;
        driver.set_speed(50.0);
        tokio::time::sleep(Duration::from_secs(1)).await;
        driver.pause();

        assert!((driver.offset().abs() - 60.0).abs() < 1.0, "offset {}", driver.offset());
    }
}
