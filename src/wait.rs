//! Wait strategies used by both ends of the ring buffer.
//!
//! Producers wait here when the buffer is full and the consumer waits here when
//! nothing new has been published. The strategy only decides *how* a task waits;
//! the condition being waited on is always re-checked from the shared sequences.

use serde::Deserialize;
use tokio::sync::Notify;

/// Spins before a `BusySpin` waiter gives the scheduler a turn.
const SPIN_LIMIT: u32 = 128;

/// How a task waits for the other side of the buffer to make progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStrategy {
    /// Park on a [`Notify`] until the other side signals progress.
    ///
    /// Lowest CPU usage; costs a wakeup per signal.
    #[default]
    Blocking,
    /// Re-check after every `tokio::task::yield_now()`.
    Yielding,
    /// Spin on the CPU, yielding to the scheduler every few iterations.
    ///
    /// Lowest latency, burns a core while idle.
    BusySpin,
}

impl WaitStrategy {
    /// Waits until `ready` returns `true`.
    ///
    /// `signal` is the notifier the other side pokes through [`WaitStrategy::wake`].
    /// This future holds no state between polls, so dropping it is always safe.
    pub(crate) async fn wait_until(self, signal: &Notify, mut ready: impl FnMut() -> bool) {
        match self {
            WaitStrategy::Blocking => loop {
                if ready() {
                    return;
                }

                // Register before the second check so a wake between the two is not lost.
                let notified = signal.notified();

                if ready() {
                    return;
                }

                notified.await;
            },
            WaitStrategy::Yielding => {
                while !ready() {
                    tokio::task::yield_now().await;
                }
            }
            WaitStrategy::BusySpin => {
                let mut spins = 0u32;
                while !ready() {
                    if spins < SPIN_LIMIT {
                        spins += 1;
                        std::hint::spin_loop();
                    } else {
                        spins = 0;
                        tokio::task::yield_now().await;
                    }
                }
            }
        }
    }

    /// Signals waiters parked in [`WaitStrategy::wait_until`].
    ///
    /// Only `Blocking` waiters park, so the other strategies skip the notify.
    #[inline]
    pub(crate) fn wake(self, signal: &Notify) {
        if self == WaitStrategy::Blocking {
            signal.notify_waiters();
        }
    }

    /// Wakes every waiter regardless of strategy, used on state transitions.
    #[inline]
    pub(crate) fn wake_all(signal: &Notify) {
        signal.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::{Duration, timeout};

    async fn wait_is_released_by_flag(strategy: WaitStrategy) {
        let signal = Arc::new(Notify::new());
        let flag = Arc::new(AtomicBool::new(false));

        let waiter = {
            let signal = signal.clone();
            let flag = flag.clone();
            tokio::spawn(async move {
                strategy
                    .wait_until(&signal, || flag.load(Ordering::Acquire))
                    .await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished(), "{strategy:?} waiter returned early");

        flag.store(true, Ordering::Release);
        strategy.wake(&signal);

        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should be released")
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_strategy_wakes_on_signal() {
        wait_is_released_by_flag(WaitStrategy::Blocking).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_yielding_strategy_observes_flag() {
        wait_is_released_by_flag(WaitStrategy::Yielding).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_busy_spin_strategy_observes_flag() {
        wait_is_released_by_flag(WaitStrategy::BusySpin).await;
    }

    #[tokio::test]
    async fn test_ready_condition_returns_immediately() {
        let signal = Notify::new();
        timeout(
            Duration::from_millis(100),
            WaitStrategy::Blocking.wait_until(&signal, || true),
        )
        .await
        .expect("an already satisfied condition must not park");
    }

    #[test]
    fn test_strategy_deserializes_from_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            strategy: WaitStrategy,
        }

        let parsed: Wrapper = toml::from_str("strategy = \"busy_spin\"").unwrap();
        assert_eq!(parsed.strategy, WaitStrategy::BusySpin);
        assert_eq!(WaitStrategy::default(), WaitStrategy::Blocking);
    }
}
