//! Relay settling (debounce) tracking.
//!
//! Each channel whose relay membership changes gets a "settling until"
//! deadline. Deadlines are evaluated lazily when polled or waited on; nothing
//! ticks in the background. Uses `tokio::time::Instant` so tests running on a
//! paused clock behave deterministically.

use super::channel::ChannelId;
use crate::error::{SwitchError, SwitchResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};

// Roughly 30 years; stands in for deadlines `Instant` cannot represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(now: Instant, delay: Duration) -> Instant {
    now.checked_add(delay)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

/// Per-channel settling deadlines.
#[derive(Debug, Default)]
pub struct DebounceController {
    deadlines: Mutex<HashMap<ChannelId, Instant>>,
}

impl DebounceController {
    /// Controller with nothing settling.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or extend) settling for each `(channel, settling_time)`.
    ///
    /// A deadline never moves earlier: a channel touched twice settles by the
    /// later of the two deadlines.
    pub fn arm(&self, channels: impl IntoIterator<Item = (ChannelId, Duration)>) {
        let now = Instant::now();
        let mut deadlines = self.deadlines.lock();
        for (channel, settling_time) in channels {
            if settling_time.is_zero() {
                continue;
            }
            let until = deadline_after(now, settling_time);
            deadlines
                .entry(channel)
                .and_modify(|existing| *existing = (*existing).max(until))
                .or_insert(until);
        }
    }

    /// Whether `channel` has finished settling.
    pub fn is_debounced(&self, channel: ChannelId) -> bool {
        let now = Instant::now();
        let mut deadlines = self.deadlines.lock();
        match deadlines.get(&channel) {
            Some(until) if *until > now => false,
            Some(_) => {
                deadlines.remove(&channel);
                true
            }
            None => true,
        }
    }

    /// Whether every channel has finished settling.
    pub fn all_debounced(&self) -> bool {
        self.latest_deadline().is_none()
    }

    /// Channels still settling, in id order.
    pub fn settling(&self) -> Vec<ChannelId> {
        let now = Instant::now();
        let mut deadlines = self.deadlines.lock();
        deadlines.retain(|_, until| *until > now);
        let mut pending: Vec<ChannelId> = deadlines.keys().copied().collect();
        pending.sort();
        pending
    }

    /// Latest pending deadline, pruning expired ones.
    fn latest_deadline(&self) -> Option<Instant> {
        let now = Instant::now();
        let mut deadlines = self.deadlines.lock();
        deadlines.retain(|_, until| *until > now);
        deadlines.values().copied().max()
    }

    /// Wait until nothing is settling or `max_time` elapses.
    ///
    /// Deadlines armed while waiting are honored. On expiry the error lists
    /// the ids still settling; state is left untouched so the caller can poll
    /// again. `name_of` maps ids to the names reported in the error. A
    /// `max_time` too large to add to the current instant waits without bound.
    pub async fn wait(
        &self,
        max_time: Duration,
        name_of: impl Fn(ChannelId) -> String,
    ) -> SwitchResult<()> {
        let give_up = Instant::now().checked_add(max_time);
        loop {
            let Some(until) = self.latest_deadline() else {
                return Ok(());
            };
            if let Some(give_up) = give_up.filter(|&give_up| until > give_up) {
                sleep_until(give_up).await;
                let pending = self.settling();
                if pending.is_empty() {
                    return Ok(());
                }
                return Err(SwitchError::Timeout {
                    waited: max_time,
                    pending: pending.into_iter().map(name_of).collect(),
                });
            }
            sleep_until(until).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(id: ChannelId) -> String {
        format!("CH{}", id.index())
    }

    #[tokio::test]
    async fn zero_settling_time_is_immediately_debounced() {
        let controller = DebounceController::new();
        controller.arm([(ChannelId(0), Duration::ZERO)]);
        assert!(controller.is_debounced(ChannelId(0)));
        assert!(controller.all_debounced());
        assert!(controller.wait(Duration::ZERO, label).await.is_ok());
    }

    #[tokio::test]
    async fn times_out_then_settles() {
        let controller = DebounceController::new();
        controller.arm([
            (ChannelId(0), Duration::from_millis(60)),
            (ChannelId(1), Duration::from_millis(5)),
        ]);
        assert!(!controller.is_debounced(ChannelId(0)));

        let err = controller
            .wait(Duration::from_millis(10), label)
            .await
            .unwrap_err();
        match err {
            SwitchError::Timeout { waited, pending } => {
                assert_eq!(waited, Duration::from_millis(10));
                assert_eq!(pending, vec!["CH0".to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        controller.wait(Duration::from_secs(1), label).await.unwrap();
        assert!(controller.is_debounced(ChannelId(0)));
        assert!(controller.settling().is_empty());
    }

    #[tokio::test]
    async fn rearming_never_shortens_a_deadline() {
        let controller = DebounceController::new();
        controller.arm([(ChannelId(3), Duration::from_millis(80))]);
        controller.arm([(ChannelId(3), Duration::from_millis(1))]);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!controller.is_debounced(ChannelId(3)));
        assert_eq!(controller.settling(), vec![ChannelId(3)]);
    }

    #[tokio::test]
    async fn unbounded_wait_returns_once_settled() {
        let controller = DebounceController::new();
        controller.arm([(ChannelId(0), Duration::from_millis(20))]);
        controller.wait(Duration::MAX, label).await.unwrap();
        assert!(controller.all_debounced());
    }

    #[tokio::test]
    async fn huge_settling_time_is_clamped() {
        let controller = DebounceController::new();
        controller.arm([(ChannelId(2), Duration::MAX)]);
        assert!(!controller.is_debounced(ChannelId(2)));

        let err = controller
            .wait(Duration::from_millis(5), label)
            .await
            .unwrap_err();
        match err {
            SwitchError::Timeout { pending, .. } => assert_eq!(pending, vec!["CH2".to_string()]),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
