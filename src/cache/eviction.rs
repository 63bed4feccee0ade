//! Eviction scheduling
//!
//! At most one eviction pass is ever in flight. Size breaches move the
//! state machine `Idle -> Scheduled`; the background worker moves it to
//! `Running` for every pass (size-triggered or periodic) and back to
//! `Idle` when done. Breaches raised while a pass is scheduled or running
//! are absorbed by that pass.
//!
//! Each tick of the periodic timer also drops entries the slowest cursor
//! has consumed and entries past the age threshold.

use std::cmp::Reverse;
use std::sync::Arc;

use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::ledger_cache::EvictionCandidate;
use super::manager::ManagerShared;

/// Eviction pass state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    Idle,
    Scheduled,
    Running,
}

/// Coalescing pass scheduler
pub(crate) struct EvictionScheduler {
    state: watch::Sender<PassState>,
    wake: Notify,
}

impl EvictionScheduler {
    pub fn new() -> Self {
        let (state, _) = watch::channel(PassState::Idle);
        Self {
            state,
            wake: Notify::new(),
        }
    }

    pub fn state(&self) -> PassState {
        *self.state.borrow()
    }

    /// Ask for a size-triggered pass; `true` if this call scheduled it
    pub fn request(&self) -> bool {
        let scheduled = self.state.send_if_modified(|state| {
            if *state == PassState::Idle {
                *state = PassState::Scheduled;
                true
            } else {
                false
            }
        });
        if scheduled {
            self.wake.notify_one();
        }
        scheduled
    }

    fn begin(&self) {
        self.state.send_replace(PassState::Running);
    }

    /// End the current pass, going straight back to `Scheduled` when
    /// `over_budget` still holds
    ///
    /// The re-check is against the max size, not the eviction target; a
    /// pass only evicts above the max.
    ///
    /// `over_budget` runs under the state lock, so a breach racing with the
    /// end of a pass is either absorbed here or schedules its own pass.
    fn finish(&self, over_budget: impl FnOnce() -> bool) {
        let mut rescheduled = false;
        self.state.send_modify(|state| {
            rescheduled = over_budget();
            *state = if rescheduled {
                PassState::Scheduled
            } else {
                PassState::Idle
            };
        });
        if rescheduled {
            self.wake.notify_one();
        }
    }

    /// Resolve once no pass is scheduled or running
    pub async fn wait_idle(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|state| *state == PassState::Idle).await;
    }
}

/// Order victims: preferred entries first, then oldest insertion first
pub(crate) fn order_victims<T>(candidates: &mut [(T, EvictionCandidate)]) {
    candidates.sort_unstable_by_key(|(_, c)| (Reverse(c.preferred), c.sequence));
}

/// Background worker driving both eviction mechanisms
pub(crate) async fn run_evictor(shared: Arc<ManagerShared>, shutdown: CancellationToken) {
    let period = shared.eviction_interval();
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(interval = ?period, "Cache evictor started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => run_pass(&shared, true),
            _ = shared.scheduler().wake.notified() => run_pass(&shared, false),
        }
    }

    // Release anyone waiting on a pass that will never run
    shared.scheduler().finish(|| false);
    debug!("Cache evictor stopped");
}

fn run_pass(shared: &ManagerShared, periodic: bool) {
    let scheduler = shared.scheduler();
    scheduler.begin();

    if periodic {
        shared.evict_consumed();
        shared.evict_expired();
    }
    shared.evict_to_watermark();

    // Inserts that landed during the pass may have breached the budget again
    scheduler.finish(|| shared.over_budget());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Position;

    fn candidate(sequence: u64, preferred: bool) -> EvictionCandidate {
        EvictionCandidate {
            position: Position::new(1, sequence),
            sequence,
            size: 1,
            preferred,
        }
    }

    #[test]
    fn test_order_prefers_marked_then_oldest() {
        let mut victims = vec![
            ("a", candidate(5, false)),
            ("b", candidate(9, true)),
            ("c", candidate(1, false)),
            ("d", candidate(7, true)),
        ];
        order_victims(&mut victims);
        let order: Vec<_> = victims.iter().map(|(n, _)| *n).collect();
        assert_eq!(order, vec!["d", "b", "c", "a"]);
    }

    #[tokio::test]
    async fn test_requests_coalesce() {
        let scheduler = EvictionScheduler::new();
        assert_eq!(scheduler.state(), PassState::Idle);

        assert!(scheduler.request());
        assert!(!scheduler.request());
        assert_eq!(scheduler.state(), PassState::Scheduled);

        scheduler.begin();
        assert!(!scheduler.request());
        assert_eq!(scheduler.state(), PassState::Running);

        scheduler.finish(|| false);
        assert!(scheduler.request());
    }

    #[tokio::test]
    async fn test_finish_reschedules_when_over_budget() {
        let scheduler = EvictionScheduler::new();
        scheduler.request();
        scheduler.begin();
        scheduler.finish(|| true);
        assert_eq!(scheduler.state(), PassState::Scheduled);

        scheduler.begin();
        scheduler.finish(|| false);
        assert_eq!(scheduler.state(), PassState::Idle);
    }

    #[tokio::test]
    async fn test_wait_idle_resolves_after_finish() {
        let scheduler = Arc::new(EvictionScheduler::new());
        scheduler.wait_idle().await;

        scheduler.request();
        let waiter = {
            let scheduler = scheduler.clone();
            tokio::spawn(async move { scheduler.wait_idle().await })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        scheduler.begin();
        scheduler.finish(|| false);
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
