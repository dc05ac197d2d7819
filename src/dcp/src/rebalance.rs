// Copyright 2026 DCP Stream Coordinator Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Debounced rebalance trigger (spec §4.5). Grounded in the teacher's
//! `tokio::select!`-driven loop style in
//! `src/stream/src/task/barrier_manager.rs`: a background task owns the
//! timer and is reset, not cancelled-and-respawned, on each new trigger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

/// Narrow capability a [`RebalanceController`] needs back from the
/// coordinator: close the current epoch and reopen against freshly-queried
/// ownership. Kept separate from a full coordinator reference for the same
/// reason `Checkpoint` only holds `Arc<OffsetTable>` (DESIGN.md).
#[async_trait]
pub(crate) trait RebalanceTarget: Send + Sync {
    async fn close_for_rebalance(&self);
    async fn reopen_for_rebalance(&self);
    fn fire_before_rebalance_end(&self);
    fn fire_after_rebalance_end(&self);
    fn record_rebalance_metric(&self);
}

pub(crate) struct RebalanceController {
    balancing: AtomicBool,
    reset_tx: mpsc::UnboundedSender<()>,
    task: AsyncMutex<Option<JoinHandle<()>>>,
    /// Serializes the timer-fire sequence itself: acquired for the duration
    /// of close→reopen so a second debounced fire can't interleave.
    rebalance_mutex: AsyncMutex<()>,
}

impl RebalanceController {
    pub(crate) fn new<T>(target: Arc<T>, delay: Duration) -> Arc<Self>
    where
        T: RebalanceTarget + 'static,
    {
        let (reset_tx, mut reset_rx) = mpsc::unbounded_channel::<()>();
        let controller = Arc::new(Self {
            balancing: AtomicBool::new(false),
            reset_tx,
            task: AsyncMutex::new(None),
            rebalance_mutex: AsyncMutex::new(()),
        });

        let weak_controller = Arc::downgrade(&controller);
        let handle = tokio::spawn(async move {
            loop {
                // Wait for the first trigger of a debounce window.
                if reset_rx.recv().await.is_none() {
                    return;
                }
                loop {
                    tokio::select! {
                        biased;
                        reset = reset_rx.recv() => {
                            if reset.is_none() {
                                return;
                            }
                            // Timer reset: loop back and wait out a fresh `delay`.
                            continue;
                        }
                        _ = tokio::time::sleep(delay) => {
                            break;
                        }
                    }
                }
                let Some(controller) = weak_controller.upgrade() else {
                    return;
                };
                controller.fire(&target).await;
            }
        });
        *controller.task.try_lock().expect("uncontended at construction") = Some(handle);
        controller
    }

    /// Debounced trigger (spec §4.5): resets the pending timer if one is
    /// already armed, otherwise arms a new one. `Dynamic` membership callers
    /// pass `delay = Duration::ZERO` per spec.md §4.5.
    pub(crate) fn trigger(&self) {
        self.balancing.store(true, Ordering::SeqCst);
        let _ = self.reset_tx.send(());
    }

    pub(crate) fn is_balancing(&self) -> bool {
        self.balancing.load(Ordering::SeqCst)
    }

    async fn fire<T: RebalanceTarget + ?Sized>(&self, target: &Arc<T>) {
        let _guard = self.rebalance_mutex.lock().await;
        target.fire_before_rebalance_end();
        target.reopen_for_rebalance().await;
        target.record_rebalance_metric();
        self.balancing.store(false, Ordering::SeqCst);
        target.fire_after_rebalance_end();
    }

    /// Synchronous half of `Rebalance()` (spec §4.5): closes the current
    /// epoch before the debounce timer is armed. The caller arms the timer
    /// via [`RebalanceController::trigger`] immediately after.
    pub(crate) async fn close_before_arming<T: RebalanceTarget>(&self, target: &Arc<T>) {
        target.close_for_rebalance().await;
    }
}

impl Drop for RebalanceController {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.task.try_lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::Notify;

    use super::*;

    #[derive(Default)]
    struct CountingTarget {
        closes: AtomicUsize,
        reopens: AtomicUsize,
        fired: Arc<Notify>,
    }

    #[async_trait]
    impl RebalanceTarget for CountingTarget {
        async fn close_for_rebalance(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        async fn reopen_for_rebalance(&self) {
            self.reopens.fetch_add(1, Ordering::SeqCst);
        }
        fn fire_before_rebalance_end(&self) {}
        fn fire_after_rebalance_end(&self) {
            self.fired.notify_one();
        }
        fn record_rebalance_metric(&self) {}
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_trigger_fires_once_after_reset_delay() {
        let target = Arc::new(CountingTarget::default());
        let fired = target.fired.clone();
        let controller = RebalanceController::new(target.clone(), Duration::from_millis(500));

        controller.trigger();
        tokio::time::advance(Duration::from_millis(200)).await;
        controller.trigger(); // resets the timer
        tokio::time::advance(Duration::from_millis(500)).await;

        fired.notified().await;
        assert_eq!(target.reopens.load(Ordering::SeqCst), 1);
        assert!(!controller.is_balancing());
    }

    #[tokio::test]
    async fn close_before_arming_runs_synchronously() {
        let target = Arc::new(CountingTarget::default());
        let controller = RebalanceController::new(target.clone(), Duration::from_millis(10));
        controller.close_before_arming(&target).await;
        assert_eq!(target.closes.load(Ordering::SeqCst), 1);
    }
}
