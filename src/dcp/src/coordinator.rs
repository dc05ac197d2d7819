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

//! The Stream Coordinator: owns lifecycle (`Open`/`Close`/`Rebalance`/`Save`),
//! dispatches inbound events, enforces per-vBucket monotonicity, and
//! arbitrates the two termination paths. Grounded in the teacher's
//! `BarrierManager` (`src/stream/src/task/barrier_manager.rs`) for the
//! channel/latch-based shutdown-race pattern, generalized per DESIGN.md.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::{Mutex as SyncMutex, RwLock as SyncRwLock};
use prometheus::Registry;
use tokio::sync::Notify;
use tracing::Instrument;

use crate::checkpoint::Checkpoint;
use crate::config::CoordinatorConfig;
use crate::consumer::{AckSink, Consumer, ListenerContext};
use crate::error::{CoordinatorError, CoordinatorResult};
use crate::event::{DcpStreamEndContext, Event, ListenerArgs};
use crate::hooks::{self, Hooks};
use crate::membership::{MembershipType, VBucketDiscovery};
use crate::metadata_store::MetadataStore;
use crate::metrics::{CheckpointMetric, CoordinatorMetrics, Metric};
use crate::observer::Observer;
use crate::offset::{DirtySet, Offset, OffsetTable};
use crate::rebalance::{RebalanceController, RebalanceTarget};
use crate::rollback::RollbackMitigation;
use crate::supervisor::Supervisor;
use crate::transport::{StreamHandle, Transport};

const WINNER_NONE: u8 = 0;
const WINNER_CLOSE: u8 = 1;
const WINNER_END_EVENT: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TerminationWinner {
    Close,
    EndEvent,
}

/// Exactly-one-shot race arbiter for local `Close` vs. remote all-ended
/// termination (spec §4.6 `wait`, §5, §8 "Single termination"). A CAS on a
/// single atomic stands in for the two single-slot channels plus booleans
/// spec.md §9 offers as alternatives — the external contract (exactly one
/// path wins) is unchanged.
struct TerminationLatch {
    winner: AtomicU8,
    notify: Notify,
}

impl TerminationLatch {
    fn new() -> Self {
        Self {
            winner: AtomicU8::new(WINNER_NONE),
            notify: Notify::new(),
        }
    }

    fn reset(&self) {
        self.winner.store(WINNER_NONE, Ordering::Release);
    }

    /// Returns `true` iff this call latched the winner (the flag is set
    /// before any notification goes out, per spec.md §5's ordering
    /// requirement).
    fn latch_close(&self) -> bool {
        self.winner
            .compare_exchange(WINNER_NONE, WINNER_CLOSE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn latch_end_event(&self) -> bool {
        self.winner
            .compare_exchange(
                WINNER_NONE,
                WINNER_END_EVENT,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn notify_waiter(&self) {
        self.notify.notify_one();
    }

    async fn wait(&self) -> TerminationWinner {
        loop {
            let notified = self.notify.notified();
            match self.winner.load(Ordering::Acquire) {
                WINNER_CLOSE => return TerminationWinner::Close,
                WINNER_END_EVENT => return TerminationWinner::EndEvent,
                _ => notified.await,
            }
        }
    }
}

/// Public handle to a running (or not-yet-opened) coordinator. Cheap to
/// clone; every clone shares the same underlying state.
#[derive(Clone)]
pub struct Coordinator(Arc<CoordinatorInner>);

impl Coordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CoordinatorConfig,
        discovery: Arc<dyn VBucketDiscovery>,
        transport: Arc<dyn Transport>,
        metadata_store: Arc<dyn MetadataStore>,
        consumer: Arc<dyn Consumer>,
        rollback_mitigation: Option<Arc<dyn RollbackMitigation>>,
        hooks: Hooks,
        registry: &Registry,
    ) -> anyhow::Result<Self> {
        let metrics = Arc::new(CoordinatorMetrics::new(registry)?);
        let membership_type = discovery.membership_type();
        let (fatal_tx, fatal_rx) = tokio::sync::mpsc::unbounded_channel();

        let inner = Arc::new_cyclic(|weak: &Weak<CoordinatorInner>| CoordinatorInner {
            self_weak: weak.clone(),
            config,
            discovery,
            transport,
            metadata_store,
            consumer,
            rollback_mitigation,
            hooks,
            metrics,
            offsets: Arc::new(OffsetTable::new()),
            dirty: Arc::new(DirtySet::new()),
            vb_id_range: SyncMutex::new(None),
            observers: SyncRwLock::new(HashMap::new()),
            checkpoint: SyncMutex::new(None),
            supervisor: SyncMutex::new(None),
            rebalance: SyncMutex::new(None),
            active_stream_count: AtomicI64::new(0),
            open: AtomicBool::new(false),
            close_with_cancel: AtomicBool::new(false),
            latch: TerminationLatch::new(),
            stop_notify: Notify::new(),
            fatal_tx,
            fatal_rx: tokio::sync::Mutex::new(fatal_rx),
        });

        let rebalance_delay = if membership_type == MembershipType::Dynamic {
            std::time::Duration::ZERO
        } else {
            inner.config.rebalance_delay
        };
        *inner.rebalance.lock() = Some(RebalanceController::new(inner.clone(), rebalance_delay));

        Ok(Self(inner))
    }

    pub async fn open(&self) -> CoordinatorResult<()> {
        self.0.open().await
    }

    pub async fn close(&self, close_with_cancel: bool) -> CoordinatorResult<()> {
        self.0.close(close_with_cancel).await
    }

    pub async fn rebalance(&self) -> CoordinatorResult<()> {
        self.0.rebalance().await
    }

    pub async fn save(&self) -> CoordinatorResult<()> {
        let checkpoint = self
            .0
            .checkpoint
            .lock()
            .clone()
            .ok_or(CoordinatorError::NotOpen)?;
        checkpoint.save().await
    }

    pub fn is_open(&self) -> bool {
        self.0.open.load(Ordering::Acquire)
    }

    pub fn get_offsets(&self) -> (HashMap<u16, Offset>, HashSet<u16>, bool) {
        (
            self.0.offsets.snapshot(),
            self.0.dirty.snapshot(),
            self.0.dirty.any_dirty(),
        )
    }

    pub fn get_observers(&self) -> HashMap<u16, Arc<Observer>> {
        self.0.observers.read().clone()
    }

    pub fn get_metric(&self) -> (Metric, i64) {
        (
            self.0.metrics.metric(),
            self.0.active_stream_count.load(Ordering::Relaxed),
        )
    }

    pub fn get_checkpoint_metric(&self) -> CheckpointMetric {
        self.0.metrics.checkpoint_metric()
    }

    /// Clears `DirtySet` wholesale. Per DESIGN.md's Open Question decision,
    /// callers are assumed single-writer with respect to each other and with
    /// respect to the checkpoint scheduler's own clearing.
    pub fn unmark_dirty_offsets(&self) {
        self.0.dirty.clear();
    }

    /// Resolves once the coordinator has fully terminated (either path) and
    /// is not about to reopen for a rebalance — the adaptation of spec.md's
    /// externally-provided `stopCh` into an owned notification primitive.
    pub async fn wait_for_termination(&self) {
        self.0.stop_notify.notified().await;
    }

    /// Awaits the next coordinator-global failure (spec §7): retry exhaustion
    /// on a per-vBucket reopen, which happens on a detached task nobody is
    /// otherwise awaiting. `Open`'s own all-or-nothing failures are returned
    /// directly from [`Coordinator::open`] instead and never appear here.
    /// Returns `None` if the coordinator has been dropped.
    pub async fn next_fatal_error(&self) -> Option<CoordinatorError> {
        self.0.fatal_rx.lock().await.recv().await
    }
}

pub(crate) struct CoordinatorInner {
    self_weak: Weak<CoordinatorInner>,
    config: CoordinatorConfig,
    discovery: Arc<dyn VBucketDiscovery>,
    transport: Arc<dyn Transport>,
    metadata_store: Arc<dyn MetadataStore>,
    consumer: Arc<dyn Consumer>,
    rollback_mitigation: Option<Arc<dyn RollbackMitigation>>,
    hooks: Hooks,
    metrics: Arc<CoordinatorMetrics>,

    offsets: Arc<OffsetTable>,
    dirty: Arc<DirtySet>,
    vb_id_range: SyncMutex<Option<crate::event::VbIdRange>>,
    observers: SyncRwLock<HashMap<u16, Arc<Observer>>>,
    checkpoint: SyncMutex<Option<Arc<Checkpoint>>>,
    supervisor: SyncMutex<Option<Arc<Supervisor>>>,
    rebalance: SyncMutex<Option<Arc<RebalanceController>>>,

    active_stream_count: AtomicI64,
    open: AtomicBool,
    close_with_cancel: AtomicBool,
    latch: TerminationLatch,
    stop_notify: Notify,

    fatal_tx: tokio::sync::mpsc::UnboundedSender<CoordinatorError>,
    fatal_rx: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<CoordinatorError>>,
}

impl CoordinatorInner {
    /// Thin wrapper around [`CoordinatorInner::open_inner`] that guards the
    /// `open` flag: a failure anywhere in the fallible body must leave the
    /// coordinator reporting `is_open() == false` so `Open` stays
    /// retryable (spec §8 "Open all-or-nothing", §6 `IsOpen`) rather than
    /// wedging in a permanent `AlreadyOpen` state.
    async fn open(&self) -> CoordinatorResult<()> {
        if self
            .open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CoordinatorError::AlreadyOpen);
        }

        if let Err(e) = self.open_inner().await {
            self.open.store(false, Ordering::Release);
            return Err(e);
        }
        Ok(())
    }

    async fn open_inner(&self) -> CoordinatorResult<()> {
        self.latch.reset();
        self.close_with_cancel.store(false, Ordering::Release);
        hooks::fire(&self.hooks.before_stream_start);

        let vb_ids = self
            .discovery
            .owned_vbuckets()
            .await
            .map_err(CoordinatorError::OpenAllFailed)?;
        *self.vb_id_range.lock() = crate::event::VbIdRange::from_owned(&vb_ids);
        tracing::info!(vb_count = vb_ids.len(), "opening dcp coordinator");

        if self.config.rollback_mitigation_enabled {
            let is_ephemeral = self
                .transport
                .is_ephemeral_bucket()
                .await
                .map_err(CoordinatorError::OpenAllFailed)?;
            if !is_ephemeral {
                if let Some(rm) = &self.rollback_mitigation {
                    let this = self.self_weak.clone();
                    rm.start(
                        &vb_ids,
                        Arc::new(move |vb_id, persisted_seq_no| {
                            if let Some(this) = this.upgrade() {
                                if let Some(observer) = this.observers.read().get(&vb_id) {
                                    observer.set_persisted_seq_no(persisted_seq_no);
                                }
                            }
                        }),
                    );
                }
            }
        }

        self.active_stream_count
            .store(vb_ids.len() as i64, Ordering::SeqCst);

        let server_version = self
            .transport
            .server_version()
            .await
            .map_err(CoordinatorError::OpenAllFailed)?;
        let legacy_mode = self
            .config
            .legacy_close_mode
            .unwrap_or(!server_version.supports_concurrent_close());

        let checkpoint = Arc::new(Checkpoint::new(
            self.offsets.clone(),
            self.dirty.clone(),
            self.metadata_store.clone(),
            self.transport.clone(),
            self.metrics.clone(),
            self.config.checkpoint_interval,
        ));
        checkpoint.load(&vb_ids).await?;

        let collection_ids = self.config.collection_ids.as_ref().map(|ids| {
            let set: HashSet<u32> = ids.iter().copied().collect();
            Arc::new(set)
        });

        let mut new_observers = HashMap::with_capacity(self.config.observer_capacity_hint);
        for &vb_id in &vb_ids {
            new_observers.insert(
                vb_id,
                Arc::new(Observer::new(
                    vb_id,
                    self.self_weak.clone(),
                    collection_ids.clone(),
                )),
            );
        }
        *self.observers.write() = new_observers;

        let supervisor = Arc::new(Supervisor::new(self.transport.clone(), legacy_mode));
        {
            let observers = self.observers.read();
            let offset_snapshot = self.offsets.snapshot();
            supervisor
                .open_all(&observers, &offset_snapshot)
                .await?;
        }

        checkpoint.clone().start_schedule();
        *self.checkpoint.lock() = Some(checkpoint);
        *self.supervisor.lock() = Some(supervisor);

        hooks::fire(&self.hooks.after_stream_start);
        self.spawn_wait_task();
        self.metrics
            .set_active_streams(self.active_stream_count.load(Ordering::Relaxed));

        Ok(())
    }

    async fn close(&self, close_with_cancel: bool) -> CoordinatorResult<()> {
        if !self.open.load(Ordering::Acquire) {
            return Err(CoordinatorError::NotOpen);
        }
        self.close_with_cancel.store(close_with_cancel, Ordering::Release);
        hooks::fire(&self.hooks.before_stream_stop);

        if let Some(rm) = &self.rollback_mitigation {
            rm.stop();
        }

        {
            let observers = self.observers.read();
            for observer in observers.values() {
                observer.close();
            }
        }

        if let Some(checkpoint) = self.checkpoint.lock().take() {
            checkpoint.stop_schedule();
        }

        let tracked_vb_ids: Vec<u16> = self.observers.read().keys().copied().collect();
        if let Some(supervisor) = self.supervisor.lock().take() {
            supervisor.close_all(&tracked_vb_ids).await?;
        }

        {
            let mut observers = self.observers.write();
            for observer in observers.values() {
                observer.close_end();
            }
            observers.clear();
        }

        self.offsets.clear();
        self.dirty.clear();
        self.metrics.set_active_streams(0);

        hooks::fire(&self.hooks.after_stream_stop);
        self.open.store(false, Ordering::Release);

        if self.latch.latch_close() {
            self.latch.notify_waiter();
        }

        tracing::info!(close_with_cancel, "dcp coordinator closed");
        Ok(())
    }

    async fn rebalance(&self) -> CoordinatorResult<()> {
        let Some(controller) = self.rebalance.lock().clone() else {
            return Ok(());
        };
        hooks::fire(&self.hooks.before_rebalance_start);
        if self.open.load(Ordering::Acquire) {
            let this = self
                .self_weak
                .upgrade()
                .expect("coordinator inner outlives its own rebalance call");
            controller.close_before_arming(&this).await;
        }
        hooks::fire(&self.hooks.after_rebalance_start);
        controller.trigger();
        Ok(())
    }

    fn spawn_wait_task(&self) {
        let this = self
            .self_weak
            .upgrade()
            .expect("coordinator inner outlives its own open() call");
        tokio::spawn(async move {
            let winner = this.latch.wait().await;
            if winner == TerminationWinner::EndEvent {
                if let Err(e) = this.close(false).await {
                    tracing::error!(error = %e, "post-end-event teardown failed");
                }
            }
            let balancing = this
                .rebalance
                .lock()
                .as_ref()
                .map(|r| r.is_balancing())
                .unwrap_or(false);
            if !balancing {
                this.stop_notify.notify_waiters();
            }
        });
    }

    pub(crate) async fn listen(&self, args: ListenerArgs) {
        match &args.event {
            Event::Mutation(d) | Event::Deletion(d) | Event::Expiration(d) => {
                let vb_id = d.meta.vb_id;
                let offset = d.meta.offset;
                let event_time = d.event_time;
                let is_metadata = d.is_metadata;
                if is_metadata {
                    self.set_offset(vb_id, offset, false);
                    return;
                }
                let event = args.event.clone();
                self.wait_and_forward(event, vb_id, offset, event_time)
                    .await;
            }
            Event::SeqNoAdvanced(meta)
            | Event::CollectionCreation(meta)
            | Event::CollectionDeletion(meta)
            | Event::CollectionFlush(meta)
            | Event::CollectionModification(meta)
            | Event::ScopeCreation(meta)
            | Event::ScopeDeletion(meta) => {
                self.set_offset(meta.vb_id, meta.offset, true);
            }
        }
    }

    async fn wait_and_forward(
        &self,
        event: Event,
        vb_id: u16,
        offset: Offset,
        event_time: std::time::SystemTime,
    ) {
        let dcp_latency = event_time.elapsed().unwrap_or_default();
        self.metrics.observe_dcp_latency(dcp_latency);

        let persisted_seq_no = self
            .observers
            .read()
            .get(&vb_id)
            .map(|o| o.persisted_seq_no())
            .unwrap_or(0);

        let Some(this) = self.self_weak.upgrade() else {
            return;
        };
        let sink: Arc<dyn AckSink> = this;
        let span = tracing::Span::current();
        let ctx = ListenerContext::new(event, sink, vb_id, offset, persisted_seq_no, span.clone());

        let start = Instant::now();
        self.consumer.consume_event(ctx).instrument(span).await;
        self.metrics.observe_process_latency(start.elapsed());
    }

    /// Enforces range isolation, monotonicity, and dirty tracking (spec
    /// §4.6 `setOffset`, §8 invariants).
    fn set_offset(&self, vb_id: u16, offset: Offset, dirty: bool) {
        let Some(range) = *self.vb_id_range.lock() else {
            return;
        };
        if !range.contains(vb_id) {
            tracing::warn!(vb_id, "dropping offset update outside owned vBucket range");
            return;
        }
        if let Some(current) = self.offsets.load(vb_id) {
            if current.seq_no > offset.seq_no {
                tracing::warn!(
                    vb_id,
                    incoming = offset.seq_no,
                    current = current.seq_no,
                    "dropping stale offset update"
                );
                return;
            }
        }
        self.offsets.store(vb_id, offset);
        self.consumer.track_offset(vb_id, offset);
        if dirty {
            self.dirty.conditional_mark_dirty(vb_id);
        }
    }

    pub(crate) async fn listen_end(&self, ctx: DcpStreamEndContext) {
        let Some(supervisor) = self.supervisor.lock().clone() else {
            return;
        };
        if supervisor.legacy_mode() {
            supervisor.legacy_gate().drain_one().await;
        }

        let close_with_cancel = self.close_with_cancel.load(Ordering::Acquire);
        match &ctx.error {
            Some(e) if e.kind.is_retryable() && !close_with_cancel => {
                tracing::warn!(vb_id = ctx.vb_id, error = %e, "retryable dcp stream end, scheduling reopen");
                self.spawn_reopen(ctx.vb_id, supervisor);
            }
            Some(e) => {
                tracing::debug!(vb_id = ctx.vb_id, error = %e, close_with_cancel, "dcp stream ended");
                self.on_stream_terminally_ended();
            }
            None => {
                tracing::debug!(vb_id = ctx.vb_id, "dcp stream ended cleanly");
                self.on_stream_terminally_ended();
            }
        }
    }

    fn spawn_reopen(&self, vb_id: u16, supervisor: Arc<Supervisor>) {
        let this = self
            .self_weak
            .upgrade()
            .expect("coordinator inner outlives its own listen_end call");
        tokio::spawn(async move {
            let resume_from = this.offsets.load(vb_id).unwrap_or_default();
            let Some(observer) = this.observers.read().get(&vb_id).cloned() else {
                return;
            };
            let handle: Arc<dyn StreamHandle> = observer;
            match supervisor
                .reopen(
                    vb_id,
                    resume_from,
                    handle,
                    this.config.reopen_max_attempts,
                    this.config.reopen_backoff,
                )
                .await
            {
                Ok(()) => {}
                Err(e) => {
                    tracing::error!(vb_id, error = %e, "reopen exhausted, fatal");
                    let _ = this.fatal_tx.send(e);
                }
            }
        });
    }

    fn on_stream_terminally_ended(&self) {
        let remaining = self.active_stream_count.fetch_sub(1, Ordering::AcqRel) - 1;
        self.metrics.set_active_streams(remaining.max(0));
        if remaining <= 0 && self.latch.latch_end_event() {
            self.latch.notify_waiter();
        }
    }
}

#[async_trait]
impl AckSink for CoordinatorInner {
    fn ack(&self, vb_id: u16, offset: Offset) {
        self.set_offset(vb_id, offset, true);
    }

    async fn commit(&self) -> CoordinatorResult<()> {
        let checkpoint = self
            .checkpoint
            .lock()
            .clone()
            .ok_or(CoordinatorError::NotOpen)?;
        checkpoint.save().await
    }
}

#[async_trait]
impl RebalanceTarget for CoordinatorInner {
    async fn close_for_rebalance(&self) {
        if let Err(e) = self.close(false).await {
            tracing::warn!(error = %e, "close before rebalance failed");
        }
    }

    async fn reopen_for_rebalance(&self) {
        if let Err(e) = self.open().await {
            tracing::error!(error = %e, "rebalance reopen failed, fatal");
            let _ = self.fatal_tx.send(e);
        }
    }

    fn fire_before_rebalance_end(&self) {
        hooks::fire(&self.hooks.before_rebalance_end);
    }

    fn fire_after_rebalance_end(&self) {
        hooks::fire(&self.hooks.after_rebalance_end);
    }

    fn record_rebalance_metric(&self) {
        self.metrics.record_rebalance();
    }
}
