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

//! Opens and closes DCP sub-streams on the Coordinator's behalf. Grounded in
//! the teacher's `try_join_all`/`FuturesUnordered` fan-out style
//! (`source/kinesis/source/reader.rs`) and `tokio_retry`'s bounded-backoff
//! pattern for the single-vBucket reopen path.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::try_join_all;
use tokio::sync::mpsc;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::observer::Observer;
use crate::offset::Offset;
use crate::transport::{StreamHandle, Transport};

/// Single-slot gate serializing legacy-mode closes: `closeAll` pushes one
/// token per vBucket about to be closed, `listenEnd` drains one token per
/// ended sub-stream, so concurrent end-event callbacks still close one at a
/// time against a transport whose open-stream map isn't safe for concurrent
/// mutation (spec §4.4, §9).
pub(crate) struct LegacyCloseGate {
    tx: mpsc::Sender<()>,
    rx: tokio::sync::Mutex<mpsc::Receiver<()>>,
}

impl LegacyCloseGate {
    fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    fn push(&self) {
        // try_send, not send: the gate only ever needs to track "is a close
        // outstanding", and a full slot means one already is.
        let _ = self.tx.try_send(());
    }

    /// Drains one token; called from the end-event handler. A no-op if no
    /// close is in progress (nothing queued).
    pub(crate) async fn drain_one(&self) {
        let mut rx = self.rx.lock().await;
        let _ = rx.try_recv();
    }
}

pub(crate) struct Supervisor {
    transport: Arc<dyn Transport>,
    legacy_mode: bool,
    legacy_gate: LegacyCloseGate,
}

impl Supervisor {
    pub(crate) fn new(transport: Arc<dyn Transport>, legacy_mode: bool) -> Self {
        Self {
            transport,
            legacy_mode,
            legacy_gate: LegacyCloseGate::new(),
        }
    }

    pub(crate) fn legacy_mode(&self) -> bool {
        self.legacy_mode
    }

    pub(crate) fn legacy_gate(&self) -> &LegacyCloseGate {
        &self.legacy_gate
    }

    /// Opens every vBucket's sub-stream in parallel; a single failure aborts
    /// the whole batch (spec §4.4, §8 "Open all-or-nothing").
    pub(crate) async fn open_all(
        &self,
        observers: &HashMap<u16, Arc<Observer>>,
        offsets: &HashMap<u16, Offset>,
    ) -> CoordinatorResult<()> {
        let opens = observers.iter().map(|(vb_id, observer)| {
            let transport = self.transport.clone();
            let resume_from = offsets.get(vb_id).copied().unwrap_or_default();
            let handle: Arc<dyn StreamHandle> = observer.clone();
            let vb_id = *vb_id;
            async move {
                transport
                    .open_stream(vb_id, resume_from, handle)
                    .await
                    .map_err(|e| e.context(format!("opening sub-stream for vBucket {vb_id}")))
            }
        });
        try_join_all(opens)
            .await
            .map_err(CoordinatorError::OpenAllFailed)?;
        Ok(())
    }

    /// Bounded-retry reopen of one vBucket after a retryable end-event error
    /// (spec §4.4, §7): 5 attempts total, 1s linear backoff, fatal on
    /// exhaustion. `Retry::spawn` performs one initial call plus one retry
    /// per item in the strategy iterator, so the iterator is capped at
    /// `max_attempts - 1` to keep `max_attempts` the total call count the
    /// spec names, not the retry count after an initial try.
    pub(crate) async fn reopen(
        &self,
        vb_id: u16,
        resume_from: Offset,
        handle: Arc<dyn StreamHandle>,
        max_attempts: u32,
        backoff: std::time::Duration,
    ) -> CoordinatorResult<()> {
        let retries = max_attempts.saturating_sub(1) as usize;
        let strategy = FixedInterval::new(backoff).take(retries);
        let transport = self.transport.clone();
        Retry::spawn(strategy, || {
            let transport = transport.clone();
            let handle = handle.clone();
            async move { transport.open_stream(vb_id, resume_from, handle).await }
        })
        .await
        .map_err(|source| CoordinatorError::RetryExhausted {
            vb_id,
            attempts: max_attempts,
            source,
        })
    }

    /// Modern transports close every currently-tracked vBucket in parallel;
    /// legacy transports serialize over the gate, draining in `listenEnd`
    /// (spec §4.4). Only vBuckets actually tracked by this epoch's Observer
    /// map are closed — see DESIGN.md's Open Question decision on scoping
    /// the legacy gate to tracked vBuckets rather than the nominal range.
    pub(crate) async fn close_all(&self, vb_ids: &[u16]) -> CoordinatorResult<()> {
        if self.legacy_mode {
            for &vb_id in vb_ids {
                self.legacy_gate.push();
                if let Err(e) = self.transport.close_stream(vb_id).await {
                    tracing::warn!(vb_id, error = %e, "legacy close_stream failed");
                }
            }
            Ok(())
        } else {
            let closes = vb_ids.iter().map(|&vb_id| {
                let transport = self.transport.clone();
                async move {
                    if let Err(e) = transport.close_stream(vb_id).await {
                        tracing::warn!(vb_id, error = %e, "close_stream failed");
                    }
                }
            });
            futures::future::join_all(closes).await;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Weak;

    use async_trait::async_trait;

    use super::*;
    use crate::event::{DcpStreamEndContext, Event};
    use crate::transport::ServerVersion;

    struct CountingTransport {
        opens: AtomicUsize,
        fail_vb: Option<u16>,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn server_version(&self) -> anyhow::Result<ServerVersion> {
            Ok(ServerVersion::new(7, 2, 0))
        }
        async fn is_ephemeral_bucket(&self) -> anyhow::Result<bool> {
            Ok(false)
        }
        async fn latest_seq_no(&self, _vb_id: u16) -> anyhow::Result<u64> {
            Ok(0)
        }
        async fn open_stream(
            &self,
            vb_id: u16,
            _resume_from: Offset,
            _handle: Arc<dyn StreamHandle>,
        ) -> anyhow::Result<()> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.fail_vb == Some(vb_id) {
                anyhow::bail!("injected open failure for {vb_id}");
            }
            Ok(())
        }
        async fn close_stream(&self, _vb_id: u16) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn observer(vb_id: u16) -> Arc<Observer> {
        Arc::new(Observer::new(vb_id, Weak::new(), None))
    }

    #[tokio::test]
    async fn open_all_succeeds_when_every_open_succeeds() {
        let transport = Arc::new(CountingTransport {
            opens: AtomicUsize::new(0),
            fail_vb: None,
        });
        let supervisor = Supervisor::new(transport.clone(), false);
        let observers: HashMap<u16, Arc<Observer>> =
            [0, 1, 2].into_iter().map(|v| (v, observer(v))).collect();
        let offsets = HashMap::new();

        supervisor.open_all(&observers, &offsets).await.unwrap();
        assert_eq!(transport.opens.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn open_all_is_all_or_nothing_on_a_single_failure() {
        let transport = Arc::new(CountingTransport {
            opens: AtomicUsize::new(0),
            fail_vb: Some(1),
        });
        let supervisor = Supervisor::new(transport, false);
        let observers: HashMap<u16, Arc<Observer>> =
            [0, 1, 2].into_iter().map(|v| (v, observer(v))).collect();
        let offsets = HashMap::new();

        let result = supervisor.open_all(&observers, &offsets).await;
        assert!(matches!(result, Err(CoordinatorError::OpenAllFailed(_))));
    }

    #[tokio::test]
    async fn reopen_exhausts_after_configured_attempts() {
        let transport = Arc::new(CountingTransport {
            opens: AtomicUsize::new(0),
            fail_vb: Some(5),
        });
        let supervisor = Supervisor::new(transport.clone(), false);

        struct NullHandle;
        #[async_trait]
        impl StreamHandle for NullHandle {
            async fn on_event(&self, _event: Event) {}
            async fn on_end(&self, _ctx: DcpStreamEndContext) {}
        }

        let result = supervisor
            .reopen(
                5,
                Offset::default(),
                Arc::new(NullHandle),
                3,
                std::time::Duration::from_millis(1),
            )
            .await;
        assert!(matches!(
            result,
            Err(CoordinatorError::RetryExhausted { attempts: 3, .. })
        ));
        // 3 total attempts: 1 initial + 2 retries from FixedInterval::take(2)
        assert_eq!(transport.opens.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn legacy_gate_drain_is_a_no_op_with_nothing_queued() {
        let gate = LegacyCloseGate::new();
        gate.push();
        gate.drain_one().await;
        // Nothing queued now; draining again must not block.
        gate.drain_one().await;
    }
}
