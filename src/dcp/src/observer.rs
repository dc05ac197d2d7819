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

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;

use crate::coordinator::CoordinatorInner;
use crate::event::{DcpStreamEndContext, Event, ListenerArgs};
use crate::transport::StreamHandle;

/// One per owned vBucket. Created by the Coordinator after the checkpoint
/// loads; subscribed to the transport with `on_event`/`on_end`. Packages raw
/// transport callbacks into typed [`Event`]s and forwards them; holds the
/// current `persist_seq_no` fed by rollback mitigation.
pub struct Observer {
    vb_id: u16,
    coordinator: Weak<CoordinatorInner>,
    collection_ids: Option<Arc<HashSet<u32>>>,
    latest_seq_no: AtomicU64,
    persist_seq_no: AtomicU64,
    closed: AtomicBool,
    ended: AtomicBool,
}

impl Observer {
    pub(crate) fn new(
        vb_id: u16,
        coordinator: Weak<CoordinatorInner>,
        collection_ids: Option<Arc<HashSet<u32>>>,
    ) -> Self {
        Self {
            vb_id,
            coordinator,
            collection_ids,
            latest_seq_no: AtomicU64::new(0),
            persist_seq_no: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            ended: AtomicBool::new(false),
        }
    }

    pub fn vb_id(&self) -> u16 {
        self.vb_id
    }

    pub fn latest_seq_no(&self) -> u64 {
        self.latest_seq_no.load(Ordering::Relaxed)
    }

    pub fn persisted_seq_no(&self) -> u64 {
        self.persist_seq_no.load(Ordering::Relaxed)
    }

    pub(crate) fn set_persisted_seq_no(&self, seq_no: u64) {
        self.persist_seq_no.store(seq_no, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Idempotent; stops delivering further events and returns synchronously.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Called after all sub-streams have ended; releases any remaining
    /// internal buffering the Observer itself holds.
    pub fn close_end(&self) {
        self.ended.store(true, Ordering::Release);
    }
}

#[async_trait]
impl StreamHandle for Observer {
    async fn on_event(&self, event: Event) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if let Some(allowed) = &self.collection_ids {
            if let Some(collection_id) = event.collection_id() {
                if !allowed.contains(&collection_id) {
                    return;
                }
            }
        }
        self.latest_seq_no
            .store(event.offset().seq_no, Ordering::Relaxed);
        if let Some(coordinator) = self.coordinator.upgrade() {
            coordinator.listen(ListenerArgs { event }).await;
        }
    }

    async fn on_end(&self, ctx: DcpStreamEndContext) {
        if let Some(coordinator) = self.coordinator.upgrade() {
            coordinator.listen_end(ctx).await;
        }
    }
}
