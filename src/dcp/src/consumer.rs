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

//! The downstream consumer boundary: the application-supplied sink that
//! receives one synchronous call per deliverable event (spec §5 — no queueing,
//! a slow consumer throttles the transport directly).

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CoordinatorResult;
use crate::event::Event;
use crate::offset::Offset;

/// Narrow capability handed to a [`ListenerContext`] so it can report back to
/// the coordinator without holding a reference to the whole thing (DESIGN.md
/// notes on the Checkpoint/Coordinator cycle apply here too).
#[async_trait]
pub(crate) trait AckSink: Send + Sync {
    fn ack(&self, vb_id: u16, offset: Offset);
    async fn commit(&self) -> CoordinatorResult<()>;
}

/// Given to the downstream [`Consumer`] per event.
///
/// The consumer MUST call [`ListenerContext::ack`] for each event it wishes to
/// mark persisted; [`ListenerContext::commit`] forces an immediate checkpoint
/// flush.
pub struct ListenerContext {
    pub event: Event,
    sink: Arc<dyn AckSink>,
    vb_id: u16,
    offset: Offset,
    persisted_seq_no: u64,
    span: tracing::Span,
}

impl ListenerContext {
    pub(crate) fn new(
        event: Event,
        sink: Arc<dyn AckSink>,
        vb_id: u16,
        offset: Offset,
        persisted_seq_no: u64,
        span: tracing::Span,
    ) -> Self {
        Self {
            event,
            sink,
            vb_id,
            offset,
            persisted_seq_no,
            span,
        }
    }

    pub fn ack(&self) {
        self.sink.ack(self.vb_id, self.offset);
    }

    pub async fn commit(&self) -> CoordinatorResult<()> {
        self.sink.commit().await
    }

    /// The highest sequence number the rollback-mitigation feed has reported
    /// as durably persisted on the cluster for this vBucket, so the consumer
    /// can decline to `ack()` past it.
    pub fn persisted_seq_no(&self) -> u64 {
        self.persisted_seq_no
    }

    pub fn tracer(&self) -> &tracing::Span {
        &self.span
    }
}

#[async_trait]
pub trait Consumer: Send + Sync {
    async fn consume_event(&self, ctx: ListenerContext);

    /// Notified whenever `setOffset` stores a new value, including for
    /// offset-only events that never reach `consume_event` (spec §4.6).
    fn track_offset(&self, _vb_id: u16, _offset: Offset) {}
}
