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

//! The Couchbase transport client, referenced by contract only (spec §1):
//! whatever opens and closes DCP sub-streams and delivers raw events.

use std::sync::Arc;

use async_trait::async_trait;

use crate::event::{DcpStreamEndContext, Event};
use crate::offset::Offset;

/// The subset of retryable transport failures that must trigger a per-vBucket
/// reopen rather than termination (spec §6/§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    SocketClosed,
    DcpBackfillFailed,
    DcpStreamStateChanged,
    DcpStreamTooSlow,
    DcpStreamDisconnected,
    Other,
}

impl TransportErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            TransportErrorKind::SocketClosed
                | TransportErrorKind::DcpBackfillFailed
                | TransportErrorKind::DcpStreamStateChanged
                | TransportErrorKind::DcpStreamTooSlow
                | TransportErrorKind::DcpStreamDisconnected
        )
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("dcp transport error ({kind:?}): {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// `major.minor.patch`, used only to decide whether the legacy serialized-close
/// workaround (spec §4.4) is needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ServerVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl ServerVersion {
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Servers at or above 5.5.0 support concurrent DCP stream-end handling.
    pub fn supports_concurrent_close(self) -> bool {
        self >= ServerVersion::new(5, 5, 0)
    }
}

/// Delivers raw transport callbacks into the coordinator. Implemented by
/// [`crate::observer::Observer`]; the transport holds one per open sub-stream.
#[async_trait]
pub trait StreamHandle: Send + Sync {
    async fn on_event(&self, event: Event);
    async fn on_end(&self, ctx: DcpStreamEndContext);
}

/// The Couchbase transport client boundary: opens/closes DCP sub-streams and
/// reports cluster facts needed to seed and validate the checkpoint.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn server_version(&self) -> anyhow::Result<ServerVersion>;

    async fn is_ephemeral_bucket(&self) -> anyhow::Result<bool>;

    /// The current latest sequence number for `vb_id`, used to seed a
    /// checkpoint entry absent from the metadata store.
    async fn latest_seq_no(&self, vb_id: u16) -> anyhow::Result<u64>;

    async fn open_stream(
        &self,
        vb_id: u16,
        resume_from: Offset,
        handle: Arc<dyn StreamHandle>,
    ) -> anyhow::Result<()>;

    async fn close_stream(&self, vb_id: u16) -> anyhow::Result<()>;
}
