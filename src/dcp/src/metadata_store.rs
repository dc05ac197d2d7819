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

//! The metadata store, referenced by contract only (spec §1): durable storage
//! for per-vBucket [`Offset`] blobs. Schema is opaque to this crate; only the
//! load/store semantics matter (spec §6).

use async_trait::async_trait;

use crate::offset::Offset;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn load(&self, vb_id: u16) -> anyhow::Result<Option<Offset>>;

    /// Writes every `(vb_id, offset)` pair as a single batch. Must be
    /// all-or-nothing from the checkpoint scheduler's point of view: a
    /// partial write is treated as a failure and retried whole at the next
    /// tick (spec §4.3).
    async fn store_batch(&self, offsets: &[(u16, Offset)]) -> anyhow::Result<()>;
}
