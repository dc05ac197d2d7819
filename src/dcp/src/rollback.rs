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

//! The rollback-mitigation subsystem, referenced by contract only (spec §1):
//! feeds per-vBucket "persisted sequence number" watermarks so a `Consumer`
//! can avoid acknowledging past what the cluster has durably written
//! (SPEC_FULL.md §16).

use std::sync::Arc;

/// Called with `(vb_id, persisted_seq_no)` whenever the watermark advances.
pub type PersistSeqNoCallback = Arc<dyn Fn(u16, u64) + Send + Sync>;

pub trait RollbackMitigation: Send + Sync {
    fn start(&self, vb_ids: &[u16], on_persist_seq_no: PersistSeqNoCallback);
    fn stop(&self);
}
