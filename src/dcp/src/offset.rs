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

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// A per-vBucket resume point.
///
/// Monotonicity is enforced one level up, in
/// [`crate::coordinator::Coordinator::set_offset`]: once stored, `seq_no` never
/// decreases for a given vBucket during a single Open epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offset {
    pub vb_uuid: u64,
    pub seq_no: u64,
    pub latest_seq_no: u64,
    pub snapshot_start: u64,
    pub snapshot_end: u64,
}

impl Offset {
    pub fn seeded(vb_uuid: u64, latest_seq_no: u64) -> Self {
        Self {
            vb_uuid,
            seq_no: 0,
            latest_seq_no,
            snapshot_start: 0,
            snapshot_end: 0,
        }
    }
}

/// Concurrent-safe per-vBucket offset map.
///
/// A plain `RwLock<HashMap<..>>` rather than a sharded map: the table is read and
/// written at most once per inbound DCP event per vBucket, so lock contention is
/// bounded by fan-out (~1024), not by per-event volume within a single vBucket.
#[derive(Default)]
pub struct OffsetTable {
    entries: RwLock<HashMap<u16, Offset>>,
}

impl OffsetTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, vb_id: u16) -> Option<Offset> {
        self.entries.read().get(&vb_id).copied()
    }

    /// Unconditional replace.
    pub fn store(&self, vb_id: u16, offset: Offset) {
        self.entries.write().insert(vb_id, offset);
    }

    /// Snapshot-consistent iteration: each entry observed is a consistent copy,
    /// but the iteration as a whole is not a point-in-time snapshot of the table.
    pub fn range(&self, mut f: impl FnMut(u16, Offset)) {
        for (vb_id, offset) in self.entries.read().iter() {
            f(*vb_id, *offset);
        }
    }

    pub fn snapshot(&self) -> HashMap<u16, Offset> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Drops all entries; the next `Open` epoch reloads from the checkpoint.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

/// The set of vBucket IDs with unflushed offset changes since the last
/// successful checkpoint write, plus a scalar "any dirty" flag for the
/// scheduler's fast-path skip.
///
/// The flag is a separate `AtomicBool` rather than `set.is_empty()` so a flush
/// tick can skip work lock-free when nothing is dirty; it trades a narrow race
/// (a write can land between the flag check and the set lock) for never
/// blocking the ingestion path on the scheduler's tick.
#[derive(Default)]
pub struct DirtySet {
    dirty: Mutex<HashSet<u16>>,
    any_dirty: AtomicBool,
}

impl DirtySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `vb_id` dirty. Idempotent: a vBucket already marked dirty stays
    /// dirty and this is a no-op beyond the set lookup, which is how
    /// concurrent ingestion and a pending flush coalesce into one entry.
    pub fn conditional_mark_dirty(&self, vb_id: u16) {
        self.dirty.lock().insert(vb_id);
        self.any_dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self, vb_id: u16) -> bool {
        self.dirty.lock().contains(&vb_id)
    }

    pub fn any_dirty(&self) -> bool {
        self.any_dirty.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> HashSet<u16> {
        self.dirty.lock().clone()
    }

    /// Clears the set and the any-dirty flag together. Callers (the checkpoint
    /// scheduler on a successful flush, or `UnmarkDirtyOffsets`) are assumed to
    /// be single-writer with respect to this call; see DESIGN.md.
    pub fn clear(&self) {
        self.dirty.lock().clear();
        self.any_dirty.store(false, Ordering::Release);
    }

    /// Removes exactly the vBuckets in `flushed` from the dirty set, leaving
    /// any vBucket marked dirty *after* the flush snapshot was taken still
    /// dirty for the next tick.
    pub fn clear_flushed(&self, flushed: &HashSet<u16>) {
        let mut guard = self.dirty.lock();
        for vb_id in flushed {
            guard.remove(vb_id);
        }
        if guard.is_empty() {
            self.any_dirty.store(false, Ordering::Release);
        }
    }
}
