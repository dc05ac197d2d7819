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

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use thiserror_ext::AsReport;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::error::{CoordinatorError, CoordinatorResult};
use crate::metadata_store::MetadataStore;
use crate::metrics::CoordinatorMetrics;
use crate::offset::{Offset, OffsetTable};
use crate::transport::Transport;

/// Periodically snapshots the [`OffsetTable`] and writes dirty entries to the
/// metadata store. Holds narrow references to the coordinator's offset view
/// (`Arc<OffsetTable>` / `Arc<crate::offset::DirtySet>`) rather than a
/// back-reference to the whole coordinator (DESIGN.md).
pub(crate) struct Checkpoint {
    offsets: Arc<OffsetTable>,
    dirty: Arc<crate::offset::DirtySet>,
    metadata_store: Arc<dyn MetadataStore>,
    transport: Arc<dyn Transport>,
    metrics: Arc<CoordinatorMetrics>,
    interval: Duration,
    /// Serializes flushes: at-most-one in flight, whether triggered by the
    /// schedule or by an explicit `Save`.
    flush_lock: AsyncMutex<()>,
    schedule_task: SyncMutex<Option<JoinHandle<()>>>,
}

impl Checkpoint {
    pub(crate) fn new(
        offsets: Arc<OffsetTable>,
        dirty: Arc<crate::offset::DirtySet>,
        metadata_store: Arc<dyn MetadataStore>,
        transport: Arc<dyn Transport>,
        metrics: Arc<CoordinatorMetrics>,
        interval: Duration,
    ) -> Self {
        Self {
            offsets,
            dirty,
            metadata_store,
            transport,
            metrics,
            interval,
            flush_lock: AsyncMutex::new(()),
            schedule_task: SyncMutex::new(None),
        }
    }

    /// For each owned vBucket, loads the persisted offset or seeds it from
    /// the transport's current latest sequence number. Populates the shared
    /// offset table directly; nothing is marked dirty for cleanly-loaded
    /// entries (spec §4.3).
    pub(crate) async fn load(&self, vb_ids: &[u16]) -> CoordinatorResult<()> {
        for &vb_id in vb_ids {
            let loaded = self
                .metadata_store
                .load(vb_id)
                .await
                .map_err(CoordinatorError::CheckpointLoadFailed)?;
            let offset = match loaded {
                Some(offset) => offset,
                None => {
                    let latest = self
                        .transport
                        .latest_seq_no(vb_id)
                        .await
                        .map_err(CoordinatorError::CheckpointLoadFailed)?;
                    Offset::seeded(0, latest)
                }
            };
            self.offsets.store(vb_id, offset);
        }
        Ok(())
    }

    /// Consumes one `Arc` clone to spawn the periodic task; callers keep
    /// their own clone for `save()`/`stop_schedule()` (`self: Arc<Self>` is a
    /// stable receiver type, unlike `&Arc<Self>`).
    pub(crate) fn start_schedule(self: Arc<Self>) {
        let this = self;
        let mut interval = tokio::time::interval(this.interval);
        let handle = tokio::spawn(async move {
            loop {
                interval.tick().await;
                if let Err(e) = this.flush().await {
                    tracing::warn!(error = %e.as_report(), "checkpoint flush failed, retrying next tick");
                }
            }
        });
        *self.schedule_task.lock() = Some(handle);
    }

    pub(crate) fn stop_schedule(&self) {
        if let Some(handle) = self.schedule_task.lock().take() {
            handle.abort();
        }
    }

    /// Forces one immediate flush. Safe to call concurrently with the
    /// schedule: `flush_lock` guarantees at most one flush in flight.
    pub(crate) async fn save(&self) -> CoordinatorResult<()> {
        self.flush().await
    }

    async fn flush(&self) -> CoordinatorResult<()> {
        let _permit = self.flush_lock.lock().await;
        if !self.dirty.any_dirty() {
            return Ok(());
        }
        let dirty_vb_ids = self.dirty.snapshot();
        if dirty_vb_ids.is_empty() {
            return Ok(());
        }
        let batch: Vec<(u16, Offset)> = dirty_vb_ids
            .iter()
            .filter_map(|vb_id| self.offsets.load(*vb_id).map(|offset| (*vb_id, offset)))
            .collect();

        match self.metadata_store.store_batch(&batch).await {
            Ok(()) => {
                self.dirty.clear_flushed(&dirty_vb_ids);
                self.metrics.record_checkpoint_flush(true);
                Ok(())
            }
            Err(e) => {
                self.metrics.record_checkpoint_flush(false);
                Err(CoordinatorError::MetadataStore(e))
            }
        }
    }
}

impl Drop for Checkpoint {
    fn drop(&mut self) {
        self.stop_schedule();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use prometheus::Registry;

    use super::*;
    use crate::offset::DirtySet;
    use crate::transport::{ServerVersion, StreamHandle};

    #[derive(Default)]
    struct FakeStore {
        saved: Mutex<Vec<(u16, Offset)>>,
        fail_next: Mutex<bool>,
    }

    #[async_trait]
    impl MetadataStore for FakeStore {
        async fn load(&self, vb_id: u16) -> anyhow::Result<Option<Offset>> {
            Ok(self
                .saved
                .lock()
                .unwrap()
                .iter()
                .find(|(v, _)| *v == vb_id)
                .map(|(_, o)| *o))
        }

        async fn store_batch(&self, offsets: &[(u16, Offset)]) -> anyhow::Result<()> {
            if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
                anyhow::bail!("injected failure");
            }
            let mut saved = self.saved.lock().unwrap();
            for (vb_id, offset) in offsets {
                saved.retain(|(v, _)| v != vb_id);
                saved.push((*vb_id, *offset));
            }
            Ok(())
        }
    }

    struct FakeTransport;

    #[async_trait]
    impl Transport for FakeTransport {
        async fn server_version(&self) -> anyhow::Result<ServerVersion> {
            Ok(ServerVersion::new(7, 2, 0))
        }
        async fn is_ephemeral_bucket(&self) -> anyhow::Result<bool> {
            Ok(false)
        }
        async fn latest_seq_no(&self, _vb_id: u16) -> anyhow::Result<u64> {
            Ok(100)
        }
        async fn open_stream(
            &self,
            _vb_id: u16,
            _resume_from: Offset,
            _handle: Arc<dyn StreamHandle>,
        ) -> anyhow::Result<()> {
            Ok(())
        }
        async fn close_stream(&self, _vb_id: u16) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn new_checkpoint() -> (Checkpoint, Arc<OffsetTable>, Arc<DirtySet>, Arc<FakeStore>) {
        let offsets = Arc::new(OffsetTable::new());
        let dirty = Arc::new(DirtySet::new());
        let store = Arc::new(FakeStore::default());
        let metrics = Arc::new(CoordinatorMetrics::new(&Registry::new()).unwrap());
        let checkpoint = Checkpoint::new(
            offsets.clone(),
            dirty.clone(),
            store.clone(),
            Arc::new(FakeTransport),
            metrics,
            Duration::from_millis(10),
        );
        (checkpoint, offsets, dirty, store)
    }

    #[tokio::test]
    async fn load_seeds_missing_entries_from_transport() {
        let (checkpoint, offsets, _dirty, _store) = new_checkpoint();
        checkpoint.load(&[0, 1]).await.unwrap();
        assert_eq!(offsets.load(0).unwrap().latest_seq_no, 100);
        assert_eq!(offsets.load(1).unwrap().latest_seq_no, 100);
    }

    #[tokio::test]
    async fn load_prefers_persisted_entry_over_seed() {
        let (checkpoint, offsets, _dirty, store) = new_checkpoint();
        store
            .store_batch(&[(0, Offset::seeded(9, 55))])
            .await
            .unwrap();
        checkpoint.load(&[0]).await.unwrap();
        assert_eq!(offsets.load(0).unwrap().latest_seq_no, 55);
    }

    #[tokio::test]
    async fn save_flushes_only_dirty_entries_and_clears_them() {
        let (checkpoint, offsets, dirty, store) = new_checkpoint();
        offsets.store(0, Offset::seeded(1, 10));
        offsets.store(1, Offset::seeded(1, 20));
        dirty.conditional_mark_dirty(0);

        checkpoint.save().await.unwrap();

        assert_eq!(store.saved.lock().unwrap().len(), 1);
        assert!(!dirty.is_dirty(0));
        assert!(!dirty.any_dirty());
    }

    #[tokio::test]
    async fn failed_flush_leaves_dirty_set_untouched_for_retry() {
        let (checkpoint, offsets, dirty, store) = new_checkpoint();
        offsets.store(0, Offset::seeded(1, 10));
        dirty.conditional_mark_dirty(0);
        *store.fail_next.lock().unwrap() = true;

        let result = checkpoint.save().await;
        assert!(result.is_err());
        assert!(dirty.is_dirty(0));
    }

    #[tokio::test]
    async fn save_is_a_no_op_when_nothing_is_dirty() {
        let (checkpoint, _offsets, _dirty, store) = new_checkpoint();
        checkpoint.save().await.unwrap();
        assert!(store.saved.lock().unwrap().is_empty());
    }
}
