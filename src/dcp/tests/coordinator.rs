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

//! End-to-end `Open`/events/`Close`/`Rebalance` cycles against in-memory
//! fakes of every external collaborator named in spec.md §1.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dcp_coordinator::config::CoordinatorConfig;
use dcp_coordinator::consumer::{Consumer, ListenerContext};
use dcp_coordinator::coordinator::Coordinator;
use dcp_coordinator::event::{DataEvent, Event, EventMeta};
use dcp_coordinator::hooks::Hooks;
use dcp_coordinator::membership::{MembershipType, VBucketDiscovery};
use dcp_coordinator::metadata_store::MetadataStore;
use dcp_coordinator::offset::Offset;
use dcp_coordinator::transport::{ServerVersion, StreamHandle, Transport};
use prometheus::Registry;

struct StaticMembership {
    vb_ids: Vec<u16>,
    membership_type: MembershipType,
}

impl StaticMembership {
    fn new(vb_ids: Vec<u16>) -> Self {
        Self {
            vb_ids,
            membership_type: MembershipType::Static,
        }
    }
}

#[async_trait]
impl VBucketDiscovery for StaticMembership {
    async fn owned_vbuckets(&self) -> anyhow::Result<Vec<u16>> {
        Ok(self.vb_ids.clone())
    }

    fn membership_type(&self) -> MembershipType {
        self.membership_type
    }
}

#[derive(Default)]
struct InMemoryTransport {
    opened: Mutex<HashMap<u16, Arc<dyn StreamHandle>>>,
    open_calls: AtomicUsize,
}

#[async_trait]
impl Transport for InMemoryTransport {
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
        handle: Arc<dyn StreamHandle>,
    ) -> anyhow::Result<()> {
        self.open_calls.fetch_add(1, Ordering::SeqCst);
        self.opened.lock().unwrap().insert(vb_id, handle);
        Ok(())
    }

    async fn close_stream(&self, vb_id: u16) -> anyhow::Result<()> {
        self.opened.lock().unwrap().remove(&vb_id);
        Ok(())
    }
}

#[derive(Default)]
struct InMemoryMetadataStore {
    saved: Mutex<HashMap<u16, Offset>>,
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn load(&self, vb_id: u16) -> anyhow::Result<Option<Offset>> {
        Ok(self.saved.lock().unwrap().get(&vb_id).copied())
    }

    async fn store_batch(&self, offsets: &[(u16, Offset)]) -> anyhow::Result<()> {
        let mut saved = self.saved.lock().unwrap();
        for (vb_id, offset) in offsets {
            saved.insert(*vb_id, *offset);
        }
        Ok(())
    }
}

#[derive(Default)]
struct AckingConsumer {
    delivered: AtomicUsize,
}

#[async_trait]
impl Consumer for AckingConsumer {
    async fn consume_event(&self, ctx: ListenerContext) {
        self.delivered.fetch_add(1, Ordering::SeqCst);
        ctx.ack();
    }
}

fn harness(
    vb_ids: Vec<u16>,
) -> (
    Coordinator,
    Arc<InMemoryTransport>,
    Arc<InMemoryMetadataStore>,
    Arc<AckingConsumer>,
) {
    harness_with_config(
        vb_ids,
        CoordinatorConfig {
            checkpoint_interval: Duration::from_millis(20),
            ..CoordinatorConfig::default()
        },
    )
}

fn harness_with_config(
    vb_ids: Vec<u16>,
    config: CoordinatorConfig,
) -> (
    Coordinator,
    Arc<InMemoryTransport>,
    Arc<InMemoryMetadataStore>,
    Arc<AckingConsumer>,
) {
    let discovery = Arc::new(StaticMembership::new(vb_ids));
    let transport = Arc::new(InMemoryTransport::default());
    let store = Arc::new(InMemoryMetadataStore::default());
    let consumer = Arc::new(AckingConsumer::default());
    let registry = Registry::new();
    let coordinator = Coordinator::new(
        config,
        discovery,
        transport.clone(),
        store.clone(),
        consumer.clone(),
        None,
        Hooks::default(),
        &registry,
    )
    .expect("coordinator construction should not fail");
    (coordinator, transport, store, consumer)
}

#[tokio::test]
async fn open_delivers_mutations_and_checkpoints_on_close() {
    let (coordinator, transport, store, consumer) = harness(vec![0, 1]);
    coordinator.open().await.unwrap();
    assert!(coordinator.is_open());
    assert_eq!(transport.open_calls.load(Ordering::SeqCst), 2);

    let handle = transport.opened.lock().unwrap().get(&0).cloned().unwrap();
    handle
        .on_event(Event::Mutation(DataEvent {
            meta: EventMeta {
                vb_id: 0,
                offset: Offset {
                    vb_uuid: 1,
                    seq_no: 42,
                    latest_seq_no: 42,
                    snapshot_start: 0,
                    snapshot_end: 42,
                },
            },
            key: b"key".to_vec(),
            value: Some(b"value".to_vec()),
            cas: 1,
            event_time: std::time::SystemTime::now(),
            collection_id: 1,
            is_metadata: false,
        }))
        .await;

    assert_eq!(consumer.delivered.load(Ordering::SeqCst), 1);

    let (offsets, dirty, any_dirty) = coordinator.get_offsets();
    assert_eq!(offsets.get(&0).unwrap().seq_no, 42);
    assert!(dirty.contains(&0));
    assert!(any_dirty);

    coordinator.save().await.unwrap();
    assert_eq!(store.saved.lock().unwrap().get(&0).unwrap().seq_no, 42);

    coordinator.close(false).await.unwrap();
    assert!(!coordinator.is_open());
}

#[tokio::test]
async fn open_close_open_resumes_from_last_flushed_offset() {
    let (coordinator, transport, store, _consumer) = harness(vec![0]);
    coordinator.open().await.unwrap();

    let handle = transport.opened.lock().unwrap().get(&0).cloned().unwrap();
    handle
        .on_event(Event::Mutation(DataEvent {
            meta: EventMeta {
                vb_id: 0,
                offset: Offset {
                    vb_uuid: 1,
                    seq_no: 7,
                    latest_seq_no: 7,
                    snapshot_start: 0,
                    snapshot_end: 7,
                },
            },
            key: b"k".to_vec(),
            value: None,
            cas: 1,
            event_time: std::time::SystemTime::now(),
            collection_id: 1,
            is_metadata: false,
        }))
        .await;
    coordinator.save().await.unwrap();
    coordinator.close(false).await.unwrap();

    assert_eq!(store.saved.lock().unwrap().get(&0).unwrap().seq_no, 7);

    coordinator.open().await.unwrap();
    let (offsets, _dirty, _any) = coordinator.get_offsets();
    assert_eq!(offsets.get(&0).unwrap().seq_no, 7);
    coordinator.close(false).await.unwrap();
}

#[tokio::test]
async fn clean_remote_end_of_every_substream_terminates_without_explicit_close() {
    let (coordinator, transport, _store, _consumer) = harness(vec![0, 1]);
    coordinator.open().await.unwrap();

    let handles: Vec<(u16, Arc<dyn StreamHandle>)> = {
        let opened = transport.opened.lock().unwrap();
        opened.iter().map(|(vb_id, handle)| (*vb_id, handle.clone())).collect()
    };
    for (vb_id, handle) in handles {
        handle
            .on_end(dcp_coordinator::event::DcpStreamEndContext { vb_id, error: None })
            .await;
    }

    coordinator.wait_for_termination().await;
    assert!(!coordinator.is_open());
}

#[tokio::test]
async fn rebalance_reopens_against_fresh_ownership() {
    let (coordinator, transport, _store, _consumer) = harness_with_config(
        vec![0],
        CoordinatorConfig {
            checkpoint_interval: Duration::from_millis(20),
            rebalance_delay: Duration::from_millis(20),
            ..CoordinatorConfig::default()
        },
    );
    coordinator.open().await.unwrap();
    assert_eq!(transport.open_calls.load(Ordering::SeqCst), 1);

    coordinator.rebalance().await.unwrap();
    // `close_for_rebalance` runs synchronously before the debounce timer
    // arms; the eventual timer fire re-opens against fresh ownership.
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(coordinator.is_open());
    assert!(transport.open_calls.load(Ordering::SeqCst) >= 2);

    coordinator.close(false).await.unwrap();
}
