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

use std::time::SystemTime;

use crate::offset::Offset;
use crate::transport::TransportError;

/// The contiguous range of vBucket IDs owned by this node for the current
/// epoch. Established at `Open`, immutable within an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VbIdRange {
    pub start: u16,
    pub end: u16,
}

impl VbIdRange {
    pub fn from_owned(vb_ids: &[u16]) -> Option<Self> {
        let (mut start, mut end) = (u16::MAX, 0u16);
        for &vb_id in vb_ids {
            start = start.min(vb_id);
            end = end.max(vb_id);
        }
        if vb_ids.is_empty() {
            None
        } else {
            Some(Self { start, end })
        }
    }

    pub fn contains(&self, vb_id: u16) -> bool {
        (self.start..=self.end).contains(&vb_id)
    }
}

/// Fields common to every event variant.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventMeta {
    pub vb_id: u16,
    pub offset: Offset,
}

/// A system collection ID reserved for metadata documents (the `_sync` /
/// gateway-internal collection). The exact predicate is delegated to
/// [`is_metadata_collection`]; callers integrating with a specific Couchbase
/// deployment can override which collection IDs count as metadata by
/// constructing [`DataEvent`] with `is_metadata` set directly.
pub const SYSTEM_METADATA_COLLECTION_ID: u32 = 0;

pub fn is_metadata_collection(collection_id: u32) -> bool {
    collection_id == SYSTEM_METADATA_COLLECTION_ID
}

/// A mutation, deletion, or expiration — the only event variants that carry a
/// consumer-visible payload.
#[derive(Debug, Clone)]
pub struct DataEvent {
    pub meta: EventMeta,
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    pub cas: u64,
    pub event_time: SystemTime,
    pub collection_id: u32,
    pub is_metadata: bool,
}

/// Tagged variant over everything a DCP sub-stream can deliver.
#[derive(Debug, Clone)]
pub enum Event {
    Mutation(DataEvent),
    Deletion(DataEvent),
    Expiration(DataEvent),
    SeqNoAdvanced(EventMeta),
    CollectionCreation(EventMeta),
    CollectionDeletion(EventMeta),
    CollectionFlush(EventMeta),
    CollectionModification(EventMeta),
    ScopeCreation(EventMeta),
    ScopeDeletion(EventMeta),
}

impl Event {
    pub fn vb_id(&self) -> u16 {
        self.meta().vb_id
    }

    pub fn offset(&self) -> Offset {
        self.meta().offset
    }

    pub fn collection_id(&self) -> Option<u32> {
        match self {
            Event::Mutation(d) | Event::Deletion(d) | Event::Expiration(d) => {
                Some(d.collection_id)
            }
            _ => None,
        }
    }

    fn meta(&self) -> EventMeta {
        match self {
            Event::Mutation(d) | Event::Deletion(d) | Event::Expiration(d) => d.meta,
            Event::SeqNoAdvanced(m)
            | Event::CollectionCreation(m)
            | Event::CollectionDeletion(m)
            | Event::CollectionFlush(m)
            | Event::CollectionModification(m)
            | Event::ScopeCreation(m)
            | Event::ScopeDeletion(m) => *m,
        }
    }
}

/// The raw callback payload handed from the transport to an
/// [`crate::observer::Observer`], and from there to
/// [`crate::coordinator::Coordinator::listen`].
pub struct ListenerArgs {
    pub event: Event,
}

/// Reported by the transport when a sub-stream ends, whether cleanly or due to
/// a transport-side failure.
#[derive(Debug, Clone)]
pub struct DcpStreamEndContext {
    pub vb_id: u16,
    pub error: Option<TransportError>,
}
