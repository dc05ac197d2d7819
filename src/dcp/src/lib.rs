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

//! A per-node DCP (Database Change Protocol) stream coordinator for a
//! Couchbase change-data-capture client.
//!
//! The [`coordinator::Coordinator`] discovers which vBuckets this node owns
//! via [`membership::VBucketDiscovery`], opens one DCP sub-stream per owned
//! vBucket against a [`transport::Transport`], multiplexes inbound events
//! into a single downstream [`consumer::Consumer`] callback while tracking
//! per-vBucket resume offsets in the [`offset::OffsetTable`], persists those
//! offsets to a [`metadata_store::MetadataStore`] on a schedule, recovers
//! individual sub-streams that fail with a retryable transport error, and
//! coordinates graceful rebalance (close-all, re-discover ownership, reopen)
//! without losing or duplicating events beyond the at-least-once contract.

pub mod config;
pub mod consumer;
pub mod error;
pub mod event;
pub mod hooks;
pub mod membership;
pub mod metadata_store;
pub mod metrics;
pub mod observer;
pub mod offset;
pub mod rollback;
pub mod transport;

pub mod coordinator;

mod checkpoint;
mod rebalance;
mod supervisor;

pub use coordinator::Coordinator;
pub use error::{CoordinatorError, CoordinatorResult};
