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

use std::time::Duration;

use serde::{Deserialize, Serialize};

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Plain, `Default`-able configuration for one coordinator instance. The CLI
/// and configuration loader that produce this struct are out-of-scope
/// collaborators (spec §1) — the same boundary the teacher draws around its
/// per-connector `*Properties` structs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    #[serde(with = "duration_ms")]
    pub checkpoint_interval: Duration,

    #[serde(with = "duration_ms")]
    pub rebalance_delay: Duration,

    /// Overrides the legacy-close detection that would otherwise be derived
    /// from `Transport::server_version` at `Open` time. `None` defers to the
    /// transport.
    pub legacy_close_mode: Option<bool>,

    pub observer_capacity_hint: usize,

    pub reopen_max_attempts: u32,

    #[serde(with = "duration_ms")]
    pub reopen_backoff: Duration,

    pub rollback_mitigation_enabled: bool,

    /// If non-empty, events for collections outside this set are dropped by
    /// the `Observer` before they reach `Coordinator::listen` (SPEC_FULL.md
    /// §10).
    pub collection_ids: Option<Vec<u32>>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: Duration::from_secs(10),
            rebalance_delay: Duration::from_millis(500),
            legacy_close_mode: None,
            observer_capacity_hint: 1024,
            reopen_max_attempts: 5,
            reopen_backoff: Duration::from_secs(1),
            rollback_mitigation_enabled: false,
            collection_ids: None,
        }
    }
}
