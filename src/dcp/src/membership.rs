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

//! The cluster-membership service, referenced by contract only (spec §1):
//! tells this node which vBuckets it currently owns.

use async_trait::async_trait;

/// How ownership changes propagate. `Dynamic` memberships rebalance
/// immediately (spec §4.5 forces `rebalance_delay` to zero); anything else
/// uses the configured debounce delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipType {
    Static,
    Dynamic,
}

#[async_trait]
pub trait VBucketDiscovery: Send + Sync {
    async fn owned_vbuckets(&self) -> anyhow::Result<Vec<u16>>;

    fn membership_type(&self) -> MembershipType {
        MembershipType::Static
    }
}
