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

//! Synchronous lifecycle hooks (spec §6), invoked at labeled points in
//! `Open`/`Close`/`Rebalance`.

use std::fmt;
use std::sync::Arc;

type Hook = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone, Default)]
pub struct Hooks {
    pub before_stream_start: Option<Hook>,
    pub after_stream_start: Option<Hook>,
    pub before_stream_stop: Option<Hook>,
    pub after_stream_stop: Option<Hook>,
    pub before_rebalance_start: Option<Hook>,
    pub after_rebalance_start: Option<Hook>,
    pub before_rebalance_end: Option<Hook>,
    pub after_rebalance_end: Option<Hook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks").finish_non_exhaustive()
    }
}

pub(crate) fn fire(hook: &Option<Hook>) {
    if let Some(hook) = hook {
        hook();
    }
}
