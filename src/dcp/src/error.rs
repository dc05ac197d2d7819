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

use crate::transport::TransportError;

/// Errors surfaced by the public operations of [`crate::coordinator::Coordinator`].
///
/// Retry exhaustion and an all-or-nothing `openAll` failure are coordinator-global
/// failures (see spec §7): they are never swallowed, only ever returned here or
/// pushed onto the fatal-error channel so the embedding process can exit.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("opening all owned sub-streams failed, aborting open")]
    OpenAllFailed(#[source] anyhow::Error),

    #[error("loading the checkpoint failed")]
    CheckpointLoadFailed(#[source] anyhow::Error),

    #[error("vBucket {vb_id} exhausted {attempts} reopen attempts")]
    RetryExhausted {
        vb_id: u16,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("metadata store operation failed")]
    MetadataStore(#[source] anyhow::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("coordinator is already open")]
    AlreadyOpen,

    #[error("coordinator is not open")]
    NotOpen,
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
