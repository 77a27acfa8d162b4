// Copyright 2026 The Vimana Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use workd_error::{Code, Error, make_err};

use crate::names::PodContainerId;
use crate::state::{IllegalTransition, PodEvent, PodState};

/// Failures reported by [`crate::pod_pool::PodPool`]. The pool never retries;
/// every one of these reaches the caller as is.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PodPoolError {
    #[error("{event} is not allowed on pod {id} in state {state}")]
    IllegalTransition {
        id: PodContainerId,
        state: PodState,
        event: PodEvent,
    },

    #[error("pod {id} is already {state} with different parameters")]
    ConflictingState { id: PodContainerId, state: PodState },

    #[error("pod {0} not found")]
    NotFound(PodContainerId),

    #[error(
        "label '{key}' on container for pod {id} is '{container}' but the sandbox has '{sandbox}'"
    )]
    LabelMismatch {
        id: PodContainerId,
        key: String,
        sandbox: String,
        container: String,
    },

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),
}

impl PodPoolError {
    pub(crate) fn illegal(id: &PodContainerId, err: IllegalTransition) -> Self {
        Self::IllegalTransition {
            id: id.clone(),
            state: err.state,
            event: err.event,
        }
    }

    pub const fn code(&self) -> Code {
        match self {
            Self::IllegalTransition { .. } => Code::FailedPrecondition,
            Self::ConflictingState { .. } => Code::AlreadyExists,
            Self::NotFound(_) => Code::NotFound,
            Self::LabelMismatch { .. } => Code::InvalidArgument,
            Self::ResourceExhausted(_) => Code::ResourceExhausted,
        }
    }
}

impl From<PodPoolError> for Error {
    fn from(err: PodPoolError) -> Self {
        make_err!(err.code(), "{err}")
    }
}
