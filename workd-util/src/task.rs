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

//! Detached tasks for pod starts, signal handling and data-plane connections.
//!
//! Every task runs inside an `error_span`, so events it emits after its
//! caller has returned still say which pod or connection they belong to.

use core::future::Future;

use hyper::rt::Executor;
use tokio::task::JoinHandle;
pub use tracing::error_span as __error_span;
use tracing::{Instrument, Span};

pub fn __spawn_with_span<F, T>(fut: F, span: Span) -> JoinHandle<T>
where
    T: Send + 'static,
    F: Future<Output = T> + Send + 'static,
{
    tokio::spawn(fut.instrument(span))
}

/// Spawns `$fut` inside an `error_span` named `$name`. Tracing fields for
/// the span may follow the future; `target:` overrides the span target.
#[macro_export]
macro_rules! background_spawn {
    (target: $target:expr, $name:expr, $fut:expr $(, $($fields:tt)*)?) => {{
        $crate::task::__spawn_with_span(
            $fut,
            $crate::task::__error_span!(target: $target, $name $(, $($fields)*)?),
        )
    }};
    ($name:expr, $fut:expr $(, $($fields:tt)*)?) => {{
        $crate::task::__spawn_with_span(
            $fut,
            $crate::task::__error_span!($name $(, $($fields)*)?),
        )
    }};
}

/// Hyper executor for HTTP/2 stream tasks. Each stream inherits the span of
/// the connection that opened it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskExecutor;

impl TaskExecutor {
    pub const fn new() -> Self {
        Self
    }
}

impl<F> Executor<F> for TaskExecutor
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    fn execute(&self, fut: F) {
        drop(__spawn_with_span(fut, Span::current()));
    }
}
