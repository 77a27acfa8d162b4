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

pub mod task;

// Used by `#[workd_test]` expansions, which cannot name `tracing` directly.
pub use tracing as __tracing;
use tracing::metadata::LevelFilter;
use tracing_subscriber::EnvFilter;
use workd_error::{Code, Error, make_err};

/// Installs the process-wide fmt subscriber.
///
/// Levels default to `WARN` and are raised per target through `RUST_LOG`,
/// e.g. `RUST_LOG=workd_runtime::pod_pool=debug`. Fails if a subscriber is
/// already installed.
pub fn init_tracing() -> Result<(), Error> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_timer(tracing_subscriber::fmt::time::time())
        .try_init()
        .map_err(|err| make_err!(Code::AlreadyExists, "Tracing already initialized: {err}"))
}
