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

use core::time::Duration;

use hyper::rt::Executor;
use pretty_assertions::assert_eq;
use tokio::sync::oneshot;
use workd_error::{Code, Error, make_err};
use workd_macro::workd_test;
use workd_util::background_spawn;
use workd_util::task::TaskExecutor;

const WAIT: Duration = Duration::from_secs(5);

#[workd_test]
async fn background_spawn_outlives_its_handle() -> Result<(), Error> {
    let (tx, rx) = oneshot::channel();
    drop(background_spawn!("test_detached", async move {
        tx.send(7).map_err(|_| make_err!(Code::Internal, "receiver gone"))
    }));
    let received = tokio::time::timeout(WAIT, rx)
        .await?
        .map_err(|e| make_err!(Code::Internal, "{e}"))?;
    assert_eq!(received, 7);
    Ok(())
}

#[workd_test]
async fn background_spawn_returns_output_with_fields() -> Result<(), Error> {
    let pod = "d:s@1.0.0#0";
    let handle = background_spawn!("test_with_fields", async { 40 + 2 }, pod, attempt = 3);
    assert_eq!(handle.await?, 42);

    let handle = background_spawn!(target: "workd::test", "test_with_target", async { "done" });
    assert_eq!(handle.await?, "done");
    Ok(())
}

#[workd_test]
async fn task_executor_runs_futures() -> Result<(), Error> {
    let (tx, rx) = oneshot::channel();
    TaskExecutor::new().execute(async move {
        assert!(tx.send("ran").is_ok());
    });
    let received = tokio::time::timeout(WAIT, rx)
        .await?
        .map_err(|e| make_err!(Code::Internal, "{e}"))?;
    assert_eq!(received, "ran");
    Ok(())
}
