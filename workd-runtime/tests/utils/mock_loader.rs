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

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use parking_lot::Mutex;
use tokio::sync::watch;
use workd_error::{Code, Error, make_err};
use workd_runtime::loader::{ComponentLoader, Invocable, InvocationBody, LoadRequest};

/// Invocable whose readiness is decided by the test.
#[derive(Debug)]
pub struct MockInvocable {
    ready_tx: watch::Sender<Option<bool>>,
    shutdown_tx: watch::Sender<usize>,
}

impl MockInvocable {
    pub fn ready() -> Arc<Self> {
        let handle = Self::pending();
        handle.set_ready(true);
        handle
    }

    pub fn pending() -> Arc<Self> {
        Arc::new(Self {
            ready_tx: watch::channel(None).0,
            shutdown_tx: watch::channel(0).0,
        })
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready_tx.send_replace(Some(ready));
    }

    pub fn shutdown_count(&self) -> usize {
        *self.shutdown_tx.borrow()
    }

    pub async fn wait_for_shutdown(&self) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        assert!(shutdown_rx.wait_for(|count| *count > 0).await.is_ok());
    }
}

#[async_trait]
impl Invocable for MockInvocable {
    async fn invoke(
        &self,
        _request: http::Request<Bytes>,
    ) -> Result<http::Response<InvocationBody>, Error> {
        let body = Full::new(Bytes::from_static(b"ok"))
            .map_err(|never| match never {})
            .boxed();
        Ok(http::Response::new(body))
    }

    async fn ready(&self) -> Result<(), Error> {
        let mut ready_rx = self.ready_tx.subscribe();
        let ready = *ready_rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| make_err!(Code::Internal, "Readiness channel closed"))?;
        if ready == Some(true) {
            Ok(())
        } else {
            Err(make_err!(Code::Unavailable, "Component reported not ready"))
        }
    }

    async fn shutdown(&self) -> Result<(), Error> {
        self.shutdown_tx.send_modify(|count| *count += 1);
        Ok(())
    }
}

/// Loader that hands out scripted results in order, then ready handles.
#[derive(Debug, Default)]
pub struct MockLoader {
    scripted: Mutex<VecDeque<Result<Arc<MockInvocable>, Error>>>,
    requests: Mutex<Vec<LoadRequest>>,
}

impl MockLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_handle(&self, handle: Arc<MockInvocable>) {
        self.scripted.lock().push_back(Ok(handle));
    }

    pub fn push_error(&self, err: Error) {
        self.scripted.lock().push_back(Err(err));
    }

    pub fn requests(&self) -> Vec<LoadRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ComponentLoader for MockLoader {
    async fn load(&self, request: LoadRequest) -> Result<Arc<dyn Invocable>, Error> {
        self.requests.lock().push(request);
        let next = self.scripted.lock().pop_front();
        match next {
            Some(Ok(handle)) => Ok(handle),
            Some(Err(err)) => Err(err),
            None => Ok(MockInvocable::ready()),
        }
    }
}
