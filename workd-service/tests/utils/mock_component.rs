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

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use workd_error::{Code, Error, make_err};
use workd_runtime::loader::{ComponentLoader, Invocable, InvocationBody, LoadRequest};

pub const SERVED_BY_HEADER: &str = "x-served-by";

/// Ready immediately; answers with its own name unless told to fail.
#[derive(Debug)]
pub struct MockComponent {
    name: String,
    failing: AtomicBool,
    hangs_on_shutdown: AtomicBool,
    calls: AtomicUsize,
}

impl MockComponent {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            failing: AtomicBool::new(false),
            hangs_on_shutdown: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(name: &str) -> Arc<Self> {
        let component = Self::new(name);
        component.failing.store(true, Ordering::SeqCst);
        component
    }

    /// Never finishes shutting down.
    pub fn hanging(name: &str) -> Arc<Self> {
        let component = Self::new(name);
        component.hangs_on_shutdown.store(true, Ordering::SeqCst);
        component
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Invocable for MockComponent {
    async fn invoke(
        &self,
        request: http::Request<Bytes>,
    ) -> Result<http::Response<InvocationBody>, Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(make_err!(Code::Unavailable, "{} is down", self.name));
        }
        let body = Full::new(request.into_body())
            .map_err(|never| match never {})
            .boxed();
        let mut response = http::Response::new(body);
        response.headers_mut().insert(
            SERVED_BY_HEADER,
            http::HeaderValue::from_str(&self.name)
                .map_err(|e| make_err!(Code::Internal, "{e}"))?,
        );
        Ok(response)
    }

    async fn ready(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), Error> {
        if self.hangs_on_shutdown.load(Ordering::SeqCst) {
            core::future::pending::<()>().await;
        }
        Ok(())
    }
}

/// Hands out the queued components in order, then fresh healthy ones.
#[derive(Debug, Default)]
pub struct MockLoader {
    queued: Mutex<VecDeque<Arc<MockComponent>>>,
}

impl MockLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push(&self, component: Arc<MockComponent>) {
        self.queued.lock().unwrap().push_back(component);
    }
}

#[async_trait]
impl ComponentLoader for MockLoader {
    async fn load(&self, request: LoadRequest) -> Result<Arc<dyn Invocable>, Error> {
        let next = self.queued.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| MockComponent::new(&request.id.to_string())))
    }
}
