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

//! Seams to the execution engine. The pool only knows how to ask for a
//! component to be loaded and what to do with the handle it gets back.

use core::fmt::Debug;
use core::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use workd_error::Error;

use crate::names::PodContainerId;

/// Response body type produced by an [`Invocable`].
pub type InvocationBody = BoxBody<Bytes, Error>;

/// A loaded component instance.
#[async_trait]
pub trait Invocable: Send + Sync + Debug + 'static {
    /// Forwards one buffered request to the instance.
    async fn invoke(
        &self,
        request: http::Request<Bytes>,
    ) -> Result<http::Response<InvocationBody>, Error>;

    /// Resolves once the instance accepts requests, or fails if it never will.
    async fn ready(&self) -> Result<(), Error>;

    /// Releases the instance. Called at most once, after which the handle is
    /// dropped.
    async fn shutdown(&self) -> Result<(), Error>;
}

/// Everything the engine gets to know about a container being started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub id: PodContainerId,
    pub image: String,
    pub ip_address: Option<IpAddr>,
    pub environment: Vec<(String, String)>,
}

#[async_trait]
pub trait ComponentLoader: Send + Sync + Debug + 'static {
    async fn load(&self, request: LoadRequest) -> Result<Arc<dyn Invocable>, Error>;
}
