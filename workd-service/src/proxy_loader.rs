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

use core::net::SocketAddr;
use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client as LegacyClient;
use hyper_util::client::legacy::connect::HttpConnector as LegacyHttpConnector;
use tokio::net::TcpStream;
use tracing::{Level, event};
use workd_config::workd::LoaderConfig;
use workd_error::{Code, Error, make_err};
use workd_runtime::loader::{ComponentLoader, Invocable, InvocationBody, LoadRequest};
use workd_runtime::names::PodContainerId;
use workd_util::task::TaskExecutor;

type ProxyClient = LegacyClient<LegacyHttpConnector, Full<Bytes>>;

/// Treats every component as an HTTP/2 cleartext server already listening
/// at its pod address. The execution engine that actually brings the
/// component up is outside this process.
#[derive(Debug, Clone)]
pub struct HttpProxyLoader {
    client: ProxyClient,
    port: u16,
    readiness_poll_interval: Duration,
}

impl HttpProxyLoader {
    pub fn new(config: &LoaderConfig) -> Self {
        let client = LegacyClient::builder(TaskExecutor::new())
            .http2_only(true)
            .build_http();
        Self {
            client,
            port: config.port,
            readiness_poll_interval: Duration::from_millis(config.readiness_poll_interval_ms),
        }
    }
}

#[async_trait]
impl ComponentLoader for HttpProxyLoader {
    async fn load(&self, request: LoadRequest) -> Result<Arc<dyn Invocable>, Error> {
        let ip_address = request.ip_address.ok_or_else(|| {
            make_err!(
                Code::FailedPrecondition,
                "Pod {} has no IP address to reach {} at",
                request.id,
                request.image
            )
        })?;
        let address = SocketAddr::new(ip_address, self.port);
        event!(
            Level::INFO,
            id = %request.id,
            image = %request.image,
            %address,
            "Proxying component"
        );
        Ok(Arc::new(ProxiedComponent {
            id: request.id,
            address,
            client: self.client.clone(),
            readiness_poll_interval: self.readiness_poll_interval,
            closed: AtomicBool::new(false),
        }))
    }
}

#[derive(Debug)]
struct ProxiedComponent {
    id: PodContainerId,
    address: SocketAddr,
    client: ProxyClient,
    readiness_poll_interval: Duration,
    /// Set once the pod is stopped. The component may still listen at its
    /// address, but this handle no longer forwards to it.
    closed: AtomicBool,
}

impl ProxiedComponent {
    fn check_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(make_err!(
                Code::Unavailable,
                "Component for {} at {} was shut down",
                self.id,
                self.address
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Invocable for ProxiedComponent {
    async fn invoke(
        &self,
        request: http::Request<Bytes>,
    ) -> Result<http::Response<InvocationBody>, Error> {
        self.check_open()?;
        let (mut parts, body) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map_or("/", http::uri::PathAndQuery::as_str);
        parts.uri = http::Uri::builder()
            .scheme("http")
            .authority(self.address.to_string())
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| make_err!(Code::Internal, "Could not build URI for {}: {e}", self.id))?;

        let response = self
            .client
            .request(http::Request::from_parts(parts, Full::new(body)))
            .await
            .map_err(|e| make_err!(Code::Unavailable, "Request to {} failed: {e}", self.id))?;
        let (parts, body) = response.into_parts();
        // Buffered so trailers (the gRPC status) travel with the body.
        let collected = body
            .collect()
            .await
            .map_err(|e| make_err!(Code::Unavailable, "Response from {} failed: {e}", self.id))?;
        Ok(http::Response::from_parts(
            parts,
            collected.map_err(|never| match never {}).boxed(),
        ))
    }

    async fn ready(&self) -> Result<(), Error> {
        loop {
            self.check_open()?;
            match TcpStream::connect(self.address).await {
                Ok(_) => return Ok(()),
                Err(err) => {
                    event!(Level::TRACE, id = %self.id, ?err, "Component not accepting yet");
                }
            }
            tokio::time::sleep(self.readiness_poll_interval).await;
        }
    }

    async fn shutdown(&self) -> Result<(), Error> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            event!(
                Level::INFO,
                id = %self.id,
                address = %self.address,
                "Stopped proxying; the engine tears the component down"
            );
        }
        Ok(())
    }
}
