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

//! Routes inbound gRPC calls to the `Running` instances of the component they
//! address.
//!
//! The component is read from the request itself: the domain from the
//! authority, the server from the first path segment, and the version from
//! the [`VERSION_HEADER`].

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::response::Response;
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use rand::Rng;
use tracing::{Level, event};
use workd_config::workd::DataPlaneConfig;
use workd_error::{Code, Error, ResultExt, make_err, make_input_err};
use workd_runtime::loader::InvocationBody;
use workd_runtime::names::ComponentIdentity;
use workd_runtime::pod_pool::PodPool;

/// Carries the component version. HTTP/2 pseudo-headers cannot be extended,
/// so this is a regular header.
pub const VERSION_HEADER: &str = "x-vimana-version";

type BoxError = Box<dyn core::error::Error + Send + Sync>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    #[error("no serving instance for {0}")]
    NoServingInstance(ComponentIdentity),

    #[error("forwarding to {component} failed: {message}")]
    ForwardingFailed {
        component: ComponentIdentity,
        message: String,
    },
}

impl From<RouterError> for Error {
    fn from(err: RouterError) -> Self {
        make_err!(Code::Unavailable, "{err}")
    }
}

/// Reads the component a request is addressed to.
pub fn extract_identity<B>(request: &http::Request<B>) -> Result<ComponentIdentity, Error> {
    let domain = match request.uri().authority() {
        Some(authority) => authority.host().to_string(),
        None => {
            let host = request
                .headers()
                .get(http::header::HOST)
                .ok_or_else(|| make_input_err!("Request has neither an authority nor a host"))?
                .to_str()
                .map_err(|e| make_input_err!("Host header is not valid ASCII: {e}"))?;
            host.parse::<http::uri::Authority>()
                .map_err(|e| make_input_err!("Invalid host header '{host}': {e}"))?
                .host()
                .to_string()
        }
    };

    let path = request.uri().path();
    let mut segments = path
        .strip_prefix('/')
        .ok_or_else(|| make_input_err!("Path '{path}' is not absolute"))?
        .split('/');
    let (Some(server), Some(rpc), None) = (segments.next(), segments.next(), segments.next())
    else {
        return Err(make_input_err!("Path '{path}' is not of the form /<server>/<rpc>"));
    };
    error_if_empty(server, path)?;
    error_if_empty(rpc, path)?;

    let version = request
        .headers()
        .get(VERSION_HEADER)
        .ok_or_else(|| make_input_err!("Request has no '{VERSION_HEADER}' header"))?
        .to_str()
        .map_err(|e| make_input_err!("'{VERSION_HEADER}' header is not valid ASCII: {e}"))?;

    ComponentIdentity::new(domain, server, version).err_tip(|| "While extracting component")
}

fn error_if_empty(segment: &str, path: &str) -> Result<(), Error> {
    if segment.is_empty() {
        return Err(make_input_err!("Path '{path}' has an empty segment"));
    }
    Ok(())
}

/// Picks an instance, and a different one to retry on if there is one.
fn pick_instances(len: usize) -> (usize, Option<usize>) {
    let mut rng = rand::rng();
    let first = rng.random_range(0..len);
    let retry = (len > 1).then(|| (first + rng.random_range(1..len)) % len);
    (first, retry)
}

fn rebuild_request(parts: &http::request::Parts, body: Bytes) -> http::Request<Bytes> {
    let mut request = http::Request::new(body);
    *request.method_mut() = parts.method.clone();
    *request.uri_mut() = parts.uri.clone();
    *request.version_mut() = parts.version;
    *request.headers_mut() = parts.headers.clone();
    request
}

#[derive(Debug)]
pub struct DataPlaneRouter {
    pool: Arc<PodPool>,
    max_request_bytes: usize,
}

impl DataPlaneRouter {
    pub const fn new(pool: Arc<PodPool>, config: &DataPlaneConfig) -> Self {
        Self {
            pool,
            max_request_bytes: config.max_request_bytes,
        }
    }

    /// Sends `request` to one serving instance of `component`. A failed
    /// attempt is retried once on a different instance.
    pub async fn forward(
        &self,
        component: &ComponentIdentity,
        request: http::Request<Bytes>,
    ) -> Result<http::Response<InvocationBody>, RouterError> {
        let instances = self.pool.serving_instances(component);
        if instances.is_empty() {
            return Err(RouterError::NoServingInstance(component.clone()));
        }
        let (first, retry) = pick_instances(instances.len());
        let (parts, body) = request.into_parts();

        let first_err = match instances[first]
            .handle
            .invoke(rebuild_request(&parts, body.clone()))
            .await
        {
            Ok(response) => return Ok(response),
            Err(err) => err,
        };
        let Some(retry) = retry else {
            return Err(RouterError::ForwardingFailed {
                component: component.clone(),
                message: first_err.message_string(),
            });
        };
        event!(
            Level::WARN,
            instance = %instances[first].id,
            retry = %instances[retry].id,
            ?first_err,
            "Forwarding failed, retrying on another instance"
        );
        instances[retry]
            .handle
            .invoke(rebuild_request(&parts, body))
            .await
            .map_err(|err| RouterError::ForwardingFailed {
                component: component.clone(),
                message: first_err.merge(err).message_string(),
            })
    }

    /// Buffers the request body and forwards it to the addressed component.
    pub async fn route<B>(
        &self,
        request: http::Request<B>,
    ) -> Result<http::Response<InvocationBody>, Error>
    where
        B: hyper::body::Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        let component = extract_identity(&request)?;
        let (parts, body) = request.into_parts();
        let body = Limited::new(body, self.max_request_bytes)
            .collect()
            .await
            .map_err(|err| {
                if err.is::<LengthLimitError>() {
                    make_err!(
                        Code::ResourceExhausted,
                        "Request to {component} exceeds {} bytes",
                        self.max_request_bytes
                    )
                } else {
                    make_input_err!("Failed to read request body: {err}")
                }
            })?
            .to_bytes();
        Ok(self
            .forward(&component, rebuild_request(&parts, body))
            .await?)
    }

    /// Axum router that sends every request through [`Self::route`].
    pub fn into_router(self: Arc<Self>) -> Router {
        Router::new().fallback(handle_request).with_state(self)
    }
}

/// Failures are reported the way a gRPC server would: HTTP 200 with the
/// status in a trailers-only response.
fn grpc_error_response(err: Error) -> Response {
    tonic::Status::from(err).into_http()
}

async fn handle_request(
    State(router): State<Arc<DataPlaneRouter>>,
    request: axum::extract::Request,
) -> Response {
    match router.route(request).await {
        Ok(response) => response.map(Body::new),
        Err(err) => {
            event!(Level::DEBUG, ?err, "Data plane request failed");
            grpc_error_response(err)
        }
    }
}
