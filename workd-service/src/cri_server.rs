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

//! Kubelet-facing `runtime.v1.RuntimeService`.
//!
//! Every call maps onto one [`PodPool`] operation. A pod and its single
//! container share one [`PodContainerId`]; on the wire it is spelled
//! `p-<id>` for the sandbox and `c-<id>` for the container.

use core::time::Duration;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tonic::{Request, Response, Status};
use tracing::{Level, event, instrument};
use workd_error::{Code, Error, ResultExt, make_err, make_input_err};
use workd_proto::runtime::v1::runtime_service_server::{
    RuntimeService, RuntimeServiceServer as Server,
};
use workd_proto::runtime::v1::{
    Container, ContainerMetadata as ProtoContainerMetadata, ContainerState, ContainerStatus,
    ContainerStatusRequest, ContainerStatusResponse, CreateContainerRequest,
    CreateContainerResponse, ImageSpec, ListContainersRequest, ListContainersResponse,
    ListPodSandboxRequest, ListPodSandboxResponse, PodSandbox, PodSandboxMetadata,
    PodSandboxNetworkStatus, PodSandboxState, PodSandboxStatus, PodSandboxStatusRequest,
    PodSandboxStatusResponse, RemoveContainerRequest, RemoveContainerResponse,
    RemovePodSandboxRequest, RemovePodSandboxResponse, RunPodSandboxRequest,
    RunPodSandboxResponse, RuntimeCondition, RuntimeStatus, StartContainerRequest,
    StartContainerResponse, StatusRequest, StatusResponse, StopContainerRequest,
    StopContainerResponse, StopPodSandboxRequest, StopPodSandboxResponse,
    UpdateRuntimeConfigRequest, UpdateRuntimeConfigResponse, VersionRequest, VersionResponse,
};
use workd_runtime::names::{ImageReference, PodContainerId};
use workd_runtime::pod::{
    ContainerMetadata, ContainerSpec, PodEntry, SandboxConfig, SandboxMetadata,
};
use workd_runtime::pod_pool::{PodFilter, PodPool};
use workd_runtime::state::PodState;

const KUBE_API_VERSION: &str = "0.1.0";
const RUNTIME_NAME: &str = "workd";
const RUNTIME_API_VERSION: &str = "v1";
/// The only runtime handler served here. An empty handler selects it too.
pub const RUNTIME_HANDLER: &str = "workd-handler";
const SANDBOX_ID_PREFIX: &str = "p-";
const CONTAINER_ID_PREFIX: &str = "c-";
/// Components log through the node's tracing pipeline, not to files.
const CONTAINER_LOG_PATH: &str = "/dev/null";

pub fn sandbox_wire_id(id: &PodContainerId) -> String {
    format!("{SANDBOX_ID_PREFIX}{id}")
}

pub fn container_wire_id(id: &PodContainerId) -> String {
    format!("{CONTAINER_ID_PREFIX}{id}")
}

/// Rejects requests addressed to a runtime handler other than ours.
pub fn check_runtime_handler(handler: &str) -> Result<(), Error> {
    if handler.is_empty() || handler == RUNTIME_HANDLER {
        return Ok(());
    }
    Err(make_input_err!(
        "Runtime handler '{handler}' is not served; only '{RUNTIME_HANDLER}' is"
    ))
}

fn parse_wire_id(wire_id: &str, prefix: &str) -> Result<PodContainerId, Error> {
    let raw = wire_id
        .strip_prefix(prefix)
        .ok_or_else(|| make_input_err!("ID '{wire_id}' does not start with '{prefix}'"))?;
    PodContainerId::parse(raw).err_tip(|| format!("Invalid ID '{wire_id}'"))
}

pub fn parse_sandbox_id(wire_id: &str) -> Result<PodContainerId, Error> {
    parse_wire_id(wire_id, SANDBOX_ID_PREFIX)
}

pub fn parse_container_id(wire_id: &str) -> Result<PodContainerId, Error> {
    parse_wire_id(wire_id, CONTAINER_ID_PREFIX)
}

fn to_nanos(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_nanos() as i64)
}

fn opt_to_nanos(time: Option<SystemTime>) -> i64 {
    time.map_or(0, to_nanos)
}

const fn sandbox_state(state: PodState) -> PodSandboxState {
    match state {
        PodState::Killed => PodSandboxState::SandboxNotready,
        _ => PodSandboxState::SandboxReady,
    }
}

const fn container_state(state: PodState) -> ContainerState {
    match state {
        PodState::Created | PodState::Starting => ContainerState::ContainerCreated,
        PodState::Running => ContainerState::ContainerRunning,
        PodState::Stopped => ContainerState::ContainerExited,
        _ => ContainerState::ContainerUnknown,
    }
}

/// Pod states a sandbox state filter selects.
fn pod_states_for_sandbox(state: PodSandboxState) -> Vec<PodState> {
    PodState::ALL
        .into_iter()
        .filter(|pod_state| sandbox_state(*pod_state) == state)
        .collect()
}

/// Pod states a container state filter selects. `CONTAINER_UNKNOWN`
/// selects nothing.
fn pod_states_for_container(state: ContainerState) -> Vec<PodState> {
    match state {
        ContainerState::ContainerCreated => vec![PodState::Created, PodState::Starting],
        ContainerState::ContainerRunning => vec![PodState::Running],
        ContainerState::ContainerExited => vec![PodState::Stopped],
        ContainerState::ContainerUnknown => Vec::new(),
    }
}

fn sandbox_metadata_to_proto(metadata: &SandboxMetadata) -> PodSandboxMetadata {
    PodSandboxMetadata {
        name: metadata.name.clone(),
        uid: metadata.uid.clone(),
        namespace: metadata.namespace.clone(),
        attempt: metadata.attempt,
    }
}

fn image_spec(entry: &PodEntry) -> Option<ImageSpec> {
    entry.image_reference().map(|image| ImageSpec {
        image: image.to_string(),
        ..Default::default()
    })
}

fn container_metadata_to_proto(entry: &PodEntry) -> Option<ProtoContainerMetadata> {
    entry.container.as_ref().map(|c| ProtoContainerMetadata {
        name: c.metadata.name.clone(),
        attempt: c.metadata.attempt,
    })
}

fn container_annotations(entry: &PodEntry) -> HashMap<String, String> {
    entry
        .container
        .as_ref()
        .map(|c| c.annotations.clone())
        .unwrap_or_default()
}

fn to_container(entry: &PodEntry) -> Container {
    Container {
        id: container_wire_id(&entry.id),
        pod_sandbox_id: sandbox_wire_id(&entry.id),
        metadata: container_metadata_to_proto(entry),
        image: image_spec(entry),
        image_ref: entry.image_reference().unwrap_or_default().to_string(),
        state: container_state(entry.state).into(),
        created_at: opt_to_nanos(entry.container_created_at),
        labels: entry.container_labels().clone(),
        annotations: container_annotations(entry),
        image_id: entry.id.component().to_string(),
    }
}

fn to_container_status(entry: &PodEntry) -> ContainerStatus {
    ContainerStatus {
        id: container_wire_id(&entry.id),
        metadata: container_metadata_to_proto(entry),
        state: container_state(entry.state).into(),
        created_at: opt_to_nanos(entry.container_created_at),
        started_at: opt_to_nanos(entry.started_at),
        finished_at: opt_to_nanos(entry.finished_at),
        exit_code: entry.exit_code,
        image: image_spec(entry),
        image_ref: entry.image_reference().unwrap_or_default().to_string(),
        reason: entry.reason.clone(),
        message: entry.message.clone(),
        labels: entry.container_labels().clone(),
        annotations: container_annotations(entry),
        log_path: CONTAINER_LOG_PATH.to_string(),
        image_id: entry.id.component().to_string(),
    }
}

fn to_pod_sandbox(entry: &PodEntry) -> PodSandbox {
    PodSandbox {
        id: sandbox_wire_id(&entry.id),
        metadata: Some(sandbox_metadata_to_proto(&entry.sandbox_metadata)),
        state: sandbox_state(entry.state).into(),
        created_at: to_nanos(entry.created_at),
        labels: entry.labels.clone(),
        annotations: entry.annotations.clone(),
        runtime_handler: RUNTIME_HANDLER.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct CriServer {
    pool: Arc<PodPool>,
}

impl CriServer {
    pub const fn new(pool: Arc<PodPool>) -> Self {
        Self { pool }
    }

    pub fn into_service(self) -> Server<Self> {
        Server::new(self)
    }

    async fn inner_run_pod_sandbox(
        &self,
        request: RunPodSandboxRequest,
    ) -> Result<RunPodSandboxResponse, Error> {
        check_runtime_handler(&request.runtime_handler)?;
        let config = request
            .config
            .ok_or_else(|| make_input_err!("Expected config to be set in RunPodSandboxRequest"))?;
        // Components are reached through the data plane, never a host port.
        if !config.port_mappings.is_empty() {
            return Err(make_input_err!("Port mappings are not supported for components"));
        }
        let metadata = config.metadata.unwrap_or_default();
        let sandbox_config = SandboxConfig {
            metadata: SandboxMetadata {
                name: metadata.name,
                uid: metadata.uid,
                namespace: metadata.namespace,
                attempt: metadata.attempt,
            },
            labels: config.labels,
            annotations: config.annotations,
        };
        let component = sandbox_config
            .component()
            .err_tip(|| "Sandbox labels do not name a valid component")?;
        let id = self
            .pool
            .create_sandbox(component, sandbox_config)
            .err_tip(|| "In CriServer::run_pod_sandbox")?;
        Ok(RunPodSandboxResponse {
            pod_sandbox_id: sandbox_wire_id(&id),
        })
    }

    async fn inner_stop_pod_sandbox(
        &self,
        request: StopPodSandboxRequest,
    ) -> Result<StopPodSandboxResponse, Error> {
        let id = parse_sandbox_id(&request.pod_sandbox_id)?;
        self.pool
            .stop_sandbox(&id)
            .await
            .err_tip(|| "In CriServer::stop_pod_sandbox")?;
        Ok(StopPodSandboxResponse {})
    }

    async fn inner_remove_pod_sandbox(
        &self,
        request: RemovePodSandboxRequest,
    ) -> Result<RemovePodSandboxResponse, Error> {
        let id = parse_sandbox_id(&request.pod_sandbox_id)?;
        self.pool
            .remove_sandbox(&id)
            .err_tip(|| "In CriServer::remove_pod_sandbox")?;
        Ok(RemovePodSandboxResponse {})
    }

    async fn inner_pod_sandbox_status(
        &self,
        request: PodSandboxStatusRequest,
    ) -> Result<PodSandboxStatusResponse, Error> {
        let id = parse_sandbox_id(&request.pod_sandbox_id)?;
        let entry = self
            .pool
            .get_status(&id)
            .err_tip(|| "In CriServer::pod_sandbox_status")?;
        let network = entry.ip_address.map(|ip| PodSandboxNetworkStatus {
            ip: ip.to_string(),
            additional_ips: Vec::new(),
        });
        let containers_statuses = if entry.container.is_some() {
            vec![to_container_status(&entry)]
        } else {
            Vec::new()
        };
        let sandbox = to_pod_sandbox(&entry);
        Ok(PodSandboxStatusResponse {
            status: Some(PodSandboxStatus {
                id: sandbox.id,
                metadata: sandbox.metadata,
                state: sandbox.state,
                created_at: sandbox.created_at,
                network,
                labels: sandbox.labels,
                annotations: sandbox.annotations,
                runtime_handler: sandbox.runtime_handler,
            }),
            info: HashMap::new(),
            containers_statuses,
            timestamp: to_nanos(SystemTime::now()),
        })
    }

    async fn inner_list_pod_sandbox(
        &self,
        request: ListPodSandboxRequest,
    ) -> Result<ListPodSandboxResponse, Error> {
        let mut filter = PodFilter::default();
        if let Some(proto_filter) = request.filter {
            if !proto_filter.id.is_empty() {
                filter.id = Some(parse_sandbox_id(&proto_filter.id)?);
            }
            if let Some(state) = proto_filter.state {
                filter.states = Some(pod_states_for_sandbox(state.state()));
            }
            filter.label_selector = proto_filter.label_selector;
        }
        let items = self.pool.list(&filter).iter().map(to_pod_sandbox).collect();
        Ok(ListPodSandboxResponse { items })
    }

    async fn inner_create_container(
        &self,
        request: CreateContainerRequest,
    ) -> Result<CreateContainerResponse, Error> {
        let id = parse_sandbox_id(&request.pod_sandbox_id)?;
        let config = request
            .config
            .ok_or_else(|| make_input_err!("Expected config to be set in CreateContainerRequest"))?;
        let image_spec = config
            .image
            .filter(|spec| !spec.image.is_empty())
            .ok_or_else(|| make_input_err!("Container for {id} has no image reference"))?;
        check_runtime_handler(&image_spec.runtime_handler)?;
        if !image_spec.annotations.is_empty() {
            return Err(make_input_err!("Image annotations are not supported"));
        }
        let image = ImageReference::parse(&image_spec.image)
            .err_tip(|| format!("In CriServer::create_container for {id}"))?;
        if image.component() != id.component() {
            return Err(make_input_err!(
                "Image {image} holds {}, but pod {id} runs {}",
                image.component(),
                id.component()
            ));
        }
        let metadata = config.metadata.unwrap_or_default();
        let spec = ContainerSpec {
            metadata: ContainerMetadata {
                name: metadata.name,
                attempt: metadata.attempt,
            },
            image: image.to_string(),
            labels: config.labels,
            annotations: config.annotations,
            environment: config
                .envs
                .into_iter()
                .map(|kv| (kv.key, kv.value))
                .collect(),
        };
        self.pool
            .create_container(&id, spec)
            .err_tip(|| "In CriServer::create_container")?;
        Ok(CreateContainerResponse {
            container_id: container_wire_id(&id),
        })
    }

    async fn inner_start_container(
        &self,
        request: StartContainerRequest,
    ) -> Result<StartContainerResponse, Error> {
        let id = parse_container_id(&request.container_id)?;
        self.pool
            .start_container(&id)
            .err_tip(|| "In CriServer::start_container")?;
        Ok(StartContainerResponse {})
    }

    async fn inner_stop_container(
        &self,
        request: StopContainerRequest,
    ) -> Result<StopContainerResponse, Error> {
        let id = parse_container_id(&request.container_id)?;
        // The Kubelet sends the timeout in seconds; zero means "use the default".
        let grace_period =
            (request.timeout > 0).then(|| Duration::from_secs(request.timeout as u64));
        self.pool
            .stop_container(&id, grace_period)
            .await
            .err_tip(|| "In CriServer::stop_container")?;
        Ok(StopContainerResponse {})
    }

    async fn inner_remove_container(
        &self,
        request: RemoveContainerRequest,
    ) -> Result<RemoveContainerResponse, Error> {
        let id = parse_container_id(&request.container_id)?;
        self.pool
            .remove_container(&id)
            .err_tip(|| "In CriServer::remove_container")?;
        Ok(RemoveContainerResponse {})
    }

    async fn inner_list_containers(
        &self,
        request: ListContainersRequest,
    ) -> Result<ListContainersResponse, Error> {
        let mut filter = PodFilter {
            containers_only: true,
            ..PodFilter::default()
        };
        if let Some(proto_filter) = request.filter {
            let by_container = (!proto_filter.id.is_empty())
                .then(|| parse_container_id(&proto_filter.id))
                .transpose()?;
            let by_sandbox = (!proto_filter.pod_sandbox_id.is_empty())
                .then(|| parse_sandbox_id(&proto_filter.pod_sandbox_id))
                .transpose()?;
            match (by_container, by_sandbox) {
                (Some(a), Some(b)) if a != b => {
                    return Ok(ListContainersResponse::default());
                }
                (id @ Some(_), _) | (None, id) => filter.id = id,
            }
            if let Some(state) = proto_filter.state {
                filter.states = Some(pod_states_for_container(state.state()));
            }
            filter.label_selector = proto_filter.label_selector;
        }
        let containers = self.pool.list(&filter).iter().map(to_container).collect();
        Ok(ListContainersResponse { containers })
    }

    async fn inner_container_status(
        &self,
        request: ContainerStatusRequest,
    ) -> Result<ContainerStatusResponse, Error> {
        let id = parse_container_id(&request.container_id)?;
        let entry = self
            .pool
            .get_status(&id)
            .err_tip(|| "In CriServer::container_status")?;
        if entry.container.is_none() {
            return Err(make_err!(Code::NotFound, "Pod {id} has no container"));
        }
        Ok(ContainerStatusResponse {
            status: Some(to_container_status(&entry)),
            info: HashMap::new(),
        })
    }
}

#[tonic::async_trait]
impl RuntimeService for CriServer {
    #[instrument(level = Level::DEBUG, skip_all)]
    async fn version(
        &self,
        _grpc_request: Request<VersionRequest>,
    ) -> Result<Response<VersionResponse>, Status> {
        Ok(Response::new(VersionResponse {
            version: KUBE_API_VERSION.to_string(),
            runtime_name: RUNTIME_NAME.to_string(),
            runtime_version: env!("CARGO_PKG_VERSION").to_string(),
            runtime_api_version: RUNTIME_API_VERSION.to_string(),
        }))
    }

    #[allow(clippy::blocks_in_conditions)]
    #[instrument(
        err,
        ret(level = Level::DEBUG),
        level = Level::ERROR,
        skip_all,
        fields(request = ?grpc_request.get_ref())
    )]
    async fn run_pod_sandbox(
        &self,
        grpc_request: Request<RunPodSandboxRequest>,
    ) -> Result<Response<RunPodSandboxResponse>, Status> {
        self.inner_run_pod_sandbox(grpc_request.into_inner())
            .await
            .map(Response::new)
            .map_err(Into::into)
    }

    #[allow(clippy::blocks_in_conditions)]
    #[instrument(
        err,
        ret(level = Level::DEBUG),
        level = Level::ERROR,
        skip_all,
        fields(request = ?grpc_request.get_ref())
    )]
    async fn stop_pod_sandbox(
        &self,
        grpc_request: Request<StopPodSandboxRequest>,
    ) -> Result<Response<StopPodSandboxResponse>, Status> {
        self.inner_stop_pod_sandbox(grpc_request.into_inner())
            .await
            .map(Response::new)
            .map_err(Into::into)
    }

    #[allow(clippy::blocks_in_conditions)]
    #[instrument(
        err,
        ret(level = Level::DEBUG),
        level = Level::ERROR,
        skip_all,
        fields(request = ?grpc_request.get_ref())
    )]
    async fn remove_pod_sandbox(
        &self,
        grpc_request: Request<RemovePodSandboxRequest>,
    ) -> Result<Response<RemovePodSandboxResponse>, Status> {
        self.inner_remove_pod_sandbox(grpc_request.into_inner())
            .await
            .map(Response::new)
            .map_err(Into::into)
    }

    #[allow(clippy::blocks_in_conditions)]
    #[instrument(err, level = Level::DEBUG, skip_all, fields(request = ?grpc_request.get_ref()))]
    async fn pod_sandbox_status(
        &self,
        grpc_request: Request<PodSandboxStatusRequest>,
    ) -> Result<Response<PodSandboxStatusResponse>, Status> {
        self.inner_pod_sandbox_status(grpc_request.into_inner())
            .await
            .map(Response::new)
            .map_err(Into::into)
    }

    #[allow(clippy::blocks_in_conditions)]
    #[instrument(err, level = Level::TRACE, skip_all)]
    async fn list_pod_sandbox(
        &self,
        grpc_request: Request<ListPodSandboxRequest>,
    ) -> Result<Response<ListPodSandboxResponse>, Status> {
        self.inner_list_pod_sandbox(grpc_request.into_inner())
            .await
            .map(Response::new)
            .map_err(Into::into)
    }

    #[allow(clippy::blocks_in_conditions)]
    #[instrument(
        err,
        ret(level = Level::DEBUG),
        level = Level::ERROR,
        skip_all,
        fields(request = ?grpc_request.get_ref())
    )]
    async fn create_container(
        &self,
        grpc_request: Request<CreateContainerRequest>,
    ) -> Result<Response<CreateContainerResponse>, Status> {
        self.inner_create_container(grpc_request.into_inner())
            .await
            .map(Response::new)
            .map_err(Into::into)
    }

    #[allow(clippy::blocks_in_conditions)]
    #[instrument(
        err,
        ret(level = Level::DEBUG),
        level = Level::ERROR,
        skip_all,
        fields(request = ?grpc_request.get_ref())
    )]
    async fn start_container(
        &self,
        grpc_request: Request<StartContainerRequest>,
    ) -> Result<Response<StartContainerResponse>, Status> {
        self.inner_start_container(grpc_request.into_inner())
            .await
            .map(Response::new)
            .map_err(Into::into)
    }

    #[allow(clippy::blocks_in_conditions)]
    #[instrument(
        err,
        ret(level = Level::DEBUG),
        level = Level::ERROR,
        skip_all,
        fields(request = ?grpc_request.get_ref())
    )]
    async fn stop_container(
        &self,
        grpc_request: Request<StopContainerRequest>,
    ) -> Result<Response<StopContainerResponse>, Status> {
        self.inner_stop_container(grpc_request.into_inner())
            .await
            .map(Response::new)
            .map_err(Into::into)
    }

    #[allow(clippy::blocks_in_conditions)]
    #[instrument(
        err,
        ret(level = Level::DEBUG),
        level = Level::ERROR,
        skip_all,
        fields(request = ?grpc_request.get_ref())
    )]
    async fn remove_container(
        &self,
        grpc_request: Request<RemoveContainerRequest>,
    ) -> Result<Response<RemoveContainerResponse>, Status> {
        self.inner_remove_container(grpc_request.into_inner())
            .await
            .map(Response::new)
            .map_err(Into::into)
    }

    #[allow(clippy::blocks_in_conditions)]
    #[instrument(err, level = Level::TRACE, skip_all)]
    async fn list_containers(
        &self,
        grpc_request: Request<ListContainersRequest>,
    ) -> Result<Response<ListContainersResponse>, Status> {
        self.inner_list_containers(grpc_request.into_inner())
            .await
            .map(Response::new)
            .map_err(Into::into)
    }

    #[allow(clippy::blocks_in_conditions)]
    #[instrument(err, level = Level::DEBUG, skip_all, fields(request = ?grpc_request.get_ref()))]
    async fn container_status(
        &self,
        grpc_request: Request<ContainerStatusRequest>,
    ) -> Result<Response<ContainerStatusResponse>, Status> {
        self.inner_container_status(grpc_request.into_inner())
            .await
            .map(Response::new)
            .map_err(Into::into)
    }

    async fn update_runtime_config(
        &self,
        grpc_request: Request<UpdateRuntimeConfigRequest>,
    ) -> Result<Response<UpdateRuntimeConfigResponse>, Status> {
        let pod_cidr = grpc_request
            .into_inner()
            .runtime_config
            .and_then(|config| config.network_config)
            .map(|network| network.pod_cidr)
            .unwrap_or_default();
        event!(Level::INFO, %pod_cidr, "Kubelet updated runtime config");
        Ok(Response::new(UpdateRuntimeConfigResponse {}))
    }

    async fn status(
        &self,
        _grpc_request: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let condition = |kind: &str| RuntimeCondition {
            r#type: kind.to_string(),
            status: true,
            reason: String::new(),
            message: String::new(),
        };
        Ok(Response::new(StatusResponse {
            status: Some(RuntimeStatus {
                conditions: vec![condition("RuntimeReady"), condition("NetworkReady")],
            }),
            info: HashMap::new(),
        }))
    }
}
