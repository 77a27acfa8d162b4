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

//! Kubelet-facing `runtime.v1.ImageService`.
//!
//! An image here is a reference to a component, not a filesystem bundle.
//! Pulling checks the reference and records it; the loader fetches the
//! component itself when a container starts.

use std::collections::HashMap;
use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::{Level, instrument};
use workd_error::{Code, Error, ResultExt, make_err, make_input_err};
use workd_proto::runtime::v1::image_service_server::{
    ImageService, ImageServiceServer as Server,
};
use workd_proto::runtime::v1::{
    Image, ImageFsInfoRequest, ImageFsInfoResponse, ImageSpec, ImageStatusRequest,
    ImageStatusResponse, ListImagesRequest, ListImagesResponse, PullImageRequest,
    PullImageResponse, RemoveImageRequest, RemoveImageResponse,
};
use workd_runtime::image_store::{ImageRecord, ImageStore};
use workd_runtime::names::{ComponentIdentity, ImageReference};
use workd_runtime::pod::SandboxConfig;
use workd_runtime::pod_pool::{PodFilter, PodPool};

use crate::cri_server::check_runtime_handler;

fn to_image(record: &ImageRecord) -> Image {
    let reference = record.reference.to_string();
    Image {
        id: record.id(),
        repo_tags: vec![reference.clone()],
        repo_digests: Vec::new(),
        size: 0,
        spec: Some(ImageSpec {
            image: reference,
            ..Default::default()
        }),
        pinned: false,
    }
}

fn image_spec_or_err(spec: Option<ImageSpec>) -> Result<ImageSpec, Error> {
    let spec = spec
        .filter(|spec| !spec.image.is_empty())
        .ok_or_else(|| make_input_err!("Expected an image to be set"))?;
    check_runtime_handler(&spec.runtime_handler)?;
    Ok(spec)
}

/// The Kubelet names an image either by the reference it pulled or by the
/// image ID it was given back, which is the component identity.
fn component_of(image: &str) -> Result<ComponentIdentity, Error> {
    if let Ok(reference) = ImageReference::parse(image) {
        return Ok(reference.component().clone());
    }
    ComponentIdentity::parse(image).err_tip(|| format!("'{image}' names no component image"))
}

#[derive(Debug, Clone)]
pub struct ImageServer {
    pool: Arc<PodPool>,
    images: Arc<ImageStore>,
}

impl ImageServer {
    pub const fn new(pool: Arc<PodPool>, images: Arc<ImageStore>) -> Self {
        Self { pool, images }
    }

    pub fn into_service(self) -> Server<Self> {
        Server::new(self)
    }

    async fn inner_list_images(
        &self,
        request: ListImagesRequest,
    ) -> Result<ListImagesResponse, Error> {
        let wanted = request
            .filter
            .and_then(|filter| filter.image)
            .filter(|spec| !spec.image.is_empty())
            .map(|spec| component_of(&spec.image))
            .transpose()?;
        let images = self
            .images
            .list()
            .iter()
            .filter(|record| {
                wanted
                    .as_ref()
                    .is_none_or(|component| record.reference.component() == component)
            })
            .map(to_image)
            .collect();
        Ok(ListImagesResponse { images })
    }

    async fn inner_image_status(
        &self,
        request: ImageStatusRequest,
    ) -> Result<ImageStatusResponse, Error> {
        let spec = image_spec_or_err(request.image)?;
        let component = component_of(&spec.image)?;
        Ok(ImageStatusResponse {
            image: self.images.get(&component).as_ref().map(to_image),
            info: HashMap::new(),
        })
    }

    async fn inner_pull_image(
        &self,
        request: PullImageRequest,
    ) -> Result<PullImageResponse, Error> {
        let spec = image_spec_or_err(request.image)?;
        let reference =
            ImageReference::parse(&spec.image).err_tip(|| "In ImageServer::pull_image")?;
        if let Some(config) = request.sandbox_config {
            let sandbox = SandboxConfig {
                labels: config.labels,
                ..SandboxConfig::default()
            };
            let component = sandbox
                .component()
                .err_tip(|| "Sandbox labels do not name a valid component")?;
            if &component != reference.component() {
                return Err(make_input_err!(
                    "Image {reference} holds {}, but the sandbox runs {component}",
                    reference.component()
                ));
            }
        }
        let record = self.images.record(reference);
        Ok(PullImageResponse {
            image_ref: record.id(),
        })
    }

    async fn inner_remove_image(
        &self,
        request: RemoveImageRequest,
    ) -> Result<RemoveImageResponse, Error> {
        let spec = image_spec_or_err(request.image)?;
        let component = component_of(&spec.image)?;
        let filter = PodFilter {
            containers_only: true,
            ..PodFilter::default()
        };
        if let Some(entry) = self
            .pool
            .list(&filter)
            .into_iter()
            .find(|entry| entry.id.component() == &component)
        {
            return Err(make_err!(
                Code::FailedPrecondition,
                "Image for {component} is in use by container {}",
                entry.id
            ));
        }
        self.images.remove(&component);
        Ok(RemoveImageResponse {})
    }
}

#[tonic::async_trait]
impl ImageService for ImageServer {
    #[allow(clippy::blocks_in_conditions)]
    #[instrument(err, level = Level::TRACE, skip_all)]
    async fn list_images(
        &self,
        grpc_request: Request<ListImagesRequest>,
    ) -> Result<Response<ListImagesResponse>, Status> {
        self.inner_list_images(grpc_request.into_inner())
            .await
            .map(Response::new)
            .map_err(Into::into)
    }

    #[allow(clippy::blocks_in_conditions)]
    #[instrument(err, level = Level::DEBUG, skip_all, fields(request = ?grpc_request.get_ref()))]
    async fn image_status(
        &self,
        grpc_request: Request<ImageStatusRequest>,
    ) -> Result<Response<ImageStatusResponse>, Status> {
        self.inner_image_status(grpc_request.into_inner())
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
    async fn pull_image(
        &self,
        grpc_request: Request<PullImageRequest>,
    ) -> Result<Response<PullImageResponse>, Status> {
        self.inner_pull_image(grpc_request.into_inner())
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
    async fn remove_image(
        &self,
        grpc_request: Request<RemoveImageRequest>,
    ) -> Result<Response<RemoveImageResponse>, Status> {
        self.inner_remove_image(grpc_request.into_inner())
            .await
            .map(Response::new)
            .map_err(Into::into)
    }

    /// Pulled images take no space on this node.
    async fn image_fs_info(
        &self,
        _grpc_request: Request<ImageFsInfoRequest>,
    ) -> Result<Response<ImageFsInfoResponse>, Status> {
        Ok(Response::new(ImageFsInfoResponse::default()))
    }
}
