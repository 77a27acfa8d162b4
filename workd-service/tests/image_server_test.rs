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

use std::collections::HashMap;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use tonic::Request;
use workd_config::workd::PoolConfig;
use workd_error::{Code, Error};
use workd_macro::workd_test;
use workd_proto::runtime::v1::image_service_server::ImageService;
use workd_proto::runtime::v1::{
    ImageFilter, ImageFsInfoRequest, ImageSpec, ImageStatusRequest, ListImagesRequest,
    PodSandboxConfig, PullImageRequest, RemoveImageRequest,
};
use workd_runtime::image_store::ImageStore;
use workd_runtime::ipam::SubnetIpAllocator;
use workd_runtime::names::{ComponentIdentity, ImageReference};
use workd_runtime::pod::{
    ContainerMetadata, ContainerSpec, DOMAIN_LABEL, SERVER_LABEL, SandboxConfig, VERSION_LABEL,
};
use workd_runtime::pod_pool::PodPool;
use workd_service::image_server::ImageServer;

mod utils {
    pub(crate) mod mock_component;
}

use utils::mock_component::MockLoader;

const GREETER: &str = "example.com:helloworld.Greeter@1.0.0";

fn new_server() -> Result<(ImageServer, Arc<PodPool>), Error> {
    let pool = Arc::new(PodPool::new(
        &PoolConfig::default(),
        Arc::new(SubnetIpAllocator::new("10.1.0.0/24", &[])?),
        MockLoader::new(),
    ));
    let server = ImageServer::new(pool.clone(), Arc::new(ImageStore::new()));
    Ok((server, pool))
}

fn reference(registry: &str, component: &str) -> Result<String, Error> {
    Ok(ImageReference::new(registry, ComponentIdentity::parse(component)?)?.to_string())
}

fn spec(image: &str) -> Option<ImageSpec> {
    Some(ImageSpec {
        image: image.to_string(),
        ..Default::default()
    })
}

async fn pull(server: &ImageServer, image: &str) -> Result<String, Error> {
    Ok(server
        .pull_image(Request::new(PullImageRequest {
            image: spec(image),
            sandbox_config: None,
        }))
        .await?
        .into_inner()
        .image_ref)
}

#[workd_test]
async fn pulled_images_are_reported() -> Result<(), Error> {
    let (server, _pool) = new_server()?;
    let greeter = reference("registry.local", GREETER)?;

    let status = server
        .image_status(Request::new(ImageStatusRequest {
            image: spec(&greeter),
            verbose: false,
        }))
        .await?
        .into_inner();
    assert_eq!(status.image, None);

    let image_ref = pull(&server, &greeter).await?;
    assert_eq!(image_ref, GREETER);

    // Found by the pulled reference and by the returned image ID.
    for name in [greeter.as_str(), image_ref.as_str()] {
        let image = server
            .image_status(Request::new(ImageStatusRequest {
                image: spec(name),
                verbose: false,
            }))
            .await?
            .into_inner()
            .image
            .unwrap();
        assert_eq!(image.id, GREETER);
        assert_eq!(image.repo_tags, vec![greeter.clone()]);
    }

    pull(&server, &reference("registry.local", "example.com:shop.Cart@2.0.0")?).await?;
    let all = server
        .list_images(Request::new(ListImagesRequest::default()))
        .await?
        .into_inner()
        .images;
    let ids: Vec<&str> = all.iter().map(|image| image.id.as_str()).collect();
    assert_eq!(ids, vec![GREETER, "example.com:shop.Cart@2.0.0"]);

    let filtered = server
        .list_images(Request::new(ListImagesRequest {
            filter: Some(ImageFilter { image: spec(GREETER) }),
        }))
        .await?
        .into_inner()
        .images;
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].id, GREETER);

    let fs_info = server
        .image_fs_info(Request::new(ImageFsInfoRequest {}))
        .await?
        .into_inner();
    assert!(fs_info.image_filesystems.is_empty());
    Ok(())
}

#[workd_test]
async fn pull_rejects_bad_references() -> Result<(), Error> {
    let (server, _pool) = new_server()?;
    let err = pull(&server, "registry.local/greeter:1.0.0")
        .await
        .expect_err("server is not hex encoded");
    assert_eq!(err.code, Code::InvalidArgument);

    let err = server
        .pull_image(Request::new(PullImageRequest {
            image: None,
            sandbox_config: None,
        }))
        .await
        .expect_err("no image");
    assert_eq!(Error::from(err).code, Code::InvalidArgument);

    let err = server
        .pull_image(Request::new(PullImageRequest {
            image: Some(ImageSpec {
                image: reference("registry.local", GREETER)?,
                runtime_handler: "runc".to_string(),
                ..Default::default()
            }),
            sandbox_config: None,
        }))
        .await
        .expect_err("foreign runtime handler");
    assert_eq!(Error::from(err).code, Code::InvalidArgument);
    Ok(())
}

#[workd_test]
async fn pull_checks_the_sandbox_component() -> Result<(), Error> {
    let (server, _pool) = new_server()?;
    let sandbox_config = |version: &str| PodSandboxConfig {
        labels: HashMap::from([
            (DOMAIN_LABEL.to_string(), "example.com".to_string()),
            (SERVER_LABEL.to_string(), "helloworld.Greeter".to_string()),
            (VERSION_LABEL.to_string(), version.to_string()),
        ]),
        ..Default::default()
    };
    let greeter = reference("registry.local", GREETER)?;

    let err = server
        .pull_image(Request::new(PullImageRequest {
            image: spec(&greeter),
            sandbox_config: Some(sandbox_config("2.0.0")),
        }))
        .await
        .expect_err("sandbox runs another version");
    assert_eq!(Error::from(err).code, Code::InvalidArgument);

    let image_ref = server
        .pull_image(Request::new(PullImageRequest {
            image: spec(&greeter),
            sandbox_config: Some(sandbox_config("1.0.0")),
        }))
        .await?
        .into_inner()
        .image_ref;
    assert_eq!(image_ref, GREETER);
    Ok(())
}

#[workd_test]
async fn images_in_use_are_not_removed() -> Result<(), Error> {
    let (server, pool) = new_server()?;
    let greeter = reference("registry.local", GREETER)?;
    pull(&server, &greeter).await?;

    let component = ComponentIdentity::parse(GREETER)?;
    let id = pool.create_sandbox(component, SandboxConfig::default())?;
    pool.create_container(
        &id,
        ContainerSpec {
            metadata: ContainerMetadata {
                name: "main".to_string(),
                attempt: 0,
            },
            image: greeter.clone(),
            labels: HashMap::new(),
            annotations: HashMap::new(),
            environment: Vec::new(),
        },
    )?;
    let remove = || {
        server.remove_image(Request::new(RemoveImageRequest {
            image: spec(&greeter),
        }))
    };
    let err = remove().await.expect_err("container uses the image");
    assert_eq!(Error::from(err).code, Code::FailedPrecondition);

    // A killed sandbox no longer holds its container.
    pool.stop_sandbox(&id).await?;
    remove().await?;
    // Removing an absent image is a no-op.
    remove().await?;
    let images = server
        .list_images(Request::new(ListImagesRequest::default()))
        .await?
        .into_inner()
        .images;
    assert!(images.is_empty());
    Ok(())
}
