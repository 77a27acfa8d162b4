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

use core::net::IpAddr;
use core::time::Duration;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use pretty_assertions::assert_eq;
use workd_config::workd::{IndexAllocation, PoolConfig};
use workd_error::{Code, Error, make_err};
use workd_macro::workd_test;
use workd_runtime::error::PodPoolError;
use workd_runtime::ipam::SubnetIpAllocator;
use workd_runtime::names::{ComponentIdentity, PodContainerId};
use workd_runtime::pod::{
    ContainerMetadata, ContainerSpec, DOMAIN_LABEL, RESTART_COUNT_ANNOTATION, SERVER_LABEL,
    SandboxConfig, SandboxMetadata, VERSION_LABEL,
};
use workd_runtime::pod_pool::{Outcome, PodFilter, PodPool};
use workd_runtime::state::{PodEvent, PodState};

mod utils {
    pub(crate) mod mock_loader;
}

use utils::mock_loader::{MockInvocable, MockLoader};

const WAIT: Duration = Duration::from_secs(5);

fn component() -> ComponentIdentity {
    ComponentIdentity::parse("d:s@1.0.0").unwrap()
}

fn new_pool(
    loader: &Arc<MockLoader>,
    config: &PoolConfig,
    subnet: &str,
) -> Result<Arc<PodPool>, Error> {
    let ip_allocator = SubnetIpAllocator::new(subnet, &[])?;
    Ok(Arc::new(PodPool::new(
        config,
        Arc::new(ip_allocator),
        loader.clone(),
    )))
}

fn default_pool(loader: &Arc<MockLoader>) -> Result<Arc<PodPool>, Error> {
    new_pool(loader, &PoolConfig::default(), "10.0.0.0/24")
}

fn container(image: &str) -> ContainerSpec {
    ContainerSpec {
        metadata: ContainerMetadata {
            name: "main".to_string(),
            attempt: 0,
        },
        image: image.to_string(),
        labels: HashMap::new(),
        annotations: HashMap::new(),
        environment: vec![("GREETING".to_string(), "hello".to_string())],
    }
}

async fn wait_for(pool: &PodPool, id: &PodContainerId, state: PodState) -> Result<(), Error> {
    tokio::time::timeout(WAIT, pool.wait_for_state(id, |s| s == Some(state))).await??;
    Ok(())
}

async fn running_pod(pool: &Arc<PodPool>) -> Result<PodContainerId, Error> {
    let id = pool.create_sandbox(component(), SandboxConfig::default())?;
    pool.create_container(&id, container("img"))?;
    pool.start_container(&id)?;
    wait_for(pool, &id, PodState::Running).await?;
    Ok(id)
}

fn state_of(pool: &PodPool, id: &PodContainerId) -> Result<PodState, Error> {
    Ok(pool.get_status(id)?.state)
}

#[workd_test]
async fn full_lifecycle() -> Result<(), Error> {
    let loader = MockLoader::new();
    let handle = MockInvocable::ready();
    loader.push_handle(handle.clone());
    let pool = default_pool(&loader)?;

    let id = pool.create_sandbox(component(), SandboxConfig::default())?;
    assert_eq!(id.to_string(), "d:s@1.0.0#0");
    let entry = pool.get_status(&id)?;
    assert_eq!(entry.state, PodState::Initiated);
    assert_eq!(entry.ip_address, Some("10.0.0.1".parse::<IpAddr>().unwrap()));

    assert_eq!(pool.create_container(&id, container("img"))?, Outcome::Applied);
    let entry = pool.get_status(&id)?;
    assert_eq!(entry.state, PodState::Created);
    assert_eq!(entry.image_reference(), Some("img"));
    assert!(entry.container_created_at.is_some());

    assert_eq!(pool.start_container(&id)?, Outcome::Applied);
    assert_eq!(state_of(&pool, &id)?, PodState::Starting);
    wait_for(&pool, &id, PodState::Running).await?;
    assert_eq!(pool.find_serving(&component()), HashSet::from([id.clone()]));
    assert!(pool.get_status(&id)?.started_at.is_some());

    let requests = loader.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].image, "img");
    assert_eq!(requests[0].ip_address, entry.ip_address);
    assert_eq!(requests[0].environment, container("img").environment);

    assert_eq!(pool.stop_container(&id, None).await?, Outcome::Applied);
    let entry = pool.get_status(&id)?;
    assert_eq!(entry.state, PodState::Stopped);
    assert_eq!(entry.exit_code, 0);
    assert!(entry.finished_at.is_some());
    assert!(pool.find_serving(&component()).is_empty());
    assert_eq!(handle.shutdown_count(), 1);

    assert_eq!(pool.remove_container(&id)?, Outcome::Applied);
    assert_eq!(state_of(&pool, &id)?, PodState::Removed);
    assert_eq!(pool.get_status(&id)?.container, None);

    assert_eq!(pool.stop_sandbox(&id).await?, Outcome::Applied);
    let entry = pool.get_status(&id)?;
    assert_eq!(entry.state, PodState::Killed);
    assert_eq!(entry.ip_address, None);

    assert_eq!(pool.remove_sandbox(&id)?, Outcome::Applied);
    assert_eq!(pool.get_status(&id), Err(PodPoolError::NotFound(id.clone())));
    assert_eq!(pool.remove_sandbox(&id)?, Outcome::Unchanged);
    Ok(())
}

#[workd_test]
async fn repeated_calls_are_idempotent() -> Result<(), Error> {
    let loader = MockLoader::new();
    let pool = default_pool(&loader)?;
    let id = running_pod(&pool).await?;

    assert_eq!(pool.create_container(&id, container("img"))?, Outcome::Unchanged);
    assert_eq!(pool.start_container(&id)?, Outcome::Unchanged);
    assert_eq!(pool.stop_container(&id, None).await?, Outcome::Applied);
    assert_eq!(pool.stop_container(&id, None).await?, Outcome::Unchanged);
    assert_eq!(pool.remove_container(&id)?, Outcome::Applied);
    assert_eq!(pool.remove_container(&id)?, Outcome::Unchanged);
    assert_eq!(pool.stop_sandbox(&id).await?, Outcome::Applied);
    assert_eq!(pool.stop_sandbox(&id).await?, Outcome::Unchanged);
    assert_eq!(loader.requests().len(), 1);
    Ok(())
}

#[workd_test]
async fn create_container_conflicts_on_different_parameters() -> Result<(), Error> {
    let pool = default_pool(&MockLoader::new())?;
    let id = pool.create_sandbox(component(), SandboxConfig::default())?;
    pool.create_container(&id, container("img"))?;

    let mut restarted = container("img");
    restarted.metadata.attempt = 3;
    restarted
        .annotations
        .insert(RESTART_COUNT_ANNOTATION.to_string(), "3".to_string());
    assert_eq!(pool.create_container(&id, restarted)?, Outcome::Unchanged);

    let err = pool.create_container(&id, container("other")).unwrap_err();
    assert_eq!(
        err,
        PodPoolError::ConflictingState {
            id: id.clone(),
            state: PodState::Created,
        }
    );
    assert_eq!(Error::from(err).code, Code::AlreadyExists);
    assert_eq!(pool.get_status(&id)?.image_reference(), Some("img"));
    Ok(())
}

#[workd_test]
async fn reserved_label_mismatch_is_rejected() -> Result<(), Error> {
    let pool = default_pool(&MockLoader::new())?;
    let sandbox = SandboxConfig {
        labels: HashMap::from([
            ("vimana.host/x".to_string(), "a".to_string()),
            ("app".to_string(), "shop".to_string()),
        ]),
        ..SandboxConfig::default()
    };
    let id = pool.create_sandbox(component(), sandbox)?;

    let mut mismatched = container("img");
    mismatched
        .labels
        .insert("vimana.host/x".to_string(), "b".to_string());
    let err = pool.create_container(&id, mismatched).unwrap_err();
    assert_eq!(
        err,
        PodPoolError::LabelMismatch {
            id: id.clone(),
            key: "vimana.host/x".to_string(),
            sandbox: "a".to_string(),
            container: "b".to_string(),
        }
    );
    assert_eq!(Error::from(err).code, Code::InvalidArgument);
    assert_eq!(state_of(&pool, &id)?, PodState::Initiated);

    // Only reserved keys have to agree.
    let mut relabeled = container("img");
    relabeled
        .labels
        .insert("app".to_string(), "cart".to_string());
    relabeled
        .labels
        .insert("vimana.host/x".to_string(), "a".to_string());
    assert_eq!(pool.create_container(&id, relabeled)?, Outcome::Applied);
    Ok(())
}

#[workd_test]
async fn component_labels_must_match_the_pod() -> Result<(), Error> {
    let pool = default_pool(&MockLoader::new())?;
    let id = pool.create_sandbox(component(), SandboxConfig::default())?;

    let mut other_version = container("img");
    other_version
        .labels
        .insert(VERSION_LABEL.to_string(), "2.0.0".to_string());
    let err = pool.create_container(&id, other_version).unwrap_err();
    assert_eq!(
        err,
        PodPoolError::LabelMismatch {
            id: id.clone(),
            key: VERSION_LABEL.to_string(),
            sandbox: "1.0.0".to_string(),
            container: "2.0.0".to_string(),
        }
    );

    let mut matching = container("img");
    matching.labels.extend([
        (DOMAIN_LABEL.to_string(), "d".to_string()),
        (SERVER_LABEL.to_string(), "s".to_string()),
        (VERSION_LABEL.to_string(), "1.0.0".to_string()),
    ]);
    assert_eq!(pool.create_container(&id, matching)?, Outcome::Applied);
    Ok(())
}

#[workd_test]
async fn illegal_transitions_leave_state_unchanged() -> Result<(), Error> {
    let pool = default_pool(&MockLoader::new())?;
    let id = pool.create_sandbox(component(), SandboxConfig::default())?;

    let err = pool.start_container(&id).unwrap_err();
    assert_eq!(
        err,
        PodPoolError::IllegalTransition {
            id: id.clone(),
            state: PodState::Initiated,
            event: PodEvent::StartContainer,
        }
    );
    assert_eq!(Error::from(err).code, Code::FailedPrecondition);
    assert!(pool.remove_container(&id).is_err());
    assert!(pool.stop_container(&id, None).await.is_err());
    assert!(pool.remove_sandbox(&id).is_err());
    assert_eq!(state_of(&pool, &id)?, PodState::Initiated);

    pool.stop_sandbox(&id).await?;
    assert!(pool.create_container(&id, container("img")).is_err());
    assert_eq!(state_of(&pool, &id)?, PodState::Killed);
    Ok(())
}

#[workd_test]
async fn absent_ids() -> Result<(), Error> {
    let pool = default_pool(&MockLoader::new())?;
    let id = PodContainerId::parse("d:s@1.0.0#9")?;

    assert_eq!(pool.stop_container(&id, None).await?, Outcome::Unchanged);
    assert_eq!(pool.remove_container(&id)?, Outcome::Unchanged);
    assert_eq!(pool.stop_sandbox(&id).await?, Outcome::Unchanged);
    assert_eq!(pool.remove_sandbox(&id)?, Outcome::Unchanged);

    let not_found = PodPoolError::NotFound(id.clone());
    assert_eq!(pool.create_container(&id, container("img")), Err(not_found.clone()));
    assert_eq!(pool.start_container(&id), Err(not_found.clone()));
    assert_eq!(pool.get_status(&id), Err(not_found.clone()));
    assert_eq!(Error::from(not_found).code, Code::NotFound);
    Ok(())
}

#[workd_test]
async fn stop_during_start_wins() -> Result<(), Error> {
    let loader = MockLoader::new();
    let handle = MockInvocable::pending();
    loader.push_handle(handle.clone());
    let pool = default_pool(&loader)?;
    let id = pool.create_sandbox(component(), SandboxConfig::default())?;
    pool.create_container(&id, container("img"))?;

    pool.start_container(&id)?;
    assert_eq!(state_of(&pool, &id)?, PodState::Starting);
    // Let the start task load the component and block on readiness.
    tokio::time::timeout(WAIT, async {
        while loader.requests().is_empty() {
            tokio::task::yield_now().await;
        }
    })
    .await?;
    assert_eq!(state_of(&pool, &id)?, PodState::Starting);
    assert_eq!(pool.stop_container(&id, None).await?, Outcome::Applied);
    assert_eq!(state_of(&pool, &id)?, PodState::Stopped);

    // Readiness for the superseded start arrives late.
    handle.set_ready(true);
    tokio::time::timeout(WAIT, handle.wait_for_shutdown()).await?;

    assert_eq!(state_of(&pool, &id)?, PodState::Stopped);
    assert!(pool.find_serving(&component()).is_empty());
    assert_eq!(handle.shutdown_count(), 1);
    Ok(())
}

#[workd_test]
async fn superseded_start_result_is_discarded() -> Result<(), Error> {
    let loader = MockLoader::new();
    let first = MockInvocable::pending();
    let second = MockInvocable::ready();
    loader.push_handle(first.clone());
    loader.push_handle(second.clone());
    let pool = default_pool(&loader)?;
    let id = pool.create_sandbox(component(), SandboxConfig::default())?;
    pool.create_container(&id, container("img"))?;

    pool.start_container(&id)?;
    pool.stop_container(&id, None).await?;
    pool.start_container(&id)?;
    wait_for(&pool, &id, PodState::Running).await?;

    first.set_ready(true);
    tokio::time::timeout(WAIT, first.wait_for_shutdown()).await?;

    assert_eq!(state_of(&pool, &id)?, PodState::Running);
    let serving = pool.serving_instances(&component());
    assert_eq!(serving.len(), 1);
    assert_eq!(serving[0].id, id);
    assert_eq!(second.shutdown_count(), 0);
    Ok(())
}

#[workd_test]
async fn failed_readiness_stops_the_pod() -> Result<(), Error> {
    let loader = MockLoader::new();
    let handle = MockInvocable::pending();
    loader.push_handle(handle.clone());
    let pool = default_pool(&loader)?;
    let id = pool.create_sandbox(component(), SandboxConfig::default())?;
    pool.create_container(&id, container("img"))?;

    pool.start_container(&id)?;
    handle.set_ready(false);
    wait_for(&pool, &id, PodState::Stopped).await?;

    let entry = pool.get_status(&id)?;
    assert_eq!(entry.exit_code, 1);
    assert_eq!(entry.reason, "StartError");
    assert!(entry.message.contains("not ready"), "{}", entry.message);
    assert_eq!(handle.shutdown_count(), 1);
    assert!(pool.find_serving(&component()).is_empty());

    // A stopped container can be started again.
    pool.start_container(&id)?;
    wait_for(&pool, &id, PodState::Running).await?;
    assert_eq!(pool.get_status(&id)?.exit_code, 0);
    Ok(())
}

#[workd_test]
async fn failed_load_stops_the_pod() -> Result<(), Error> {
    let loader = MockLoader::new();
    loader.push_error(make_err!(Code::NotFound, "image not found"));
    let pool = default_pool(&loader)?;
    let id = pool.create_sandbox(component(), SandboxConfig::default())?;
    pool.create_container(&id, container("missing"))?;

    pool.start_container(&id)?;
    wait_for(&pool, &id, PodState::Stopped).await?;
    let entry = pool.get_status(&id)?;
    assert_eq!(entry.exit_code, 1);
    assert!(entry.message.contains("image not found"), "{}", entry.message);
    Ok(())
}

#[workd_test]
async fn readiness_is_bounded_by_timeout() -> Result<(), Error> {
    let loader = MockLoader::new();
    let handle = MockInvocable::pending();
    loader.push_handle(handle.clone());
    let config = PoolConfig {
        readiness_timeout_ms: 20,
        ..PoolConfig::default()
    };
    let pool = new_pool(&loader, &config, "10.0.0.0/24")?;
    let id = pool.create_sandbox(component(), SandboxConfig::default())?;
    pool.create_container(&id, container("img"))?;

    pool.start_container(&id)?;
    wait_for(&pool, &id, PodState::Stopped).await?;
    assert_eq!(pool.get_status(&id)?.exit_code, 1);
    assert_eq!(handle.shutdown_count(), 1);
    Ok(())
}

#[workd_test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_stops_apply_once() -> Result<(), Error> {
    const STOPPERS: usize = 16;
    let pool = default_pool(&MockLoader::new())?;
    let id = running_pod(&pool).await?;

    let stoppers: Vec<_> = (0..STOPPERS)
        .map(|_| {
            let pool = pool.clone();
            let id = id.clone();
            tokio::spawn(async move { pool.stop_container(&id, None).await })
        })
        .collect();
    let mut applied = 0;
    for stopper in stoppers {
        if stopper.await?? == Outcome::Applied {
            applied += 1;
        }
    }
    assert_eq!(applied, 1);
    assert_eq!(state_of(&pool, &id)?, PodState::Stopped);
    assert!(pool.find_serving(&component()).is_empty());
    Ok(())
}

#[workd_test]
async fn component_index_tracks_running_pods() -> Result<(), Error> {
    let pool = default_pool(&MockLoader::new())?;
    let other = ComponentIdentity::parse("d:other@2.0.0")?;
    let a = running_pod(&pool).await?;
    let b = running_pod(&pool).await?;
    let c = running_pod(&pool).await?;
    let idle = pool.create_sandbox(other.clone(), SandboxConfig::default())?;

    pool.stop_container(&b, None).await?;
    pool.stop_sandbox(&c).await?;

    let serving = pool.find_serving(&component());
    assert_eq!(serving, HashSet::from([a.clone()]));
    for entry in pool.list(&PodFilter::default()) {
        let indexed = pool.find_serving(entry.id.component()).contains(&entry.id);
        assert_eq!(indexed, entry.state == PodState::Running, "{}", entry.id);
    }
    assert!(pool.find_serving(&other).is_empty());
    assert_eq!(state_of(&pool, &idle)?, PodState::Initiated);
    Ok(())
}

#[workd_test]
async fn exhausted_addresses_and_index_reuse() -> Result<(), Error> {
    // Two usable addresses.
    let pool = new_pool(&MockLoader::new(), &PoolConfig::default(), "10.0.0.0/30")?;
    let first = pool.create_sandbox(component(), SandboxConfig::default())?;
    let second = pool.create_sandbox(component(), SandboxConfig::default())?;
    assert_eq!((first.index(), second.index()), (0, 1));

    let err = pool
        .create_sandbox(component(), SandboxConfig::default())
        .unwrap_err();
    assert!(matches!(err, PodPoolError::ResourceExhausted(_)));

    let first_ip = pool.get_status(&first)?.ip_address;
    pool.stop_sandbox(&first).await?;
    pool.remove_sandbox(&first)?;

    let third = pool.create_sandbox(component(), SandboxConfig::default())?;
    assert_eq!(third, first);
    assert_eq!(pool.get_status(&third)?.ip_address, first_ip);
    Ok(())
}

#[workd_test]
async fn monotonic_indices_are_not_reused() -> Result<(), Error> {
    let config = PoolConfig {
        index_allocation: IndexAllocation::Monotonic,
        ..PoolConfig::default()
    };
    let pool = new_pool(&MockLoader::new(), &config, "10.0.0.0/24")?;
    let first = pool.create_sandbox(component(), SandboxConfig::default())?;
    pool.stop_sandbox(&first).await?;
    pool.remove_sandbox(&first)?;

    let second = pool.create_sandbox(component(), SandboxConfig::default())?;
    assert_eq!(second.index(), 1);
    let other = pool.create_sandbox(
        ComponentIdentity::parse("d:other@1.0.0")?,
        SandboxConfig::default(),
    )?;
    assert_eq!(other.index(), 0);
    Ok(())
}

#[workd_test]
async fn run_pod_sandbox_is_create_if_absent() -> Result<(), Error> {
    let pool = default_pool(&MockLoader::new())?;
    let config = SandboxConfig {
        metadata: SandboxMetadata {
            name: "cart-0".to_string(),
            uid: "3f1c".to_string(),
            namespace: "default".to_string(),
            attempt: 0,
        },
        ..SandboxConfig::default()
    };
    let id = pool.create_sandbox(component(), config.clone())?;
    assert_eq!(pool.create_sandbox(component(), config.clone())?, id);
    assert_eq!(pool.list(&PodFilter::default()).len(), 1);

    pool.stop_sandbox(&id).await?;
    let replacement = pool.create_sandbox(component(), config)?;
    assert_ne!(replacement, id);
    Ok(())
}

#[workd_test]
async fn list_filters() -> Result<(), Error> {
    let pool = default_pool(&MockLoader::new())?;
    let labeled = SandboxConfig {
        labels: HashMap::from([("tier".to_string(), "web".to_string())]),
        ..SandboxConfig::default()
    };
    let sandbox_only = pool.create_sandbox(component(), labeled)?;
    let running = running_pod(&pool).await?;

    let all = pool.list(&PodFilter::default());
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].id, sandbox_only);

    let by_state = pool.list(&PodFilter {
        states: Some(vec![PodState::Running]),
        ..PodFilter::default()
    });
    assert_eq!(by_state.len(), 1);
    assert_eq!(by_state[0].id, running);

    let by_label = pool.list(&PodFilter {
        label_selector: HashMap::from([("tier".to_string(), "web".to_string())]),
        ..PodFilter::default()
    });
    assert_eq!(by_label.len(), 1);
    assert_eq!(by_label[0].id, sandbox_only);

    let containers = pool.list(&PodFilter {
        containers_only: true,
        ..PodFilter::default()
    });
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].id, running);

    let by_id = pool.list(&PodFilter {
        id: Some(running.clone()),
        ..PodFilter::default()
    });
    assert_eq!(by_id.len(), 1);
    Ok(())
}
