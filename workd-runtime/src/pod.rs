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
use std::collections::HashMap;
use std::time::SystemTime;

use crate::error::PodPoolError;
use crate::names::{ComponentIdentity, ParseError, PodContainerId};
use crate::state::PodState;

/// Label keys under this prefix belong to the runtime. Where both the sandbox
/// and its container carry one, the values must agree.
pub const RESERVED_LABEL_PREFIX: &str = "vimana.host/";

pub const DOMAIN_LABEL: &str = "vimana.host/domain";
pub const SERVER_LABEL: &str = "vimana.host/server";
pub const VERSION_LABEL: &str = "vimana.host/version";

/// The Kubelet bumps this on every container restart, so it never counts as
/// a parameter change.
pub const RESTART_COUNT_ANNOTATION: &str = "io.kubernetes.container.restartCount";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxMetadata {
    pub name: String,
    pub uid: String,
    pub namespace: String,
    pub attempt: u32,
}

/// Parameters of `RunPodSandbox`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxConfig {
    pub metadata: SandboxMetadata,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
}

impl SandboxConfig {
    /// Reads the component a sandbox is for from its reserved labels.
    pub fn component(&self) -> Result<ComponentIdentity, ParseError> {
        let label = |key: &str| self.labels.get(key).map_or("", String::as_str);
        ComponentIdentity::new(label(DOMAIN_LABEL), label(SERVER_LABEL), label(VERSION_LABEL))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerMetadata {
    pub name: String,
    pub attempt: u32,
}

/// Parameters of `CreateContainer`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub metadata: ContainerMetadata,
    pub image: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub environment: Vec<(String, String)>,
}

impl ContainerSpec {
    /// Whether a repeated `CreateContainer` asks for the same container.
    /// Restart bookkeeping (`attempt` and the restart count annotation) is
    /// ignored.
    pub fn is_equivalent(&self, other: &Self) -> bool {
        fn without_restart_count(annotations: &HashMap<String, String>) -> HashMap<&str, &str> {
            annotations
                .iter()
                .filter(|(key, _)| key.as_str() != RESTART_COUNT_ANNOTATION)
                .map(|(key, value)| (key.as_str(), value.as_str()))
                .collect()
        }
        self.metadata.name == other.metadata.name
            && self.image == other.image
            && self.labels == other.labels
            && self.environment == other.environment
            && without_restart_count(&self.annotations) == without_restart_count(&other.annotations)
    }
}

/// Rejects container labels that disagree on a reserved key. The component
/// labels are checked against the pod ID, every other reserved key against
/// the sandbox labels. Keys the container leaves out are not checked.
pub fn check_reserved_labels(
    id: &PodContainerId,
    sandbox: &HashMap<String, String>,
    container: &HashMap<String, String>,
) -> Result<(), PodPoolError> {
    let component = id.component();
    let from_id = [
        (DOMAIN_LABEL, component.domain()),
        (SERVER_LABEL, component.server()),
        (VERSION_LABEL, component.version()),
    ];
    for (key, container_value) in container {
        if !key.starts_with(RESERVED_LABEL_PREFIX) {
            continue;
        }
        let expected = from_id
            .iter()
            .find(|(component_key, _)| *component_key == key.as_str())
            .map(|(_, value)| *value)
            .or_else(|| sandbox.get(key).map(String::as_str));
        if let Some(expected) = expected {
            if expected != container_value {
                return Err(PodPoolError::LabelMismatch {
                    id: id.clone(),
                    key: key.clone(),
                    sandbox: expected.to_string(),
                    container: container_value.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Snapshot of one pod as stored in the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodEntry {
    pub id: PodContainerId,
    pub state: PodState,
    pub sandbox_metadata: SandboxMetadata,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    /// Released when the pod is killed, after which this is `None`.
    pub ip_address: Option<IpAddr>,
    /// Set by `CreateContainer`, cleared again by `RemoveContainer`.
    pub container: Option<ContainerSpec>,
    pub created_at: SystemTime,
    pub state_changed_at: SystemTime,
    pub container_created_at: Option<SystemTime>,
    pub started_at: Option<SystemTime>,
    pub finished_at: Option<SystemTime>,
    pub exit_code: i32,
    pub reason: String,
    pub message: String,
}

impl PodEntry {
    pub fn image_reference(&self) -> Option<&str> {
        self.container.as_ref().map(|c| c.image.as_str())
    }

    pub fn environment(&self) -> &[(String, String)] {
        self.container
            .as_ref()
            .map_or(&[], |c| c.environment.as_slice())
    }

    /// Container labels while a container exists, sandbox labels otherwise.
    pub fn container_labels(&self) -> &HashMap<String, String> {
        self.container.as_ref().map_or(&self.labels, |c| &c.labels)
    }
}
