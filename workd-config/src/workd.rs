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

use serde::{Deserialize, Serialize};

use crate::serde_utils::{
    convert_numeric_with_shellexpand, convert_string_with_shellexpand,
    convert_vec_string_with_shellexpand,
};

/// Root of the work node runtime configuration file.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct WorkdConfig {
    /// Kubelet-facing CRI server.
    #[serde(default)]
    pub cri: CriConfig,

    /// Listener for inbound RPC traffic routed to hosted components.
    #[serde(default)]
    pub data_plane: DataPlaneConfig,

    /// Lifecycle tuning for the pod pool.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Address range pods draw their IP address from.
    pub ipam: IpamConfig,

    /// How hosted components are reached once loaded.
    #[serde(default)]
    pub loader: LoaderConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CriConfig {
    /// Unix socket the Kubelet connects to. Any stale file at this path is
    /// removed before binding, and the file is unlinked again on shutdown.
    ///
    /// Default: /run/vimana/workd.sock
    #[serde(
        default = "default_cri_socket_path",
        deserialize_with = "convert_string_with_shellexpand"
    )]
    pub socket_path: String,
}

impl Default for CriConfig {
    fn default() -> Self {
        Self {
            socket_path: default_cri_socket_path(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DataPlaneConfig {
    /// Socket address to listen on, e.g. "0.0.0.0:443".
    #[serde(
        default = "default_data_plane_listen_address",
        deserialize_with = "convert_string_with_shellexpand"
    )]
    pub listen_address: String,

    /// Requests are buffered before forwarding so they can be replayed on
    /// another instance. Larger requests are rejected.
    ///
    /// Default: 4194304 (4MiB)
    #[serde(
        default = "default_max_request_bytes",
        deserialize_with = "convert_numeric_with_shellexpand"
    )]
    pub max_request_bytes: usize,
}

impl Default for DataPlaneConfig {
    fn default() -> Self {
        Self {
            listen_address: default_data_plane_listen_address(),
            max_request_bytes: default_max_request_bytes(),
        }
    }
}

/// Strategy used to pick the `#index` part of a new pod ID.
#[derive(Deserialize, Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IndexAllocation {
    /// Lowest index not currently held by a pod of the same component.
    /// Indices of removed pods are reused.
    #[default]
    LowestFree,

    /// Per-component counter that only moves forward while the process lives.
    Monotonic,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    #[serde(default)]
    pub index_allocation: IndexAllocation,

    /// Time a started container has to load and report readiness before it
    /// is moved to the stopped state.
    ///
    /// Default: 30000
    #[serde(
        default = "default_readiness_timeout_ms",
        deserialize_with = "convert_numeric_with_shellexpand"
    )]
    pub readiness_timeout_ms: u64,

    /// Upper bound on waiting for a hosted component to shut down when its
    /// container is stopped. The Kubelet's own stop timeout wins when set.
    ///
    /// Default: 10000
    #[serde(
        default = "default_stop_grace_period_ms",
        deserialize_with = "convert_numeric_with_shellexpand"
    )]
    pub stop_grace_period_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            index_allocation: IndexAllocation::default(),
            readiness_timeout_ms: default_readiness_timeout_ms(),
            stop_grace_period_ms: default_stop_grace_period_ms(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct IpamConfig {
    /// CIDR block pod addresses are allocated from, e.g. "10.244.0.0/24".
    #[serde(deserialize_with = "convert_string_with_shellexpand")]
    pub subnet: String,

    /// Addresses inside `subnet` that are never handed out (gateways etc).
    #[serde(default, deserialize_with = "convert_vec_string_with_shellexpand")]
    pub reserved: Vec<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoaderConfig {
    /// Port a hosted component listens on at its pod address.
    ///
    /// Default: 443
    #[serde(
        default = "default_loader_port",
        deserialize_with = "convert_numeric_with_shellexpand"
    )]
    pub port: u16,

    /// Delay between readiness checks while a container is starting.
    ///
    /// Default: 100
    #[serde(
        default = "default_readiness_poll_interval_ms",
        deserialize_with = "convert_numeric_with_shellexpand"
    )]
    pub readiness_poll_interval_ms: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            port: default_loader_port(),
            readiness_poll_interval_ms: default_readiness_poll_interval_ms(),
        }
    }
}

fn default_cri_socket_path() -> String {
    "/run/vimana/workd.sock".to_string()
}

fn default_data_plane_listen_address() -> String {
    "0.0.0.0:443".to_string()
}

const fn default_max_request_bytes() -> usize {
    4 * 1024 * 1024
}

const fn default_readiness_timeout_ms() -> u64 {
    30_000
}

const fn default_stop_grace_period_ms() -> u64 {
    10_000
}

const fn default_loader_port() -> u16 {
    443
}

const fn default_readiness_poll_interval_ms() -> u64 {
    100
}
