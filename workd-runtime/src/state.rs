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

use core::fmt;

/// Lifecycle state of a pod and its single container.
///
/// An ID that is not in the pool at all is "absent"; that is modeled as
/// `Option<PodState>::None` by callers rather than as a variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PodState {
    /// Sandbox exists and holds an IP address, no container yet.
    Initiated,
    /// Container has been created but not started.
    Created,
    /// Component is being loaded or waiting for readiness.
    Starting,
    /// Component is ready and reachable from the data plane.
    Running,
    /// Container exited, either stopped or failed to start.
    Stopped,
    /// Container removed, the sandbox may get a new one.
    Removed,
    /// Sandbox torn down and its IP released. Only removal is left.
    Killed,
}

impl PodState {
    pub const ALL: [Self; 7] = [
        Self::Initiated,
        Self::Created,
        Self::Starting,
        Self::Running,
        Self::Stopped,
        Self::Removed,
        Self::Killed,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initiated => "Initiated",
            Self::Created => "Created",
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Removed => "Removed",
            Self::Killed => "Killed",
        }
    }

    /// True while the pod has (or had) a container that the Kubelet can see.
    pub const fn has_container(self) -> bool {
        matches!(
            self,
            Self::Created | Self::Starting | Self::Running | Self::Stopped
        )
    }
}

impl fmt::Display for PodState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to the lifecycle automaton. All but the last two come from CRI
/// calls; readiness events are raised by the start pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PodEvent {
    CreateContainer,
    StartContainer,
    StopContainer,
    RemoveContainer,
    StopPodSandbox,
    RemovePodSandbox,
    ReadinessSucceeded,
    ReadinessFailed,
}

impl PodEvent {
    pub const ALL: [Self; 8] = [
        Self::CreateContainer,
        Self::StartContainer,
        Self::StopContainer,
        Self::RemoveContainer,
        Self::StopPodSandbox,
        Self::RemovePodSandbox,
        Self::ReadinessSucceeded,
        Self::ReadinessFailed,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CreateContainer => "CreateContainer",
            Self::StartContainer => "StartContainer",
            Self::StopContainer => "StopContainer",
            Self::RemoveContainer => "RemoveContainer",
            Self::StopPodSandbox => "StopPodSandbox",
            Self::RemovePodSandbox => "RemovePodSandbox",
            Self::ReadinessSucceeded => "ReadinessSucceeded",
            Self::ReadinessFailed => "ReadinessFailed",
        }
    }

    /// Destructive events succeed trivially on an absent ID.
    pub const fn is_destructive(self) -> bool {
        matches!(
            self,
            Self::StopContainer
                | Self::RemoveContainer
                | Self::StopPodSandbox
                | Self::RemovePodSandbox
        )
    }
}

impl fmt::Display for PodEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of feeding one event to one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Move to a new state.
    Enter(PodState),
    /// Already where the event leads. The caller still has to check that
    /// the event's parameters match what was recorded.
    Settled,
    /// Drop the entry from the pool.
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalTransition {
    pub state: PodState,
    pub event: PodEvent,
}

/// The lifecycle table. Pure and total: every `(state, event)` pair either
/// yields a [`Step`] or an [`IllegalTransition`].
pub const fn transition(state: PodState, event: PodEvent) -> Result<Step, IllegalTransition> {
    use PodEvent as E;
    use PodState as S;
    let step = match (event, state) {
        (E::CreateContainer, S::Initiated | S::Removed) => Step::Enter(S::Created),
        (E::CreateContainer, S::Created | S::Starting | S::Running) => Step::Settled,

        (E::StartContainer, S::Created | S::Stopped) => Step::Enter(S::Starting),
        (E::StartContainer, S::Starting | S::Running) => Step::Settled,

        (E::StopContainer, S::Starting | S::Running) => Step::Enter(S::Stopped),
        (E::StopContainer, S::Stopped) => Step::Settled,

        (E::RemoveContainer, S::Stopped) => Step::Enter(S::Removed),
        (E::RemoveContainer, S::Removed) => Step::Settled,

        (E::StopPodSandbox, S::Killed) => Step::Settled,
        (E::StopPodSandbox, _) => Step::Enter(S::Killed),

        (E::RemovePodSandbox, S::Killed) => Step::Delete,

        (E::ReadinessSucceeded, S::Starting) => Step::Enter(S::Running),
        (E::ReadinessFailed, S::Starting) => Step::Enter(S::Stopped),

        _ => return Err(IllegalTransition { state, event }),
    };
    Ok(step)
}
