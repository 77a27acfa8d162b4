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

//! The store of every pod on this node.
//!
//! Each pod lives in its own slot behind a short-lived `parking_lot`
//! mutex, so transitions on one ID never wait on another. The slot also owns
//! a `watch` channel that publishes every state change; the start pipeline
//! uses it to notice it was preempted and callers can use it to await a
//! state instead of polling.
//!
//! Lock order is slot mutex, then the component index writer. No slot mutex
//! is ever held while touching the `DashMap` shards, and nothing that awaits
//! runs under either lock.

use core::fmt;
use core::time::Duration;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::SystemTime;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{Level, event};
use workd_config::workd::{IndexAllocation, PoolConfig};
use workd_error::{Code, Error, ResultExt, make_err};
use workd_util::background_spawn;

use crate::component_index::{ComponentIndex, ServingInstance};
use crate::error::PodPoolError;
use crate::ipam::IpAllocator;
use crate::loader::{ComponentLoader, Invocable, LoadRequest};
use crate::names::{ComponentIdentity, PodContainerId};
use crate::pod::{ContainerSpec, PodEntry, SandboxConfig, check_reserved_labels};
use crate::state::{PodEvent, PodState, Step, transition};

/// Returns the wall clock time used for entry timestamps.
pub type NowFn = Box<dyn Fn() -> SystemTime + Send + Sync>;

/// Whether a lifecycle call changed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// Idempotent repeat, or a destructive call on an absent ID.
    Unchanged,
}

/// Selects entries for [`PodPool::list`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodFilter {
    pub id: Option<PodContainerId>,
    pub states: Option<Vec<PodState>>,
    /// Every pair must be present on the pod.
    pub label_selector: HashMap<String, String>,
    /// Only pods that have (or had) a container. Labels are then matched
    /// against the container's labels instead of the sandbox's.
    pub containers_only: bool,
}

impl PodFilter {
    fn matches(&self, entry: &PodEntry) -> bool {
        if self.id.as_ref().is_some_and(|id| id != &entry.id) {
            return false;
        }
        if self.containers_only && !entry.state.has_container() {
            return false;
        }
        if self
            .states
            .as_ref()
            .is_some_and(|states| !states.contains(&entry.state))
        {
            return false;
        }
        let labels = if self.containers_only {
            entry.container_labels()
        } else {
            &entry.labels
        };
        self.label_selector
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    }
}

struct SlotInner {
    /// `None` once the pod was removed. The slot may still be referenced by
    /// an in-flight operation at that point.
    entry: Option<PodEntry>,
    /// Bumped on every entry to `Starting`. A start result is only
    /// committed if it still carries the current attempt.
    start_attempt: u64,
}

struct Slot {
    inner: Mutex<SlotInner>,
    state_tx: watch::Sender<Option<PodState>>,
}

impl Slot {
    fn new(entry: PodEntry) -> Self {
        let (state_tx, _) = watch::channel(Some(entry.state));
        Self {
            inner: Mutex::new(SlotInner {
                entry: Some(entry),
                start_attempt: 0,
            }),
            state_tx,
        }
    }

    fn enter(&self, entry: &mut PodEntry, state: PodState, now: SystemTime) {
        event!(
            Level::DEBUG,
            id = %entry.id,
            from = %entry.state,
            to = %state,
            "Pod state transition"
        );
        entry.state = state;
        entry.state_changed_at = now;
        self.state_tx.send_replace(Some(state));
    }
}

pub struct PodPool {
    pods: DashMap<PodContainerId, Arc<Slot>>,
    component_index: ComponentIndex,
    ip_allocator: Arc<dyn IpAllocator>,
    loader: Arc<dyn ComponentLoader>,
    index_allocation: IndexAllocation,
    /// Next index per component under [`IndexAllocation::Monotonic`].
    counters: Mutex<HashMap<ComponentIdentity, u32>>,
    /// Serializes sandbox creation so duplicate `RunPodSandbox` calls
    /// resolve to a single pod.
    create_lock: Mutex<()>,
    readiness_timeout: Duration,
    stop_grace_period: Duration,
    now_fn: NowFn,
}

impl fmt::Debug for PodPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PodPool")
            .field("pods", &self.pods.len())
            .field("index_allocation", &self.index_allocation)
            .field("readiness_timeout", &self.readiness_timeout)
            .field("stop_grace_period", &self.stop_grace_period)
            .finish_non_exhaustive()
    }
}

impl PodPool {
    pub fn new(
        config: &PoolConfig,
        ip_allocator: Arc<dyn IpAllocator>,
        loader: Arc<dyn ComponentLoader>,
    ) -> Self {
        Self::new_with_now_fn(config, ip_allocator, loader, Box::new(SystemTime::now))
    }

    /// Same as `new()`, but with a custom clock for entry timestamps.
    pub fn new_with_now_fn(
        config: &PoolConfig,
        ip_allocator: Arc<dyn IpAllocator>,
        loader: Arc<dyn ComponentLoader>,
        now_fn: NowFn,
    ) -> Self {
        Self {
            pods: DashMap::new(),
            component_index: ComponentIndex::new(),
            ip_allocator,
            loader,
            index_allocation: config.index_allocation,
            counters: Mutex::new(HashMap::new()),
            create_lock: Mutex::new(()),
            readiness_timeout: Duration::from_millis(config.readiness_timeout_ms),
            stop_grace_period: Duration::from_millis(config.stop_grace_period_ms),
            now_fn,
        }
    }

    fn slot(&self, id: &PodContainerId) -> Option<Arc<Slot>> {
        self.pods.get(id).map(|slot| Arc::clone(slot.value()))
    }

    /// Creates a sandbox for `component`, or returns the existing one if a
    /// live sandbox with identical metadata (and a non-empty UID) exists.
    pub fn create_sandbox(
        &self,
        component: ComponentIdentity,
        config: SandboxConfig,
    ) -> Result<PodContainerId, PodPoolError> {
        let _create_guard = self.create_lock.lock();

        if !config.metadata.uid.is_empty() {
            let candidates: Vec<Arc<Slot>> = self
                .pods
                .iter()
                .filter(|slot| slot.key().component() == &component)
                .map(|slot| Arc::clone(slot.value()))
                .collect();
            for slot in candidates {
                let inner = slot.inner.lock();
                let Some(entry) = inner.entry.as_ref() else {
                    continue;
                };
                if entry.state != PodState::Killed && entry.sandbox_metadata == config.metadata {
                    event!(Level::DEBUG, id = %entry.id, "Sandbox already exists");
                    return Ok(entry.id.clone());
                }
            }
        }

        let ip_address = self.ip_allocator.allocate()?;
        let now = (self.now_fn)();
        let make_slot = |id: PodContainerId| {
            Arc::new(Slot::new(PodEntry {
                id,
                state: PodState::Initiated,
                sandbox_metadata: config.metadata.clone(),
                labels: config.labels.clone(),
                annotations: config.annotations.clone(),
                ip_address: Some(ip_address),
                container: None,
                created_at: now,
                state_changed_at: now,
                container_created_at: None,
                started_at: None,
                finished_at: None,
                exit_code: 0,
                reason: String::new(),
                message: String::new(),
            }))
        };

        let mut index = match self.index_allocation {
            IndexAllocation::LowestFree => 0,
            IndexAllocation::Monotonic => {
                self.counters.lock().get(&component).copied().unwrap_or(0)
            }
        };
        let id = loop {
            let id = PodContainerId::new(component.clone(), index);
            match self.pods.entry(id.clone()) {
                Entry::Vacant(vacant) => {
                    vacant.insert(make_slot(id.clone()));
                    break id;
                }
                Entry::Occupied(_) => {
                    if let Some(next) = index.checked_add(1) {
                        index = next;
                    } else {
                        self.ip_allocator.release(ip_address);
                        return Err(PodPoolError::ResourceExhausted(format!(
                            "no pod index left for {component}"
                        )));
                    }
                }
            }
        };
        if self.index_allocation == IndexAllocation::Monotonic {
            self.counters
                .lock()
                .insert(component, index.saturating_add(1));
        }

        event!(Level::INFO, %id, %ip_address, "Created pod sandbox");
        Ok(id)
    }

    pub fn create_container(
        &self,
        id: &PodContainerId,
        spec: ContainerSpec,
    ) -> Result<Outcome, PodPoolError> {
        let slot = self
            .slot(id)
            .ok_or_else(|| PodPoolError::NotFound(id.clone()))?;
        let mut inner = slot.inner.lock();
        let entry = inner
            .entry
            .as_mut()
            .ok_or_else(|| PodPoolError::NotFound(id.clone()))?;
        let step = transition(entry.state, PodEvent::CreateContainer)
            .map_err(|e| PodPoolError::illegal(id, e))?;
        check_reserved_labels(id, &entry.labels, &spec.labels)?;
        match step {
            Step::Enter(next) => {
                let now = (self.now_fn)();
                entry.container = Some(spec);
                entry.container_created_at = Some(now);
                entry.started_at = None;
                entry.finished_at = None;
                entry.exit_code = 0;
                entry.reason.clear();
                entry.message.clear();
                slot.enter(entry, next, now);
                Ok(Outcome::Applied)
            }
            Step::Settled => {
                if entry
                    .container
                    .as_ref()
                    .is_some_and(|existing| existing.is_equivalent(&spec))
                {
                    Ok(Outcome::Unchanged)
                } else {
                    Err(PodPoolError::ConflictingState {
                        id: id.clone(),
                        state: entry.state,
                    })
                }
            }
            Step::Delete => Err(PodPoolError::IllegalTransition {
                id: id.clone(),
                state: entry.state,
                event: PodEvent::CreateContainer,
            }),
        }
    }

    /// Commits `Starting` and hands loading and readiness to a background
    /// task. Returns as soon as `Starting` is visible.
    pub fn start_container(self: &Arc<Self>, id: &PodContainerId) -> Result<Outcome, PodPoolError> {
        let slot = self
            .slot(id)
            .ok_or_else(|| PodPoolError::NotFound(id.clone()))?;
        let (attempt, request) = {
            let mut guard = slot.inner.lock();
            let SlotInner {
                entry,
                start_attempt,
            } = &mut *guard;
            let entry = entry
                .as_mut()
                .ok_or_else(|| PodPoolError::NotFound(id.clone()))?;
            let illegal = || PodPoolError::IllegalTransition {
                id: id.clone(),
                state: entry.state,
                event: PodEvent::StartContainer,
            };
            let next = match transition(entry.state, PodEvent::StartContainer)
                .map_err(|e| PodPoolError::illegal(id, e))?
            {
                Step::Settled => return Ok(Outcome::Unchanged),
                Step::Enter(next) => next,
                Step::Delete => return Err(illegal()),
            };
            let container = entry.container.as_ref().ok_or_else(illegal)?;
            let request = LoadRequest {
                id: id.clone(),
                image: container.image.clone(),
                ip_address: entry.ip_address,
                environment: container.environment.clone(),
            };
            *start_attempt += 1;
            entry.started_at = None;
            entry.finished_at = None;
            entry.exit_code = 0;
            entry.reason.clear();
            entry.message.clear();
            slot.enter(entry, next, (self.now_fn)());
            (*start_attempt, request)
        };

        let pool = Arc::clone(self);
        background_spawn!(
            "pod_start",
            async move { pool.run_start(slot, attempt, request).await },
            id = %id,
            attempt
        );
        Ok(Outcome::Applied)
    }

    async fn run_start(&self, slot: Arc<Slot>, attempt: u64, request: LoadRequest) {
        let id = request.id.clone();
        let mut state_rx = slot.state_tx.subscribe();
        let preempted = |state: &Option<PodState>| *state != Some(PodState::Starting);

        let loaded = tokio::select! {
            loaded = self.loader.load(request) => loaded,
            _ = state_rx.wait_for(preempted) => {
                event!(Level::DEBUG, %id, "Start preempted while loading");
                return;
            }
        };
        let result = match loaded {
            Err(err) => Err(err.append(format!("Failed to load component for {id}"))),
            Ok(handle) => {
                let ready = tokio::select! {
                    ready = tokio::time::timeout(self.readiness_timeout, handle.ready()) => Some(ready),
                    _ = state_rx.wait_for(preempted) => None,
                };
                match ready {
                    None => {
                        event!(Level::DEBUG, %id, "Start preempted while awaiting readiness");
                        self.shutdown_handle(&id, handle, self.stop_grace_period)
                            .await;
                        return;
                    }
                    Some(Ok(Ok(()))) => Ok(handle),
                    Some(Ok(Err(err))) => {
                        self.shutdown_handle(&id, handle, self.stop_grace_period)
                            .await;
                        Err(err.append(format!("Component for {id} failed readiness")))
                    }
                    Some(Err(_)) => {
                        self.shutdown_handle(&id, handle, self.stop_grace_period)
                            .await;
                        Err(make_err!(
                            Code::DeadlineExceeded,
                            "Component for {id} was not ready within {:?}",
                            self.readiness_timeout
                        ))
                    }
                }
            }
        };
        self.complete_start(&id, &slot, attempt, result).await;
    }

    /// Commits the outcome of start attempt `attempt`, unless the pod has
    /// moved on since, in which case a loaded handle is shut down.
    async fn complete_start(
        &self,
        id: &PodContainerId,
        slot: &Slot,
        attempt: u64,
        result: Result<Arc<dyn Invocable>, Error>,
    ) {
        let stale = {
            let mut guard = slot.inner.lock();
            let SlotInner {
                entry,
                start_attempt,
            } = &mut *guard;
            let current = entry
                .as_mut()
                .filter(|entry| entry.state == PodState::Starting && *start_attempt == attempt);
            match (current, result) {
                (None, Ok(handle)) => Some(handle),
                (None, Err(err)) => {
                    event!(Level::DEBUG, ?err, "Discarding failure of a superseded start");
                    None
                }
                (Some(entry), Ok(handle)) => {
                    let now = (self.now_fn)();
                    if let Ok(Step::Enter(next)) =
                        transition(entry.state, PodEvent::ReadinessSucceeded)
                    {
                        self.component_index.insert(ServingInstance {
                            id: entry.id.clone(),
                            handle,
                        });
                        entry.started_at = Some(now);
                        slot.enter(entry, next, now);
                        event!(Level::INFO, id = %entry.id, "Pod is running");
                        None
                    } else {
                        Some(handle)
                    }
                }
                (Some(entry), Err(err)) => {
                    let now = (self.now_fn)();
                    if let Ok(Step::Enter(next)) =
                        transition(entry.state, PodEvent::ReadinessFailed)
                    {
                        event!(Level::WARN, id = %entry.id, ?err, "Pod failed to start");
                        entry.exit_code = 1;
                        entry.reason = "StartError".to_string();
                        entry.message = err.message_string();
                        entry.finished_at = Some(now);
                        slot.enter(entry, next, now);
                    }
                    None
                }
            }
        };
        if let Some(handle) = stale {
            event!(Level::DEBUG, %id, "Discarding component of a superseded start");
            self.shutdown_handle(id, handle, self.stop_grace_period)
                .await;
        }
    }

    /// Stops the container. `grace_period` bounds the wait for the component
    /// to shut down and defaults to the configured grace period.
    pub async fn stop_container(
        &self,
        id: &PodContainerId,
        grace_period: Option<Duration>,
    ) -> Result<Outcome, PodPoolError> {
        let Some(slot) = self.slot(id) else {
            return Ok(Outcome::Unchanged);
        };
        let handle = {
            let mut guard = slot.inner.lock();
            let Some(entry) = guard.entry.as_mut() else {
                return Ok(Outcome::Unchanged);
            };
            match transition(entry.state, PodEvent::StopContainer)
                .map_err(|e| PodPoolError::illegal(id, e))?
            {
                Step::Settled => return Ok(Outcome::Unchanged),
                Step::Delete => {
                    return Err(PodPoolError::IllegalTransition {
                        id: id.clone(),
                        state: entry.state,
                        event: PodEvent::StopContainer,
                    });
                }
                Step::Enter(next) => {
                    let handle = self.component_index.remove(id);
                    let now = (self.now_fn)();
                    entry.exit_code = 0;
                    entry.reason = "Completed".to_string();
                    entry.message.clear();
                    entry.finished_at = Some(now);
                    slot.enter(entry, next, now);
                    handle
                }
            }
        };
        if let Some(handle) = handle {
            self.shutdown_handle(id, handle, grace_period.unwrap_or(self.stop_grace_period))
                .await;
        }
        Ok(Outcome::Applied)
    }

    pub fn remove_container(&self, id: &PodContainerId) -> Result<Outcome, PodPoolError> {
        let Some(slot) = self.slot(id) else {
            return Ok(Outcome::Unchanged);
        };
        let mut guard = slot.inner.lock();
        let Some(entry) = guard.entry.as_mut() else {
            return Ok(Outcome::Unchanged);
        };
        match transition(entry.state, PodEvent::RemoveContainer)
            .map_err(|e| PodPoolError::illegal(id, e))?
        {
            Step::Settled => Ok(Outcome::Unchanged),
            Step::Delete => Err(PodPoolError::IllegalTransition {
                id: id.clone(),
                state: entry.state,
                event: PodEvent::RemoveContainer,
            }),
            Step::Enter(next) => {
                entry.container = None;
                entry.container_created_at = None;
                slot.enter(entry, next, (self.now_fn)());
                Ok(Outcome::Applied)
            }
        }
    }

    /// Kills the sandbox: takes it out of service and releases its IP.
    pub async fn stop_sandbox(&self, id: &PodContainerId) -> Result<Outcome, PodPoolError> {
        let Some(slot) = self.slot(id) else {
            return Ok(Outcome::Unchanged);
        };
        let handle = {
            let mut guard = slot.inner.lock();
            let Some(entry) = guard.entry.as_mut() else {
                return Ok(Outcome::Unchanged);
            };
            match transition(entry.state, PodEvent::StopPodSandbox)
                .map_err(|e| PodPoolError::illegal(id, e))?
            {
                Step::Settled => return Ok(Outcome::Unchanged),
                Step::Delete => {
                    return Err(PodPoolError::IllegalTransition {
                        id: id.clone(),
                        state: entry.state,
                        event: PodEvent::StopPodSandbox,
                    });
                }
                Step::Enter(next) => {
                    let handle = self.component_index.remove(id);
                    let now = (self.now_fn)();
                    if entry.state == PodState::Running || entry.state == PodState::Starting {
                        entry.exit_code = 0;
                        entry.reason = "Killed".to_string();
                        entry.finished_at = Some(now);
                    }
                    if let Some(ip_address) = entry.ip_address.take() {
                        self.ip_allocator.release(ip_address);
                    }
                    slot.enter(entry, next, now);
                    handle
                }
            }
        };
        if let Some(handle) = handle {
            self.shutdown_handle(id, handle, self.stop_grace_period)
                .await;
        }
        Ok(Outcome::Applied)
    }

    pub fn remove_sandbox(&self, id: &PodContainerId) -> Result<Outcome, PodPoolError> {
        let Some(slot) = self.slot(id) else {
            return Ok(Outcome::Unchanged);
        };
        {
            let mut guard = slot.inner.lock();
            let Some(entry) = guard.entry.as_ref() else {
                return Ok(Outcome::Unchanged);
            };
            match transition(entry.state, PodEvent::RemovePodSandbox)
                .map_err(|e| PodPoolError::illegal(id, e))?
            {
                Step::Delete => {}
                Step::Settled | Step::Enter(_) => {
                    return Err(PodPoolError::IllegalTransition {
                        id: id.clone(),
                        state: entry.state,
                        event: PodEvent::RemovePodSandbox,
                    });
                }
            }
            guard.entry = None;
            slot.state_tx.send_replace(None);
        }
        self.pods
            .remove_if(id, |_, existing| Arc::ptr_eq(existing, &slot));
        event!(Level::INFO, %id, "Removed pod sandbox");
        Ok(Outcome::Applied)
    }

    pub fn get_status(&self, id: &PodContainerId) -> Result<PodEntry, PodPoolError> {
        self.slot(id)
            .and_then(|slot| {
                let inner = slot.inner.lock();
                inner.entry.clone()
            })
            .ok_or_else(|| PodPoolError::NotFound(id.clone()))
    }

    /// Snapshot of all matching entries, ordered by ID.
    pub fn list(&self, filter: &PodFilter) -> Vec<PodEntry> {
        let slots: Vec<Arc<Slot>> = match &filter.id {
            Some(id) => self.slot(id).into_iter().collect(),
            None => self
                .pods
                .iter()
                .map(|slot| Arc::clone(slot.value()))
                .collect(),
        };
        let mut entries: Vec<PodEntry> = slots
            .iter()
            .filter_map(|slot| {
                let inner = slot.inner.lock();
                inner
                    .entry
                    .as_ref()
                    .filter(|entry| filter.matches(entry))
                    .cloned()
            })
            .collect();
        entries.sort_by(|a, b| a.id.cmp(&b.id));
        entries
    }

    /// IDs of the `Running` instances of `component`. Reads only the
    /// component index snapshot.
    pub fn find_serving(&self, component: &ComponentIdentity) -> HashSet<PodContainerId> {
        self.component_index
            .get(component)
            .iter()
            .map(|instance| instance.id.clone())
            .collect()
    }

    /// Same as `find_serving()`, with the handles to forward to.
    pub fn serving_instances(&self, component: &ComponentIdentity) -> Arc<[ServingInstance]> {
        self.component_index.get(component)
    }

    /// Waits until the pod's state satisfies `predicate` and returns that
    /// state. `None` stands for an absent pod. Resolves immediately if the
    /// current state already matches.
    pub async fn wait_for_state<F>(
        &self,
        id: &PodContainerId,
        mut predicate: F,
    ) -> Result<Option<PodState>, Error>
    where
        F: FnMut(Option<PodState>) -> bool,
    {
        let Some(slot) = self.slot(id) else {
            return if predicate(None) {
                Ok(None)
            } else {
                Err(PodPoolError::NotFound(id.clone()).into())
            };
        };
        let mut state_rx = slot.state_tx.subscribe();
        let state = *state_rx
            .wait_for(|state| predicate(*state))
            .await
            .map_err(|_| make_err!(Code::Internal, "State channel for {id} closed"))
            .err_tip(|| "In PodPool::wait_for_state")?;
        Ok(state)
    }

    async fn shutdown_handle(
        &self,
        id: &PodContainerId,
        handle: Arc<dyn Invocable>,
        grace_period: Duration,
    ) {
        match tokio::time::timeout(grace_period, handle.shutdown()).await {
            Ok(Ok(())) => event!(Level::DEBUG, %id, "Component shut down"),
            Ok(Err(err)) => event!(Level::WARN, %id, ?err, "Component shutdown failed"),
            Err(_) => event!(
                Level::WARN,
                %id,
                ?grace_period,
                "Component did not shut down within the grace period"
            ),
        }
    }
}
