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

//! Read-optimized map from a component to its `Running` instances.
//!
//! Readers load an immutable snapshot through [`ArcSwap`] and never take a
//! lock. Writers serialize on a small mutex, copy the map, and swap it in.
//! Instance lists are shared `Arc<[_]>` slices, so a copy only clones the
//! outer map's pointers.

use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::loader::Invocable;
use crate::names::{ComponentIdentity, PodContainerId};

/// One `Running` pod together with the handle that serves it.
#[derive(Clone)]
pub struct ServingInstance {
    pub id: PodContainerId,
    pub handle: Arc<dyn Invocable>,
}

impl fmt::Debug for ServingInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServingInstance")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

type Snapshot = HashMap<ComponentIdentity, Arc<[ServingInstance]>>;

#[derive(Debug, Default)]
pub struct ComponentIndex {
    snapshot: ArcSwap<Snapshot>,
    writer: Mutex<()>,
}

impl ComponentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instances currently serving `component`. Empty if there are none.
    pub fn get(&self, component: &ComponentIdentity) -> Arc<[ServingInstance]> {
        self.snapshot
            .load()
            .get(component)
            .cloned()
            .unwrap_or_else(|| Arc::from([]))
    }

    /// Adds or replaces the instance with the same ID.
    pub fn insert(&self, instance: ServingInstance) {
        let _guard = self.writer.lock();
        let mut next = Snapshot::clone(&self.snapshot.load());
        let component = instance.id.component().clone();
        let instances = next
            .get(&component)
            .map(|existing| {
                existing
                    .iter()
                    .filter(|i| i.id != instance.id)
                    .cloned()
                    .chain(core::iter::once(instance.clone()))
                    .collect::<Arc<[_]>>()
            })
            .unwrap_or_else(|| Arc::from([instance]));
        next.insert(component, instances);
        self.snapshot.store(Arc::new(next));
    }

    /// Removes the instance and hands back its handle, if it was present.
    pub fn remove(&self, id: &PodContainerId) -> Option<Arc<dyn Invocable>> {
        let _guard = self.writer.lock();
        let current = self.snapshot.load();
        let existing = current.get(id.component())?;
        let removed = existing.iter().find(|i| &i.id == id)?.handle.clone();
        let remaining: Arc<[_]> = existing.iter().filter(|i| &i.id != id).cloned().collect();
        let mut next = Snapshot::clone(&current);
        if remaining.is_empty() {
            next.remove(id.component());
        } else {
            next.insert(id.component().clone(), remaining);
        }
        self.snapshot.store(Arc::new(next));
        Some(removed)
    }
}
