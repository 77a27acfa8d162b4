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

//! Images the Kubelet has pulled for components on this node.
//!
//! Pulling records the reference only. The bytes are fetched by the
//! component loader when a container starts, so a pulled image costs no
//! disk space here.

use std::time::SystemTime;

use dashmap::DashMap;
use tracing::{Level, event};

use crate::names::{ComponentIdentity, ImageReference};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub reference: ImageReference,
    pub pulled_at: SystemTime,
}

impl ImageRecord {
    /// Image ID reported to the Kubelet. One image per component, whatever
    /// registry it came from.
    pub fn id(&self) -> String {
        self.reference.component().to_string()
    }
}

#[derive(Debug, Default)]
pub struct ImageStore {
    images: DashMap<ComponentIdentity, ImageRecord>,
}

impl ImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a pull. Pulling a component again from another registry
    /// replaces the earlier reference.
    pub fn record(&self, reference: ImageReference) -> ImageRecord {
        let record = ImageRecord {
            reference,
            pulled_at: SystemTime::now(),
        };
        let component = record.reference.component().clone();
        if let Some(previous) = self.images.insert(component, record.clone()) {
            if previous.reference != record.reference {
                event!(
                    Level::INFO,
                    previous = %previous.reference,
                    current = %record.reference,
                    "Image for component replaced"
                );
            }
        }
        record
    }

    pub fn get(&self, component: &ComponentIdentity) -> Option<ImageRecord> {
        self.images.get(component).map(|record| record.clone())
    }

    /// All recorded images, ordered by component.
    pub fn list(&self) -> Vec<ImageRecord> {
        let mut images: Vec<ImageRecord> = self
            .images
            .iter()
            .map(|record| record.value().clone())
            .collect();
        images.sort_by(|a, b| a.reference.component().cmp(b.reference.component()));
        images
    }

    pub fn remove(&self, component: &ComponentIdentity) -> Option<ImageRecord> {
        self.images.remove(component).map(|(_, record)| record)
    }
}
