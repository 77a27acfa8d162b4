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

use pretty_assertions::assert_eq;
use workd_error::Error;
use workd_runtime::image_store::ImageStore;
use workd_runtime::names::{ComponentIdentity, ImageReference};

fn reference(registry: &str, component: &str) -> Result<ImageReference, Error> {
    Ok(ImageReference::new(registry, ComponentIdentity::parse(component)?)?)
}

#[test]
fn records_one_image_per_component() -> Result<(), Error> {
    let store = ImageStore::new();
    let greeter = ComponentIdentity::parse("example.com:helloworld.Greeter@1.0.0")?;

    let first = store.record(reference("registry.local", "example.com:helloworld.Greeter@1.0.0")?);
    assert_eq!(first.id(), "example.com:helloworld.Greeter@1.0.0");

    let mirrored = store.record(reference("mirror.local", "example.com:helloworld.Greeter@1.0.0")?);
    assert_eq!(store.list().len(), 1);
    assert_eq!(store.get(&greeter).map(|record| record.reference), Some(mirrored.reference));
    Ok(())
}

#[test]
fn lists_by_component_and_removes() -> Result<(), Error> {
    let store = ImageStore::new();
    store.record(reference("registry.local", "b.example:shop.Cart@1.0.0")?);
    store.record(reference("registry.local", "a.example:shop.Cart@2.0.0")?);
    store.record(reference("registry.local", "a.example:shop.Cart@1.0.0")?);

    let ids: Vec<String> = store.list().iter().map(|record| record.id()).collect();
    assert_eq!(
        ids,
        vec![
            "a.example:shop.Cart@1.0.0",
            "a.example:shop.Cart@2.0.0",
            "b.example:shop.Cart@1.0.0",
        ]
    );

    let cart = ComponentIdentity::parse("a.example:shop.Cart@2.0.0")?;
    assert!(store.remove(&cart).is_some());
    assert!(store.remove(&cart).is_none());
    assert_eq!(store.get(&cart), None);
    assert_eq!(store.list().len(), 2);
    Ok(())
}
