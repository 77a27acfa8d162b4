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
use workd_error::{Code, Error};
use workd_runtime::names::{ComponentIdentity, ImageReference, ParseError, PodContainerId};

#[test]
fn parses_component_identity() -> Result<(), ParseError> {
    let component = ComponentIdentity::parse("example.com:shop.Cart@1.2.3-rc1")?;
    assert_eq!(component.domain(), "example.com");
    assert_eq!(component.server(), "shop.Cart");
    assert_eq!(component.version(), "1.2.3-rc1");
    Ok(())
}

#[test]
fn parses_pod_id() -> Result<(), ParseError> {
    let id: PodContainerId = "d:s@1.0.0#42".parse()?;
    assert_eq!(id.component(), &ComponentIdentity::new("d", "s", "1.0.0")?);
    assert_eq!(id.index(), 42);
    Ok(())
}

#[test]
fn formatting_inverts_parsing() -> Result<(), ParseError> {
    for raw in [
        "d:s@1.0.0#0",
        "a-b.example:pkg.v1.Service@0.10.0-alpha-1#7",
        "x1:_internal@10.20.30#4294967295",
    ] {
        let id = PodContainerId::parse(raw)?;
        assert_eq!(id.to_string(), raw);
        assert_eq!(PodContainerId::parse(&id.to_string())?, id);
        assert_eq!(
            ComponentIdentity::parse(&id.component().to_string())?,
            *id.component()
        );
    }
    Ok(())
}

#[test]
fn rejects_malformed_components() {
    let cases = [
        ("", ParseError::MissingServer(String::new())),
        ("d@1.0.0", ParseError::MissingServer("d@1.0.0".to_string())),
        ("d:s", ParseError::MissingVersion("d:s".to_string())),
        (":s@1.0.0", ParseError::InvalidDomain(String::new())),
        ("-d:s@1.0.0", ParseError::InvalidDomain("-d".to_string())),
        ("d:@1.0.0", ParseError::InvalidServer(String::new())),
        ("d:s@1.0", ParseError::InvalidVersion("1.0".to_string())),
        ("d:s@01.0.0", ParseError::InvalidVersion("01.0.0".to_string())),
        ("d:s@1.0.0+build", ParseError::InvalidVersion("1.0.0+build".to_string())),
    ];
    for (raw, expected) in cases {
        assert_eq!(ComponentIdentity::parse(raw), Err(expected), "{raw}");
    }
}

#[test]
fn rejects_malformed_indices() {
    for index in ["", "01", "00", "-1", "1a", " 1", "4294967296"] {
        let raw = format!("d:s@1.0.0#{index}");
        assert_eq!(
            PodContainerId::parse(&raw),
            Err(ParseError::InvalidIndex(index.to_string())),
            "{raw}"
        );
    }
    assert_eq!(
        PodContainerId::parse("d:s@1.0.0"),
        Err(ParseError::MissingIndex("d:s@1.0.0".to_string()))
    );
}

#[test]
fn parse_errors_are_invalid_argument() {
    let err: Error = ComponentIdentity::parse("nope").unwrap_err().into();
    assert_eq!(err.code, Code::InvalidArgument);
}

#[test]
fn image_reference_hex_encodes_the_server() -> Result<(), ParseError> {
    let component = ComponentIdentity::parse("example.com:helloworld.Greeter@1.0.0")?;
    let image = ImageReference::new("registry.local:5000", component.clone())?;
    assert_eq!(
        image.to_string(),
        "registry.local:5000/example.com/68656c6c6f776f726c642e47726565746572:1.0.0"
    );
    let parsed: ImageReference = image.to_string().parse()?;
    assert_eq!(parsed.registry(), "registry.local:5000");
    assert_eq!(parsed.component(), &component);
    Ok(())
}

#[test]
fn rejects_malformed_images() {
    for raw in [
        "",
        "greeter:1.0.0",
        "registry.local/greeter:1.0.0",
        "registry.local/example.com/73:1.0.0/extra",
        "registry.local/example.com/ZZ:1.0.0",
        "registry.local/example.com/7:1.0.0",
        "registry.local/example.com/73",
        "registry.local/example.com/ff:1.0.0",
    ] {
        assert_eq!(
            ImageReference::parse(raw),
            Err(ParseError::InvalidImage(raw.to_string())),
            "{raw}"
        );
    }
    // Decodes fine but the version is not semantic.
    assert_eq!(
        ImageReference::parse("registry.local/example.com/73:1.0"),
        Err(ParseError::InvalidVersion("1.0".to_string()))
    );
    assert!(ImageReference::new("", ComponentIdentity::parse("d:s@1.0.0").unwrap()).is_err());
}
