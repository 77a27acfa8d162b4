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

//! Textual identifiers for hosted components and the pods running them.
//!
//! A component is named `domain:server@version` and one running instance of
//! it `domain:server@version#index`. Formatting is the exact inverse of
//! parsing, so every value produced by [`ComponentIdentity::parse`] or
//! [`PodContainerId::parse`] prints back to the string it came from.

use core::fmt;
use core::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use workd_error::{Code, Error, make_err};

/// Versions travel as Kubernetes label values, which cannot hold `+`, so
/// SemVer build metadata is not accepted.
static SEMVER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^(?:0|[1-9][0-9]*)\.(?:0|[1-9][0-9]*)\.(?:0|[1-9][0-9]*)",
        r"(?:-(?:0|[1-9][0-9]*|[0-9A-Za-z-]*(?:[A-Za-z]|[A-Za-z-][0-9A-Za-z-]*[0-9A-Za-z])))?$",
    ))
    .unwrap_or_else(|e| panic!("semver pattern does not compile: {e}"))
});

/// Maximum length of a Kubernetes label value.
const LABEL_VALUE_MAX_LENGTH: usize = 63;

/// DNS-like name: dot separated labels of ASCII alphanumerics and hyphens,
/// no label starting or ending with a hyphen.
static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)*$")
        .unwrap_or_else(|e| panic!("domain pattern does not compile: {e}"))
});

/// `<registry>/<domain>/<hex server>:<version>`. Only the registry may hold
/// a `:`, for its port.
static IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^/\s]+)/([^/:]+)/([0-9a-f]+):([^/:]+)$")
        .unwrap_or_else(|e| panic!("image pattern does not compile: {e}"))
});

/// Server names appear as the first segment of a gRPC path, so they may
/// carry package dots but never a separator of either identifier form.
static SERVER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_.]*$")
        .unwrap_or_else(|e| panic!("server pattern does not compile: {e}"))
});

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("'{0}' is missing the ':' between domain and server")]
    MissingServer(String),
    #[error("'{0}' is missing the '@' before the version")]
    MissingVersion(String),
    #[error("'{0}' is missing the '#' before the index")]
    MissingIndex(String),
    #[error("invalid domain '{0}'")]
    InvalidDomain(String),
    #[error("invalid server '{0}'")]
    InvalidServer(String),
    #[error("invalid semantic version '{0}'")]
    InvalidVersion(String),
    #[error("invalid index '{0}'")]
    InvalidIndex(String),
    #[error("image '{0}' is not of the form <registry>/<domain>/<hex server>:<version>")]
    InvalidImage(String),
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        make_err!(Code::InvalidArgument, "{err}")
    }
}

/// Identifies one deployed variant of a component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentIdentity {
    domain: String,
    server: String,
    version: String,
}

impl ComponentIdentity {
    /// Validates each part and builds the identity.
    pub fn new(
        domain: impl Into<String>,
        server: impl Into<String>,
        version: impl Into<String>,
    ) -> Result<Self, ParseError> {
        let (domain, server, version) = (domain.into(), server.into(), version.into());
        if !DOMAIN_RE.is_match(&domain) {
            return Err(ParseError::InvalidDomain(domain));
        }
        if server.len() > LABEL_VALUE_MAX_LENGTH || !SERVER_RE.is_match(&server) {
            return Err(ParseError::InvalidServer(server));
        }
        if version.len() > LABEL_VALUE_MAX_LENGTH || !SEMVER_RE.is_match(&version) {
            return Err(ParseError::InvalidVersion(version));
        }
        Ok(Self {
            domain,
            server,
            version,
        })
    }

    /// Parses `domain:server@version`.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let (domain, rest) = s
            .split_once(':')
            .ok_or_else(|| ParseError::MissingServer(s.to_string()))?;
        let (server, version) = rest
            .split_once('@')
            .ok_or_else(|| ParseError::MissingVersion(s.to_string()))?;
        Self::new(domain, server, version)
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl fmt::Display for ComponentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}@{}", self.domain, self.server, self.version)
    }
}

impl FromStr for ComponentIdentity {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Identifies a pod sandbox and the single container inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PodContainerId {
    component: ComponentIdentity,
    index: u32,
}

impl PodContainerId {
    pub const fn new(component: ComponentIdentity, index: u32) -> Self {
        Self { component, index }
    }

    /// Parses `domain:server@version#index`.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let (component, index) = s
            .rsplit_once('#')
            .ok_or_else(|| ParseError::MissingIndex(s.to_string()))?;
        let component = ComponentIdentity::parse(component)?;
        let well_formed = !index.is_empty()
            && index.bytes().all(|b| b.is_ascii_digit())
            && (index == "0" || !index.starts_with('0'));
        if !well_formed {
            return Err(ParseError::InvalidIndex(index.to_string()));
        }
        let index = index
            .parse()
            .map_err(|_| ParseError::InvalidIndex(index.to_string()))?;
        Ok(Self { component, index })
    }

    pub const fn component(&self) -> &ComponentIdentity {
        &self.component
    }

    pub const fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for PodContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.component, self.index)
    }
}

impl FromStr for PodContainerId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Image a component is pulled from.
///
/// OCI repository paths are lowercase, so the server name, which usually
/// carries an upper case service name, travels hex encoded:
/// `registry.local/example.com/68656c6c6f:1.0.0` is server `hello` of
/// `example.com` at version `1.0.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageReference {
    registry: String,
    component: ComponentIdentity,
}

impl ImageReference {
    pub fn new(
        registry: impl Into<String>,
        component: ComponentIdentity,
    ) -> Result<Self, ParseError> {
        let registry = registry.into();
        if registry.is_empty() || registry.contains('/') || registry.contains(char::is_whitespace) {
            return Err(ParseError::InvalidImage(format!("{registry}/{component}")));
        }
        Ok(Self {
            registry,
            component,
        })
    }

    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let invalid = || ParseError::InvalidImage(s.to_string());
        let captures = IMAGE_RE.captures(s).ok_or_else(invalid)?;
        let server = hex::decode(&captures[3])
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok())
            .ok_or_else(invalid)?;
        let component = ComponentIdentity::new(&captures[2], server, &captures[4])?;
        Ok(Self {
            registry: captures[1].to_string(),
            component,
        })
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub const fn component(&self) -> &ComponentIdentity {
        &self.component
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}:{}",
            self.registry,
            self.component.domain(),
            hex::encode(self.component.server()),
            self.component.version()
        )
    }
}

impl FromStr for ImageReference {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
