//! Versioned entity identifiers.
//!
//! An entity has two equivalent identifiers: a precise one pinned to a
//! version (`URN:AIP:DATA:tenant:<uuid>:V3`) and a virtual one that always
//! designates the latest version (`URN:AIP:DATA:tenant:<uuid>:LAST`).

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

static URN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^URN:(?P<identifier>[A-Z0-9_]+):(?P<entity_type>[A-Z0-9_]+):(?P<tenant>[^:]+):(?P<uuid>[0-9a-fA-F-]{36}):(?:V(?P<version>\d+)|(?P<last>LAST))$",
    )
    .expect("valid URN pattern")
});

/// Errors raised when parsing an entity identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UrnError {
    #[error("Not an entity URN: {0}")]
    Malformed(String),

    #[error("Invalid URN uuid: {0}")]
    InvalidUuid(String),
}

/// Version part of an entity identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UrnVersion {
    /// Pinned to one version.
    Precise(u32),
    /// Floats to the latest version.
    Last,
}

/// Parsed entity identifier.
///
/// The uuid is kept as written so that the identifier renders back to the
/// exact string documents are stored under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityUrn {
    identifier: String,
    entity_type: String,
    tenant: String,
    uuid: Uuid,
    uuid_text: String,
    version: UrnVersion,
}

impl EntityUrn {
    pub fn new(
        identifier: impl Into<String>,
        entity_type: impl Into<String>,
        tenant: impl Into<String>,
        uuid: Uuid,
        version: UrnVersion,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            entity_type: entity_type.into(),
            tenant: tenant.into(),
            uuid,
            uuid_text: uuid.to_string(),
            version,
        }
    }

    /// Returns true if `value` looks like an entity identifier.
    pub fn is_urn(value: &str) -> bool {
        URN_PATTERN.is_match(value)
    }

    pub fn is_virtual(&self) -> bool {
        self.version == UrnVersion::Last
    }

    pub fn version(&self) -> UrnVersion {
        self.version
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// The virtual form of this identifier.
    pub fn to_virtual(&self) -> Self {
        Self {
            version: UrnVersion::Last,
            ..self.clone()
        }
    }

    /// The precise form of this identifier for `version`.
    pub fn with_version(&self, version: u32) -> Self {
        Self {
            version: UrnVersion::Precise(version),
            ..self.clone()
        }
    }
}

impl fmt::Display for EntityUrn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "URN:{}:{}:{}:{}:",
            self.identifier, self.entity_type, self.tenant, self.uuid_text
        )?;
        match self.version {
            UrnVersion::Precise(v) => write!(f, "V{}", v),
            UrnVersion::Last => write!(f, "LAST"),
        }
    }
}

impl FromStr for EntityUrn {
    type Err = UrnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = URN_PATTERN
            .captures(s)
            .ok_or_else(|| UrnError::Malformed(s.to_string()))?;
        let uuid = Uuid::parse_str(&caps["uuid"])
            .map_err(|e| UrnError::InvalidUuid(format!("{}: {}", s, e)))?;
        let version = match caps.name("version") {
            Some(v) => UrnVersion::Precise(
                v.as_str()
                    .parse()
                    .map_err(|_| UrnError::Malformed(s.to_string()))?,
            ),
            None => UrnVersion::Last,
        };
        Ok(Self {
            identifier: caps["identifier"].to_string(),
            entity_type: caps["entity_type"].to_string(),
            tenant: caps["tenant"].to_string(),
            uuid,
            uuid_text: caps["uuid"].to_string(),
            version,
        })
    }
}

impl Serialize for EntityUrn {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntityUrn {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
