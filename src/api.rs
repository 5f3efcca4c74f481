//! Buildpack and Platform API versions
//!
//! API versions are `<major>.<minor>` strings. They are parsed into
//! `semver::Version` so that comparisons follow numeric rather than
//! lexical order (`0.10` is newer than `0.9`).

use crate::error::{LifecycleError, LifecycleResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A `<major>.<minor>` API version
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion(semver::Version);

impl ApiVersion {
    /// Build a version from its parts
    pub const fn new(major: u64, minor: u64) -> Self {
        Self(semver::Version::new(major, minor, 0))
    }

    /// Whether this version is at least `other`
    pub fn at_least(&self, other: &ApiVersion) -> bool {
        self >= other
    }

    /// Whether this version is older than `other`
    pub fn less_than(&self, other: &ApiVersion) -> bool {
        self < other
    }
}

/// Buildpack API that moved layer flags into a `[types]` table
pub const BUILDPACK_API_TYPES_TABLE: ApiVersion = ApiVersion::new(0, 6);

/// Buildpack APIs older than this are deprecated
pub const BUILDPACK_API_DEPRECATED_BELOW: ApiVersion = ApiVersion::new(0, 7);

/// Platform API that introduced SBOM restoration
pub const PLATFORM_API_SBOM: ApiVersion = ApiVersion::new(0, 8);

/// Platform API that restores cached launch layers missing from the app image
pub const PLATFORM_API_CACHED_LAUNCH_LAYERS: ApiVersion = ApiVersion::new(0, 14);

/// Latest Platform API this crate implements
pub const PLATFORM_API_LATEST: ApiVersion = ApiVersion::new(0, 14);

impl FromStr for ApiVersion {
    type Err = LifecycleError;

    fn from_str(s: &str) -> LifecycleResult<Self> {
        let trimmed = s.trim();
        let parts: Vec<&str> = trimmed.split('.').collect();
        if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
            return Err(LifecycleError::InvalidApiVersion(s.to_string()));
        }
        semver::Version::parse(&format!("{trimmed}.0"))
            .map(Self)
            .map_err(|_| LifecycleError::InvalidApiVersion(s.to_string()))
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.0.major, self.0.minor)
    }
}

impl Serialize for ApiVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ApiVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
