//! API protocol versions and the capabilities each one offers

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ConnexaError;

/// Wire protocol version served by the remote API
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ApiVersion {
    #[serde(rename = "1.0")]
    V1_0,
    #[serde(rename = "1.1.0")]
    V1_1_0,
}

impl ApiVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1_0 => "1.0",
            Self::V1_1_0 => "1.1.0",
        }
    }

    /// Versioned API root, e.g. `/api/v1.1.0`
    pub fn path_prefix(&self) -> String {
        format!("/api/v{}", self.as_str())
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiVersion {
    type Err = ConnexaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches(['v', 'V']) {
            "1" | "1.0" | "1.0.0" => Ok(Self::V1_0),
            "1.1" | "1.1.0" => Ok(Self::V1_1_0),
            other => Err(ConnexaError::Configuration(format!(
                "unsupported API version '{other}' (expected 1.0 or 1.1.0)"
            ))),
        }
    }
}

/// Capabilities that differ between protocol versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    NetworkSingle,
    DnsList,
    DnsSingleRecord,
    UserGroupList,
    UserGroupSingle,
    IpServiceList,
    IpServiceWithoutRouting,
}

impl Feature {
    pub const ALL: [Feature; 7] = [
        Feature::NetworkSingle,
        Feature::DnsList,
        Feature::DnsSingleRecord,
        Feature::UserGroupList,
        Feature::UserGroupSingle,
        Feature::IpServiceList,
        Feature::IpServiceWithoutRouting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkSingle => "network_single",
            Self::DnsList => "dns_list",
            Self::DnsSingleRecord => "dns_single_record",
            Self::UserGroupList => "user_group_list",
            Self::UserGroupSingle => "user_group_single",
            Self::IpServiceList => "ip_service_list",
            Self::IpServiceWithoutRouting => "ip_service_without_routing",
        }
    }

    /// Oldest protocol version offering this capability natively
    pub fn min_version(&self) -> ApiVersion {
        match self {
            Self::DnsSingleRecord | Self::UserGroupSingle | Self::IpServiceWithoutRouting => {
                ApiVersion::V1_1_0
            }
            Self::NetworkSingle | Self::DnsList | Self::UserGroupList | Self::IpServiceList => {
                ApiVersion::V1_0
            }
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the session's version was established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionSource {
    /// The version probe answered
    Probe,
    /// Configuration or environment pinned the version
    Pinned,
}

/// Detected protocol version and the capabilities it offers.
///
/// Established once per session and immutable until explicitly re-probed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionContext {
    pub version: ApiVersion,
    pub capabilities: BTreeSet<Feature>,
    pub source: VersionSource,
    pub detected_at: DateTime<Utc>,
}

impl VersionContext {
    pub fn new(version: ApiVersion, source: VersionSource) -> Self {
        let capabilities = Feature::ALL.into_iter().filter(|f| f.min_version() <= version).collect();
        Self { version, capabilities, source, detected_at: Utc::now() }
    }

    /// Whether the capability is offered natively
    pub fn supports(&self, feature: Feature) -> bool {
        self.capabilities.contains(&feature)
    }
}
