use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::IdpaError;

/// Filesystem-safe timestamp layout used for version directory names
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S-%3fZ";

/// Semantic version (major.minor.patch with an optional pre-release label)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SemanticVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre_release: Option<String>,
}

impl SemanticVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre_release: None,
        }
    }

    pub fn with_pre_release(mut self, pre_release: impl Into<String>) -> Self {
        self.pre_release = Some(pre_release.into());
        self
    }
}

impl Ord for SemanticVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre_release, &other.pre_release) {
                (None, None) => Ordering::Equal,
                // A pre-release precedes its release
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for SemanticVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SemanticVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre_release) = &self.pre_release {
            write!(f, "-{}", pre_release)?;
        }
        Ok(())
    }
}

impl FromStr for SemanticVersion {
    type Err = IdpaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix('v').unwrap_or(s);
        let (core, pre_release) = match trimmed.split_once('-') {
            Some((core, pre)) if is_pre_release(pre) => (core, Some(pre.to_string())),
            Some(_) => return Err(IdpaError::InvalidVersion(s.to_string())),
            None => (trimmed, None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() != 3 {
            return Err(IdpaError::InvalidVersion(s.to_string()));
        }

        let number = |part: &str| {
            part.parse::<u64>()
                .map_err(|_| IdpaError::InvalidVersion(s.to_string()))
        };

        Ok(Self {
            major: number(parts[0])?,
            minor: number(parts[1])?,
            patch: number(parts[2])?,
            pre_release,
        })
    }
}

/// Dot-separated, non-empty identifiers of `[0-9A-Za-z-]`
fn is_pre_release(label: &str) -> bool {
    label
        .split('.')
        .all(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'))
}

/// Either a semantic version or a point in time.
///
/// The ordering is total: every semantic version orders before every timestamp.
/// Two documents of the same tag with equal `VersionOrTimestamp` are the same snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VersionOrTimestamp {
    Version(SemanticVersion),
    Timestamp(DateTime<Utc>),
}

impl VersionOrTimestamp {
    /// Sentinel greater than any stored version. Never persisted.
    pub const MAX: VersionOrTimestamp = VersionOrTimestamp::Timestamp(DateTime::<Utc>::MAX_UTC);

    pub fn version(major: u64, minor: u64, patch: u64) -> Self {
        VersionOrTimestamp::Version(SemanticVersion::new(major, minor, patch))
    }

    /// Timestamps are kept at millisecond precision so they survive the directory round trip
    pub fn timestamp(at: DateTime<Utc>) -> Self {
        VersionOrTimestamp::Timestamp(at.trunc_subsecs(3))
    }

    pub fn now() -> Self {
        Self::timestamp(Utc::now())
    }

    pub fn is_max(&self) -> bool {
        self == &Self::MAX
    }
}

impl fmt::Display for VersionOrTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionOrTimestamp::Version(version) => write!(f, "{}", version),
            VersionOrTimestamp::Timestamp(at) => write!(f, "{}", at.format(TIMESTAMP_FORMAT)),
        }
    }
}

impl FromStr for VersionOrTimestamp {
    type Err = IdpaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(version) = s.parse::<SemanticVersion>() {
            return Ok(VersionOrTimestamp::Version(version));
        }

        if let Ok(at) = DateTime::parse_from_rfc3339(s) {
            return Ok(Self::timestamp(at.with_timezone(&Utc)));
        }

        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
            .map(|naive| Self::timestamp(naive.and_utc()))
            .map_err(|_| IdpaError::InvalidVersion(s.to_string()))
    }
}

impl Serialize for VersionOrTimestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionOrTimestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
