// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Storage engine software versions.

use crate::RoleKind;
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use serde_with::DeserializeFromStr;
use serde_with::SerializeDisplay;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Oldest version we will run at all.
pub const MINIMUM_VERSION: SoftwareVersion =
    SoftwareVersion { major: 13, minor: 2, patch: 4, build: None };

/// Major releases that are supported without `allowUnsupported`.
pub const SUPPORTED_RELEASES: &[u32] = &[13, 14];

const BUILD_PATTERN: &str = r"[0-9A-Za-z][0-9A-Za-z.\-]*";

static EXACT_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"^v?(\d+)\.(\d+)\.(\d+)(?:-({BUILD_PATTERN}))?$"))
        .expect("version pattern is valid")
});

static VERSION_IN_OUTPUT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"\bversion\s+v?(\d+)\.(\d+)\.(\d+)(?:-({BUILD_PATTERN}))?"
    ))
    .expect("version pattern is valid")
});

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseVersionError {
    #[error("no version found in {0:?}")]
    NoVersion(String),
    #[error("version component {component:?} out of range in {input:?}")]
    OutOfRange { component: String, input: String },
}

/// A parsed `major.minor.patch[-build]` version
///
/// Versions are totally ordered: first by the numeric triple, then by build.
/// A version without a build sorts before any build of the same triple (a
/// build suffix marks a later rebuild of that release).  Builds are compared
/// segment by segment, splitting on `.` and `-`; numeric segments compare
/// numerically and sort before alphanumeric ones, which compare as text.  Any
/// remaining tie is broken by comparing the raw build strings.
#[derive(Clone, Debug, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct SoftwareVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub build: Option<String>,
}

impl SoftwareVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        SoftwareVersion { major, minor, patch, build: None }
    }

    /// Finds a version string in free-form command output, such as
    /// `ceph version 14.2.1 (d555a9489eb35f84f2e1ef49b77e19da9d113972)
    /// nautilus (stable)`.
    pub fn extract(output: &str) -> Result<SoftwareVersion, ParseVersionError> {
        let captures = VERSION_IN_OUTPUT
            .captures(output)
            .ok_or_else(|| ParseVersionError::NoVersion(output.to_string()))?;
        Self::from_captures(&captures, output)
    }

    fn from_captures(
        captures: &regex::Captures<'_>,
        input: &str,
    ) -> Result<SoftwareVersion, ParseVersionError> {
        let component = |i: usize| -> Result<u32, ParseVersionError> {
            let s = &captures[i];
            s.parse().map_err(|_| ParseVersionError::OutOfRange {
                component: s.to_string(),
                input: input.to_string(),
            })
        };
        Ok(SoftwareVersion {
            major: component(1)?,
            minor: component(2)?,
            patch: component(3)?,
            build: captures.get(4).map(|m| m.as_str().to_string()),
        })
    }

    pub fn is_at_least(&self, other: &SoftwareVersion) -> bool {
        self >= other
    }

    pub fn is_identical(&self, other: &SoftwareVersion) -> bool {
        self == other
    }

    pub fn is_superior_to(&self, other: &SoftwareVersion) -> bool {
        self > other
    }

    pub fn is_inferior_to(&self, other: &SoftwareVersion) -> bool {
        self < other
    }

    pub fn is_supported(&self) -> bool {
        SUPPORTED_RELEASES.contains(&self.major)
    }

    pub fn release_name(&self) -> &'static str {
        match self.major {
            12 => "luminous",
            13 => "mimic",
            14 => "nautilus",
            15 => "octopus",
            _ => "unknown",
        }
    }
}

fn compare_builds(a: &str, b: &str) -> Ordering {
    let mut left = a.split(['.', '-']);
    let mut right = b.split(['.', '-']);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) => {
                let ord = match (l.parse::<u64>(), r.parse::<u64>()) {
                    (Ok(l), Ok(r)) => l.cmp(&r),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => l.cmp(r),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

impl Ord for SoftwareVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.build, &other.build) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(a), Some(b)) => compare_builds(a, b),
            })
    }
}

impl PartialOrd for SoftwareVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for SoftwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(build) = &self.build {
            write!(f, "-{build}")?;
        }
        Ok(())
    }
}

impl FromStr for SoftwareVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let captures = EXACT_VERSION
            .captures(s)
            .ok_or_else(|| ParseVersionError::NoVersion(s.to_string()))?;
        Self::from_captures(&captures, s)
    }
}

impl JsonSchema for SoftwareVersion {
    fn schema_name() -> String {
        "SoftwareVersion".to_string()
    }

    fn json_schema(
        generator: &mut schemars::gen::SchemaGenerator,
    ) -> schemars::schema::Schema {
        String::json_schema(generator)
    }
}

/// Versions reported by the live daemons, as returned by the storage engine's
/// `versions` query
///
/// Each map goes from a version string (as the daemon prints it) to the number
/// of daemons running that version.  `overall` summarizes every role.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RunningVersionSet {
    #[serde(default)]
    pub mon: BTreeMap<String, u64>,
    #[serde(default)]
    pub mgr: BTreeMap<String, u64>,
    #[serde(default)]
    pub osd: BTreeMap<String, u64>,
    #[serde(default, rename = "rbd-mirror")]
    pub rbd_mirror: BTreeMap<String, u64>,
    #[serde(default)]
    pub overall: BTreeMap<String, u64>,
}

impl RunningVersionSet {
    pub fn for_role(&self, role: RoleKind) -> &BTreeMap<String, u64> {
        match role {
            RoleKind::Mon => &self.mon,
            RoleKind::Mgr => &self.mgr,
            RoleKind::Osd => &self.osd,
            RoleKind::RbdMirror => &self.rbd_mirror,
        }
    }

    /// Number of distinct versions running across the whole cluster.
    pub fn distinct_overall(&self) -> usize {
        self.overall.len()
    }

    /// The oldest version any daemon of `role` is running, ignoring entries
    /// that do not parse.
    pub fn least_up_to_date(&self, role: RoleKind) -> Option<SoftwareVersion> {
        self.for_role(role)
            .keys()
            .filter_map(|v| SoftwareVersion::extract(v).ok())
            .min()
    }
}
