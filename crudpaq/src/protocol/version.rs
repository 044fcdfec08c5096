//! Protocol and resource API versions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ResourceException, ResourceResult};

/// A `major.minor` version
///
/// Parses `"2"`, `"2.1"` and `"v2.1"`; displays as `"2.1"`.
///
/// # Example
///
/// ```rust
/// use crudpaq::protocol::Version;
///
/// let route = Version::parse("1.5").unwrap();
/// assert!(route.is_compatible_with(&Version::new(1, 0)));
/// assert!(!route.is_compatible_with(&Version::new(1, 9)));
/// assert!(!route.is_compatible_with(&Version::new(2, 0)));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    major: u32,
    minor: u32,
}

impl Version {
    /// Create a version
    #[must_use]
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Parse a version string
    pub fn parse(s: &str) -> ResourceResult<Self> {
        let trimmed = s.trim();
        let normalized = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        let invalid = || ResourceException::bad_request(format!("'{s}' is not a valid version"));

        let (major, minor) = match normalized.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (normalized, "0"),
        };
        let major = major.parse::<u32>().map_err(|_| invalid())?;
        let minor = minor.parse::<u32>().map_err(|_| invalid())?;
        Ok(Self { major, minor })
    }

    /// Major component
    pub const fn major(&self) -> u32 {
        self.major
    }

    /// Minor component
    pub const fn minor(&self) -> u32 {
        self.minor
    }

    /// Whether a handler at this version can serve `requested`
    ///
    /// Majors must match and this minor must be at least the requested one.
    pub const fn is_compatible_with(&self, requested: &Version) -> bool {
        self.major == requested.major && self.minor >= requested.minor
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for Version {
    type Err = ResourceException;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = ResourceException;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.to_string()
    }
}
