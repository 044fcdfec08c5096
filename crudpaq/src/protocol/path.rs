//! Relative resource paths
//!
//! A [`ResourcePath`] is an ordered list of path segments. The string form
//! never has a leading or trailing `/`, and each segment is URL-encoded so a
//! segment may itself contain `/`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ResourceException, ResourceResult};

/// Relative path identifying a resource or collection
///
/// # Example
///
/// ```rust
/// use crudpaq::protocol::ResourcePath;
///
/// let users = ResourcePath::parse("/users/").unwrap();
/// let alice = users.child("alice smith");
/// assert_eq!(alice.to_string(), "users/alice%20smith");
/// assert_eq!(alice.leaf(), Some("alice smith"));
/// assert_eq!(alice.parent(), Some(users));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourcePath {
    segments: Vec<String>,
}

impl ResourcePath {
    /// The empty path
    #[must_use]
    pub const fn root() -> Self {
        Self { segments: Vec::new() }
    }

    /// Parse an encoded path
    ///
    /// One leading and one trailing `/` are ignored. Empty inner segments
    /// (`a//b`) and undecodable segments are rejected.
    pub fn parse(path: &str) -> ResourceResult<Self> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Ok(Self::root());
        }

        let mut segments = Vec::new();
        for raw in trimmed.split('/') {
            if raw.is_empty() {
                return Err(ResourceException::bad_request(format!(
                    "Resource path '{path}' contains empty path elements"
                )));
            }
            let decoded = urlencoding::decode(raw).map_err(|e| {
                ResourceException::bad_request(format!(
                    "Resource path '{path}' contains an invalid path element '{raw}'"
                ))
                .caused_by(e)
            })?;
            segments.push(decoded.into_owned());
        }
        Ok(Self { segments })
    }

    /// Build a path from already-decoded segments
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Decoded segments
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether this is the empty path
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Append one decoded segment
    #[must_use]
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// Append another path
    #[must_use]
    pub fn concat(&self, other: &ResourcePath) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    /// Path without its last segment; `None` for the empty path
    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() {
            return None;
        }
        Some(self.head(self.segments.len() - 1))
    }

    /// Last segment
    pub fn leaf(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// The first `end` segments (clamped to the length)
    #[must_use]
    pub fn head(&self, end: usize) -> Self {
        self.sub_sequence(0, end)
    }

    /// Everything from segment `start` on (clamped to the length)
    #[must_use]
    pub fn tail(&self, start: usize) -> Self {
        self.sub_sequence(start, self.segments.len())
    }

    /// Segments `start..end`, clamped to the length
    #[must_use]
    pub fn sub_sequence(&self, start: usize, end: usize) -> Self {
        let end = end.min(self.segments.len());
        let start = start.min(end);
        Self {
            segments: self.segments[start..end].to_vec(),
        }
    }

    /// Whether `prefix` matches the leading segments of this path
    pub fn starts_with(&self, prefix: &ResourcePath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            f.write_str(&urlencoding::encode(segment))?;
        }
        Ok(())
    }
}

impl FromStr for ResourcePath {
    type Err = ResourceException;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourcePath {
    type Error = ResourceException;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourcePath> for String {
    fn from(path: ResourcePath) -> Self {
        path.to_string()
    }
}
