//! Artifact paths
//!
//! Provides [`ArtifactPath`], a lexically normalized filesystem path used as
//! the identity of an artifact. Two declarations that spell the same location
//! differently (`data/./run/`, `data/run`) compare equal.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Normalized path of an artifact
///
/// Stored as `/`-separated segments. `.` segments and empty segments are
/// dropped, and `..` cancels the preceding segment where one exists.
///
/// # Examples
/// - `data/migration/` → `data/migration`
/// - `data/./a/../b` → `data/b`
/// - `/abs/path` stays absolute
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArtifactPath {
    absolute: bool,
    segments: Vec<String>,
}

impl ArtifactPath {
    /// Parse and normalize a path
    ///
    /// # Errors
    /// - [`PathError::Empty`] if nothing remains after normalization
    /// - [`PathError::EscapesRoot`] for `..` above an absolute root
    /// - [`PathError::InvalidSegment`] for segments containing NUL
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let absolute = raw.starts_with('/');
        let mut segments: Vec<String> = Vec::new();

        for seg in raw.split('/') {
            match seg {
                "" | "." => {}
                ".." => match segments.last() {
                    Some(last) if last != ".." => {
                        segments.pop();
                    }
                    _ if absolute => return Err(PathError::EscapesRoot(raw.to_string())),
                    _ => segments.push(seg.to_string()),
                },
                _ if seg.contains('\0') => {
                    return Err(PathError::InvalidSegment(seg.replace('\0', "\\0")))
                }
                _ => segments.push(seg.to_string()),
            }
        }

        if segments.is_empty() {
            return Err(PathError::Empty(raw.to_string()));
        }

        Ok(Self { absolute, segments })
    }

    /// Path segments from root to leaf
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false; an empty path cannot be constructed
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether the path is rooted at `/`
    #[inline]
    #[must_use]
    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    /// Last segment
    #[inline]
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.segments.last().map_or("", String::as_str)
    }

    /// Parent path, `None` for single-segment paths
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.segments.len() <= 1 {
            return None;
        }
        Some(Self {
            absolute: self.absolute,
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Strict ancestors, nearest first
    ///
    /// `a/b/c` yields `a/b` then `a`.
    pub fn ancestors(&self) -> impl Iterator<Item = ArtifactPath> + '_ {
        (1..self.segments.len()).rev().map(move |len| Self {
            absolute: self.absolute,
            segments: self.segments[..len].to_vec(),
        })
    }

    /// Append a segment, returning a new path
    ///
    /// # Errors
    /// Same as [`ArtifactPath::parse`] applied to the joined path.
    pub fn join(&self, tail: &str) -> Result<Self, PathError> {
        Self::parse(&format!("{self}/{tail}"))
    }

    /// Whether `self` is `other` or one of its ancestors
    #[inline]
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.absolute == other.absolute
            && self.segments.len() <= other.segments.len()
            && self.segments == other.segments[..self.segments.len()]
    }

    /// Whether `other` lies strictly inside `self`
    #[inline]
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        self.segments.len() < other.segments.len() && self.is_prefix_of(other)
    }

    /// Resolve against a working directory
    ///
    /// Absolute paths are returned unchanged.
    #[must_use]
    pub fn resolve(&self, root: &Path) -> PathBuf {
        let mut out = if self.absolute {
            PathBuf::from("/")
        } else {
            root.to_path_buf()
        };
        out.extend(&self.segments);
        out
    }
}

impl Display for ArtifactPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.absolute {
            f.write_str("/")?;
        }
        f.write_str(&self.segments.join("/"))
    }
}

impl FromStr for ArtifactPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ArtifactPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ArtifactPath> for String {
    fn from(value: ArtifactPath) -> Self {
        value.to_string()
    }
}

/// Errors related to artifact paths
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// Nothing left after normalization
    #[error("empty artifact path: {0:?}")]
    Empty(String),

    /// `..` climbs above `/`
    #[error("path '{0}' escapes the filesystem root")]
    EscapesRoot(String),

    /// Segment cannot be used in a path
    #[error("invalid path segment: {0}")]
    InvalidSegment(String),
}
