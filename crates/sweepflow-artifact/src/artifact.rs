//! Artifacts and presence probing
//!
//! An [`Artifact`] is a file or directory a rule consumes or produces. Its
//! identity is its [`ArtifactPath`]; the [`ArtifactKind`] only changes how
//! presence is decided:
//! - a file is present if it exists
//! - a directory is present if it exists and holds at least one entry

use crate::path::{ArtifactPath, PathError};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::io;
use std::path::Path;

/// Whether an artifact names a file or a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Regular file
    #[default]
    File,
    /// Directory tree
    Directory,
}

impl Display for ArtifactKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => f.write_str("file"),
            Self::Directory => f.write_str("directory"),
        }
    }
}

/// Result of probing an artifact on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Exists (and is non-empty, for directories)
    Present,
    /// Nothing at the path
    Missing,
    /// Directory exists but has no entries
    EmptyDirectory,
}

impl Presence {
    /// Whether the artifact satisfies a consumer or the cache
    #[inline]
    #[must_use]
    pub fn is_present(self) -> bool {
        matches!(self, Self::Present)
    }
}

/// File or directory tracked as a rule input or output
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Artifact {
    /// Normalized location, the artifact's identity
    pub path: ArtifactPath,
    /// File or directory
    #[serde(default)]
    pub kind: ArtifactKind,
}

impl Artifact {
    /// Create an artifact from a parsed path
    #[inline]
    #[must_use]
    pub fn new(path: ArtifactPath, kind: ArtifactKind) -> Self {
        Self { path, kind }
    }

    /// File artifact from a raw path
    ///
    /// # Errors
    /// Returns [`PathError`] if the path is invalid
    pub fn file(raw: &str) -> Result<Self, PathError> {
        Ok(Self::new(ArtifactPath::parse(raw)?, ArtifactKind::File))
    }

    /// Directory artifact from a raw path
    ///
    /// # Errors
    /// Returns [`PathError`] if the path is invalid
    pub fn directory(raw: &str) -> Result<Self, PathError> {
        Ok(Self::new(ArtifactPath::parse(raw)?, ArtifactKind::Directory))
    }

    /// Whether this is a directory artifact
    #[inline]
    #[must_use]
    pub fn is_directory(&self) -> bool {
        matches!(self.kind, ArtifactKind::Directory)
    }

    /// Probe the filesystem relative to `root`
    ///
    /// Permission errors and other I/O failures count as missing so that a
    /// rule producing the artifact is scheduled rather than skipped.
    #[must_use]
    pub fn probe(&self, root: &Path) -> Presence {
        let full = self.path.resolve(root);
        match self.kind {
            ArtifactKind::File => {
                if full.exists() {
                    Presence::Present
                } else {
                    Presence::Missing
                }
            }
            ArtifactKind::Directory => match dir_has_entries(&full) {
                Ok(true) => Presence::Present,
                Ok(false) => Presence::EmptyDirectory,
                Err(_) => Presence::Missing,
            },
        }
    }

    /// Shorthand for `probe(root).is_present()`
    #[inline]
    #[must_use]
    pub fn is_present(&self, root: &Path) -> bool {
        self.probe(root).is_present()
    }
}

impl Display for Artifact {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.kind {
            ArtifactKind::File => write!(f, "{}", self.path),
            ArtifactKind::Directory => write!(f, "{}/", self.path),
        }
    }
}

fn dir_has_entries(path: &Path) -> io::Result<bool> {
    let mut entries = std::fs::read_dir(path)?;
    Ok(entries.next().is_some())
}
