//! sweepflow Artifacts
//!
//! Files and directories that rules consume and produce.
//!
//! # Core Concepts
//!
//! - [`ArtifactPath`]: lexically normalized path, the identity of an artifact
//! - [`Artifact`]: a path plus its [`ArtifactKind`]
//! - [`Presence`]: outcome of probing an artifact on disk
//!
//! Directory artifacts count as present only when non-empty, so an output
//! directory created by a crashed run before anything was written to it does
//! not satisfy a cache check.
//!
//! # Example
//!
//! ```rust,ignore
//! use sweepflow_artifact::Artifact;
//!
//! let out = Artifact::directory("data/migration/gaussian/insideout/powerlaw_slope11.vice")?;
//! if !out.is_present(workdir) {
//!     // schedule the producing rule
//! }
//! ```

#![warn(unreachable_pub)]

mod artifact;
mod path;

pub use artifact::{Artifact, ArtifactKind, Presence};
pub use path::{ArtifactPath, PathError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
