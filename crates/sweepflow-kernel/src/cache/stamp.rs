//! Completion stamps
//!
//! A stamp records that a rule instance finished successfully with a given
//! fingerprint. Stamps live at `<state_dir>/stamps/<sha256(name)>.stamp`.
//! The executor removes an instance's stamp before launching it and writes a
//! new one after the outputs are verified, so outputs left by an interrupted
//! or failed run never carry a current stamp.

use crate::rule::{Params, RuleInstance, ScriptRef};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use sweepflow_artifact::Artifact;

/// Fields of an instance that a stamp covers
#[derive(Serialize)]
struct Fingerprinted<'a> {
    name: &'a str,
    script: &'a ScriptRef,
    params: &'a Params,
    inputs: &'a [Artifact],
    outputs: &'a [Artifact],
    env: Option<&'a str>,
    flags: &'a [String],
}

/// Directory of completion stamps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StampStore {
    dir: PathBuf,
}

impl StampStore {
    /// Store under `<state_dir>/stamps`
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: state_dir.as_ref().join("stamps"),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// SHA-256 over the instance's declaration, hex encoded
    #[must_use]
    pub fn fingerprint(instance: &RuleInstance) -> String {
        let view = Fingerprinted {
            name: &instance.name,
            script: &instance.script,
            params: &instance.params,
            inputs: &instance.inputs,
            outputs: &instance.outputs,
            env: instance.env.as_ref().map(|e| e.0.as_str()),
            flags: &instance.extra_flags,
        };
        // infallible for plain data
        let bytes = serde_json::to_vec(&view).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    /// Path of the stamp for `name`
    #[must_use]
    pub fn stamp_path(&self, name: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(name.as_bytes()));
        self.dir.join(format!("{digest}.stamp"))
    }

    /// Whether a stamp exists and matches the current declaration
    #[must_use]
    pub fn is_current(&self, instance: &RuleInstance) -> bool {
        match fs::read_to_string(self.stamp_path(&instance.name)) {
            Ok(stored) => stored.trim() == Self::fingerprint(instance),
            Err(_) => false,
        }
    }

    /// Write the stamp for a successful execution
    ///
    /// Written to a temporary file and renamed into place.
    ///
    /// # Errors
    /// Any I/O error creating the directory or writing the file
    pub fn record(&self, instance: &RuleInstance) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.stamp_path(&instance.name);
        let tmp = path.with_extension("stamp.tmp");
        fs::write(&tmp, Self::fingerprint(instance))?;
        fs::rename(&tmp, &path)
    }

    /// Remove the stamp ahead of a launch; a missing stamp is not an error
    ///
    /// # Errors
    /// Any I/O error other than `NotFound`
    pub fn invalidate(&self, instance: &RuleInstance) -> io::Result<()> {
        match fs::remove_file(self.stamp_path(&instance.name)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}
