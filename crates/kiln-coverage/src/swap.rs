//! Artifact swap for coverage runs.
//!
//! Protocol, in this order:
//! 1. copy the production artifact to the backup path
//! 2. copy the instrumented artifact over the production path
//! 3. (caller) run the tests against the production path
//! 4. copy the backup over the production path and delete the backup
//!
//! Step 4 is owned by [`SwapGuard`]: [`SwapGuard::restore`] reports failures to
//! the caller, and dropping an unrestored guard (early return, panic) restores
//! as well. Restoration happens at most once per guard.

use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

use kiln_core::fs::{copy_atomic, write_atomic};
use kiln_core::{obs, Layout};

use crate::error::{CoverageError, Result};

/// Files involved in one swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapPaths {
    /// The deliverable.
    pub artifact: PathBuf,
    /// Output of the instrumentation step.
    pub instrumented: PathBuf,
    /// Private copy of the deliverable, never placed next to it.
    pub backup: PathBuf,
}

impl From<&Layout> for SwapPaths {
    fn from(layout: &Layout) -> Self {
        Self {
            artifact: layout.artifact.clone(),
            instrumented: layout.instrumented.clone(),
            backup: layout.backup.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapState {
    Original,
    SwappedToTemp,
    InstrumentedActive,
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub struct ArtifactSwap;

impl ArtifactSwap {
    /// Back up the artifact and put the instrumented copy in its place.
    ///
    /// On error the artifact is left exactly as it was and no backup remains.
    pub fn engage(paths: SwapPaths) -> Result<SwapGuard> {
        // A leftover backup holds the only copy of the original bytes.
        Self::recover_stale(&paths)?;
        if !paths.artifact.is_file() {
            return Err(CoverageError::MissingArtifact(paths.artifact));
        }

        let original = fs::read(&paths.artifact).map_err(CoverageError::io("read", &paths.artifact))?;
        let digest = sha256_hex(&original);
        write_atomic(&paths.backup, &original).map_err(CoverageError::io("back up to", &paths.backup))?;
        debug!(backup = %paths.backup.display(), sha256 = %digest, "Artifact backed up");

        let mut guard = SwapGuard {
            paths,
            digest,
            state: SwapState::SwappedToTemp,
            released: false,
        };

        if !guard.paths.instrumented.is_file() {
            guard.discard_backup();
            return Err(CoverageError::MissingInstrumented(guard.paths.instrumented.clone()));
        }

        // Atomic replace: a failure here leaves the original in place.
        if let Err(e) = copy_atomic(&guard.paths.instrumented, &guard.paths.artifact) {
            guard.discard_backup();
            return Err(CoverageError::Io {
                action: "install instrumented artifact at",
                path: guard.paths.artifact.clone(),
                source: e,
            });
        }

        guard.state = SwapState::InstrumentedActive;
        obs::emit_artifact_swapped(
            &guard.paths.artifact.display().to_string(),
            &guard.paths.backup.display().to_string(),
        );
        Ok(guard)
    }

    /// Restore a backup left behind by an aborted run.
    ///
    /// Returns `true` when a backup was found and put back.
    pub fn recover_stale(paths: &SwapPaths) -> Result<bool> {
        if !paths.backup.is_file() {
            return Ok(false);
        }

        warn!(
            backup = %paths.backup.display(),
            artifact = %paths.artifact.display(),
            "Found artifact backup from an interrupted coverage run, restoring"
        );
        copy_atomic(&paths.backup, &paths.artifact)
            .map_err(CoverageError::io("restore", &paths.artifact))?;
        fs::remove_file(&paths.backup).map_err(CoverageError::io("remove", &paths.backup))?;
        Ok(true)
    }
}

/// Proof that the instrumented artifact is active. Restores on drop.
#[must_use = "dropping the guard immediately restores the original artifact"]
pub struct SwapGuard {
    paths: SwapPaths,
    digest: String,
    state: SwapState,
    released: bool,
}

impl SwapGuard {
    pub fn state(&self) -> SwapState {
        self.state
    }

    pub fn paths(&self) -> &SwapPaths {
        &self.paths
    }

    /// SHA-256 of the original artifact, captured before the swap.
    pub fn original_digest(&self) -> &str {
        &self.digest
    }

    /// Put the original artifact back and verify its digest.
    ///
    /// A failure here means the deliverable may still be instrumented; it is
    /// logged at `error` and must abort the run.
    pub fn restore(mut self) -> Result<()> {
        self.released = true;
        self.restore_inner().map_err(|e| {
            obs::emit_artifact_restore_failed(&self.paths.artifact.display().to_string(), &e);
            e
        })
    }

    fn restore_inner(&mut self) -> Result<()> {
        if self.state == SwapState::Original {
            return Ok(());
        }

        copy_atomic(&self.paths.backup, &self.paths.artifact)
            .map_err(CoverageError::io("restore", &self.paths.artifact))?;

        let restored =
            fs::read(&self.paths.artifact).map_err(CoverageError::io("read", &self.paths.artifact))?;
        let actual = sha256_hex(&restored);
        if actual != self.digest {
            return Err(CoverageError::DigestMismatch {
                path: self.paths.artifact.clone(),
                expected: self.digest.clone(),
                actual,
            });
        }

        fs::remove_file(&self.paths.backup).map_err(CoverageError::io("remove", &self.paths.backup))?;
        self.state = SwapState::Original;
        obs::emit_artifact_restored(&self.paths.artifact.display().to_string(), &self.digest);
        Ok(())
    }

    fn discard_backup(&mut self) {
        if let Err(e) = fs::remove_file(&self.paths.backup) {
            warn!(backup = %self.paths.backup.display(), error = %e, "Failed to remove artifact backup");
        }
        self.state = SwapState::Original;
        self.released = true;
    }
}

impl Drop for SwapGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = self.restore_inner() {
            obs::emit_artifact_restore_failed(&self.paths.artifact.display().to_string(), &e);
        }
    }
}

impl std::fmt::Debug for SwapGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapGuard")
            .field("artifact", &self.paths.artifact)
            .field("state", &self.state)
            .finish()
    }
}
