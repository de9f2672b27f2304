//! Working-directory validation against the configured allow-list.
//!
//! Every execution passes through [`PathValidator::validate`] before a worker
//! is spawned. Candidates are canonicalized, so `..` segments and symlinks are
//! resolved before the containment check; a symlink inside an allowed base
//! that points elsewhere is rejected.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{AppError, Result};

/// Allow-list of base directories a worker may run in.
#[derive(Debug, Clone)]
pub struct PathValidator {
    bases: Vec<PathBuf>,
}

impl PathValidator {
    /// Build a validator over `bases`.
    ///
    /// Bases are canonicalized here; a base that cannot be resolved is kept
    /// verbatim and can only match candidates that canonicalize to it.
    pub fn new(bases: impl IntoIterator<Item = PathBuf>) -> Self {
        let bases = bases
            .into_iter()
            .map(|base| match base.canonicalize() {
                Ok(resolved) => resolved,
                Err(err) => {
                    warn!(base = %base.display(), %err, "allowed base dir cannot be resolved");
                    base
                }
            })
            .collect();
        Self { bases }
    }

    /// Canonical base directories.
    #[must_use]
    pub fn bases(&self) -> &[PathBuf] {
        &self.bases
    }

    /// Validate that `candidate` is an existing directory under one of the
    /// allowed bases and return its canonical absolute path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if:
    /// - The candidate cannot be canonicalized (missing, permission denied).
    /// - The resolved path is not a directory.
    /// - The resolved path is not equal to or below any allowed base.
    pub fn validate(&self, candidate: impl AsRef<Path>) -> Result<PathBuf> {
        let candidate = candidate.as_ref();
        let resolved = candidate.canonicalize().map_err(|err| {
            AppError::Config(format!(
                "working directory {} cannot be resolved: {err}",
                candidate.display()
            ))
        })?;

        if !resolved.is_dir() {
            return Err(AppError::Config(format!(
                "working directory {} is not a directory",
                resolved.display()
            )));
        }

        match self.bases.iter().find(|base| resolved.starts_with(base)) {
            Some(base) => {
                debug!(path = %resolved.display(), base = %base.display(), "working directory allowed");
                Ok(resolved)
            }
            None => Err(AppError::Config(format!(
                "working directory {} is outside the allowed base directories",
                resolved.display()
            ))),
        }
    }
}
