//! Session store scanning.
//!
//! The worker keeps one transcript per session under
//! `<root>/<encoded project dir>/<session_id>.<ext>`, where the project
//! directory name is the original working directory with every separator
//! replaced by `-`. The substitution is lossy (a `-` in the original path is
//! indistinguishable from a separator), so known encodings are looked up in a
//! mapping table first and only then decoded heuristically.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::SessionStoreConfig;

/// Longest session id accepted before touching the filesystem.
const MAX_SESSION_ID_LEN: usize = 128;

/// How a [`SessionRecord`]'s working directory was recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Found in the mapping table; exact.
    Mapped,
    /// Reconstructed by reversing the separator substitution; may be wrong.
    Decoded,
}

/// A located session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Session identifier that was searched for.
    pub session_id: String,
    /// Working directory the session was created under.
    pub working_dir: PathBuf,
    /// Transcript file the session was found in.
    pub transcript: PathBuf,
    /// Recovery method.
    pub recovery: Recovery,
}

/// Read-only scanner over the session store.
#[derive(Debug, Clone)]
pub struct SessionLocator {
    roots: Vec<PathBuf>,
    extension: String,
    max_projects: usize,
    mappings: HashMap<String, PathBuf>,
}

impl SessionLocator {
    /// Build a locator from store settings.
    ///
    /// Every directory in `known_dirs` (typically the allowed base
    /// directories) is added to the mapping table under its encoded name,
    /// next to the explicit `mappings` from the configuration.
    pub fn new(config: &SessionStoreConfig, known_dirs: &[PathBuf]) -> Self {
        let mut mappings: HashMap<String, PathBuf> = known_dirs
            .iter()
            .map(|dir| (encode_project_dir(dir), dir.clone()))
            .collect();
        mappings.extend(
            config
                .mappings
                .iter()
                .map(|(name, dir)| (name.clone(), dir.clone())),
        );

        Self {
            roots: config.roots.clone(),
            extension: config.extension.trim_start_matches('.').to_owned(),
            max_projects: config.max_projects,
            mappings,
        }
    }

    /// Find the working directory `session_id` was created under.
    ///
    /// Returns `None` when the session is unknown, which is the normal case
    /// for brand-new sessions. I/O problems while scanning are logged and
    /// treated as "not found".
    #[must_use]
    pub fn locate(&self, session_id: &str) -> Option<SessionRecord> {
        if !is_valid_session_id(session_id) {
            warn!(session_id, "refusing to scan session store for malformed session id");
            return None;
        }

        let file_name = format!("{session_id}.{}", self.extension);

        for root in &self.roots {
            let Some(projects) = self.project_dirs(root) else {
                continue;
            };

            for project in projects {
                let transcript = project.join(&file_name);
                if !transcript.is_file() {
                    continue;
                }

                let Some(name) = project.file_name().and_then(|n| n.to_str()) else {
                    continue;
                };

                let (working_dir, recovery) = self.recover(name);
                debug!(
                    session_id,
                    transcript = %transcript.display(),
                    working_dir = %working_dir.display(),
                    ?recovery,
                    "session located"
                );
                return Some(SessionRecord {
                    session_id: session_id.to_owned(),
                    working_dir,
                    transcript,
                    recovery,
                });
            }
        }

        debug!(session_id, "session not found in store");
        None
    }

    /// Project directories under `root`, bounded and sorted for stable results.
    fn project_dirs(&self, root: &Path) -> Option<Vec<PathBuf>> {
        let entries = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(root = %root.display(), %err, "session store root unreadable");
                return None;
            }
        };

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_dir()))
            .map(|entry| entry.path())
            .collect();
        dirs.sort();
        dirs.truncate(self.max_projects);
        Some(dirs)
    }

    fn recover(&self, project_name: &str) -> (PathBuf, Recovery) {
        if let Some(dir) = self.mappings.get(project_name) {
            return (dir.clone(), Recovery::Mapped);
        }

        let decoded = decode_project_dir(project_name);
        warn!(
            project = project_name,
            decoded = %decoded.display(),
            "no mapping for project directory; decoded path is wrong if the original contained '-'"
        );
        (decoded, Recovery::Decoded)
    }
}

/// Encode a working directory the way the worker names project directories.
#[must_use]
pub fn encode_project_dir(dir: &Path) -> String {
    dir.to_string_lossy()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '-' })
        .collect()
}

/// Best-effort inverse of [`encode_project_dir`].
#[must_use]
pub fn decode_project_dir(name: &str) -> PathBuf {
    PathBuf::from(name.replace('-', "/"))
}

fn is_valid_session_id(session_id: &str) -> bool {
    !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
