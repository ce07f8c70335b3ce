//! Local facts cache.
//!
//! Installation runs record the paths of the installed commands and
//! directories in a small JSON file so later runs do not depend on the
//! search path. Commands fall back to a `PATH` lookup when the cache is
//! missing; directories have no fallback.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const FACTS_PATH: &str = "/etc/cellctl/facts.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Facts {
    #[serde(default)]
    pub bins: HashMap<String, PathBuf>,
    #[serde(default)]
    pub dirs: HashMap<String, PathBuf>,
}

#[derive(Debug, Error)]
pub enum FactsError {
    #[error("unable to locate {0} command")]
    CommandNotFound(String),
    #[error("unable to locate {0} directory")]
    DirectoryNotFound(String),
}

impl Facts {
    pub fn load() -> Facts {
        Facts::load_from(Path::new(FACTS_PATH))
    }

    /// A missing or unreadable cache is normal on hosts that have not run
    /// an install yet; a cache that fails to parse is reported and ignored.
    pub fn load_from(path: &Path) -> Facts {
        match fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(facts) => facts,
                Err(e) => {
                    warn!("ignoring malformed facts file {}: {e}", path.display());
                    Facts::default()
                }
            },
            Err(_) => Facts::default(),
        }
    }

    pub fn lookup_command(&self, name: &str) -> Result<PathBuf, FactsError> {
        if let Some(path) = self.bins.get(name) {
            return Ok(path.clone());
        }
        find_in_path(name).ok_or_else(|| FactsError::CommandNotFound(name.to_string()))
    }

    pub fn lookup_directory(&self, name: &str) -> Result<PathBuf, FactsError> {
        self.dirs
            .get(name)
            .cloned()
            .ok_or_else(|| FactsError::DirectoryNotFound(name.to_string()))
    }
}

/// Search the executable search path for a command.
pub fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}
