// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::expand_env_vars;

/// How to launch, message and stop one game's dedicated server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameProfile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "working_directory", default)]
    pub working_dir: String,
    pub run: RunSpec,
    /// Console command prefix used to broadcast a message to players.
    #[serde(default)]
    pub message: String,
    pub stop: String,
    #[serde(default)]
    pub ports: Vec<u16>,
    /// Paths relative to `working_dir` that hold the game's saves.
    #[serde(default)]
    pub save_files: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

pub trait GameProfileLookup: Send + Sync {
    fn lookup(&self, name: &str) -> Option<GameProfile>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("failed to read game config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse game config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("multiple configs found for game: [{0}]")]
    Duplicate(String),
}

/// Profiles keyed by lowercase name.
#[derive(Debug, Clone, Default)]
pub struct GameCatalog {
    profiles: BTreeMap<String, GameProfile>,
}

impl GameCatalog {
    pub fn from_profiles(profiles: Vec<GameProfile>) -> Result<Self, ProfileError> {
        let mut by_name = BTreeMap::new();
        for profile in profiles {
            let key = profile.name.trim().to_lowercase();
            if by_name.contains_key(&key) {
                return Err(ProfileError::Duplicate(profile.name));
            }
            by_name.insert(key, profile);
        }
        Ok(Self { profiles: by_name })
    }

    /// Accepts YAML or JSON; `${VAR}` references are expanded first.
    pub fn parse_str(raw: &str) -> Result<Self, ProfileError> {
        let expanded = expand_env_vars(raw);
        let profiles: Vec<GameProfile> = serde_yaml::from_str(&expanded)?;
        Self::from_profiles(profiles)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ProfileError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ProfileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::parse_str(&raw)?;
        info!(
            path = %path.display(),
            games = ?catalog.names(),
            "loaded game profile catalog"
        );
        Ok(catalog)
    }

    pub fn get(&self, name: &str) -> Option<&GameProfile> {
        self.profiles.get(&name.trim().to_lowercase())
    }

    pub fn names(&self) -> Vec<String> {
        self.profiles
            .values()
            .map(|profile| profile.name.clone())
            .collect()
    }

    pub fn profiles(&self) -> impl Iterator<Item = &GameProfile> {
        self.profiles.values()
    }

    /// Every port any profile declares, sorted and deduplicated.
    pub fn ports(&self) -> Vec<u16> {
        self.profiles
            .values()
            .flat_map(|profile| profile.ports.iter().copied())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

impl GameProfileLookup for GameCatalog {
    fn lookup(&self, name: &str) -> Option<GameProfile> {
        self.get(name).cloned()
    }
}
