use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;

pub const CONFIG_FILE_NAME: &str = "openprose.toml";
pub const STATE_FILE_NAME: &str = "state.json";
pub const DEFAULT_ANALYTICS_ENDPOINT: &str = "https://api-v2.prose.md/analytics";

#[derive(Debug, Default, Deserialize)]
pub struct ProseConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Deserialize)]
pub struct PathsConfig {
    /// Directory holding `prose.md`, `SKILL.md` and `docs.md`, relative to the project root.
    #[serde(default = "default_skills_dir")]
    pub skills_dir: PathBuf,
    /// Directory holding `state.json`, relative to the project root.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            skills_dir: default_skills_dir(),
            state_dir: default_state_dir(),
        }
    }
}

fn default_skills_dir() -> PathBuf {
    PathBuf::from("skills").join("open-prose")
}
fn default_state_dir() -> PathBuf {
    PathBuf::from(".prose")
}

#[derive(Debug, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
        }
    }
}

fn default_endpoint() -> String {
    DEFAULT_ANALYTICS_ENDPOINT.into()
}

impl ProseConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Resolve configuration for a project.
    ///
    /// Lookup order: `explicit`, then `<project_root>/openprose.toml`, then
    /// `~/.config/openprose/openprose.toml`. Falls back to defaults when none exist.
    pub fn discover(project_root: &Path, explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let candidates = [Some(project_root.join(CONFIG_FILE_NAME)), user_config_path()];
        for candidate in candidates.into_iter().flatten() {
            if candidate.is_file() {
                tracing::debug!(path = %candidate.display(), "Loading config");
                return Self::from_file(&candidate);
            }
        }

        tracing::debug!("No openprose.toml found, using defaults");
        Ok(Self::default())
    }

    pub fn skills_dir(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.paths.skills_dir)
    }

    pub fn state_file(&self, project_root: &Path) -> PathBuf {
        project_root.join(&self.paths.state_dir).join(STATE_FILE_NAME)
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| {
        home.join(".config")
            .join("openprose")
            .join(CONFIG_FILE_NAME)
    })
}
