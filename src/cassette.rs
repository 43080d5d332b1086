use crate::error::{Error, Result};
use crate::serializable::{SerializableRequest, SerializableResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CASSETTE_EXTENSION: &str = "yml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub request: SerializableRequest,
    pub response: SerializableResponse,
    pub recorded_at: DateTime<Utc>,
}

impl Interaction {
    pub fn new(request: SerializableRequest, response: SerializableResponse) -> Self {
        Self {
            request,
            response,
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cassette {
    pub interactions: Vec<Interaction>,
    pub recorded_with: String,
}

impl Cassette {
    pub fn new() -> Self {
        Self {
            interactions: Vec::new(),
            recorded_with: format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")),
        }
    }

    /// Read and validate a cassette file. Any parse, body-decoding or status
    /// failure is reported as [`Error::MalformedCassette`] naming the file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::MalformedCassette {
            path: path.to_path_buf(),
            reason: format!("Failed to read cassette file: {e}"),
        })?;

        let cassette: Cassette =
            serde_yaml::from_str(&content).map_err(|e| Error::MalformedCassette {
                path: path.to_path_buf(),
                reason: format!("Failed to parse cassette YAML: {e}"),
            })?;

        for (index, interaction) in cassette.interactions.iter().enumerate() {
            let decoded = interaction
                .request
                .body_bytes()
                .and(interaction.response.body_bytes())
                .and(interaction.response.status_code().map(drop));
            if let Err(e) = decoded {
                return Err(Error::MalformedCassette {
                    path: path.to_path_buf(),
                    reason: format!("interaction #{index}: {e}"),
                });
            }
        }

        Ok(cassette)
    }

    /// Write the cassette through a temporary sibling file so a reader never
    /// sees a half-written cassette.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self).map_err(|e| Error::MalformedCassette {
            path: path.to_path_buf(),
            reason: format!("Failed to serialize cassette: {e}"),
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| Error::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let tmp = path.with_extension(format!("{CASSETTE_EXTENSION}.tmp"));
        std::fs::write(&tmp, yaml).map_err(|source| Error::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;

        log::debug!("Saved {} interactions to {path:?}", self.interactions.len());
        Ok(())
    }

    pub fn record_interaction(&mut self, interaction: Interaction) {
        self.interactions.push(interaction);
    }

    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }
}

impl Default for Cassette {
    fn default() -> Self {
        Self::new()
    }
}

/// A directory of cassettes, one file per scenario name.
#[derive(Debug, Clone)]
pub struct CassetteLibrary {
    root: PathBuf,
}

impl CassetteLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `name` is expected to already be a scenario name (see
    /// [`crate::naming::scenario_name`]); nested names map to subdirectories.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{CASSETTE_EXTENSION}"))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.path_for(name).is_file()
    }

    pub fn load(&self, name: &str) -> Result<Cassette> {
        let path = self.path_for(name);
        if !path.is_file() {
            return Err(Error::CassetteMissing {
                name: name.to_string(),
                path,
            });
        }
        Cassette::load_from_file(path)
    }

    pub fn save(&self, name: &str, cassette: &Cassette) -> Result<()> {
        cassette.save_to_file(self.path_for(name))
    }
}
