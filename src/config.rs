//! Engine configuration.
//!
//! Everything the engine knows about the managed handle comes from here: its
//! name, the factory that creates it, the two canonical declaration forms and
//! the import statements that bring the factory into scope. The corpus section
//! only matters to the directory walker.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::validate::ContextHint;

pub const CONFIG_FILE_NAME: &str = "declsync.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid {which} form '{form}': {reason}")]
    InvalidForm {
        which: &'static str,
        form: String,
        reason: String,
    },
    #[error("handle pattern failed to compile: {0}")]
    Pattern(#[from] regex::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportSources {
    pub client: String,
    pub server: String,
}

impl Default for ImportSources {
    fn default() -> Self {
        ImportSources {
            client: "import { createClient } from '@/lib/supabase/client';".to_string(),
            server: "import { createClient } from '@/lib/supabase/server';".to_string(),
        }
    }
}

/// The managed handle and its two canonical declarations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HandleConfig {
    pub name: String,
    pub factory: String,
    pub client_form: String,
    pub server_form: String,
    pub imports: ImportSources,
}

/// The defaults pass `validate()` and compile into `HandlePatterns`; the
/// engine's shared default synchronizer relies on it.
impl Default for HandleConfig {
    fn default() -> Self {
        HandleConfig {
            name: "supabase".to_string(),
            factory: "createClient".to_string(),
            client_form: "const supabase = createClient();".to_string(),
            server_form: "const supabase = await createClient();".to_string(),
            imports: ImportSources::default(),
        }
    }
}

impl HandleConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (which, form) in [("client", &self.client_form), ("server", &self.server_form)] {
            if !binds_name(form, &self.name) {
                return Err(ConfigError::InvalidForm {
                    which,
                    form: form.clone(),
                    reason: format!("must declare '{}' with const, let or var", self.name),
                });
            }
        }
        if !contains_word(&self.server_form, "await") {
            return Err(ConfigError::InvalidForm {
                which: "server",
                form: self.server_form.clone(),
                reason: "must await the factory".to_string(),
            });
        }
        if contains_word(&self.client_form, "await") {
            return Err(ConfigError::InvalidForm {
                which: "client",
                form: self.client_form.clone(),
                reason: "must not await the factory".to_string(),
            });
        }
        Ok(())
    }

    /// Stable digest of everything that influences a rewrite.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [
            &self.name,
            &self.factory,
            &self.client_form,
            &self.server_form,
            &self.imports.client,
            &self.imports.server,
        ] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CorpusConfig {
    pub roots: Vec<PathBuf>,
    pub extensions: Vec<String>,
    pub exclude_dirs: Vec<String>,
    /// Path suffixes never processed (the handle's own factory modules).
    pub skip_files: Vec<String>,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        CorpusConfig {
            roots: ["app", "components", "lib"].iter().map(PathBuf::from).collect(),
            extensions: ["ts", "tsx"].iter().map(|s| s.to_string()).collect(),
            exclude_dirs: ["node_modules", ".next", "generated"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            skip_files: ["supabase/client.ts", "supabase/server.ts", "supabase/middleware.ts"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    pub handle: HandleConfig,
    pub corpus: CorpusConfig,
    pub default_context: ContextHint,
}

impl SyncConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&raw).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        config.handle.validate()?;
        Ok(config)
    }

    /// Load `declsync.json` from `dir` when present, defaults otherwise.
    pub fn discover(dir: &Path) -> Result<Self, ConfigError> {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            Self::load(&candidate)
        } else {
            Ok(Self::default())
        }
    }
}

fn contains_word(text: &str, word: &str) -> bool {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
        .any(|w| w == word)
}

fn binds_name(form: &str, name: &str) -> bool {
    let mut words = form
        .split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
        .filter(|w| !w.is_empty());
    matches!(words.next(), Some("const" | "let" | "var")) && words.next() == Some(name)
}
