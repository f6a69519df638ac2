use std::path::PathBuf;
use std::{env, fs};

use serde::Deserialize;

use crate::{ConfigError, PolicyProfile};

pub const CONFIG_ENV: &str = "HEALTHSIM_CONFIG";

/// Application configuration read from `~/.healthsim/config.toml`.
///
/// Every section is optional; absent sections fall back to defaults.
#[derive(Debug, Default, Deserialize)]
pub struct HealthsimConfig {
    pub storage: Option<StorageConfig>,
    pub policy: Option<PolicyConfig>,
    pub hl7: Option<Hl7Config>,
    pub x12: Option<X12Config>,
    pub ncpdp: Option<NcpdpConfig>,
    pub generation: Option<GenerationConfig>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the cohort database. Defaults to `~/.healthsim`.
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PolicyConfig {
    /// Payer profile TOML. The bundled example profile is used when unset.
    pub profile: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Hl7Config {
    #[serde(default = "default_field_separator")]
    pub field_separator: char,
    /// Encoding characters in MSH-2 order: component, repetition, escape, subcomponent.
    #[serde(default = "default_encoding_characters")]
    pub encoding_characters: String,
    #[serde(default = "default_sending_application")]
    pub sending_application: String,
}

impl Default for Hl7Config {
    fn default() -> Self {
        Self {
            field_separator: default_field_separator(),
            encoding_characters: default_encoding_characters(),
            sending_application: default_sending_application(),
        }
    }
}

const fn default_field_separator() -> char {
    '|'
}

fn default_encoding_characters() -> String {
    "^~\\&".to_string()
}

fn default_sending_application() -> String {
    "HEALTHSIM".to_string()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct X12Config {
    pub sender_id: Option<String>,
    pub receiver_id: Option<String>,
    /// First interchange control number; incremented per export part.
    pub control_number: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NcpdpConfig {
    pub service_provider_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationConfig {
    pub endpoint: Option<String>,
    /// May reference the environment as `${VAR}`.
    pub api_key: Option<String>,
    pub model: Option<String>,
}

impl GenerationConfig {
    #[must_use]
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .as_deref()
            .map(expand_env_vars)
            .filter(|key| !key.is_empty())
    }
}

impl HealthsimConfig {
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read { path, source: err });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(Some(config)),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: Some(path),
                    source: err,
                })
            }
        }
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Where the cohort database lives.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .as_ref()
            .and_then(|storage| storage.data_dir.clone())
            .or_else(default_data_dir)
            .unwrap_or_else(|| PathBuf::from(".healthsim"))
    }

    /// The configured payer profile, or the bundled example.
    pub fn policy_profile(&self) -> Result<PolicyProfile, ConfigError> {
        match self.policy.as_ref().and_then(|policy| policy.profile.as_ref()) {
            Some(path) => PolicyProfile::load(path),
            None => PolicyProfile::example(),
        }
    }
}

pub fn config_path() -> Option<PathBuf> {
    if let Some(explicit) = env::var_os(CONFIG_ENV).filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(explicit));
    }
    default_data_dir().map(|dir| dir.join("config.toml"))
}

#[must_use]
pub fn default_data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".healthsim"))
}

/// Replace `${VAR}` references with environment values; unset vars become empty.
#[must_use]
pub fn expand_env_vars(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let var = &after[..end];
                if !var.is_empty() {
                    out.push_str(&env::var(var).unwrap_or_default());
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
