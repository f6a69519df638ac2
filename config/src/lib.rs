//! Configuration for HealthSim.
//!
//! Two documents live here: the application config (`config.toml`, storage
//! and wire-format identifiers) and payer policy profiles, which parameterize
//! adjudication.

#![allow(clippy::missing_errors_doc)]

mod app;
mod policy;

pub use app::{
    CONFIG_ENV, GenerationConfig, HealthsimConfig, Hl7Config, NcpdpConfig, PolicyConfig,
    StorageConfig, X12Config, config_path, default_data_dir, expand_env_vars,
};
pub use policy::{
    AppealPolicy, BundledPair, DenialRule, DurRule, FormularyEntry, Liability,
    NecessityRequirement, PayerInfo, PharmacyPolicy, PlanCostShare, PolicyProfile,
};

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: io::Error,
    },
    #[error("failed to parse {}: {source}", display_path(path.as_ref()))]
    Parse {
        /// `None` when parsing an in-memory document.
        path: Option<PathBuf>,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid(message.into())
    }

    #[must_use]
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ConfigError::Read { path, .. } => Some(path),
            ConfigError::Parse { path, .. } => path.as_ref(),
            ConfigError::Invalid(_) => None,
        }
    }
}

fn display_path(path: Option<&PathBuf>) -> String {
    path.map_or_else(|| "<inline>".to_string(), |path| path.display().to_string())
}
