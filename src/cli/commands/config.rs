//! `lis-reconciler config`

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;

/// Effective configuration.
#[derive(Debug, Serialize)]
#[serde(transparent)]
pub struct ConfigOutput {
    /// Merged configuration.
    pub config: Config,
}

impl CommandOutput for ConfigOutput {
    fn to_human(&self) -> String {
        serde_yaml::to_string(&self.config).unwrap_or_default()
    }
}

/// Print the effective configuration.
pub fn execute(config: &Config, json_mode: bool) -> Result<()> {
    // Surface serialization problems instead of printing an empty document.
    serde_yaml::to_string(config).context("failed to render configuration")?;
    output(&ConfigOutput { config: config.clone() }, json_mode);
    Ok(())
}
