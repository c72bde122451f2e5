// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Operation runner settings

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct OpsConfig {
    pub enable_desktop_notifications: bool,
    /// How long a normal operation may run before progress is shown
    pub progress_delay_ms: u64,
    /// Same, for silent operations
    pub silent_progress_delay_ms: u64,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            enable_desktop_notifications: true,
            progress_delay_ms: 500,
            silent_progress_delay_ms: 2000,
        }
    }
}

impl OpsConfig {
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        toml::from_str(raw).context("Failed to parse operations config")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("Invalid config in {}", path.display()))
    }

    pub fn progress_delay(&self, silent: bool) -> Duration {
        Duration::from_millis(if silent {
            self.silent_progress_delay_ms
        } else {
            self.progress_delay_ms
        })
    }
}
