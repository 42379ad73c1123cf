//! Layered deployment configuration.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::{RegistryFormat, plan::ETHLANCE_TARGET};

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILENAME: &str = "Ethlance.toml";

/// Prefix of the environment variables that override configuration values.
pub const ENV_PREFIX: &str = "ETHLANCE_";

pub const DEFAULT_RPC_URL: &str = "http://localhost:8545";
pub const DEFAULT_GAS_LIMIT: u64 = 4_000_000;
pub const DEFAULT_RECEIPT_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Everything a deployment run needs to know besides the plan itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// JSON-RPC endpoint of the node holding the deployer account.
    pub rpc_url: url::Url,
    /// Environment tag written into the registry (dev, qa, prod).
    pub environment: String,
    /// Name of the built-in plan to run.
    pub target: String,
    /// Directory holding the compiled `<Contract>.json` artifacts.
    pub build_dir: PathBuf,
    /// Destination of the smart contract listing.
    pub output: PathBuf,
    pub format: RegistryFormat,
    /// Sending account. Defaults to the node's first account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Address>,
    /// Gas limit for steps that do not override it.
    pub gas_limit: u64,
    pub receipt_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Where to save the deployment record. Defaults to a file next to `output`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<PathBuf>,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            rpc_url: url::Url::parse(DEFAULT_RPC_URL).expect("default RPC URL should be valid"),
            environment: "dev".to_string(),
            target: ETHLANCE_TARGET.to_string(),
            build_dir: PathBuf::from("build/contracts"),
            output: PathBuf::from("smart-contracts.json"),
            format: RegistryFormat::default(),
            sender: None,
            gas_limit: DEFAULT_GAS_LIMIT,
            receipt_timeout_secs: DEFAULT_RECEIPT_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            record: None,
        }
    }
}

impl DeployConfig {
    /// Layer defaults, the configuration file and `ETHLANCE_*` variables.
    ///
    /// An explicit `path` must exist; a directory resolves to the
    /// `Ethlance.toml` inside it. Without a path, `Ethlance.toml` in the
    /// working directory is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!(
                        "Configuration file or directory not found: {}",
                        path.display()
                    );
                }
                Some(if path.is_dir() {
                    path.join(CONFIG_FILENAME)
                } else {
                    path.to_path_buf()
                })
            }
            None => Some(PathBuf::from(CONFIG_FILENAME)).filter(|p| p.exists()),
        };

        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(file) = &file {
            tracing::debug!(path = %file.display(), "Reading configuration file");
            figment = figment.merge(Toml::file(file));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).ignore(&["verbosity", "config"]));

        let config: Self = figment
            .extract()
            .context("Failed to assemble deployment configuration")?;

        tracing::debug!(
            rpc_url = %config.rpc_url,
            environment = %config.environment,
            target = %config.target,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Reject values no run can succeed with.
    pub fn validate(&self) -> Result<()> {
        if self.gas_limit == 0 {
            anyhow::bail!("gas_limit must be greater than zero");
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than zero");
        }
        Ok(())
    }

    /// Save the configuration as TOML.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;
        std::fs::write(path, content)
            .context(format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// The deployment record path: `record` if set, otherwise
    /// `<output>.record.json`.
    pub fn record_path(&self) -> PathBuf {
        self.record
            .clone()
            .unwrap_or_else(|| self.output.with_extension("record.json"))
    }
}
