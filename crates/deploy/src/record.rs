//! Deployment records.
//!
//! A record is saved after every run, successful or not. It keeps enough to
//! rewrite the smart contract listing without touching the chain again, which
//! is how an operator recovers when the listing could not be written.

use std::path::Path;

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    DeployedContract, DeploymentPlan, OrchestrationRun, Registry, RunStatus, StepOutcome,
    error::error_chain,
};

/// Everything observed during one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub target: String,
    pub environment: String,
    /// SHA-256 of the plan that was executed.
    pub plan_hash: String,
    pub sender: Address,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    /// The full error chain of the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Confirmed contracts in registry order.
    pub contracts: Vec<DeployedContract>,
    pub outcomes: Vec<StepOutcome>,
    /// Unix timestamp when the record was created
    pub recorded_at: u64,
    pub tool_version: String,
}

impl DeploymentRecord {
    pub fn from_run(
        run: &OrchestrationRun,
        plan: &DeploymentPlan,
        environment: impl Into<String>,
        sender: Address,
    ) -> Self {
        let failure = run.failure();

        Self {
            target: run.target().to_string(),
            environment: environment.into(),
            plan_hash: plan.compute_hash(),
            sender,
            status: run.status(),
            failed_step: failure.map(|f| f.step.clone()),
            error: failure.map(|f| error_chain(f)),
            contracts: run.registry().iter().cloned().collect(),
            outcomes: run.outcomes().to_vec(),
            recorded_at: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("System time should be after Unix epoch")
                .as_secs(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Rebuild the registry the run produced.
    pub fn registry(&self) -> Result<Registry> {
        Registry::from_contracts(self.contracts.iter().cloned())
            .context("Deployment record holds an inconsistent registry")
    }

    /// Save the record as formatted JSON.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize deployment record")?;

        std::fs::write(path, json).context(format!(
            "Failed to write deployment record to {}",
            path.display()
        ))?;

        tracing::info!(path = %path.display(), status = %self.status, "Deployment record saved");
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Deployment record file does not exist: {}", path.display());
        }

        let content = std::fs::read_to_string(path).context(format!(
            "Failed to read deployment record from {}",
            path.display()
        ))?;

        let record: Self =
            serde_json::from_str(&content).context("Failed to parse deployment record JSON")?;

        Ok(record)
    }
}
