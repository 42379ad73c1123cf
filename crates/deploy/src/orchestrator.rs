//! Deployment execution engine.
//!
//! Steps run one at a time in declaration order. Each step blocks on the
//! chain client until its transaction is confirmed or fails. The first
//! failure ends the run: nothing after it is submitted and nothing before it
//! is rolled back, since on-chain deployments are irreversible.
//!
//! Runs are not idempotent. Executing a plan again after a partial failure
//! deploys fresh instances of every contract, including the ones that had
//! already succeeded.

use std::collections::HashMap;

use alloy_core::primitives::{Address, B256};
use serde::{Deserialize, Serialize};
use serde_json::Map;

use crate::{
    ArtifactLoader, ConfigurationError, DeployError, DeployedContract, DeploymentPlan,
    DeploymentStep, Registry, StepFailure,
    artifact::Artifact,
    chain::{ChainClient, DeployHandle, TxOptions},
    plan::StepAction,
};

/// Terminal status of a run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    InProgress,
    Succeeded,
    Failed,
}

/// The result of a completed step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum StepOutcome {
    Deployed {
        step: String,
        registry_key: String,
        address: Address,
        transaction_hash: B256,
    },
    /// A configuration call, associated with the registry entry it targets.
    Configured {
        step: String,
        registry_key: String,
        method: String,
        transaction_hash: B256,
    },
}

impl StepOutcome {
    pub fn step(&self) -> &str {
        match self {
            StepOutcome::Deployed { step, .. } | StepOutcome::Configured { step, .. } => step,
        }
    }

    pub fn transaction_hash(&self) -> B256 {
        match self {
            StepOutcome::Deployed {
                transaction_hash, ..
            }
            | StepOutcome::Configured {
                transaction_hash, ..
            } => *transaction_hash,
        }
    }
}

/// State of one end-to-end deployment attempt.
///
/// The run owns its registry. On failure the registry still holds every
/// contract confirmed before the failing step.
#[derive(Debug)]
pub struct OrchestrationRun {
    target: String,
    status: RunStatus,
    registry: Registry,
    outcomes: Vec<StepOutcome>,
    failure: Option<StepFailure>,
}

impl OrchestrationRun {
    fn start(plan: &DeploymentPlan) -> Self {
        Self {
            target: plan.target().to_string(),
            status: RunStatus::InProgress,
            registry: Registry::new(),
            outcomes: Vec::new(),
            failure: None,
        }
    }

    fn fail(&mut self, step: &DeploymentStep, source: DeployError) {
        tracing::error!(
            step = %step.name(),
            kind = %step.kind(),
            collaborator = source.collaborator(),
            error = %crate::error::error_chain(&source),
            "Deployment step failed, aborting run"
        );

        self.status = RunStatus::Failed;
        self.failure = Some(StepFailure {
            step: step.name().to_string(),
            kind: step.kind(),
            source,
        });
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn outcomes(&self) -> &[StepOutcome] {
        &self.outcomes
    }

    pub fn failure(&self) -> Option<&StepFailure> {
        self.failure.as_ref()
    }

    /// Configuration calls made against the contract registered under `key`.
    pub fn configurations_of<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a StepOutcome> {
        self.outcomes.iter().filter(move |outcome| {
            matches!(outcome, StepOutcome::Configured { registry_key, .. } if registry_key == key)
        })
    }

    /// The completed registry, or the failure that ended the run.
    pub fn into_result(self) -> Result<Registry, StepFailure> {
        match self.failure {
            Some(failure) => Err(failure),
            None => Ok(self.registry),
        }
    }
}

/// Runs deployment plans against an injected chain client.
#[derive(Debug)]
pub struct Orchestrator<C, L> {
    chain: C,
    artifacts: L,
    base_options: TxOptions,
}

impl<C, L> Orchestrator<C, L>
where
    C: ChainClient,
    L: ArtifactLoader,
{
    /// `base_options` apply to every step that does not override them.
    pub fn new(chain: C, artifacts: L, base_options: TxOptions) -> Self {
        Self {
            chain,
            artifacts,
            base_options,
        }
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn base_options(&self) -> &TxOptions {
        &self.base_options
    }

    /// Execute every step of `plan` in order.
    ///
    /// Never returns early with an error: the returned run carries either the
    /// completed registry or the failing step together with the partial
    /// registry.
    pub async fn run(&self, plan: &DeploymentPlan) -> OrchestrationRun {
        let mut run = OrchestrationRun::start(plan);

        tracing::info!(
            plan = %plan.target(),
            steps = plan.len(),
            sender = %self.base_options.from,
            gas_limit = self.base_options.gas_limit,
            "Deployment started"
        );

        let artifacts = match self.preflight(plan) {
            Ok(artifacts) => artifacts,
            Err((step, error)) => {
                run.fail(step, error.into());
                return run;
            }
        };

        for (index, step) in plan.steps().iter().enumerate() {
            tracing::info!(
                step = %step.name(),
                kind = %step.kind(),
                position = index + 1,
                total = plan.len(),
                "Starting step"
            );

            match self.execute_step(step, &artifacts, &mut run.registry).await {
                Ok(outcome) => {
                    tracing::info!(
                        step = %step.name(),
                        tx_hash = %outcome.transaction_hash(),
                        "Step completed"
                    );
                    run.outcomes.push(outcome);
                }
                Err(error) => {
                    run.fail(step, error);
                    return run;
                }
            }
        }

        run.status = RunStatus::Succeeded;
        tracing::info!(
            plan = %plan.target(),
            contracts = run.registry.len(),
            "Deployment finished"
        );
        run
    }

    /// Check every step's effective gas limit and load every artifact the
    /// plan deploys, before anything is submitted.
    fn preflight<'p>(
        &self,
        plan: &'p DeploymentPlan,
    ) -> Result<HashMap<String, Artifact>, (&'p DeploymentStep, ConfigurationError)> {
        let mut artifacts = HashMap::new();

        for step in plan.steps() {
            if step.overrides().apply(&self.base_options).gas_limit == 0 {
                return Err((
                    step,
                    ConfigurationError::ZeroGasLimit {
                        step: step.name().to_string(),
                    },
                ));
            }

            let StepAction::Deploy {
                contract,
                constructor_args,
                ..
            } = step.action()
            else {
                continue;
            };

            if !artifacts.contains_key(contract) {
                let artifact = self.artifacts.load(contract).map_err(|e| (step, e))?;
                artifacts.insert(contract.clone(), artifact);
            }

            let expected = artifacts[contract].constructor_inputs();
            if expected != constructor_args.len() {
                return Err((
                    step,
                    ConfigurationError::ConstructorArity {
                        step: step.name().to_string(),
                        contract: contract.clone(),
                        expected,
                        supplied: constructor_args.len(),
                    },
                ));
            }
        }

        tracing::debug!(artifacts = artifacts.len(), "All artifacts loaded");
        Ok(artifacts)
    }

    async fn execute_step(
        &self,
        step: &DeploymentStep,
        artifacts: &HashMap<String, Artifact>,
        registry: &mut Registry,
    ) -> Result<StepOutcome, DeployError> {
        let options = step.overrides().apply(&self.base_options);

        match step.action() {
            StepAction::Deploy {
                contract,
                registry_key,
                constructor_args,
                links,
                metadata,
            } => {
                registry.ensure_available(registry_key, step.name())?;

                let artifact = artifacts
                    .get(contract)
                    .ok_or_else(|| ConfigurationError::ArtifactNotFound {
                        contract: contract.clone(),
                        path: Default::default(),
                    })?;

                let library_addresses = links
                    .iter()
                    .map(|link| {
                        registry
                            .address_of(&link.library)
                            .map(|address| (link.placeholder.as_str(), address))
                            .ok_or_else(|| ConfigurationError::UnknownRegistryKey {
                                step: step.name().to_string(),
                                key: link.library.clone(),
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                let bytecode = artifact.link(&library_addresses)?;

                let args = constructor_args
                    .iter()
                    .map(|arg| arg.resolve(step.name(), options.from, registry))
                    .collect::<Result<Vec<_>, _>>()?;

                let extra_metadata = metadata
                    .iter()
                    .map(|(key, arg)| {
                        arg.resolve_json(step.name(), options.from, registry)
                            .map(|value| (key.clone(), value))
                    })
                    .collect::<Result<Map<_, _>, _>>()?;

                tracing::info!(
                    step = %step.name(),
                    contract = %contract,
                    gas_limit = options.gas_limit,
                    constructor_args = args.len(),
                    "Deploying contract"
                );

                let deployment = self.chain.deploy(&bytecode, &args, options).await?;
                let transaction_hash = deployment.receipt.transaction_hash;

                let handle = DeployHandle {
                    contract_name: contract.clone(),
                    abi: artifact.abi.clone(),
                    deployment,
                };
                let resolved = self.chain.resolve_deployed(&handle).await?;

                tracing::info!(
                    step = %step.name(),
                    registry_key = %registry_key,
                    address = %resolved.address,
                    "Assigning contract to the smart contract listing"
                );

                registry.insert(
                    DeployedContract::new(
                        contract.clone(),
                        registry_key.clone(),
                        resolved.address,
                        resolved.abi,
                        step.name(),
                        transaction_hash,
                    )
                    .with_metadata(extra_metadata),
                )?;

                Ok(StepOutcome::Deployed {
                    step: step.name().to_string(),
                    registry_key: registry_key.clone(),
                    address: resolved.address,
                    transaction_hash,
                })
            }
            StepAction::Configure {
                target,
                method,
                args,
            } => {
                let address = registry.address_of(target).ok_or_else(|| {
                    ConfigurationError::UnknownRegistryKey {
                        step: step.name().to_string(),
                        key: target.clone(),
                    }
                })?;

                let args = args
                    .iter()
                    .map(|arg| arg.resolve(step.name(), options.from, registry))
                    .collect::<Result<Vec<_>, _>>()?;

                tracing::info!(
                    step = %step.name(),
                    registry_key = %target,
                    address = %address,
                    method = %method,
                    gas_limit = options.gas_limit,
                    "Configuring deployed contract"
                );

                let receipt = self.chain.call(address, method, &args, options).await?;

                Ok(StepOutcome::Configured {
                    step: step.name().to_string(),
                    registry_key: target.clone(),
                    method: method.clone(),
                    transaction_hash: receipt.transaction_hash,
                })
            }
        }
    }
}
