//! Statically declared deployment plans.
//!
//! A plan is an ordered list of [`DeploymentStep`]s. The declared order is the
//! execution order: the orchestrator never reorders steps, so the plan must
//! already satisfy every dependency. [`DeploymentPlanBuilder::build`] checks
//! that once, before anything touches the chain.
//!
//! # Example
//!
//! ```no_run
//! use ethlance_deploy::{Arg, DeploymentPlan, DeploymentStep};
//!
//! let plan = DeploymentPlan::builder("guarded-token")
//!     .then(DeploymentStep::deploy("DSGuard", "DSGuard", "ds-guard"))
//!     .then(
//!         DeploymentStep::configure("DSGuard.setAuthority", "ds-guard", "setAuthority(address)")
//!             .arg(Arg::AddressOf("ds-guard".to_string()))
//!             .gas_limit(500_000)
//!             .depends_on("DSGuard"),
//!     )
//!     .build()?;
//! # Ok::<(), ethlance_deploy::ConfigurationError>(())
//! ```

use std::collections::{HashMap, HashSet};

use alloy_core::{
    dyn_abi::DynSolValue,
    json_abi::Function,
    primitives::{Address, U256},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::{ConfigurationError, Registry, artifact::PLACEHOLDER_LEN, chain::TxOptions};

/// Gas bound for small configuration calls.
pub const CONFIGURE_GAS_LIMIT: u64 = 500_000;
/// Gas bound for the test token deployment.
pub const TOKEN_GAS_LIMIT: u64 = 3_000_000;
/// Gas bound for the heavy Ethlance contracts.
pub const HEAVY_GAS_LIMIT: u64 = 6_000_000;

/// Name of the built-in Ethlance deployment target.
pub const ETHLANCE_TARGET: &str = "ethlance";

/// A typed argument for a constructor, a configuration call or a metadata value.
///
/// Arguments are resolved right before the step runs, so they may refer to the
/// step's sender or to contracts deployed by earlier steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Arg {
    /// The address the step's transaction is sent from.
    Sender,
    /// The address of the contract registered under this registry key.
    AddressOf(String),
    Address(Address),
    Uint(U256),
    Bool(bool),
    String(String),
}

impl Arg {
    /// The registry key this argument refers to, if any.
    pub fn registry_reference(&self) -> Option<&str> {
        match self {
            Arg::AddressOf(key) => Some(key),
            _ => None,
        }
    }

    fn lookup(step: &str, key: &str, registry: &Registry) -> Result<Address, ConfigurationError> {
        registry
            .address_of(key)
            .ok_or_else(|| ConfigurationError::UnknownRegistryKey {
                step: step.to_string(),
                key: key.to_string(),
            })
    }

    /// Resolve into an ABI value.
    pub fn resolve(
        &self,
        step: &str,
        sender: Address,
        registry: &Registry,
    ) -> Result<DynSolValue, ConfigurationError> {
        Ok(match self {
            Arg::Sender => DynSolValue::Address(sender),
            Arg::AddressOf(key) => DynSolValue::Address(Self::lookup(step, key, registry)?),
            Arg::Address(address) => DynSolValue::Address(*address),
            Arg::Uint(value) => DynSolValue::Uint(*value, 256),
            Arg::Bool(value) => DynSolValue::Bool(*value),
            Arg::String(value) => DynSolValue::String(value.clone()),
        })
    }

    /// Resolve into a JSON value for registry metadata.
    ///
    /// Addresses are rendered checksummed, integers as decimal strings.
    pub fn resolve_json(
        &self,
        step: &str,
        sender: Address,
        registry: &Registry,
    ) -> Result<Value, ConfigurationError> {
        Ok(match self {
            Arg::Sender => Value::String(sender.to_checksum(None)),
            Arg::AddressOf(key) => {
                Value::String(Self::lookup(step, key, registry)?.to_checksum(None))
            }
            Arg::Address(address) => Value::String(address.to_checksum(None)),
            Arg::Uint(value) => Value::String(value.to_string()),
            Arg::Bool(value) => Value::Bool(*value),
            Arg::String(value) => Value::String(value.clone()),
        })
    }
}

/// Replace a library placeholder in the bytecode with the address of an
/// already deployed library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// The 40 hex character placeholder as it appears in the bytecode.
    pub placeholder: String,
    /// Registry key of the library contract.
    pub library: String,
}

/// Per-step overrides of the base transaction options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Address>,
}

impl TxOverrides {
    /// The effective options for a step.
    pub fn apply(&self, base: &TxOptions) -> TxOptions {
        TxOptions {
            gas_limit: self.gas_limit.unwrap_or(base.gas_limit),
            from: self.sender.unwrap_or(base.from),
        }
    }
}

/// What a step does on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepAction {
    /// Deploy a compiled artifact and register it.
    Deploy {
        contract: String,
        registry_key: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        constructor_args: Vec<Arg>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        links: Vec<Link>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        metadata: Vec<(String, Arg)>,
    },
    /// Call a method on a contract deployed by an earlier step.
    Configure {
        target: String,
        method: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<Arg>,
    },
}

/// The kind of a step, derived from its action.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    PlainDeploy,
    DeployWithConstructorArgs,
    PostDeployConfigure,
}

/// One unit of orchestrated work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentStep {
    name: String,
    action: StepAction,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    depends_on: Vec<String>,
    #[serde(default)]
    overrides: TxOverrides,
}

impl DeploymentStep {
    /// A step deploying `contract` and registering it under `registry_key`.
    pub fn deploy(
        name: impl Into<String>,
        contract: impl Into<String>,
        registry_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            action: StepAction::Deploy {
                contract: contract.into(),
                registry_key: registry_key.into(),
                constructor_args: Vec::new(),
                links: Vec::new(),
                metadata: Vec::new(),
            },
            depends_on: Vec::new(),
            overrides: TxOverrides::default(),
        }
    }

    /// A step calling `method` (a canonical signature such as
    /// `setAuthority(address)`) on the contract registered under `target`.
    pub fn configure(
        name: impl Into<String>,
        target: impl Into<String>,
        method: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            action: StepAction::Configure {
                target: target.into(),
                method: method.into(),
                args: Vec::new(),
            },
            depends_on: Vec::new(),
            overrides: TxOverrides::default(),
        }
    }

    /// Append a constructor argument (deploy) or call argument (configure).
    pub fn arg(mut self, arg: Arg) -> Self {
        match &mut self.action {
            StepAction::Deploy {
                constructor_args, ..
            } => constructor_args.push(arg),
            StepAction::Configure { args, .. } => args.push(arg),
        }
        self
    }

    /// Link a library placeholder to a previously deployed contract.
    ///
    /// Ignored on configuration steps.
    pub fn link(mut self, placeholder: impl Into<String>, library: impl Into<String>) -> Self {
        if let StepAction::Deploy { links, .. } = &mut self.action {
            links.push(Link {
                placeholder: placeholder.into(),
                library: library.into(),
            });
        }
        self
    }

    /// Attach an extra metadata field to the registry entry.
    ///
    /// Ignored on configuration steps.
    pub fn metadata(mut self, key: impl Into<String>, value: Arg) -> Self {
        if let StepAction::Deploy { metadata, .. } = &mut self.action {
            metadata.push((key.into(), value));
        }
        self
    }

    pub fn depends_on(mut self, step: impl Into<String>) -> Self {
        self.depends_on.push(step.into());
        self
    }

    pub fn gas_limit(mut self, gas_limit: u64) -> Self {
        self.overrides.gas_limit = Some(gas_limit);
        self
    }

    pub fn sender(mut self, sender: Address) -> Self {
        self.overrides.sender = Some(sender);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn action(&self) -> &StepAction {
        &self.action
    }

    pub fn dependencies(&self) -> &[String] {
        &self.depends_on
    }

    pub fn overrides(&self) -> &TxOverrides {
        &self.overrides
    }

    pub fn kind(&self) -> StepKind {
        match &self.action {
            StepAction::Deploy {
                constructor_args, ..
            } if constructor_args.is_empty() => StepKind::PlainDeploy,
            StepAction::Deploy { .. } => StepKind::DeployWithConstructorArgs,
            StepAction::Configure { .. } => StepKind::PostDeployConfigure,
        }
    }

    /// The registry key this step produces, for deploy steps.
    pub fn registry_key(&self) -> Option<&str> {
        match &self.action {
            StepAction::Deploy { registry_key, .. } => Some(registry_key),
            StepAction::Configure { .. } => None,
        }
    }

    /// The compiled contract this step deploys, for deploy steps.
    pub fn contract(&self) -> Option<&str> {
        match &self.action {
            StepAction::Deploy { contract, .. } => Some(contract),
            StepAction::Configure { .. } => None,
        }
    }

    /// Every registry key this step needs to exist before it runs.
    pub fn registry_references(&self) -> Vec<&str> {
        match &self.action {
            StepAction::Deploy {
                constructor_args,
                links,
                metadata,
                ..
            } => constructor_args
                .iter()
                .chain(metadata.iter().map(|(_, arg)| arg))
                .filter_map(Arg::registry_reference)
                .chain(links.iter().map(|link| link.library.as_str()))
                .collect(),
            StepAction::Configure { target, args, .. } => std::iter::once(target.as_str())
                .chain(args.iter().filter_map(Arg::registry_reference))
                .collect(),
        }
    }
}

/// Registry keys end up as map keys (and EDN keywords) in the persisted
/// listing, so they are restricted to a conservative identifier alphabet.
pub fn is_valid_registry_key(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// A validated, immutable, ordered list of steps for one deployment target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentPlan {
    target: String,
    steps: Vec<DeploymentStep>,
}

impl DeploymentPlan {
    pub fn builder(target: impl Into<String>) -> DeploymentPlanBuilder {
        DeploymentPlanBuilder {
            target: target.into(),
            steps: Vec::new(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn steps(&self) -> &[DeploymentStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Registry keys produced by the plan, in declaration order.
    pub fn registry_keys(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter_map(DeploymentStep::registry_key)
            .collect()
    }

    /// SHA-256 of the plan's JSON form.
    ///
    /// Identical plans always hash identically, so the hash identifies which
    /// plan produced a recorded deployment.
    pub fn compute_hash(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Collects steps in declaration order and validates them into a
/// [`DeploymentPlan`].
#[derive(Debug, Clone)]
pub struct DeploymentPlanBuilder {
    target: String,
    steps: Vec<DeploymentStep>,
}

impl DeploymentPlanBuilder {
    /// Append the next step.
    pub fn then(mut self, step: DeploymentStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Validate the plan.
    ///
    /// Rejects empty plans, duplicate step names, dependencies on steps that
    /// are not declared earlier, invalid or duplicate registry keys, references
    /// to registry keys no earlier step produces, zero gas limits and
    /// malformed configuration calls.
    pub fn build(self) -> Result<DeploymentPlan, ConfigurationError> {
        if self.steps.is_empty() {
            return Err(ConfigurationError::EmptyPlan(self.target));
        }

        let mut seen_steps = HashSet::new();
        // registry key -> step that declared it
        let mut produced: HashMap<&str, &str> = HashMap::new();

        for step in &self.steps {
            let name = step.name();

            if step.overrides.gas_limit == Some(0) {
                return Err(ConfigurationError::ZeroGasLimit {
                    step: name.to_string(),
                });
            }

            for dependency in step.dependencies() {
                if !seen_steps.contains(dependency.as_str()) {
                    return Err(ConfigurationError::UnknownDependency {
                        step: name.to_string(),
                        dependency: dependency.clone(),
                    });
                }
            }

            if let StepAction::Deploy { links, .. } = &step.action {
                for link in links {
                    let placeholder = link.placeholder.trim_start_matches("0x");
                    if placeholder.len() != PLACEHOLDER_LEN {
                        return Err(ConfigurationError::InvalidLinkPlaceholder {
                            step: name.to_string(),
                            placeholder: link.placeholder.clone(),
                            length: placeholder.len(),
                        });
                    }
                }
            }

            for key in step.registry_references() {
                if !produced.contains_key(key) {
                    return Err(ConfigurationError::UnknownRegistryKey {
                        step: name.to_string(),
                        key: key.to_string(),
                    });
                }
            }

            if let StepAction::Configure { method, args, .. } = &step.action {
                validate_method(name, method, args.len())?;
            }

            if let Some(key) = step.registry_key() {
                if !is_valid_registry_key(key) {
                    return Err(ConfigurationError::InvalidRegistryKey {
                        step: name.to_string(),
                        key: key.to_string(),
                    });
                }
                if let Some(first_step) = produced.insert(key, name) {
                    return Err(ConfigurationError::DuplicateRegistryKey {
                        key: key.to_string(),
                        first_step: first_step.to_string(),
                        second_step: name.to_string(),
                    });
                }
            }

            if !seen_steps.insert(name) {
                return Err(ConfigurationError::DuplicateStepName(name.to_string()));
            }
        }

        Ok(DeploymentPlan {
            target: self.target,
            steps: self.steps,
        })
    }
}

fn validate_method(step: &str, signature: &str, supplied: usize) -> Result<(), ConfigurationError> {
    let invalid = |reason: String| ConfigurationError::InvalidMethodSignature {
        step: step.to_string(),
        signature: signature.to_string(),
        reason,
    };

    let function = Function::parse(signature).map_err(|e| invalid(e.to_string()))?;
    if function.inputs.len() != supplied {
        return Err(invalid(format!(
            "expects {} argument(s), {} supplied",
            function.inputs.len(),
            supplied
        )));
    }
    Ok(())
}

/// The Ethlance deployment: DSGuard (with its authority set to itself),
/// TestToken owned by the sender, then the Ethlance and Job contracts.
pub fn ethlance_plan() -> DeploymentPlan {
    DeploymentPlan::builder(ETHLANCE_TARGET)
        .then(DeploymentStep::deploy("DSGuard", "DSGuard", "ds-guard"))
        .then(
            DeploymentStep::configure("DSGuard.setAuthority", "ds-guard", "setAuthority(address)")
                .arg(Arg::AddressOf("ds-guard".to_string()))
                .gas_limit(CONFIGURE_GAS_LIMIT)
                .depends_on("DSGuard"),
        )
        .then(
            DeploymentStep::deploy("TestToken", "TestToken", "token")
                .arg(Arg::Sender)
                .gas_limit(TOKEN_GAS_LIMIT),
        )
        .then(DeploymentStep::deploy("Ethlance", "Ethlance", "ethlance").gas_limit(HEAVY_GAS_LIMIT))
        .then(DeploymentStep::deploy("Job", "Job", "job").gas_limit(HEAVY_GAS_LIMIT))
        .build()
        .expect("built-in ethlance plan should always be valid")
}

/// Look up the hard-coded plan for a deployment target.
pub fn plan_for_target(target: &str) -> Result<DeploymentPlan, ConfigurationError> {
    match target {
        ETHLANCE_TARGET => Ok(ethlance_plan()),
        other => Err(ConfigurationError::UnknownTarget(other.to_string())),
    }
}
