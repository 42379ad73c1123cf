//! Error taxonomy for a deployment run.
//!
//! Every failure falls in one of three classes: configuration problems found
//! before (or without) talking to the chain, chain failures, and I/O failures
//! while persisting the registry. None of them is retried.

use std::{path::PathBuf, time::Duration};

use alloy_core::primitives::{Address, B256};

use crate::plan::StepKind;

/// A problem with the plan, an artifact or an argument. Detected without any
/// chain interaction.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("artifact for contract `{contract}` not found at {}", .path.display())]
    ArtifactNotFound { contract: String, path: PathBuf },

    #[error("artifact for contract `{contract}` is malformed: {reason}")]
    MalformedArtifact { contract: String, reason: String },

    #[error("bytecode of `{contract}` still contains unlinked library placeholder `{placeholder}`")]
    UnlinkedBytecode { contract: String, placeholder: String },

    #[error("link placeholder `{placeholder}` does not occur in the bytecode of `{contract}`")]
    UnknownPlaceholder { contract: String, placeholder: String },

    #[error("link placeholder `{placeholder}` in the bytecode of `{contract}` {reason}")]
    InvalidPlaceholder {
        contract: String,
        placeholder: String,
        reason: String,
    },

    #[error(
        "step `{step}` links placeholder `{placeholder}`, which is {length} characters long instead of 40"
    )]
    InvalidLinkPlaceholder {
        step: String,
        placeholder: String,
        length: usize,
    },

    #[error(
        "constructor of `{contract}` takes {expected} argument(s) but step `{step}` supplies {supplied}"
    )]
    ConstructorArity {
        step: String,
        contract: String,
        expected: usize,
        supplied: usize,
    },

    #[error("registry key `{key}` is declared by both step `{first_step}` and step `{second_step}`")]
    DuplicateRegistryKey {
        key: String,
        first_step: String,
        second_step: String,
    },

    #[error("registry key `{key}` of step `{step}` is not a valid identifier")]
    InvalidRegistryKey { step: String, key: String },

    #[error("step name `{0}` is declared more than once")]
    DuplicateStepName(String),

    #[error("step `{step}` depends on `{dependency}`, which is not declared before it")]
    UnknownDependency { step: String, dependency: String },

    #[error("step `{step}` references registry key `{key}`, which no earlier deploy step produces")]
    UnknownRegistryKey { step: String, key: String },

    #[error("step `{step}` has an invalid method signature `{signature}`: {reason}")]
    InvalidMethodSignature {
        step: String,
        signature: String,
        reason: String,
    },

    #[error("step `{step}` declares a zero gas limit")]
    ZeroGasLimit { step: String },

    #[error("deployment plan `{0}` has no steps")]
    EmptyPlan(String),

    #[error("unknown deployment target `{0}`")]
    UnknownTarget(String),
}

/// A failure reported by the chain client for a submitted transaction.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("transaction rejected by the node: {0}")]
    Rejected(String),

    #[error("transaction {tx_hash} reverted")]
    Reverted { tx_hash: B256 },

    #[error("timed out after {waited:?} waiting for the receipt of {tx_hash}")]
    Timeout { tx_hash: B256, waited: Duration },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("could not encode call data: {0}")]
    Encoding(String),

    #[error("deploy transaction {tx_hash} produced no contract address")]
    MissingContractAddress { tx_hash: B256 },

    #[error("no contract code found at {address}")]
    NoCode { address: Address },
}

/// Any error that aborts a deployment run.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("configuration error")]
    Configuration(#[from] ConfigurationError),

    #[error("chain error")]
    Chain(#[from] ChainError),

    #[error("failed to write registry to {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to render registry: {0}")]
    Render(String),
}

impl DeployError {
    /// The collaborator the failure originated from.
    pub fn collaborator(&self) -> &'static str {
        match self {
            DeployError::Configuration(ConfigurationError::ArtifactNotFound { .. })
            | DeployError::Configuration(ConfigurationError::MalformedArtifact { .. }) => {
                "artifact loader"
            }
            DeployError::Configuration(_) => "deployment plan",
            DeployError::Chain(_) => "chain client",
            DeployError::Io { .. } | DeployError::Render(_) => "registry writer",
        }
    }
}

/// The error surfaced by a failed run: which step failed and why.
#[derive(Debug, thiserror::Error)]
#[error("step `{step}` ({kind}) failed in the {}", .source.collaborator())]
pub struct StepFailure {
    pub step: String,
    pub kind: StepKind,
    #[source]
    pub source: DeployError,
}

/// Render an error and all of its sources on one line.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
