//! ethlance-deploy - Contract deployment orchestration for Ethlance.
//!
//! This crate executes a static deployment plan against an Ethereum node,
//! step by step, and persists the resulting smart contract listing for the
//! application to consume.

mod error;
pub use error::{ChainError, ConfigurationError, DeployError, StepFailure, error_chain};

pub mod artifact;
pub use artifact::{Artifact, ArtifactLoader, FsArtifactLoader};

pub mod chain;
pub use chain::{
    ChainClient, DeployHandle, Deployment, JsonRpcChainClient, Receipt, ResolvedContract,
    TxOptions,
};

pub mod plan;
pub use plan::{
    Arg, DeploymentPlan, DeploymentPlanBuilder, DeploymentStep, Link, StepAction, StepKind,
    TxOverrides, ethlance_plan, plan_for_target,
};

pub mod registry;
pub use registry::{
    DeployedContract, EdnTemplate, JsonTemplate, Registry, RegistryEntry, RegistryFormat,
    RegistryTemplate, RegistryWriter, encode_contract,
};

mod orchestrator;
pub use orchestrator::{OrchestrationRun, Orchestrator, RunStatus, StepOutcome};

mod config;
pub use config::{CONFIG_FILENAME, DeployConfig, ENV_PREFIX};

mod record;
pub use record::DeploymentRecord;

mod rpc;
