//! End-to-end orchestration tests against an in-memory chain.
//!
//! The mock chain hands out addresses 0xa1.., 0xa2.. in deployment order and
//! records every call it receives, so tests can assert exactly what reached
//! the chain.

use std::{collections::HashMap, sync::Mutex};

use alloy_core::{
    dyn_abi::DynSolValue,
    primitives::{Address, B256, Bytes},
};
use ethlance_deploy::{
    Arg, Artifact, ChainClient, ChainError, ConfigurationError, DeployError, DeployHandle,
    Deployment, DeploymentPlan, DeploymentRecord, DeploymentStep, Orchestrator, Receipt, Registry,
    RegistryFormat, RegistryWriter, ResolvedContract, RunStatus, StepKind, TxOptions,
    ethlance_plan,
};
use serde_json::{Value, json};
use tempfile::TempDir;

const SENDER: Address = Address::new([0xee; 20]);
const BASE_GAS: u64 = 4_000_000;

#[derive(Debug, Clone)]
enum ChainCall {
    Deploy {
        bytecode: Bytes,
        args: Vec<DynSolValue>,
        options: TxOptions,
    },
    Call {
        address: Address,
        method: String,
        args: Vec<DynSolValue>,
        options: TxOptions,
    },
    Resolve {
        contract: String,
    },
}

#[derive(Debug, Default)]
struct MockChain {
    calls: Mutex<Vec<ChainCall>>,
    /// Number of transactions submitted so far (deploys and calls).
    submitted: Mutex<u8>,
    /// Revert the n-th submitted transaction, counting from 1.
    revert_at: Option<u8>,
}

impl MockChain {
    fn reverting_at(n: u8) -> Self {
        Self {
            revert_at: Some(n),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<ChainCall> {
        self.calls.lock().unwrap().clone()
    }

    fn deploy_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, ChainCall::Deploy { .. }))
            .count()
    }

    /// Submit a transaction and return its hash, or the revert.
    fn submit(&self, call: ChainCall) -> Result<B256, ChainError> {
        self.calls.lock().unwrap().push(call);

        let mut submitted = self.submitted.lock().unwrap();
        *submitted += 1;
        let tx_hash = B256::repeat_byte(*submitted);

        if self.revert_at == Some(*submitted) {
            return Err(ChainError::Reverted { tx_hash });
        }
        Ok(tx_hash)
    }

    fn receipt(tx_hash: B256, contract_address: Option<Address>) -> Receipt {
        Receipt {
            transaction_hash: tx_hash,
            block_number: Some(1),
            gas_used: Some(21_000),
            contract_address,
        }
    }
}

impl ChainClient for MockChain {
    async fn deploy(
        &self,
        bytecode: &Bytes,
        constructor_args: &[DynSolValue],
        options: TxOptions,
    ) -> Result<Deployment, ChainError> {
        let tx_hash = self.submit(ChainCall::Deploy {
            bytecode: bytecode.clone(),
            args: constructor_args.to_vec(),
            options,
        })?;

        let address = Address::repeat_byte(0xa0 + self.deploy_count() as u8);
        Ok(Deployment {
            address,
            receipt: Self::receipt(tx_hash, Some(address)),
        })
    }

    async fn call(
        &self,
        address: Address,
        method: &str,
        args: &[DynSolValue],
        options: TxOptions,
    ) -> Result<Receipt, ChainError> {
        let tx_hash = self.submit(ChainCall::Call {
            address,
            method: method.to_string(),
            args: args.to_vec(),
            options,
        })?;
        Ok(Self::receipt(tx_hash, None))
    }

    async fn resolve_deployed(&self, handle: &DeployHandle) -> Result<ResolvedContract, ChainError> {
        self.calls.lock().unwrap().push(ChainCall::Resolve {
            contract: handle.contract_name.clone(),
        });
        Ok(ResolvedContract {
            address: handle.deployment.address,
            abi: handle.abi.clone(),
        })
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn options() -> TxOptions {
    TxOptions {
        gas_limit: BASE_GAS,
        from: SENDER,
    }
}

fn artifact(name: &str, abi: Value, bytecode: &str) -> (String, Artifact) {
    (
        name.to_string(),
        Artifact::new(name, abi, bytecode).unwrap(),
    )
}

fn ethlance_artifacts() -> HashMap<String, Artifact> {
    HashMap::from([
        artifact(
            "DSGuard",
            json!([{
                "type": "function",
                "name": "setAuthority",
                "inputs": [{"name": "authority_", "type": "address", "internalType": "contract DSAuthority"}],
                "outputs": [],
                "stateMutability": "nonpayable"
            }]),
            "0x608060405201",
        ),
        artifact(
            "TestToken",
            json!([{
                "type": "constructor",
                "inputs": [{"name": "owner", "type": "address", "internalType": "address"}],
                "stateMutability": "nonpayable"
            }]),
            "0x608060405202",
        ),
        artifact("Ethlance", json!([]), "0x608060405203"),
        artifact("Job", json!([]), "0x608060405204"),
    ])
}

fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

#[tokio::test]
async fn test_ethlance_plan_end_to_end() {
    init_tracing();
    let orchestrator = Orchestrator::new(MockChain::default(), ethlance_artifacts(), options());

    let run = orchestrator.run(&ethlance_plan()).await;

    assert_eq!(run.status(), RunStatus::Succeeded);
    assert!(run.failure().is_none());

    let registry = run.registry();
    assert_eq!(
        registry.keys().collect::<Vec<_>>(),
        vec!["ds-guard", "token", "ethlance", "job"]
    );
    assert_eq!(registry.address_of("ds-guard"), Some(addr(0xa1)));
    assert_eq!(registry.address_of("token"), Some(addr(0xa2)));
    assert_eq!(registry.address_of("ethlance"), Some(addr(0xa3)));
    assert_eq!(registry.address_of("job"), Some(addr(0xa4)));
    assert_eq!(registry.get("token").unwrap().contract_name, "TestToken");

    // setAuthority is recorded against ds-guard, not as a registry entry.
    let configurations: Vec<_> = run.configurations_of("ds-guard").collect();
    assert_eq!(configurations.len(), 1);
    assert_eq!(configurations[0].step(), "DSGuard.setAuthority");
    assert_eq!(run.outcomes().len(), 5);

    let calls = orchestrator.chain().calls();
    assert_eq!(calls.len(), 9);

    match &calls[0] {
        ChainCall::Deploy { args, options, .. } => {
            assert!(args.is_empty());
            assert_eq!(options.gas_limit, BASE_GAS);
            assert_eq!(options.from, SENDER);
        }
        other => panic!("expected DSGuard deploy, got {other:?}"),
    }
    assert!(matches!(&calls[1], ChainCall::Resolve { contract } if contract == "DSGuard"));
    match &calls[2] {
        ChainCall::Call {
            address,
            method,
            args,
            options,
        } => {
            assert_eq!(*address, addr(0xa1));
            assert_eq!(method, "setAuthority(address)");
            assert_eq!(args, &vec![DynSolValue::Address(addr(0xa1))]);
            assert_eq!(options.gas_limit, 500_000);
        }
        other => panic!("expected setAuthority call, got {other:?}"),
    }
    match &calls[3] {
        ChainCall::Deploy { args, options, .. } => {
            assert_eq!(args, &vec![DynSolValue::Address(SENDER)]);
            assert_eq!(options.gas_limit, 3_000_000);
        }
        other => panic!("expected TestToken deploy, got {other:?}"),
    }
    for index in [5, 7] {
        match &calls[index] {
            ChainCall::Deploy { options, .. } => assert_eq!(options.gas_limit, 6_000_000),
            other => panic!("expected a heavy deploy, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_listing_round_trips_through_the_writer() {
    init_tracing();
    let orchestrator = Orchestrator::new(MockChain::default(), ethlance_artifacts(), options());
    let registry = orchestrator.run(&ethlance_plan()).await.into_result().unwrap();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("smart-contracts.json");
    RegistryWriter::new(&path, "dev", RegistryFormat::Json)
        .write(&registry)
        .unwrap();

    let document: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(document["environment"], json!("dev"));

    let contracts = document["contracts"].as_object().unwrap();
    assert_eq!(
        contracts.keys().collect::<Vec<_>>(),
        vec!["ds-guard", "token", "ethlance", "job"]
    );
    for contract in registry.iter() {
        let entry = &contracts[&contract.registry_key];
        assert_eq!(entry["name"], json!(contract.contract_name));
        assert_eq!(
            entry["address"].as_str().unwrap().parse::<Address>().unwrap(),
            contract.address
        );
        assert_eq!(entry["abi"], contract.abi);
    }
}

#[tokio::test]
async fn test_failed_configuration_keeps_partial_registry() {
    init_tracing();
    // The second transaction is DSGuard.setAuthority.
    let orchestrator = Orchestrator::new(MockChain::reverting_at(2), ethlance_artifacts(), options());

    let run = orchestrator.run(&ethlance_plan()).await;

    assert_eq!(run.status(), RunStatus::Failed);
    assert_eq!(run.registry().keys().collect::<Vec<_>>(), vec!["ds-guard"]);
    assert_eq!(run.registry().address_of("ds-guard"), Some(addr(0xa1)));

    let failure = run.failure().unwrap();
    assert_eq!(failure.step, "DSGuard.setAuthority");
    assert_eq!(failure.kind, StepKind::PostDeployConfigure);
    assert!(matches!(
        failure.source,
        DeployError::Chain(ChainError::Reverted { .. })
    ));
    assert_eq!(failure.source.collaborator(), "chain client");

    // Nothing after the failing step reached the chain.
    let calls = orchestrator.chain().calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(orchestrator.chain().deploy_count(), 1);

    let err = run.into_result().unwrap_err();
    assert!(err.to_string().contains("DSGuard.setAuthority"));
}

#[tokio::test]
async fn test_failed_deploy_stops_the_run() {
    init_tracing();
    // Transactions: DSGuard, setAuthority, TestToken (reverts).
    let orchestrator = Orchestrator::new(MockChain::reverting_at(3), ethlance_artifacts(), options());

    let run = orchestrator.run(&ethlance_plan()).await;

    let failure = run.failure().unwrap();
    assert_eq!(failure.step, "TestToken");
    assert_eq!(failure.kind, StepKind::DeployWithConstructorArgs);
    assert_eq!(run.registry().len(), 1);
    assert!(!run.registry().contains("token"));
    assert_eq!(orchestrator.chain().deploy_count(), 2);
}

#[tokio::test]
async fn test_missing_artifact_submits_nothing() {
    init_tracing();
    let mut artifacts = ethlance_artifacts();
    artifacts.remove("Job");
    let orchestrator = Orchestrator::new(MockChain::default(), artifacts, options());

    let run = orchestrator.run(&ethlance_plan()).await;

    let failure = run.failure().unwrap();
    assert_eq!(failure.step, "Job");
    assert_eq!(failure.source.collaborator(), "artifact loader");
    assert!(matches!(
        &failure.source,
        DeployError::Configuration(ConfigurationError::ArtifactNotFound { contract, .. }) if contract == "Job"
    ));
    assert!(run.registry().is_empty());
    assert!(orchestrator.chain().calls().is_empty());
}

#[tokio::test]
async fn test_constructor_arity_is_checked_before_submission() {
    init_tracing();
    let plan = DeploymentPlan::builder("token-only")
        .then(DeploymentStep::deploy("Job", "Job", "job"))
        .then(DeploymentStep::deploy("TestToken", "TestToken", "token"))
        .build()
        .unwrap();
    let orchestrator = Orchestrator::new(MockChain::default(), ethlance_artifacts(), options());

    let run = orchestrator.run(&plan).await;

    match &run.failure().unwrap().source {
        DeployError::Configuration(ConfigurationError::ConstructorArity {
            step,
            expected,
            supplied,
            ..
        }) => {
            assert_eq!(step, "TestToken");
            assert_eq!(*expected, 1);
            assert_eq!(*supplied, 0);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(orchestrator.chain().calls().is_empty());
}

#[tokio::test]
async fn test_zero_base_gas_limit_submits_nothing() {
    init_tracing();
    let options = TxOptions {
        gas_limit: 0,
        from: SENDER,
    };
    let orchestrator = Orchestrator::new(MockChain::default(), ethlance_artifacts(), options);

    let run = orchestrator.run(&ethlance_plan()).await;

    let failure = run.failure().unwrap();
    assert_eq!(failure.step, "DSGuard");
    assert!(matches!(
        &failure.source,
        DeployError::Configuration(ConfigurationError::ZeroGasLimit { step }) if step == "DSGuard"
    ));
    assert!(run.registry().is_empty());
    assert!(orchestrator.chain().calls().is_empty());
}

#[test]
fn test_duplicate_registry_key_names_both_steps() {
    let err = DeploymentPlan::builder("duplicate")
        .then(DeploymentStep::deploy("Job", "Job", "job"))
        .then(DeploymentStep::deploy("JobAgain", "Job", "job"))
        .build()
        .unwrap_err();

    match err {
        ConfigurationError::DuplicateRegistryKey {
            key,
            first_step,
            second_step,
        } => {
            assert_eq!(key, "job");
            assert_eq!(first_step, "Job");
            assert_eq!(second_step, "JobAgain");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_step_overrides_and_metadata() {
    init_tracing();
    let operator = addr(0x0b);
    let plan = DeploymentPlan::builder("token-with-owner")
        .then(DeploymentStep::deploy("DSGuard", "DSGuard", "ds-guard"))
        .then(
            DeploymentStep::deploy("TestToken", "TestToken", "token")
                .arg(Arg::Sender)
                .metadata("owner", Arg::Sender)
                .metadata("guard", Arg::AddressOf("ds-guard".to_string()))
                .sender(operator)
                .gas_limit(3_000_000),
        )
        .build()
        .unwrap();
    let orchestrator = Orchestrator::new(MockChain::default(), ethlance_artifacts(), options());

    let registry = orchestrator.run(&plan).await.into_result().unwrap();

    match &orchestrator.chain().calls()[2] {
        ChainCall::Deploy { args, options, .. } => {
            assert_eq!(options.from, operator);
            assert_eq!(options.gas_limit, 3_000_000);
            assert_eq!(args, &vec![DynSolValue::Address(operator)]);
        }
        other => panic!("expected TestToken deploy, got {other:?}"),
    }

    let token = registry.get("token").unwrap();
    assert_eq!(token.extra_metadata["owner"], json!(operator.to_checksum(None)));
    assert_eq!(token.extra_metadata["guard"], json!(addr(0xa1).to_checksum(None)));

    let document = registry.to_document();
    assert_eq!(
        document["token"].as_object().unwrap().keys().collect::<Vec<_>>(),
        vec!["name", "address", "abi", "abi-fingerprint", "owner", "guard"]
    );
}

#[tokio::test]
async fn test_library_placeholder_is_linked() {
    init_tracing();
    let placeholder = format!("__MathLib{}", "_".repeat(31));
    let artifacts = HashMap::from([
        artifact("MathLib", json!([]), "0x6080604052"),
        artifact(
            "Calculator",
            json!([]),
            &format!("0x73{placeholder}3014"),
        ),
    ]);
    let plan = DeploymentPlan::builder("linked")
        .then(DeploymentStep::deploy("MathLib", "MathLib", "math-lib"))
        .then(
            DeploymentStep::deploy("Calculator", "Calculator", "calculator")
                .link(placeholder.clone(), "math-lib"),
        )
        .build()
        .unwrap();
    let orchestrator = Orchestrator::new(MockChain::default(), artifacts, options());

    let run = orchestrator.run(&plan).await;
    assert_eq!(run.status(), RunStatus::Succeeded);

    match &orchestrator.chain().calls()[2] {
        ChainCall::Deploy { bytecode, .. } => {
            let mut expected = vec![0x73];
            expected.extend_from_slice(addr(0xa1).as_slice());
            expected.extend_from_slice(&[0x30, 0x14]);
            assert_eq!(bytecode.to_vec(), expected);
        }
        other => panic!("expected Calculator deploy, got {other:?}"),
    }
}

#[tokio::test]
async fn test_unlinked_library_fails_the_step() {
    init_tracing();
    let artifacts = HashMap::from([artifact(
        "Calculator",
        json!([]),
        &format!("0x73__MathLib{}3014", "_".repeat(31)),
    )]);
    let plan = DeploymentPlan::builder("unlinked")
        .then(DeploymentStep::deploy("Calculator", "Calculator", "calculator"))
        .build()
        .unwrap();
    let orchestrator = Orchestrator::new(MockChain::default(), artifacts, options());

    let run = orchestrator.run(&plan).await;

    assert!(matches!(
        run.failure().unwrap().source,
        DeployError::Configuration(ConfigurationError::UnlinkedBytecode { .. })
    ));
    assert!(orchestrator.chain().calls().is_empty());
}

#[tokio::test]
async fn test_record_recovers_the_listing() {
    init_tracing();
    let plan = ethlance_plan();
    let orchestrator = Orchestrator::new(MockChain::reverting_at(4), ethlance_artifacts(), options());
    let run = orchestrator.run(&plan).await;
    assert_eq!(run.failure().unwrap().step, "Ethlance");

    let dir = TempDir::new().unwrap();
    let record_path = dir.path().join("smart-contracts.record.json");
    DeploymentRecord::from_run(&run, &plan, "qa", SENDER)
        .save_to_file(&record_path)
        .unwrap();

    let record = DeploymentRecord::load_from_file(&record_path).unwrap();
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.failed_step.as_deref(), Some("Ethlance"));
    assert!(record.error.as_deref().unwrap().contains("reverted"));
    assert_eq!(record.plan_hash, plan.compute_hash());

    let recovered: Registry = record.registry().unwrap();
    assert_eq!(&recovered, run.registry());

    let listing = dir.path().join("smart_contracts_qa.cljs");
    RegistryWriter::new(&listing, &record.environment, RegistryFormat::Edn)
        .write(&recovered)
        .unwrap();

    let content = std::fs::read_to_string(&listing).unwrap();
    assert!(content.starts_with("(ns ethlance.shared.smart-contracts-qa)"));
    assert!(content.contains(":ds-guard {:name \"DSGuard\""));
    assert!(content.contains(":token {:name \"TestToken\""));
    assert!(!content.contains(":ethlance"));
}
