//! ethlance deploys the Ethlance smart contracts and publishes the listing the
//! application reads their addresses and ABIs from.

mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};

use cli::{Cli, Command};
use ethlance_deploy::{
    DeployConfig, DeploymentPlan, DeploymentRecord, FsArtifactLoader, JsonRpcChainClient,
    Orchestrator, Registry, RegistryWriter, StepAction, StepFailure, TxOptions, plan_for_target,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger. Stdout is left to the `config` and `plan` output.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .with_writer(std::io::stderr)
        .init();

    let mut config = DeployConfig::load(cli.config.as_deref())?;
    cli.overrides.apply(&mut config);
    config
        .validate()
        .context("Invalid deployment configuration")?;

    match cli.command.unwrap_or(Command::Deploy) {
        Command::Deploy => deploy(&config).await,
        Command::WriteRegistry => write_registry(&config),
        Command::Config { write } => show_config(&config, write.as_deref()),
        Command::Plan => show_plan(&config),
    }
}

async fn deploy(config: &DeployConfig) -> Result<()> {
    let plan = plan_for_target(&config.target)?;

    let chain = JsonRpcChainClient::new(&config.rpc_url)?
        .with_receipt_timeout(config.receipt_timeout())
        .with_poll_interval(config.poll_interval());

    let sender = match config.sender {
        Some(sender) => sender,
        None => chain
            .accounts()
            .await
            .context("Failed to query the node's accounts")?
            .first()
            .copied()
            .context("The node manages no accounts, set a sender explicitly")?,
    };

    tracing::info!(
        rpc_url = %config.rpc_url,
        environment = %config.environment,
        build_dir = %config.build_dir.display(),
        "Deploying smart contracts..."
    );

    let orchestrator = Orchestrator::new(
        chain,
        FsArtifactLoader::new(&config.build_dir),
        TxOptions {
            gas_limit: config.gas_limit,
            from: sender,
        },
    );
    let run = orchestrator.run(&plan).await;

    // The record is saved whatever the outcome, before anything else can fail.
    let record_path = config.record_path();
    let saved = DeploymentRecord::from_run(&run, &plan, &config.environment, sender)
        .save_to_file(&record_path);
    if let Err(e) = &saved {
        tracing::error!(error = %format!("{e:#}"), "Failed to save the deployment record");
    }

    conclude_deploy(run.into_result(), saved, &record_path, |registry| {
        write_listing(config, registry)
    })
}

/// Combine the run outcome, the record save and the listing write into the
/// command's result.
///
/// Recovery instructions only point at the record when it was saved. A record
/// that could not be saved fails the command even when everything else
/// succeeded.
fn conclude_deploy(
    outcome: Result<Registry, StepFailure>,
    saved: Result<()>,
    record_path: &Path,
    write: impl FnOnce(&Registry) -> Result<()>,
) -> Result<()> {
    let registry = match (outcome, &saved) {
        (Ok(registry), _) => registry,
        (Err(failure), Ok(())) => {
            return Err(failure).context(format!(
                "Deployment aborted, contracts confirmed so far are listed in {}",
                record_path.display()
            ));
        }
        (Err(failure), Err(record_error)) => {
            return Err(failure).context(format!(
                "Deployment aborted, and the deployment record could not be saved to {} ({record_error:#}), \
                 contracts confirmed so far are only listed in the log above",
                record_path.display()
            ));
        }
    };

    match (write(&registry), saved) {
        (Ok(()), Ok(())) => Ok(()),
        (Ok(()), Err(record_error)) => Err(record_error.context(format!(
            "Smart contract listing written, but the deployment record could not be saved to {}",
            record_path.display()
        ))),
        (Err(write_error), Ok(())) => Err(write_error.context(format!(
            "Contracts are deployed but the listing was not written, recover with \
             `ethlance write-registry --record {}`",
            record_path.display()
        ))),
        (Err(write_error), Err(record_error)) => Err(write_error.context(format!(
            "Contracts are deployed but neither the listing nor the deployment record ({record_error:#}) \
             could be written, the deployed addresses are only listed in the log above"
        ))),
    }
}

fn write_registry(config: &DeployConfig) -> Result<()> {
    let record_path = config.record_path();
    let record = DeploymentRecord::load_from_file(&record_path)?;

    tracing::info!(
        path = %record_path.display(),
        target = %record.target,
        status = %record.status,
        recorded_at = record.recorded_at,
        "Loaded deployment record"
    );

    if let Some(step) = &record.failed_step {
        tracing::warn!(
            step = %step,
            "Record is from a failed run, the listing will only hold the contracts confirmed before it"
        );
    }

    write_listing(config, &record.registry()?)
}

fn write_listing(config: &DeployConfig, registry: &Registry) -> Result<()> {
    for contract in registry.iter() {
        tracing::info!(
            registry_key = %contract.registry_key,
            contract = %contract.contract_name,
            address = %contract.address,
            "Deployed contract"
        );
    }

    RegistryWriter::new(&config.output, &config.environment, config.format).write(registry)?;

    tracing::info!(path = %config.output.display(), "Smart contract listing written");
    Ok(())
}

fn show_config(config: &DeployConfig, write: Option<&Path>) -> Result<()> {
    let content =
        toml::to_string_pretty(config).context("Failed to serialize configuration to TOML")?;
    print!("{content}");

    if let Some(path) = write {
        config.save_to_file(path)?;
    }
    Ok(())
}

fn show_plan(config: &DeployConfig) -> Result<()> {
    let plan = plan_for_target(&config.target)?;
    println!("{}", plan_table(&plan, config.gas_limit));
    println!("plan hash: {}", plan.compute_hash());
    Ok(())
}

fn plan_table(plan: &DeploymentPlan, base_gas_limit: u64) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "#",
        "Step",
        "Kind",
        "Contract / Method",
        "Registry key",
        "Gas limit",
        "Depends on",
    ]);

    for (index, step) in plan.steps().iter().enumerate() {
        let (subject, key) = match step.action() {
            StepAction::Deploy {
                contract,
                registry_key,
                ..
            } => (contract.clone(), registry_key.clone()),
            StepAction::Configure { target, method, .. } => (method.clone(), target.clone()),
        };

        table.add_row(vec![
            (index + 1).to_string(),
            step.name().to_string(),
            step.kind().to_string(),
            subject,
            key,
            step.overrides()
                .gas_limit
                .unwrap_or(base_gas_limit)
                .to_string(),
            step.dependencies().join(", "),
        ]);
    }

    table
}
