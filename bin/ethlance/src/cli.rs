use std::path::PathBuf;

use alloy_core::primitives::Address;
use clap::{Args, Parser, Subcommand};
use ethlance_deploy::{DeployConfig, RegistryFormat};
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[command(name = "ethlance")]
#[command(
    author,
    version,
    about = "Deploy the Ethlance smart contracts and publish their listing"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "ETHLANCE_VERBOSITY", default_value_t = LevelFilter::INFO, global = true)]
    pub verbosity: LevelFilter,

    /// Path to an Ethlance.toml configuration file, or a directory holding one.
    ///
    /// If not provided, ./Ethlance.toml is used when it exists.
    #[arg(long, alias = "conf", env = "ETHLANCE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Values overriding the configuration file and environment.
    #[clap(flatten)]
    pub overrides: ConfigOverrides,

    /// Defaults to `deploy`.
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the deployment plan and write the smart contract listing.
    Deploy,

    /// Rewrite the smart contract listing from a saved deployment record.
    ///
    /// Use `--record` to point at the record of the run to recover.
    WriteRegistry,

    /// Print the effective configuration.
    Config {
        /// Also save it as TOML to this path.
        #[arg(long)]
        write: Option<PathBuf>,
    },

    /// Print the steps of the selected deployment plan.
    Plan,
}

/// Explicit overrides. Each one, when given, wins over every other source.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigOverrides {
    /// The JSON-RPC endpoint of the node.
    #[arg(long, alias = "rpc", global = true)]
    pub rpc_url: Option<url::Url>,

    /// The environment tag of the listing (dev, qa, prod).
    #[arg(short, long, alias = "env", global = true)]
    pub environment: Option<String>,

    /// The deployment plan to run.
    #[arg(long, global = true)]
    pub target: Option<String>,

    /// The directory holding the compiled contract artifacts.
    #[arg(long, global = true)]
    pub build_dir: Option<PathBuf>,

    /// Where to write the smart contract listing.
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    /// The listing format (json or edn).
    #[arg(long, global = true)]
    pub format: Option<RegistryFormat>,

    /// The sending account. Defaults to the node's first account.
    #[arg(long, alias = "from", global = true)]
    pub sender: Option<Address>,

    /// The gas limit of steps that do not set their own.
    #[arg(long, global = true)]
    pub gas_limit: Option<u64>,

    /// How long to wait for a transaction receipt, in seconds.
    #[arg(long, global = true)]
    pub receipt_timeout_secs: Option<u64>,

    /// Interval between receipt polls, in milliseconds.
    #[arg(long, global = true)]
    pub poll_interval_ms: Option<u64>,

    /// The deployment record path.
    ///
    /// If not provided, the record sits next to the listing: <output>.record.json
    #[arg(long, global = true)]
    pub record: Option<PathBuf>,
}

impl ConfigOverrides {
    pub fn apply(self, config: &mut DeployConfig) {
        if let Some(rpc_url) = self.rpc_url {
            config.rpc_url = rpc_url;
        }
        if let Some(environment) = self.environment {
            config.environment = environment;
        }
        if let Some(target) = self.target {
            config.target = target;
        }
        if let Some(build_dir) = self.build_dir {
            config.build_dir = build_dir;
        }
        if let Some(output) = self.output {
            config.output = output;
        }
        if let Some(format) = self.format {
            config.format = format;
        }
        if self.sender.is_some() {
            config.sender = self.sender;
        }
        if let Some(gas_limit) = self.gas_limit {
            config.gas_limit = gas_limit;
        }
        if let Some(secs) = self.receipt_timeout_secs {
            config.receipt_timeout_secs = secs;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval_ms = ms;
        }
        if self.record.is_some() {
            config.record = self.record;
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_overrides_after_subcommand() {
        let cli = Cli::try_parse_from([
            "ethlance",
            "write-registry",
            "--record",
            "run.record.json",
            "--format",
            "edn",
            "-e",
            "qa",
        ])
        .unwrap();

        assert_eq!(cli.command, Some(Command::WriteRegistry));

        let mut config = DeployConfig::default();
        cli.overrides.apply(&mut config);
        assert_eq!(config.record_path(), PathBuf::from("run.record.json"));
        assert_eq!(config.format, RegistryFormat::Edn);
        assert_eq!(config.environment, "qa");
        assert_eq!(config.gas_limit, 4_000_000);
    }

    #[test]
    fn test_no_subcommand_and_sender() {
        let cli = Cli::try_parse_from([
            "ethlance",
            "--sender",
            "0x5FbDB2315678afecb367f032d93F642f64180aa3",
        ])
        .unwrap();

        assert_eq!(cli.command, None);
        assert!(cli.overrides.sender.is_some());
    }
}
