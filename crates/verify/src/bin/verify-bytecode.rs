//! Verifies a deployed release, and optionally a pending proposal, against build artifacts.

use alloy_primitives::Address;
use bytecode_verify::{
    artifacts::ArtifactRepository,
    config::{DEVELOPMENT_NETWORK, REGISTRY_ADDRESS},
    utils::{read_json_file, write_json_file, RetryPolicy},
    ContractKind, InitializationData, ProposalTx, ReleaseTag, Result, Retrying, RpcChain,
    VerificationEngine, VerifyConfig,
};
use clap::Parser;
use std::{path::PathBuf, process::ExitCode};
use tracing_subscriber::EnvFilter;
use yansi::Paint;

#[derive(Debug, Parser)]
#[command(name = "verify-bytecode", version)]
#[command(about = "Checks that on-chain contracts match locally compiled artifacts")]
struct Cli {
    /// Build output directories, earlier ones take precedence.
    #[arg(long = "build-artifacts", value_name = "DIR", num_args = 1.., required = true)]
    build_artifacts: Vec<PathBuf>,

    /// Contracts to verify, all compiled contracts if omitted.
    #[arg(long, value_name = "NAME", num_args = 1..)]
    contracts: Vec<String>,

    /// Proposal whose changes are verified as if executed.
    #[arg(long, value_name = "FILE")]
    proposal: Option<PathBuf>,

    /// Initialization arguments of the contracts the proposal initializes.
    #[arg(long = "initialize-data", value_name = "FILE")]
    initialize_data: Option<PathBuf>,

    #[arg(long, default_value = DEVELOPMENT_NETWORK)]
    network: String,

    #[arg(long = "rpc-url", env = "RPC_URL", default_value = "http://127.0.0.1:8545")]
    rpc_url: String,

    #[arg(long, default_value_t = REGISTRY_ADDRESS)]
    registry: Address,

    /// Where to write the library addresses found.
    #[arg(long = "librariesFile", value_name = "FILE")]
    libraries_file: Option<PathBuf>,

    /// Release branch or tag, `core-contracts.v<N>`, used to select ignored contracts.
    #[arg(long)]
    branch: Option<String>,

    /// Retries of failed RPC requests.
    #[arg(long = "max-retries", default_value_t = RetryPolicy::default().max_retries)]
    max_retries: u32,

    #[arg(long)]
    debug: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(%err, "verification failed");
            eprintln!("{} {err}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let release = ReleaseTag::parse_opt(cli.branch.as_deref())?;
    let artifacts = ArtifactRepository::load(&cli.build_artifacts)?;

    let proposal: Vec<ProposalTx> = match &cli.proposal {
        Some(path) => read_json_file(path)?,
        None => Vec::new(),
    };
    let initialization: InitializationData = match &cli.initialize_data {
        Some(path) => read_json_file(path)?,
        None => InitializationData::default(),
    };

    let retry = RetryPolicy { max_retries: cli.max_retries, ..Default::default() };
    let config = VerifyConfig::default()
        .network(cli.network)
        .registry(cli.registry)
        .release_version(release.map(|tag| tag.version))
        .retry(retry);
    let chain = Retrying::new(RpcChain::new(cli.rpc_url, config.registry)?, config.retry);

    let contracts: Vec<String> = if cli.contracts.is_empty() {
        artifacts.contract_names().into_iter().collect()
    } else {
        cli.contracts
    };

    let engine = VerificationEngine::new(&artifacts, chain, config);
    let report = engine.verify(&contracts, &proposal, &initialization)?;

    for contract in &report.verified {
        let kind = match contract.kind {
            ContractKind::Library => contract.kind.cyan(),
            _ => contract.kind.green(),
        };
        println!(
            "{} {kind} {} matches (deployed at {})",
            "✓".green(),
            contract.name.bold(),
            contract.address
        );
    }
    for skipped in &report.skipped {
        println!("{} {skipped} is not in the registry, skipped", "-".yellow());
    }

    if let Some(path) = &cli.libraries_file {
        write_json_file(&report.libraries, path)?;
        println!("Library addresses written to {}", path.display());
    }
    println!("{}", "Success, no bytecode mismatches found!".green().bold());
    Ok(())
}
