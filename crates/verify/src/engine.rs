//! Depth first verification of contracts and the libraries they link against.

use crate::{
    chain::{verify_proxy_storage, ChainView},
    config::VerifyConfig,
    library::{LibraryAddressTable, LibraryPositions},
    linker::{compare, link_libraries, strip_library_prefixes, strip_metadata},
    proposal::{validate_initialization_data, InitializationData, Proposal, ProposalTx},
    release::ignored_contracts,
};
use alloy_primitives::Address;
use bytecode_verify_artifacts_solc::ArtifactRepository;
use bytecode_verify_core::{Result, VerifyError};
use serde::Serialize;
use std::{collections::BTreeSet, fmt};

/// Registry id of the governance contract that owns all proxies.
pub const GOVERNANCE: &str = "Governance";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractKind {
    Contract,
    Library,
    Proxy,
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Contract => "Contract",
            Self::Library => "Library",
            Self::Proxy => "Proxy",
        })
    }
}

/// A contract whose deployed code matched its artifact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerifiedContract {
    pub name: String,
    pub address: Address,
    pub kind: ContractKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContractOutcome<'a> {
    Verified(&'a VerifiedContract),
    /// Not in the registry and not introduced by the proposal, i.e. not deployed yet.
    Skipped,
}

/// What visiting a single contract found.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Visit {
    /// The contract matched, these are the libraries it links against.
    Verified { libraries: Vec<String> },
    Skipped,
}

/// Result of a successful run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub libraries: LibraryAddressTable,
    /// In the order they were verified.
    pub verified: Vec<VerifiedContract>,
    pub skipped: Vec<String>,
}

impl VerificationReport {
    pub fn outcome(&self, name: &str) -> Option<ContractOutcome<'_>> {
        if let Some(verified) =
            self.verified.iter().find(|c| c.name == name && c.kind != ContractKind::Proxy)
        {
            return Some(ContractOutcome::Verified(verified));
        }
        self.skipped.iter().any(|s| s == name).then_some(ContractOutcome::Skipped)
    }
}

/// State of a single run.
pub struct VerificationContext<'a, C> {
    pub artifacts: &'a ArtifactRepository,
    pub chain: &'a C,
    pub proposal: Proposal,
    pub config: &'a VerifyConfig,
    pub report: VerificationReport,
    governance: Option<Address>,
}

impl<'a, C: ChainView> VerificationContext<'a, C> {
    pub fn new(
        artifacts: &'a ArtifactRepository,
        chain: &'a C,
        proposal: Proposal,
        config: &'a VerifyConfig,
    ) -> Self {
        Self { artifacts, chain, proposal, config, report: Default::default(), governance: None }
    }

    pub fn libraries(&self) -> &LibraryAddressTable {
        &self.report.libraries
    }

    fn governance(&mut self) -> Result<Address> {
        if let Some(governance) = self.governance {
            return Ok(governance);
        }
        let governance = self.chain.read_registry(GOVERNANCE)?;
        // a zero owner would make an empty storage trie look pure
        if governance.is_zero() {
            return Err(VerifyError::msg(format!(
                "{GOVERNANCE} is not registered, can't check proxy ownership"
            )));
        }
        debug!(%governance, "resolved governance");
        self.governance = Some(governance);
        Ok(governance)
    }

    /// Verifies a single contract.
    #[instrument(level = "debug", skip(self))]
    pub fn visit(&mut self, contract: &str) -> Result<Visit> {
        if let Some(proxy) = self.proposal.proposed_proxy_address(contract) {
            self.verify_proxy(contract, proxy)?;
        }

        let artifact = self.artifacts.get(contract)?;
        let positions = LibraryPositions::for_artifact(artifact);
        let is_library = self.report.libraries.contains(contract);

        let address = if let Some(address) = self.proposal.proposed_implementation_address(contract)
        {
            address
        } else if let Some(address) = self.report.libraries.address(contract) {
            address
        } else {
            let proxy = match self.proposal.proposed_proxy_address(contract) {
                Some(proxy) => proxy,
                None => self.chain.read_registry(contract)?,
            };
            if proxy.is_zero() {
                info!(contract, "not in registry, skipping bytecode verification");
                if !self.report.skipped.iter().any(|s| s == contract) {
                    self.report.skipped.push(contract.to_string());
                }
                return Ok(Visit::Skipped);
            }
            self.chain.read_proxy_implementation(proxy)?
        };

        let onchain = self.chain.get_code(address)?;
        if onchain.is_empty() || onchain.len() < positions.end() {
            return Err(VerifyError::BytecodeMismatch {
                contract: contract.to_string(),
                address,
                onchain_len: onchain.len(),
                compiled_len: artifact.deployed_object().byte_len(),
                first_difference: None,
            });
        }
        self.report.libraries.collect(&onchain, &positions)?;

        let compiled =
            link_libraries(contract, artifact.deployed_object(), &positions, &self.report.libraries)?;
        let version = artifact.compiler_version();
        let mut compiled_code = strip_metadata(&compiled, version.as_ref());
        let mut onchain_code = strip_metadata(&onchain, version.as_ref());
        if is_library {
            (compiled_code, onchain_code) =
                strip_library_prefixes(contract, compiled_code, onchain_code, address)?;
        }
        compare(contract, address, onchain_code, compiled_code)?;

        let kind = if is_library { ContractKind::Library } else { ContractKind::Contract };
        info!(%kind, contract, %address, "bytecode matches");
        self.report.verified.push(VerifiedContract { name: contract.to_string(), address, kind });
        self.report.skipped.retain(|skipped| skipped != contract);
        Ok(Visit::Verified { libraries: positions.library_names().map(str::to_string).collect() })
    }

    /// Checks the proxy a registry repoint introduces.
    fn verify_proxy(&mut self, contract: &str, proxy: Address) -> Result<()> {
        if self.config.supports_storage_proofs() {
            let governance = self.governance()?;
            if !verify_proxy_storage(self.chain, proxy, governance)? {
                return Err(VerifyError::StorageProofInvalid { contract: contract.to_string(), proxy });
            }
        } else {
            debug!(network = %self.config.network, "storage proofs unsupported, skipping");
        }

        let name = format!("{contract}Proxy");
        let artifact = self.artifacts.get(&name)?;
        let compiled = link_libraries(
            &name,
            artifact.deployed_object(),
            &LibraryPositions::default(),
            &self.report.libraries,
        )?;
        let onchain = self.chain.get_code(proxy)?;
        let version = artifact.compiler_version();
        compare(
            &name,
            proxy,
            strip_metadata(&onchain, version.as_ref()),
            strip_metadata(&compiled, version.as_ref()),
        )?;

        info!(contract = %name, address = %proxy, "proxy matches");
        self.report.verified.push(VerifiedContract {
            name,
            address: proxy,
            kind: ContractKind::Proxy,
        });
        Ok(())
    }
}

/// Verifies a release: every requested contract, every library reachable from them and the
/// proxies the proposal introduces.
#[derive(Debug)]
pub struct VerificationEngine<'a, C> {
    artifacts: &'a ArtifactRepository,
    chain: C,
    config: VerifyConfig,
}

impl<'a, C: ChainView> VerificationEngine<'a, C> {
    pub fn new(artifacts: &'a ArtifactRepository, chain: C, config: VerifyConfig) -> Self {
        Self { artifacts, chain, config }
    }

    pub fn config(&self) -> &VerifyConfig {
        &self.config
    }

    /// The requested contracts that are actually verified, in order and without duplicates.
    ///
    /// Ignored contracts and contracts without an artifact are dropped.
    pub fn worklist<I>(&self, contracts: I) -> Vec<String>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let ignored = ignored_contracts(self.config.release_version);
        let mut seen = BTreeSet::new();
        let mut worklist = Vec::new();
        for contract in contracts {
            let contract = contract.as_ref();
            if ignored.contains(contract) {
                debug!(contract, "ignored for this release");
            } else if !self.artifacts.contains(contract) {
                debug!(contract, "not compiled, excluded");
            } else if seen.insert(contract.to_string()) {
                worklist.push(contract.to_string());
            }
        }
        worklist
    }

    /// Runs the verification.
    ///
    /// The proposal and initialization data are validated before anything is read from the
    /// chain. The first failure aborts the run.
    #[instrument(name = "verify", skip_all, fields(network = %self.config.network))]
    pub fn verify<I>(
        &self,
        contracts: I,
        proposal: &[ProposalTx],
        initialization: &InitializationData,
    ) -> Result<VerificationReport>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let proposal = Proposal::new(proposal)?;
        validate_initialization_data(&proposal, initialization, self.artifacts)?;

        let worklist = self.worklist(contracts);
        debug!(contracts = worklist.len(), "starting verification");

        let mut ctx = VerificationContext::new(self.artifacts, &self.chain, proposal, &self.config);
        let mut stack: Vec<String> = worklist.into_iter().rev().collect();
        let mut visited = BTreeSet::new();
        while let Some(contract) = stack.pop() {
            if !visited.insert(contract.clone()) {
                continue;
            }
            match ctx.visit(&contract)? {
                Visit::Verified { libraries } => {
                    stack.extend(libraries.into_iter().rev().filter(|lib| !visited.contains(lib)));
                }
                // may still turn out to be a library of a later contract
                Visit::Skipped => {
                    visited.remove(&contract);
                }
            }
        }

        let report = ctx.report;
        info!(
            verified = report.verified.len(),
            skipped = report.skipped.len(),
            libraries = report.libraries.len(),
            "verification succeeded"
        );
        Ok(report)
    }
}
