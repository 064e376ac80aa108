//! Verifies that the contracts of a release deployed on chain, including the changes a pending
//! governance proposal makes, match locally compiled artifacts byte for byte.
//!
//! The entry point is [`VerificationEngine::verify`], which walks the requested contracts and
//! every library reachable from them, linking the compiled code with the library addresses found
//! on chain and comparing both with their metadata trailers removed.

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

pub mod chain;
pub use chain::{ChainView, MemoryChain, Retrying, RpcChain};

pub mod config;
pub use config::VerifyConfig;

pub mod engine;
pub use engine::{
    ContractKind, ContractOutcome, VerificationContext, VerificationEngine, VerificationReport,
    VerifiedContract,
};

pub mod library;
pub use library::{LibraryAddressTable, LibraryPositions};

pub mod linker;

pub mod proposal;
pub use proposal::{InitializationData, Proposal, ProposalTx};

pub mod release;
pub use release::{ignored_contracts, ReleaseTag};

pub use bytecode_verify_artifacts_solc as artifacts;
pub use bytecode_verify_core::{error, utils};
pub use error::{Result, VerifyError};
