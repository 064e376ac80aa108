use alloy_primitives::Address;
use std::{
    io,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub type Result<T, E = VerifyError> = std::result::Result<T, E>;

/// Various error types a verification run can abort with.
///
/// Every variant except [`VerifyError::Transport`] is a definitive result and must never be
/// retried.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// A proposal transaction is neither a proxy repoint nor a registry repoint.
    #[error("proposal contains invalid release transactions: {}", .0.join(", "))]
    InvalidProposal(Vec<String>),
    #[error(transparent)]
    InitializationMismatch(#[from] InitializationError),
    #[error("contract {0} not found in any artifact set")]
    ArtifactNotFound(String),
    #[error(
        "{contract}'s onchain and compiled bytecodes do not match (deployed at {address}, \
         onchain: {onchain_len} bytes, compiled: {compiled_len} bytes{})",
        first_difference.map(|at| format!(", first difference at byte {at}")).unwrap_or_default()
    )]
    BytecodeMismatch {
        contract: String,
        address: Address,
        onchain_len: usize,
        compiled_len: usize,
        first_difference: Option<usize>,
    },
    #[error("unresolved library placeholders in {contract}: {}", .placeholders.join(", "))]
    UnresolvedLinkPlaceholder { contract: String, placeholders: Vec<String> },
    #[error("proposed {contract}Proxy at {proxy} has impure storage")]
    StorageProofInvalid { contract: String, proxy: Address },
    #[error("mismatched addresses for library {library} at byte {position}: {existing} != {found}")]
    LibraryAddressConflict { library: String, position: usize, existing: Address, found: Address },
    #[error("library {contract}: {reason}")]
    InvalidLibraryPrefix { contract: String, reason: String },
    #[error("tag doesn't have the correct format: {0:?}")]
    InvalidReleaseTag(String),
    #[error("invalid artifact {}: {reason}", .path.display())]
    InvalidArtifact { path: PathBuf, reason: String },
    /// Network failure or an unavailable node while reading chain state.
    #[error("transport error: {0}")]
    Transport(String),
    /// The node answered the request with an error, e.g. a reverted call.
    #[error("{method}: {message} (code {code})")]
    Rpc { method: String, code: i64, message: String },
    #[error(transparent)]
    Io(#[from] VerifyIoError),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    Hex(#[from] alloy_primitives::hex::FromHexError),
    #[error("{0}")]
    Message(String),
}

impl VerifyError {
    pub fn io(err: io::Error, path: impl Into<PathBuf>) -> Self {
        VerifyIoError::new(err, path).into()
    }

    pub fn msg(msg: impl std::fmt::Display) -> Self {
        Self::Message(msg.to_string())
    }

    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    pub fn invalid_artifact(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::InvalidArtifact { path: path.into(), reason: reason.to_string() }
    }

    /// Whether retrying the failed operation could succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Failures of the two-way check between the initialization data file and the proposal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InitializationError {
    #[error("missing initialization data for {0}, not found in reference file")]
    Missing(String),
    #[error(
        "reference file has initialization data for {0}, but proposal does not specify \
         initialization (stale initialization data)"
    )]
    Stale(String),
    #[error("initialization data for {0} in proposal does not match reference file")]
    CalldataMismatch(String),
    #[error("initialize function not found in ABI for {0}")]
    MissingInitializer(String),
    #[error("failed to encode initialize call for {contract}: {reason}")]
    Encoding { contract: String, reason: String },
}

#[derive(Debug, Error)]
#[error("\"{}\": {io}", self.path.display())]
pub struct VerifyIoError {
    io: io::Error,
    path: PathBuf,
}

impl VerifyIoError {
    pub fn new(io: io::Error, path: impl Into<PathBuf>) -> Self {
        Self { io, path: path.into() }
    }

    /// The path at which the error occurred
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The underlying `io::Error`
    pub fn source(&self) -> &io::Error {
        &self.io
    }
}

impl From<VerifyIoError> for io::Error {
    fn from(err: VerifyIoError) -> Self {
        err.io
    }
}
