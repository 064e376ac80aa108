//! Build artifacts of solc/forge and the bytecode operations verification needs on them.

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

#[macro_use]
extern crate tracing;

pub mod artifact;
pub use artifact::{contract_name, Artifact, ArtifactMetadata, ArtifactSet, CompilerInfo};

pub mod bytecode;
pub use bytecode::{
    find_placeholders, library_hash, library_placeholder, strip_library_prefix, Bytecode,
    BytecodeObject, LibraryPrefixError, LinkMismatch, LinkReferences, Offsets, PLACEHOLDER_LEN,
    PUSH20,
};

pub mod metadata;
pub use metadata::{strip_metadata, MetadataRule, MetadataStripper};

mod repository;
pub use repository::ArtifactRepository;
