//! Linking compiled code and normalizing both sides of a comparison.

use crate::library::{LibraryAddressTable, LibraryPositions};
use alloy_primitives::{Address, Bytes};
use bytecode_verify_artifacts_solc::{
    strip_library_prefix, BytecodeObject, LibraryPrefixError, MetadataStripper,
};
use bytecode_verify_core::{utils::first_difference, Result, VerifyError};
use semver::Version;

/// Links every library of `positions` with a known address into `object`.
///
/// Libraries without an address are left alone, but since the code is resolved afterwards any
/// placeholder still left is an error.
pub fn link_libraries(
    contract: &str,
    object: &BytecodeObject,
    positions: &LibraryPositions,
    table: &LibraryAddressTable,
) -> Result<Bytes> {
    let mut object = object.clone();
    if object.is_unlinked() {
        for (name, link) in positions.iter() {
            let Some(address) = table.address(name) else {
                continue;
            };
            object.link_at(&link.placeholder, &link.offsets, address).map_err(|err| {
                VerifyError::UnresolvedLinkPlaceholder {
                    contract: contract.to_string(),
                    placeholders: vec![format!("{name}: {err}")],
                }
            })?;
            trace!(contract, library = name, %address, "linked library");
        }
    }
    object.resolve().map_err(|placeholders| VerifyError::UnresolvedLinkPlaceholder {
        contract: contract.to_string(),
        placeholders: placeholders.into_iter().map(|hash| format!("__${hash}$__")).collect(),
    })
}

/// Strips the metadata trailer, picking the layout by compiler version if known.
pub fn strip_metadata<'a>(code: &'a [u8], compiler: Option<&Version>) -> &'a [u8] {
    MetadataStripper::builtin().strip(code, compiler)
}

/// Removes the call protection of a library from both the compiled and the deployed code.
///
/// The compiled code has to push the zero address, the deployed one the library's own address.
pub fn strip_library_prefixes<'a, 'b>(
    contract: &str,
    compiled: &'a [u8],
    onchain: &'b [u8],
    address: Address,
) -> Result<(&'a [u8], &'b [u8])> {
    let invalid = |side: &str, err: LibraryPrefixError| VerifyError::InvalidLibraryPrefix {
        contract: contract.to_string(),
        reason: format!("{side}: {err}"),
    };
    let compiled = strip_library_prefix(compiled, Address::ZERO).map_err(|e| invalid("compiled", e))?;
    let onchain = strip_library_prefix(onchain, address).map_err(|e| invalid("onchain", e))?;
    Ok((compiled, onchain))
}

/// Compares normalized code, a difference is a [`VerifyError::BytecodeMismatch`].
pub fn compare(contract: &str, address: Address, onchain: &[u8], compiled: &[u8]) -> Result<()> {
    match first_difference(onchain, compiled) {
        None => Ok(()),
        Some(at) => {
            debug!(contract, %address, at, "bytecode differs");
            Err(VerifyError::BytecodeMismatch {
                contract: contract.to_string(),
                address,
                onchain_len: onchain.len(),
                compiled_len: compiled.len(),
                first_difference: Some(at),
            })
        }
    }
}
