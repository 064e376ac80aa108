use super::{ChainView, PROXY_ADMIN_SLOT};
use alloy_primitives::{keccak256, Address, B256, U256};
use alloy_trie::{HashBuilder, Nibbles, EMPTY_ROOT_HASH};
use bytecode_verify_core::Result;

/// Root of a storage trie holding `slots`, zero values are absent from the trie.
pub fn storage_root(slots: impl IntoIterator<Item = (B256, U256)>) -> B256 {
    let mut leaves: Vec<(B256, U256)> = slots
        .into_iter()
        .filter(|(_, value)| !value.is_zero())
        .map(|(slot, value)| (keccak256(slot), value))
        .collect();
    if leaves.is_empty() {
        return EMPTY_ROOT_HASH;
    }
    // the builder needs leaves in key order
    leaves.sort_unstable_by_key(|(key, _)| *key);

    let mut builder = HashBuilder::default();
    for (key, value) in leaves {
        builder.add_leaf(Nibbles::unpack(key), &alloy_rlp::encode(value));
    }
    builder.root()
}

/// Checks that the only storage of `proxy` is its owner slot, set to `owner`.
///
/// A freshly deployed proxy whose ownership was handed to governance has exactly this storage.
/// Anything else, e.g. an implementation set before the proposal executes, means the proxy was
/// tampered with.
#[instrument(level = "debug", skip(chain))]
pub fn verify_proxy_storage<C: ChainView + ?Sized>(
    chain: &C,
    proxy: Address,
    owner: Address,
) -> Result<bool> {
    let proof = chain.get_storage_proof(proxy, &[PROXY_ADMIN_SLOT])?;
    let expected = storage_root([(PROXY_ADMIN_SLOT, U256::from_be_slice(owner.as_slice()))]);
    trace!(%expected, actual = %proof.storage_hash, "proxy storage root");
    Ok(proof.storage_hash == expected)
}
