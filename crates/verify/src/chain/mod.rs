//! Read-only access to the chain a release is verified against.

use alloy_primitives::{b256, Address, Bytes, B256, U256};
use bytecode_verify_core::Result;
use serde::{Deserialize, Serialize};

mod memory;
pub use memory::MemoryChain;

mod proof;
pub use proof::{storage_root, verify_proxy_storage};

mod retry;
pub use retry::Retrying;

mod rpc;
pub use rpc::RpcChain;

/// `keccak256("eip1967.proxy.admin") - 1`, holds the owner of a proxy.
pub const PROXY_ADMIN_SLOT: B256 =
    b256!("b53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103");

/// `keccak256("eip1967.proxy.implementation") - 1`, holds the implementation of a proxy.
pub const PROXY_IMPLEMENTATION_SLOT: B256 =
    b256!("360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc");

/// The account's storage root and the requested slots, as returned by `eth_getProof`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageProof {
    pub address: Address,
    pub storage_hash: B256,
    #[serde(default, rename = "storageProof")]
    pub storage: Vec<StorageSlotProof>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSlotProof {
    pub key: B256,
    pub value: U256,
    #[serde(default)]
    pub proof: Vec<Bytes>,
}

/// The chain state verification reads.
pub trait ChainView {
    /// Runtime code at `address`, empty if there is no contract.
    fn get_code(&self, address: Address) -> Result<Bytes>;

    fn get_storage_proof(&self, address: Address, slots: &[B256]) -> Result<StorageProof>;

    /// Address registered under `name`, zero if there is none.
    fn read_registry(&self, name: &str) -> Result<Address>;

    /// Implementation the proxy at `proxy` delegates to.
    fn read_proxy_implementation(&self, proxy: Address) -> Result<Address>;
}

impl<C: ChainView + ?Sized> ChainView for &C {
    fn get_code(&self, address: Address) -> Result<Bytes> {
        (**self).get_code(address)
    }

    fn get_storage_proof(&self, address: Address, slots: &[B256]) -> Result<StorageProof> {
        (**self).get_storage_proof(address, slots)
    }

    fn read_registry(&self, name: &str) -> Result<Address> {
        (**self).read_registry(name)
    }

    fn read_proxy_implementation(&self, proxy: Address) -> Result<Address> {
        (**self).read_proxy_implementation(proxy)
    }
}

impl<C: ChainView + ?Sized> ChainView for Box<C> {
    fn get_code(&self, address: Address) -> Result<Bytes> {
        (**self).get_code(address)
    }

    fn get_storage_proof(&self, address: Address, slots: &[B256]) -> Result<StorageProof> {
        (**self).get_storage_proof(address, slots)
    }

    fn read_registry(&self, name: &str) -> Result<Address> {
        (**self).read_registry(name)
    }

    fn read_proxy_implementation(&self, proxy: Address) -> Result<Address> {
        (**self).read_proxy_implementation(proxy)
    }
}
