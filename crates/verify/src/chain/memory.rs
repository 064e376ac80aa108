use super::{storage_root, ChainView, StorageProof, StorageSlotProof};
use alloy_primitives::{Address, Bytes, B256, U256};
use bytecode_verify_core::{Result, VerifyError};
use std::collections::BTreeMap;

/// A chain kept in memory, for tests and dry runs.
///
/// Proxies are plain entries mapping a proxy to its implementation, they need no code.
#[derive(Clone, Debug, Default)]
pub struct MemoryChain {
    code: BTreeMap<Address, Bytes>,
    storage: BTreeMap<Address, BTreeMap<B256, U256>>,
    registry: BTreeMap<String, Address>,
    proxies: BTreeMap<Address, Address>,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_code(&mut self, address: Address, code: impl Into<Bytes>) -> &mut Self {
        self.code.insert(address, code.into());
        self
    }

    pub fn set_storage(&mut self, address: Address, slot: B256, value: U256) -> &mut Self {
        self.storage.entry(address).or_default().insert(slot, value);
        self
    }

    /// Registers `address` under `name` in the registry.
    pub fn register(&mut self, name: impl Into<String>, address: Address) -> &mut Self {
        self.registry.insert(name.into(), address);
        self
    }

    pub fn set_proxy(&mut self, proxy: Address, implementation: Address) -> &mut Self {
        self.proxies.insert(proxy, implementation);
        self
    }
}

impl ChainView for MemoryChain {
    fn get_code(&self, address: Address) -> Result<Bytes> {
        Ok(self.code.get(&address).cloned().unwrap_or_default())
    }

    fn get_storage_proof(&self, address: Address, slots: &[B256]) -> Result<StorageProof> {
        let storage = self.storage.get(&address);
        let value = |slot: &B256| storage.and_then(|s| s.get(slot)).copied().unwrap_or_default();
        Ok(StorageProof {
            address,
            storage_hash: storage_root(storage.into_iter().flatten().map(|(k, v)| (*k, *v))),
            storage: slots
                .iter()
                .map(|slot| StorageSlotProof { key: *slot, value: value(slot), proof: Vec::new() })
                .collect(),
        })
    }

    fn read_registry(&self, name: &str) -> Result<Address> {
        Ok(self.registry.get(name).copied().unwrap_or_default())
    }

    fn read_proxy_implementation(&self, proxy: Address) -> Result<Address> {
        self.proxies
            .get(&proxy)
            .copied()
            .ok_or_else(|| VerifyError::msg(format!("no proxy deployed at {proxy}")))
    }
}
