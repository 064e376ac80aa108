use super::{ChainView, StorageProof};
use alloy_primitives::{Address, Bytes, B256};
use bytecode_verify_core::{utils::RetryPolicy, Result};

/// Retries transient failures of the wrapped [`ChainView`].
///
/// Only [`bytecode_verify_core::VerifyError::Transport`] errors are retried, anything the chain
/// actually answered is passed through.
#[derive(Clone, Debug)]
pub struct Retrying<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C> Retrying<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: ChainView> ChainView for Retrying<C> {
    fn get_code(&self, address: Address) -> Result<Bytes> {
        self.policy.retry("eth_getCode", || self.inner.get_code(address))
    }

    fn get_storage_proof(&self, address: Address, slots: &[B256]) -> Result<StorageProof> {
        self.policy.retry("eth_getProof", || self.inner.get_storage_proof(address, slots))
    }

    fn read_registry(&self, name: &str) -> Result<Address> {
        self.policy.retry("registry lookup", || self.inner.read_registry(name))
    }

    fn read_proxy_implementation(&self, proxy: Address) -> Result<Address> {
        self.policy.retry("proxy implementation", || self.inner.read_proxy_implementation(proxy))
    }
}
