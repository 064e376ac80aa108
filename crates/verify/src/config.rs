use alloy_primitives::{address, Address};
use bytecode_verify_core::utils::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Well known address of the registry on every network.
pub const REGISTRY_ADDRESS: Address = address!("000000000000000000000000000000000000ce10");

/// Local development chains don't serve `eth_getProof`.
pub const DEVELOPMENT_NETWORK: &str = "development";

/// Settings of a single verification run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyConfig {
    pub network: String,
    pub registry: Address,
    /// Release number used to select the ignored contracts, `None` disables version gating.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_version: Option<u32>,
    /// Overrides whether proxy storage proofs are checked, derived from the network by default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_proofs: Option<bool>,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            network: DEVELOPMENT_NETWORK.to_string(),
            registry: REGISTRY_ADDRESS,
            release_version: None,
            storage_proofs: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl VerifyConfig {
    #[must_use]
    pub fn network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    #[must_use]
    pub fn registry(mut self, registry: Address) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn release_version(mut self, version: Option<u32>) -> Self {
        self.release_version = version;
        self
    }

    #[must_use]
    pub fn storage_proofs(mut self, enabled: bool) -> Self {
        self.storage_proofs = Some(enabled);
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn supports_storage_proofs(&self) -> bool {
        self.storage_proofs.unwrap_or(self.network != DEVELOPMENT_NETWORK)
    }
}
