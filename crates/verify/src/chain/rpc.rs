use super::{ChainView, StorageProof};
use alloy_dyn_abi::DynSolValue;
use alloy_primitives::{hex, keccak256, Address, Bytes, B256};
use bytecode_verify_core::{Result, VerifyError};
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

const GET_ADDRESS_FOR_STRING: &str = "getAddressForString(string)";
const GET_IMPLEMENTATION: &str = "_getImplementation()";

/// [`ChainView`] over a JSON-RPC endpoint.
#[derive(Debug)]
pub struct RpcChain {
    url: String,
    registry: Address,
    client: reqwest::blocking::Client,
    id: AtomicU64,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcChain {
    /// Creates a client for `url` that looks names up in the registry at `registry`.
    pub fn new(url: impl Into<String>, registry: Address) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(VerifyError::transport)?;
        Ok(Self { url: url.into(), registry, client, id: AtomicU64::new(1) })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let id = self.id.fetch_add(1, Ordering::Relaxed);
        trace!(id, method, %params, "sending request");
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });

        let response = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .map_err(|err| VerifyError::transport(format!("{method}: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(status_error(method, status));
        }
        let response: RpcResponse<T> = response
            .json()
            .map_err(|err| VerifyError::transport(format!("{method}: invalid response: {err}")))?;
        into_result(method, response)
    }

    fn call(&self, to: Address, data: &[u8]) -> Result<Bytes> {
        self.request("eth_call", json!([{ "to": to, "data": hex::encode_prefixed(data) }, "latest"]))
    }
}

impl ChainView for RpcChain {
    #[instrument(level = "debug", skip(self))]
    fn get_code(&self, address: Address) -> Result<Bytes> {
        self.request("eth_getCode", json!([address, "latest"]))
    }

    #[instrument(level = "debug", skip(self))]
    fn get_storage_proof(&self, address: Address, slots: &[B256]) -> Result<StorageProof> {
        self.request("eth_getProof", json!([address, slots, "latest"]))
    }

    #[instrument(level = "debug", skip(self))]
    fn read_registry(&self, name: &str) -> Result<Address> {
        let data = calldata(GET_ADDRESS_FOR_STRING, vec![DynSolValue::String(name.to_string())]);
        decode_address(&self.call(self.registry, &data)?)
    }

    #[instrument(level = "debug", skip(self))]
    fn read_proxy_implementation(&self, proxy: Address) -> Result<Address> {
        decode_address(&self.call(proxy, &calldata(GET_IMPLEMENTATION, Vec::new()))?)
    }
}

/// A failed HTTP status is only worth retrying if the node is overloaded or unavailable.
fn status_error(method: &str, status: StatusCode) -> VerifyError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        VerifyError::transport(format!("{method}: HTTP {status}"))
    } else {
        VerifyError::Rpc {
            method: method.to_string(),
            code: status.as_u16().into(),
            message: format!("HTTP {status}"),
        }
    }
}

/// An `error` object is the node's answer, e.g. a reverted call, and never retried.
fn into_result<T>(method: &str, response: RpcResponse<T>) -> Result<T> {
    match response {
        RpcResponse { error: Some(err), .. } => {
            Err(VerifyError::Rpc { method: method.to_string(), code: err.code, message: err.message })
        }
        RpcResponse { result: Some(result), .. } => Ok(result),
        RpcResponse { result: None, .. } => {
            Err(VerifyError::transport(format!("{method}: empty response")))
        }
    }
}

/// Selector of `signature` followed by the encoded arguments.
fn calldata(signature: &str, args: Vec<DynSolValue>) -> Vec<u8> {
    let mut data = keccak256(signature)[..4].to_vec();
    if !args.is_empty() {
        data.extend(DynSolValue::Tuple(args).abi_encode_params());
    }
    data
}

/// Decodes a single returned `address`.
fn decode_address(data: &[u8]) -> Result<Address> {
    if data.len() < 32 {
        return Err(VerifyError::msg(format!(
            "expected an address to be returned, got 0x{}",
            hex::encode(data)
        )));
    }
    Ok(Address::from_word(B256::from_slice(&data[..32])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_registry_lookup() {
        let data = calldata(GET_ADDRESS_FOR_STRING, vec![DynSolValue::String("Governance".into())]);
        assert_eq!(&data[..4], &keccak256(GET_ADDRESS_FOR_STRING)[..4]);
        // offset, length, padded string
        assert_eq!(data.len(), 4 + 3 * 32);
        assert_eq!(&data[4 + 64..4 + 74], b"Governance");

        assert_eq!(calldata(GET_IMPLEMENTATION, Vec::new()).len(), 4);
    }

    #[test]
    fn decodes_returned_address() {
        let address = Address::with_last_byte(0xaa);
        assert_eq!(decode_address(address.into_word().as_slice()).unwrap(), address);
        assert!(decode_address(&[0u8; 20]).is_err());
    }

    #[test]
    fn node_errors_are_not_transient() {
        let response: RpcResponse<Bytes> = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":3,"message":"execution reverted"}}"#,
        )
        .unwrap();
        let err = into_result("eth_call", response).unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(err.to_string(), "eth_call: execution reverted (code 3)");
        match err {
            VerifyError::Rpc { code, .. } => assert_eq!(code, 3),
            err => panic!("unexpected error: {err}"),
        }

        let response: RpcResponse<Bytes> =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":"0x6001"}"#).unwrap();
        assert_eq!(into_result("eth_getCode", response).unwrap().as_ref(), &[0x60, 0x01]);
    }

    #[test]
    fn only_unavailable_nodes_are_retried() {
        assert!(status_error("eth_call", StatusCode::BAD_GATEWAY).is_transient());
        assert!(status_error("eth_call", StatusCode::SERVICE_UNAVAILABLE).is_transient());
        assert!(status_error("eth_call", StatusCode::TOO_MANY_REQUESTS).is_transient());
        assert!(!status_error("eth_call", StatusCode::BAD_REQUEST).is_transient());
        assert!(matches!(
            status_error("eth_call", StatusCode::UNAUTHORIZED),
            VerifyError::Rpc { code: 401, .. }
        ));
    }

    #[test]
    fn retrying_passes_reverts_through() {
        use crate::chain::Retrying;
        use bytecode_verify_core::utils::RetryPolicy;
        use std::{cell::Cell, time::Duration};

        struct Reverting {
            calls: Cell<u32>,
        }

        impl ChainView for Reverting {
            fn get_code(&self, _: Address) -> Result<Bytes> {
                unreachable!()
            }

            fn get_storage_proof(&self, _: Address, _: &[B256]) -> Result<StorageProof> {
                unreachable!()
            }

            fn read_registry(&self, _: &str) -> Result<Address> {
                unreachable!()
            }

            fn read_proxy_implementation(&self, _: Address) -> Result<Address> {
                self.calls.set(self.calls.get() + 1);
                let response: RpcResponse<Bytes> = serde_json::from_str(
                    r#"{"jsonrpc":"2.0","id":1,"error":{"code":3,"message":"execution reverted"}}"#,
                )
                .unwrap();
                into_result("eth_call", response).and_then(|data| decode_address(&data))
            }
        }

        let policy = RetryPolicy { max_retries: 3, backoff: Duration::ZERO };
        let chain = Retrying::new(Reverting { calls: Cell::new(0) }, policy);
        let err = chain.read_proxy_implementation(Address::with_last_byte(0xcc)).unwrap_err();
        assert!(matches!(err, VerifyError::Rpc { .. }), "{err}");
        assert_eq!(chain.inner().calls.get(), 1);
    }

    #[test]
    fn can_deserialize_proof_response() {
        let response: RpcResponse<StorageProof> = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"result":{
                "address":"0x00000000000000000000000000000000000000cc",
                "accountProof":[],"balance":"0x0","codeHash":"0x0000000000000000000000000000000000000000000000000000000000000000","nonce":"0x1",
                "storageHash":"0x56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421",
                "storageProof":[{"key":"0xb53127684a568b3173ae13b9f8a6016e243e63b6e8ee1178d6a717850b5d6103","value":"0x0","proof":[]}]
            }}"#,
        )
        .unwrap();
        let proof = response.result.unwrap();
        assert_eq!(proof.storage_hash, alloy_trie::EMPTY_ROOT_HASH);
        assert!(proof.storage[0].value.is_zero());
    }
}
