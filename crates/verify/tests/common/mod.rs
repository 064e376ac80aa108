//! Shared helpers for building synthetic build outputs and chains.

#![allow(dead_code)]

use alloy_primitives::{hex, Address, U256};
use bytecode_verify::{
    artifacts::{library_placeholder, ArtifactRepository},
    chain::PROXY_ADMIN_SLOT,
    MemoryChain,
};
use serde_json::{json, Value};
use std::{fs, path::Path};
use tempfile::TempDir;

pub const FOO: Address = Address::with_last_byte(0xaa);
pub const BAR: Address = Address::with_last_byte(0xbb);
pub const PROXY: Address = Address::with_last_byte(0xcc);
pub const GOVERNANCE: Address = Address::with_last_byte(0x90);

/// Trailer solc 0.5.13 appends, `seed` stands in for the swarm hash.
pub fn bzzr1_trailer(seed: u8) -> String {
    let mut trailer = vec![0xa2, 0x65];
    trailer.extend_from_slice(b"bzzr1");
    trailer.extend_from_slice(&[0x58, 0x20]);
    trailer.extend_from_slice(&[seed; 32]);
    trailer.push(0x64);
    trailer.extend_from_slice(b"solc");
    trailer.extend_from_slice(&[0x43, 0x00, 0x05, 0x0d, 0x00, 0x32]);
    hex::encode(trailer)
}

/// Trailer solc 0.8 appends.
pub fn ipfs_trailer(seed: u8) -> String {
    let mut trailer = vec![0xa2, 0x64];
    trailer.extend_from_slice(b"ipfs");
    trailer.extend_from_slice(&[0x58, 0x22]);
    trailer.extend_from_slice(&[seed; 34]);
    trailer.push(0x64);
    trailer.extend_from_slice(b"solc");
    trailer.extend_from_slice(&[0x43, 0x00, 0x08, 0x13, 0x00, 0x33]);
    hex::encode(trailer)
}

/// A 0.5.13 artifact with the given runtime code and link references.
pub fn artifact(deployed: &str, link_references: Value) -> Value {
    json!({
        "abi": [],
        "bytecode": { "object": "0x6080604052", "linkReferences": {} },
        "deployedBytecode": { "object": deployed, "linkReferences": link_references },
        "metadata": { "compiler": { "version": "0.5.13+commit.5b0b510c" }, "sources": {} }
    })
}

/// Adds an `initialize(address,uint256)` function to the ABI of `artifact`.
pub fn with_initializer(mut artifact: Value) -> Value {
    artifact["abi"] = json!([{
        "type": "function",
        "name": "initialize",
        "stateMutability": "nonpayable",
        "inputs": [
            { "name": "registryAddress", "type": "address" },
            { "name": "limit", "type": "uint256" }
        ],
        "outputs": []
    }]);
    artifact
}

/// Runtime code of a library as compiled: call protection pushing the zero address.
pub fn compiled_library(body: &str, trailer: &str) -> String {
    format!("0x73{}{body}{trailer}", "00".repeat(20))
}

/// Runtime code of a library as deployed at `address`.
pub fn deployed_library(address: Address, body: &str, trailer: &str) -> Vec<u8> {
    hex::decode(format!("73{}{body}{trailer}", hex::encode(address))).unwrap()
}

pub fn link_reference(source: &str, library: &str, starts: &[u32]) -> Value {
    let offsets: Vec<Value> = starts.iter().map(|start| json!({ "start": start, "length": 20 })).collect();
    json!({ source: { library: offsets } })
}

pub fn placeholder(source: &str, library: &str) -> String {
    library_placeholder(source, library)
}

pub fn code(hex_code: &str) -> Vec<u8> {
    hex::decode(hex_code).unwrap()
}

/// A temporary forge style build output directory.
pub struct BuildDir {
    dir: TempDir,
}

impl BuildDir {
    pub fn new() -> Self {
        Self { dir: tempfile::tempdir().unwrap() }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Writes `<source>/<name>.json`, e.g. `Foo.sol/Foo.json`.
    pub fn write(&self, source: &str, name: &str, artifact: Value) -> &Self {
        let path = self.path().join(source).join(format!("{name}.json"));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, serde_json::to_string_pretty(&artifact).unwrap()).unwrap();
        self
    }

    pub fn repository(&self) -> ArtifactRepository {
        ArtifactRepository::load([self.path()]).unwrap()
    }
}

/// A freshly deployed proxy owned by governance, nothing else in its storage.
pub fn pure_proxy(chain: &mut MemoryChain, proxy: Address, code: Vec<u8>) {
    chain
        .register("Governance", GOVERNANCE)
        .set_code(proxy, code)
        .set_storage(proxy, PROXY_ADMIN_SLOT, U256::from_be_slice(GOVERNANCE.as_slice()));
}
