//! Library placeholders and the addresses libraries were found at.

use alloy_primitives::Address;
use bytecode_verify_artifacts_solc::{
    library_placeholder, Artifact, BytecodeObject, LinkReferences, Offsets, PLACEHOLDER_LEN,
};
use bytecode_verify_core::{utils::address_hex, Result, VerifyError};
use serde::{ser::SerializeMap, Serialize, Serializer};
use std::collections::{btree_map::Entry, BTreeMap};

/// Where a single library is linked into one contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LibraryLink {
    pub source_path: String,
    /// The `__$<hash>$__` token at each of `offsets` in the unlinked code.
    pub placeholder: String,
    pub offsets: Vec<Offsets>,
}

/// The libraries a contract links against, from the link references of its artifact.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LibraryPositions {
    links: BTreeMap<String, LibraryLink>,
}

impl LibraryPositions {
    pub fn from_link_references(refs: &LinkReferences) -> Self {
        let mut positions = Self::default();
        for (file, libs) in refs {
            for (name, offsets) in libs {
                positions.register(name, file, offsets.clone());
            }
        }
        positions
    }

    /// Positions of the libraries `artifact` links against.
    ///
    /// Artifacts without link references get the offsets of the placeholders found in their
    /// runtime code instead. Artifacts of the same contract in other build outputs are never
    /// consulted, the highest priority artifact fully describes the contract.
    pub fn for_artifact(artifact: &Artifact) -> Self {
        let refs = artifact.link_references();
        if !refs.is_empty() {
            return Self::from_link_references(refs);
        }

        let mut positions = Self::default();
        let BytecodeObject::Unlinked(code) = artifact.deployed_object() else {
            return positions;
        };
        for (name, source_path) in artifact.library_dependencies() {
            let placeholder = library_placeholder(&source_path, &name);
            let offsets = code
                .match_indices(&placeholder)
                .filter(|(at, _)| at % 2 == 0)
                .map(|(at, _)| Offsets { start: (at / 2) as u32, length: PLACEHOLDER_LEN as u32 / 2 })
                .collect();
            positions.register(&name, &source_path, offsets);
        }
        positions
    }

    /// Registers the offsets `name` declared in `source_path` is linked at.
    pub fn register(&mut self, name: &str, source_path: &str, offsets: Vec<Offsets>) {
        let placeholder = library_placeholder(source_path, name);
        trace!(library = name, source_path, %placeholder, ?offsets, "registered link reference");
        self.links.insert(
            name.to_string(),
            LibraryLink { source_path: source_path.to_string(), placeholder, offsets },
        );
    }

    pub fn get(&self, name: &str) -> Option<&LibraryLink> {
        self.links.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LibraryLink)> + '_ {
        self.links.iter().map(|(name, link)| (name.as_str(), link))
    }

    pub fn library_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.links.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// The first byte after the last link reference, the minimum length of code linking these.
    pub fn end(&self) -> usize {
        self.links
            .values()
            .flat_map(|link| &link.offsets)
            .map(|o| o.byte_range().end)
            .max()
            .unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LibraryEntry {
    pub address: Address,
    pub source_path: String,
}

/// Library name to the address it was found deployed at.
///
/// Entries are only ever added, a library found at two different addresses is an error.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LibraryAddressTable {
    entries: BTreeMap<String, LibraryEntry>,
}

impl LibraryAddressTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `address` for `name`, read at byte `position` of some contract's code.
    ///
    /// Returns `true` if the library wasn't known before.
    pub fn record(
        &mut self,
        name: &str,
        source_path: &str,
        address: Address,
        position: usize,
    ) -> Result<bool> {
        match self.entries.entry(name.to_string()) {
            Entry::Vacant(entry) => {
                debug!(library = name, %address, source_path, "found library address");
                entry.insert(LibraryEntry { address, source_path: source_path.to_string() });
                Ok(true)
            }
            Entry::Occupied(entry) if entry.get().address == address => Ok(false),
            Entry::Occupied(entry) => Err(VerifyError::LibraryAddressConflict {
                library: name.to_string(),
                position,
                existing: entry.get().address,
                found: address,
            }),
        }
    }

    /// Reads the address of every library in `positions` out of the deployed `code`.
    pub fn collect(&mut self, code: &[u8], positions: &LibraryPositions) -> Result<()> {
        for (name, link) in positions.iter() {
            for offset in &link.offsets {
                let range = offset.byte_range();
                let Some(bytes) = code.get(range.clone()).filter(|b| b.len() == 20) else {
                    return Err(VerifyError::msg(format!(
                        "can't read address of library {name} at bytes {range:?} of {} byte code",
                        code.len()
                    )));
                };
                self.record(name, &link.source_path, Address::from_slice(bytes), range.start)?;
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&LibraryEntry> {
        self.entries.get(name)
    }

    pub fn address(&self, name: &str) -> Option<Address> {
        self.get(name).map(|entry| entry.address)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LibraryEntry)> + '_ {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    /// `name -> address`, the form consumed by deployment tooling.
    pub fn addresses(&self) -> BTreeMap<String, Address> {
        self.entries.iter().map(|(name, entry)| (name.clone(), entry.address)).collect()
    }
}

/// Serializes as `{ "<name>": "0x<address>" }`.
impl Serialize for LibraryAddressTable {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(self.entries.len()))?;
        for (name, entry) in &self.entries {
            map.serialize_entry(name, &format!("0x{}", address_hex(&entry.address)))?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytecode_verify_artifacts_solc::bytecode::PUSH20;

    fn positions() -> LibraryPositions {
        let mut positions = LibraryPositions::default();
        positions.register(
            "Bar",
            "contracts/Bar.sol",
            vec![Offsets { start: 1, length: 20 }, Offsets { start: 22, length: 20 }],
        );
        positions
    }

    fn code_with(address: Address, other: Address) -> Vec<u8> {
        let mut code = vec![PUSH20];
        code.extend_from_slice(address.as_slice());
        code.push(PUSH20);
        code.extend_from_slice(other.as_slice());
        code
    }

    #[test]
    fn collects_library_addresses() {
        let bar = Address::with_last_byte(0xbb);
        let mut table = LibraryAddressTable::new();
        table.collect(&code_with(bar, bar), &positions()).unwrap();

        assert_eq!(table.address("Bar"), Some(bar));
        assert_eq!(table.get("Bar").unwrap().source_path, "contracts/Bar.sol");
        assert_eq!(positions().end(), 42);

        // seen again from another contract
        table.collect(&code_with(bar, bar), &positions()).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn positions_come_from_highest_priority_artifact() {
        use bytecode_verify_artifacts_solc::{ArtifactRepository, ArtifactSet};

        let placeholder = library_placeholder("contracts/Bar.sol", "Bar");
        let mut linked = ArtifactSet::new("out-0.8");
        linked.insert(
            Artifact::from_json(
                "Foo",
                serde_json::json!({
                    "abi": [],
                    "deployedBytecode": {
                        "object": format!("0x73{placeholder}"),
                        "linkReferences": {
                            "contracts/Bar.sol": { "Bar": [{ "start": 1, "length": 20 }] }
                        }
                    }
                }),
            )
            .unwrap(),
        );
        let mut plain = ArtifactSet::new("out");
        plain.insert(
            Artifact::from_json("Foo", serde_json::json!({ "abi": [], "deployedBytecode": "0x6001" }))
                .unwrap(),
        );

        let repo = ArtifactRepository::new(vec![plain, linked.clone()]);
        assert!(LibraryPositions::for_artifact(repo.get("Foo").unwrap()).is_empty());

        let repo = ArtifactRepository::new(vec![linked]);
        let positions = LibraryPositions::for_artifact(repo.get("Foo").unwrap());
        assert_eq!(positions.library_names().collect::<Vec<_>>(), ["Bar"]);
    }

    #[test]
    fn positions_from_placeholders() {
        let placeholder = library_placeholder("contracts/Bar.sol", "Bar");
        let artifact = Artifact::from_json(
            "Foo",
            serde_json::json!({
                "abi": [],
                "deployedBytecode": format!("0x6000{placeholder}6001{placeholder}"),
                "metadata": { "sources": { "contracts/Bar.sol": {}, "contracts/Foo.sol": {} } }
            }),
        )
        .unwrap();

        let positions = LibraryPositions::for_artifact(&artifact);
        assert_eq!(positions.library_names().collect::<Vec<_>>(), ["Bar"]);
        assert_eq!(
            positions.get("Bar").unwrap().offsets,
            vec![Offsets { start: 2, length: 20 }, Offsets { start: 24, length: 20 }]
        );
    }

    #[test]
    fn conflicting_addresses_are_an_error() {
        let mut table = LibraryAddressTable::new();
        let err = table
            .collect(&code_with(Address::with_last_byte(1), Address::with_last_byte(2)), &positions())
            .unwrap_err();
        match err {
            VerifyError::LibraryAddressConflict { library, position, existing, found } => {
                assert_eq!(library, "Bar");
                assert_eq!(position, 22);
                assert_eq!(existing, Address::with_last_byte(1));
                assert_eq!(found, Address::with_last_byte(2));
            }
            err => panic!("unexpected error: {err}"),
        }
        // the first address stays
        assert_eq!(table.address("Bar"), Some(Address::with_last_byte(1)));
    }

    #[test]
    fn short_code_is_an_error() {
        let mut table = LibraryAddressTable::new();
        assert!(table.collect(&[PUSH20, 0x01], &positions()).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn serializes_as_address_map() {
        let mut table = LibraryAddressTable::new();
        table.record("Bar", "contracts/Bar.sol", Address::with_last_byte(0xbb), 0).unwrap();
        let json = serde_json::to_value(&table).unwrap();
        assert_eq!(json, serde_json::json!({ "Bar": "0x00000000000000000000000000000000000000bb" }));
    }
}
