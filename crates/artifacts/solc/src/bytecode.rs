//! Bytecode related types.

use alloy_primitives::{hex, keccak256, Address, Bytes};
use bytecode_verify_core::{
    utils::{address_hex, strip_0x},
    Result,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::{collections::BTreeMap, fmt};

/// Number of hex characters of the library hash embedded in a placeholder.
pub const PLACEHOLDER_HASH_LEN: usize = 34;

/// Length of a full `__$<hash>$__` placeholder, the 40 hex characters of an address.
pub const PLACEHOLDER_LEN: usize = 40;

/// The `PUSH20` opcode a library's runtime code starts with.
pub const PUSH20: u8 = 0x73;

static PLACEHOLDER_RE: Lazy<regex::Regex> =
    Lazy::new(|| regex::Regex::new(r"__\$([0-9a-fA-F]{34})\$__").unwrap());

/// file -> (library name -> offsets)
pub type LinkReferences = BTreeMap<String, BTreeMap<String, Vec<Offsets>>>;

/// Byte range of a link reference inside the (deployed) bytecode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offsets {
    pub start: u32,
    pub length: u32,
}

impl Offsets {
    /// Character range of this reference in the `0x`-less hex encoding of the bytecode.
    pub fn hex_range(&self) -> std::ops::Range<usize> {
        let start = self.start as usize * 2;
        start..start + self.length as usize * 2
    }

    pub fn byte_range(&self) -> std::ops::Range<usize> {
        let start = self.start as usize;
        start..start + self.length as usize
    }
}

/// Returns the 34 character hash solc uses to identify `name` declared in `file`.
///
/// `hex(keccak256("<file>:<name>"))[0..34]`
pub fn library_hash(file: &str, name: &str) -> String {
    let mut hash = hex::encode(keccak256(format!("{file}:{name}")));
    hash.truncate(PLACEHOLDER_HASH_LEN);
    hash
}

/// Returns the `__$<hash>$__` token solc leaves in unlinked bytecode for the library.
pub fn library_placeholder(file: &str, name: &str) -> String {
    format!("__${}$__", library_hash(file, name))
}

/// Returns every distinct placeholder hash in `code`, in order of first appearance.
pub fn find_placeholders(code: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for cap in PLACEHOLDER_RE.captures_iter(code) {
        let hash = cap[1].to_string();
        if !found.contains(&hash) {
            found.push(hash);
        }
    }
    found
}

/// A link reference whose bytes are not the expected placeholder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkMismatch {
    pub start: u32,
    pub expected: String,
    pub found: String,
}

impl fmt::Display for LinkMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {} at byte {}, found {:?}", self.expected, self.start, self.found)
    }
}

/// The deployable object of a compiled contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BytecodeObject {
    /// Fully linked bytecode.
    Bytecode(Bytes),
    /// Hex encoded bytecode, without `0x`, with at least one unlinked library placeholder.
    Unlinked(String),
}

impl Default for BytecodeObject {
    fn default() -> Self {
        Self::Bytecode(Bytes::new())
    }
}

impl BytecodeObject {
    /// Parses a hex string that may contain `__$<hash>$__` placeholders.
    pub fn parse(s: &str) -> Result<Self> {
        let s = strip_0x(s.trim());
        if PLACEHOLDER_RE.is_match(s) {
            // everything but the placeholders has to be valid hex
            let masked = PLACEHOLDER_RE.replace_all(s, "00".repeat(20).as_str());
            hex::decode(&*masked)?;
            return Ok(Self::Unlinked(s.to_string()));
        }
        Ok(Self::Bytecode(hex::decode(s)?.into()))
    }

    pub fn is_unlinked(&self) -> bool {
        matches!(self, Self::Unlinked(_))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Bytecode(bytes) => bytes.is_empty(),
            Self::Unlinked(code) => code.is_empty(),
        }
    }

    /// Length of the code in bytes, placeholders count as the address they stand for.
    pub fn byte_len(&self) -> usize {
        match self {
            Self::Bytecode(bytes) => bytes.len(),
            Self::Unlinked(code) => code.len() / 2,
        }
    }

    /// Returns the linked bytes, if there are no placeholders left.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Bytecode(bytes) => Some(bytes),
            Self::Unlinked(_) => None,
        }
    }

    /// Hashes of all placeholders left in the object.
    pub fn placeholders(&self) -> Vec<String> {
        match self {
            Self::Bytecode(_) => Vec::new(),
            Self::Unlinked(code) => find_placeholders(code),
        }
    }

    /// Writes `address` over every range in `offsets`.
    ///
    /// Each range must currently hold exactly `placeholder`, a different token means the library
    /// was declared with another source path or name than the one it is being linked as.
    pub fn link_at(
        &mut self,
        placeholder: &str,
        offsets: &[Offsets],
        address: Address,
    ) -> std::result::Result<(), LinkMismatch> {
        let code = match self {
            Self::Unlinked(code) => code,
            Self::Bytecode(bytes) => {
                let start = offsets.first().map(|o| o.start).unwrap_or_default();
                let found = offsets
                    .first()
                    .and_then(|o| bytes.get(o.byte_range()))
                    .map(hex::encode)
                    .unwrap_or_default();
                return Err(LinkMismatch { start, expected: placeholder.to_string(), found });
            }
        };

        let address = address_hex(&address);
        for offset in offsets {
            let range = offset.hex_range();
            let found = code.get(range.clone()).unwrap_or_default();
            if found != placeholder {
                return Err(LinkMismatch {
                    start: offset.start,
                    expected: placeholder.to_string(),
                    found: found.to_string(),
                });
            }
            code.replace_range(range, &address);
        }
        Ok(())
    }

    /// Turns an object without placeholders into [`BytecodeObject::Bytecode`].
    ///
    /// Returns the remaining placeholder hashes if there are any.
    pub fn resolve(self) -> std::result::Result<Bytes, Vec<String>> {
        match self {
            Self::Bytecode(bytes) => Ok(bytes),
            Self::Unlinked(code) => {
                let left = find_placeholders(&code);
                if !left.is_empty() {
                    return Err(left);
                }
                hex::decode(&code).map(Into::into).map_err(|err| vec![err.to_string()])
            }
        }
    }
}

impl fmt::Display for BytecodeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytecode(bytes) => write!(f, "{bytes}"),
            Self::Unlinked(code) => write!(f, "0x{code}"),
        }
    }
}

impl Serialize for BytecodeObject {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BytecodeObject {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Bytecode of a compiled contract together with the positions its libraries are linked at.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bytecode {
    pub object: BytecodeObject,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub link_references: LinkReferences,
}

impl From<BytecodeObject> for Bytecode {
    fn from(object: BytecodeObject) -> Self {
        Self { object, link_references: Default::default() }
    }
}

/// Accepts both the `{ object, linkReferences }` form and a bare hex string.
pub fn deserialize_bytecode<'de, D>(d: D) -> std::result::Result<Bytecode, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Helper {
        Object(Bytecode),
        Hex(BytecodeObject),
    }

    Ok(match Helper::deserialize(d)? {
        Helper::Object(bytecode) => bytecode,
        Helper::Hex(object) => object.into(),
    })
}

pub fn deserialize_opt_bytecode<'de, D>(d: D) -> std::result::Result<Option<Bytecode>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "deserialize_bytecode")] Bytecode);

    Ok(Option::<Wrapper>::deserialize(d)?.map(|w| w.0))
}

/// Ways the call protection prefix of a library can be malformed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LibraryPrefixError {
    MissingAddressLoad,
    UnexpectedAddress { expected: Address, found: String },
}

impl fmt::Display for LibraryPrefixError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingAddressLoad => f.write_str("library bytecode doesn't start with address load"),
            Self::UnexpectedAddress { expected, found } => {
                write!(f, "library bytecode loads unexpected address at start: expected {expected}, found 0x{found}")
            }
        }
    }
}

/// Strips the `PUSH20 <address>` call protection from the start of a library's runtime code.
///
/// solc can't know the library's address at compile time, so compiled code pushes the zero
/// address while the deployed code pushes the address the library lives at.
pub fn strip_library_prefix(
    code: &[u8],
    expected: Address,
) -> std::result::Result<&[u8], LibraryPrefixError> {
    if code.first() != Some(&PUSH20) || code.len() < 21 {
        return Err(LibraryPrefixError::MissingAddressLoad);
    }
    if &code[1..21] != expected.as_slice() {
        return Err(LibraryPrefixError::UnexpectedAddress {
            expected,
            found: hex::encode(&code[1..21]),
        });
    }
    Ok(&code[21..])
}
