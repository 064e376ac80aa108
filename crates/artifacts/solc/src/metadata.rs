//! Compiler metadata trailers appended to runtime bytecode.
//!
//! The trailer is CBOR encoded build provenance (source hashes, compiler version). Its layout is a
//! convention of the compiler that changed between releases, so each known layout is a separate
//! [`MetadataRule`] and new ones can be added without touching the comparison code.

use once_cell::sync::Lazy;
use regex::bytes::Regex;
use semver::{Version, VersionReq};
use std::fmt;

static BUILTIN: Lazy<MetadataStripper> = Lazy::new(MetadataStripper::default);

/// A single trailer layout and the compiler versions that emit it.
#[derive(Clone)]
pub struct MetadataRule {
    pub name: &'static str,
    pub compilers: VersionReq,
    pattern: Regex,
}

impl fmt::Debug for MetadataRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataRule")
            .field("name", &self.name)
            .field("compilers", &self.compilers.to_string())
            .finish()
    }
}

impl MetadataRule {
    /// Creates a new rule, `pattern` must only match at the end of the code.
    pub fn new(
        name: &'static str,
        compilers: VersionReq,
        pattern: &str,
    ) -> Result<Self, regex::Error> {
        Ok(Self { name, compilers, pattern: Regex::new(pattern)? })
    }

    /// `a165 "bzzr0" 5820 <32 bytes> 0029`, solc 0.4.7 up to 0.5.9
    pub fn bzzr0() -> Self {
        Self::builtin("bzzr0", "<0.5.10", r"(?s-u)\xa1\x65bzzr0\x58\x20.{32}\x00\x29\z")
    }

    /// `a265 "bzzr1" 5820 <32 bytes> 64 "solc" 43 <version> 0032`, solc 0.5.10 up to 0.5.17
    pub fn bzzr1() -> Self {
        Self::builtin(
            "bzzr1",
            ">=0.5.10, <0.6.0",
            r"(?s-u)\xa2\x65bzzr1\x58\x20.{32}\x64solc\x43.{3}\x00\x32\z",
        )
    }

    /// `a264 "ipfs" 5822 <34 bytes> 64 "solc" 43 <version> 0033`, solc 0.6.0 onwards
    pub fn ipfs() -> Self {
        Self::builtin(
            "ipfs",
            ">=0.6.0",
            r"(?s-u)\xa2\x64ipfs\x58\x22.{34}\x64solc\x43.{3}\x00\x33\z",
        )
    }

    fn builtin(name: &'static str, compilers: &str, pattern: &str) -> Self {
        // both arguments are literals covered by tests
        Self::new(name, compilers.parse().unwrap(), pattern).unwrap()
    }

    pub fn applies_to(&self, compiler: &Version) -> bool {
        let version = Version::new(compiler.major, compiler.minor, compiler.patch);
        self.compilers.matches(&version)
    }

    /// Returns the offset the trailer starts at, if `code` ends with one.
    pub fn find(&self, code: &[u8]) -> Option<usize> {
        self.pattern.find(code).map(|m| m.start())
    }
}

/// Removes metadata trailers using an ordered set of [`MetadataRule`]s.
#[derive(Clone, Debug)]
pub struct MetadataStripper {
    rules: Vec<MetadataRule>,
}

impl Default for MetadataStripper {
    fn default() -> Self {
        Self::new(vec![MetadataRule::ipfs(), MetadataRule::bzzr1(), MetadataRule::bzzr0()])
    }
}

impl MetadataStripper {
    pub fn new(rules: Vec<MetadataRule>) -> Self {
        Self { rules }
    }

    /// The stripper with all trailer layouts known to this crate.
    pub fn builtin() -> &'static Self {
        &BUILTIN
    }

    pub fn rules(&self) -> &[MetadataRule] {
        &self.rules
    }

    /// Strips trailing metadata from `code`.
    ///
    /// If `compiler` is known only rules for that version are tried. Stripping repeats until no
    /// rule matches, so the result never ends with a trailer and stripping again is a no-op.
    /// This also removes the trailer of embedded child code (a contract created with `new`) when
    /// that code sits right before the contract's own trailer, so differences in the child's
    /// metadata are masked as well. Both sides of a comparison are stripped the same way.
    /// Code without a recognized trailer is returned unchanged.
    pub fn strip<'a>(&self, code: &'a [u8], compiler: Option<&Version>) -> &'a [u8] {
        let mut rules: Vec<&MetadataRule> = match compiler {
            Some(version) => self.rules.iter().filter(|r| r.applies_to(version)).collect(),
            None => Vec::new(),
        };
        if rules.is_empty() {
            rules = self.rules.iter().collect();
        }

        let mut stripped = code;
        while let Some((rule, start)) =
            rules.iter().find_map(|rule| rule.find(stripped).map(|start| (rule, start)))
        {
            trace!(rule = rule.name, len = stripped.len() - start, "stripped metadata trailer");
            stripped = &stripped[..start];
        }
        if stripped.len() == code.len() && !code.is_empty() {
            debug!(len = code.len(), "no metadata trailer found");
        }
        stripped
    }
}

/// Strips trailing compiler metadata with the builtin rules.
pub fn strip_metadata(code: &[u8]) -> &[u8] {
    MetadataStripper::builtin().strip(code, None)
}
