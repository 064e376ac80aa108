//! Release tags and the contracts a release does not cover.

use bytecode_verify_core::{Result, VerifyError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{collections::BTreeSet, fmt, str::FromStr};

static RELEASE_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"core-contracts\.v(\d+)").unwrap());

/// Never verified, regardless of release.
const IGNORED: &[&str] = &[
    // not proxied
    "TransferWhitelist",
    // not in the registry before release 1
    "ReserveSpenderMultiSig",
    "GovernanceApproverMultiSig",
    // live in the monorepo but are not part of the core protocol
    "CeloFeeCurrencyAdapterOwnable",
    "FeeCurrencyAdapter",
    "FeeCurrencyAdapterOwnable",
];

/// Moved out of the core contracts with release 9.
const IGNORED_SINCE_V9: &[&str] = &[
    "Exchange",
    "ExchangeEUR",
    "ExchangeBRL",
    "GrandaMento",
    "StableToken",
    "StableTokenEUR",
    "StableTokenBRL",
    "Reserve",
];

/// Only skipped for release 9 itself.
const IGNORED_IN_V9: &[&str] = &["SortedOracles"];

/// A `core-contracts.v<N>` release tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReleaseTag {
    pub version: u32,
}

impl ReleaseTag {
    /// Extracts the release number from a tag or branch name like `release/core-contracts.v11`.
    pub fn parse(tag: &str) -> Result<Self> {
        let version = RELEASE_TAG_RE
            .captures(tag)
            .and_then(|caps| caps[1].parse::<u32>().ok())
            .filter(|version| *version > 0)
            .ok_or_else(|| VerifyError::InvalidReleaseTag(tag.to_string()))?;
        Ok(Self { version })
    }

    /// Parses an optional tag, an empty one means no version gating.
    pub fn parse_opt(tag: Option<&str>) -> Result<Option<Self>> {
        match tag.map(str::trim) {
            None | Some("") => Ok(None),
            Some(tag) => Self::parse(tag).map(Some),
        }
    }
}

impl FromStr for ReleaseTag {
    type Err = VerifyError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ReleaseTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core-contracts.v{}", self.version)
    }
}

/// Contracts excluded from verification for the given release.
pub fn ignored_contracts(version: Option<u32>) -> BTreeSet<String> {
    let mut ignored: BTreeSet<String> = IGNORED.iter().map(|s| s.to_string()).collect();
    match version {
        Some(v) if v > 9 => ignored.extend(IGNORED_SINCE_V9.iter().map(|s| s.to_string())),
        Some(9) => ignored.extend(
            IGNORED_SINCE_V9.iter().chain(IGNORED_IN_V9).map(|s| s.to_string()),
        ),
        _ => {}
    }
    ignored
}
