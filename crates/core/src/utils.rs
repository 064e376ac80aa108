//! Utility functions

use crate::error::{Result, VerifyError};
use alloy_primitives::{hex, Address};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    fs,
    io::{BufReader, BufWriter, Write},
    path::Path,
    thread,
    time::Duration,
};

/// Returns the input without a leading `0x`, if there is one.
pub fn strip_0x(s: &str) -> &str {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s)
}

/// Lowercase hex of the address without a `0x` prefix, the form libraries are linked with.
pub fn address_hex(address: &Address) -> String {
    hex::encode(address.as_slice())
}

/// Returns the offset of the first byte at which `a` and `b` differ.
///
/// If one is a prefix of the other, this is the length of the shorter one.
pub fn first_difference(a: &[u8], b: &[u8]) -> Option<usize> {
    if a == b {
        return None;
    }
    Some(a.iter().zip(b).position(|(x, y)| x != y).unwrap_or_else(|| a.len().min(b.len())))
}

/// How often, and how patiently, transient chain reads are retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Delay before the first retry, grows linearly with each attempt.
    #[serde(with = "millis")]
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3, backoff: Duration::from_millis(500) }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub const fn none() -> Self {
        Self { max_retries: 0, backoff: Duration::ZERO }
    }

    /// Runs `op`, retrying it while it fails with a transient error.
    pub fn retry<T>(&self, what: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 0;
        loop {
            match op() {
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(%err, attempt, what, "transient failure, retrying");
                    thread::sleep(self.backoff * attempt);
                }
                res => return res,
            }
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Parses a `0x`-prefixed (or bare) hex string into an [`Address`].
pub fn parse_address(s: &str) -> Result<Address> {
    s.trim().parse::<Address>().map_err(|err| VerifyError::msg(format!("invalid address {s:?}: {err}")))
}

/// Reads the json file and deserialize it into the provided type.
pub fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = fs::File::open(path).map_err(|err| VerifyError::io(err, path))?;
    let file = BufReader::new(file);
    let val: T = serde_json::from_reader(file)?;
    Ok(val)
}

/// Serializes the provided value to JSON and writes it to a file, creating the parent
/// directories if needed.
pub fn write_json_file<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| VerifyError::io(err, parent))?;
    }
    let file = fs::File::create(path).map_err(|err| VerifyError::io(err, path))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n").map_err(|err| VerifyError::io(err, path))?;
    writer.flush().map_err(|err| VerifyError::io(err, path))
}
