//! Priority ordered lookup over several build outputs.

use crate::artifact::{Artifact, ArtifactSet};
use bytecode_verify_core::{Result, VerifyError};
use std::{collections::BTreeSet, path::Path};

/// Read-only index over one or more [`ArtifactSet`]s.
///
/// Sets are consulted in the order they were added, the first set containing a contract wins.
/// This lets e.g. a build of the 0.5 sources take precedence over the 0.8 build.
#[derive(Clone, Debug, Default)]
pub struct ArtifactRepository {
    sets: Vec<ArtifactSet>,
}

impl ArtifactRepository {
    pub fn new(sets: Vec<ArtifactSet>) -> Self {
        Self { sets }
    }

    /// Loads every directory, in priority order.
    pub fn load<I, P>(dirs: I) -> Result<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let sets = dirs.into_iter().map(ArtifactSet::load).collect::<Result<Vec<_>>>()?;
        Ok(Self::new(sets))
    }

    /// Appends a set with the lowest priority.
    pub fn push(&mut self, set: ArtifactSet) {
        self.sets.push(set);
    }

    pub fn sets(&self) -> &[ArtifactSet] {
        &self.sets
    }

    pub fn find(&self, name: &str) -> Option<&Artifact> {
        self.sets.iter().find_map(|set| set.get(name))
    }

    /// Like [`Self::find`] but a missing artifact is an error.
    pub fn get(&self, name: &str) -> Result<&Artifact> {
        self.find(name).ok_or_else(|| VerifyError::ArtifactNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Every contract name known to any set.
    pub fn contract_names(&self) -> BTreeSet<String> {
        self.sets.iter().flat_map(|set| set.contract_names().map(str::to_string)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn artifact(name: &str, code: &str) -> Artifact {
        Artifact::from_json(name, json!({ "abi": [], "deployedBytecode": code })).unwrap()
    }

    #[test]
    fn first_set_wins() {
        let mut truffle_compat = ArtifactSet::new("out-truffle-compat");
        truffle_compat.insert(artifact("Foo", "0x01"));
        let mut latest = ArtifactSet::new("out-truffle-compat8");
        latest.insert(artifact("Foo", "0x02"));
        latest.insert(artifact("Bar", "0x03"));

        let repo = ArtifactRepository::new(vec![truffle_compat, latest]);
        assert_eq!(repo.get("Foo").unwrap().deployed_object().to_string(), "0x01");
        assert_eq!(repo.get("Bar").unwrap().deployed_object().to_string(), "0x03");
        assert_eq!(repo.contract_names().into_iter().collect::<Vec<_>>(), ["Bar", "Foo"]);
    }

    #[test]
    fn missing_contract_is_an_error() {
        let repo = ArtifactRepository::default();
        assert!(!repo.contains("Foo"));
        assert!(matches!(repo.get("Foo"), Err(VerifyError::ArtifactNotFound(name)) if name == "Foo"));
    }
}
