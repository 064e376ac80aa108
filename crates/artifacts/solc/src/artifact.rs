//! Forge build artifacts, `out/<File>.sol/<Name>.json`.

use crate::bytecode::{
    deserialize_bytecode, deserialize_opt_bytecode, library_hash, Bytecode, BytecodeObject,
    LinkReferences,
};
use alloy_json_abi::{Function, JsonAbi};
use bytecode_verify_core::{Result, VerifyError};
use rayon::prelude::*;
use semver::Version;
use serde::{Deserialize, Deserializer, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

/// The compiled output of a single contract.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Derived from the artifact's file name, not part of the JSON.
    #[serde(skip)]
    pub contract_name: String,
    pub abi: JsonAbi,
    #[serde(deserialize_with = "deserialize_bytecode")]
    pub deployed_bytecode: Bytecode,
    #[serde(default, deserialize_with = "deserialize_opt_bytecode", skip_serializing_if = "Option::is_none")]
    pub bytecode: Option<Bytecode>,
    #[serde(default, deserialize_with = "deserialize_metadata", skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ArtifactMetadata>,
}

/// The parts of the solc metadata needed for verification.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compiler: Option<CompilerInfo>,
    #[serde(default)]
    pub sources: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerInfo {
    pub version: String,
}

/// `metadata` is an object in forge output but the raw JSON string in some older outputs.
fn deserialize_metadata<'de, D>(d: D) -> std::result::Result<Option<ArtifactMetadata>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Helper {
        Object(ArtifactMetadata),
        Raw(String),
    }

    match Option::<Helper>::deserialize(d)? {
        None => Ok(None),
        Some(Helper::Object(metadata)) => Ok(Some(metadata)),
        Some(Helper::Raw(raw)) => serde_json::from_str(&raw).map(Some).map_err(serde::de::Error::custom),
    }
}

impl Artifact {
    /// Parses an artifact from its JSON representation.
    pub fn from_json(contract_name: impl Into<String>, value: serde_json::Value) -> Result<Self> {
        let mut artifact: Self = serde_json::from_value(value)?;
        artifact.contract_name = contract_name.into();
        Ok(artifact)
    }

    pub fn deployed_object(&self) -> &BytecodeObject {
        &self.deployed_bytecode.object
    }

    /// The compiler version recorded in the metadata, without the commit suffix.
    pub fn compiler_version(&self) -> Option<Version> {
        let version = &self.metadata.as_ref()?.compiler.as_ref()?.version;
        let version = Version::parse(version.trim_start_matches('v')).ok()?;
        Some(Version::new(version.major, version.minor, version.patch))
    }

    /// Link references of the runtime code.
    ///
    /// Falls back to the creation code's references for outputs that only record those. Only this
    /// artifact is consulted, lower priority build outputs with the same contract are not.
    pub fn link_references(&self) -> &LinkReferences {
        match &self.bytecode {
            Some(creation) if self.deployed_bytecode.link_references.is_empty() => {
                &creation.link_references
            }
            _ => &self.deployed_bytecode.link_references,
        }
    }

    /// Libraries this contract links against, `name -> source path`.
    ///
    /// If the artifact carries no link references the placeholders left in the runtime code are
    /// matched against the metadata sources, assuming a library is named after its file.
    pub fn library_dependencies(&self) -> BTreeMap<String, String> {
        let mut deps = BTreeMap::new();
        for (file, libs) in self.link_references() {
            for name in libs.keys() {
                deps.insert(name.clone(), file.clone());
            }
        }
        if !deps.is_empty() {
            return deps;
        }

        let placeholders = self.deployed_object().placeholders();
        if placeholders.is_empty() {
            return deps;
        }
        let sources = self.metadata.as_ref().map(|m| &m.sources);
        for file in sources.into_iter().flat_map(|s| s.keys()) {
            let Some(name) = Path::new(file).file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if placeholders.contains(&library_hash(file, name)) {
                deps.insert(name.to_string(), file.clone());
            }
        }
        deps
    }

    /// The `initialize` function of the ABI, the first overload if there are several.
    pub fn initializer(&self) -> Option<&Function> {
        self.abi.function("initialize").and_then(|f| f.first())
    }
}

/// Returns the contract name for an artifact file, `Greeter.json` and `Greeter.0.8.11.json`
/// both yield `Greeter`.
pub fn contract_name(file: impl AsRef<Path>) -> Option<String> {
    let stem = file.as_ref().file_stem()?.to_str()?;
    stem.split('.').next().filter(|s| !s.is_empty()).map(str::to_string)
}

/// Whether `path` looks like `<File>.sol/<Name>.json`.
fn is_artifact_file(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "json")
        && path
            .parent()
            .and_then(Path::file_name)
            .and_then(|p| p.to_str())
            .map_or(false, |p| p.ends_with(".sol"))
}

/// All artifacts of one build output directory.
#[derive(Clone, Debug, Default)]
pub struct ArtifactSet {
    root: PathBuf,
    artifacts: BTreeMap<String, Artifact>,
}

impl ArtifactSet {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), artifacts: BTreeMap::new() }
    }

    /// Loads every artifact below `root`.
    ///
    /// JSON files without an `abi` key (build info, cache files) are ignored. If two files yield
    /// the same contract name the one with the lexicographically smaller path wins.
    #[instrument(name = "load_artifacts", level = "debug", skip_all, fields(root = %root.as_ref().display()))]
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(VerifyError::io(
                std::io::Error::new(std::io::ErrorKind::NotFound, "build output directory not found"),
                root,
            ));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
            let entry = entry.map_err(|err| {
                let path = err.path().unwrap_or(root).to_path_buf();
                VerifyError::io(err.into(), path)
            })?;
            if entry.file_type().is_file() && is_artifact_file(entry.path()) {
                files.push(entry.into_path());
            }
        }
        trace!(files = files.len(), "found artifact candidates");

        let parsed = files
            .par_iter()
            .map(|path| read_artifact(path).map(|artifact| artifact.map(|a| (path, a))))
            .collect::<Result<Vec<_>>>()?;

        let mut set = Self::new(root);
        for (path, artifact) in parsed.into_iter().flatten() {
            if set.artifacts.contains_key(&artifact.contract_name) {
                warn!(contract = %artifact.contract_name, path = %path.display(), "duplicate artifact, keeping the first one");
                continue;
            }
            set.insert(artifact);
        }
        debug!(artifacts = set.len(), "loaded artifacts");
        Ok(set)
    }

    /// Adds an artifact, replacing any previous one with the same name.
    pub fn insert(&mut self, artifact: Artifact) -> Option<Artifact> {
        self.artifacts.insert(artifact.contract_name.clone(), artifact)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.get(name)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn contract_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.artifacts.keys().map(String::as_str)
    }
}

/// Reads a single artifact file, `None` if it isn't a contract artifact.
fn read_artifact(path: &Path) -> Result<Option<Artifact>> {
    let Some(name) = contract_name(path) else {
        return Ok(None);
    };
    let content = fs::read_to_string(path).map_err(|err| VerifyError::io(err, path))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .map_err(|err| VerifyError::invalid_artifact(path, err))?;
    if value.get("abi").is_none() {
        trace!(path = %path.display(), "skipping json without abi");
        return Ok(None);
    }
    Artifact::from_json(name, value)
        .map(Some)
        .map_err(|err| VerifyError::invalid_artifact(path, err))
}
