//! Compiled contract artifacts.
//!
//! Artifacts are the JSON files a truffle/hardhat style build drops into a
//! build directory: `{"contractName", "abi", "bytecode", "linkReferences"}`.
//! Only the fields needed to deploy and register a contract are read.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use alloy_core::{
    json_abi::JsonAbi,
    primitives::{Address, Bytes},
};
use serde::Deserialize;
use serde_json::Value;

use crate::ConfigurationError;

/// A compiled contract: its raw ABI and (possibly unlinked) bytecode.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    /// The compiled contract name.
    pub contract_name: String,
    /// The raw ABI, kept verbatim for the registry.
    pub abi: Value,
    /// Hex bytecode without `0x`. May still contain library placeholders.
    pub bytecode: String,
    /// Names of the libraries the bytecode links against.
    pub link_references: Vec<String>,
    constructor_inputs: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactFile {
    abi: Value,
    bytecode: Value,
    #[serde(default)]
    link_references: Value,
}

impl Artifact {
    /// Build an artifact from its ABI and hex bytecode.
    pub fn new(
        contract_name: impl Into<String>,
        abi: Value,
        bytecode: impl AsRef<str>,
    ) -> Result<Self, ConfigurationError> {
        let contract_name = contract_name.into();
        let malformed = |reason: String| ConfigurationError::MalformedArtifact {
            contract: contract_name.clone(),
            reason,
        };

        let parsed: JsonAbi = serde_json::from_value(abi.clone())
            .map_err(|e| malformed(format!("invalid ABI: {e}")))?;

        let bytecode = bytecode.as_ref().trim();
        let bytecode = bytecode.strip_prefix("0x").unwrap_or(bytecode).to_string();
        if bytecode.is_empty() {
            return Err(malformed("empty bytecode (abstract contract or interface?)".to_string()));
        }

        Ok(Self {
            constructor_inputs: parsed
                .constructor
                .as_ref()
                .map(|constructor| constructor.inputs.len())
                .unwrap_or(0),
            contract_name,
            abi,
            bytecode,
            link_references: Vec::new(),
        })
    }

    /// Parse an artifact file.
    ///
    /// `bytecode` may be a plain hex string or a `{"object": "..."}` object.
    pub fn from_json(contract_name: &str, content: &str) -> Result<Self, ConfigurationError> {
        let malformed = |reason: String| ConfigurationError::MalformedArtifact {
            contract: contract_name.to_string(),
            reason,
        };

        let file: ArtifactFile =
            serde_json::from_str(content).map_err(|e| malformed(e.to_string()))?;

        let bytecode = match &file.bytecode {
            Value::String(hex) => hex.as_str(),
            Value::Object(object) => object
                .get("object")
                .and_then(Value::as_str)
                .ok_or_else(|| malformed("bytecode object has no `object` field".to_string()))?,
            _ => return Err(malformed("bytecode is neither a string nor an object".to_string())),
        };

        let mut artifact = Self::new(contract_name, file.abi, bytecode)?;
        artifact.link_references = library_names(&file.link_references);
        Ok(artifact)
    }

    /// Number of constructor parameters declared by the ABI.
    pub fn constructor_inputs(&self) -> usize {
        self.constructor_inputs
    }

    /// Substitute library placeholders and decode the bytecode.
    ///
    /// A placeholder is exactly 40 hex characters, the width of an address.
    /// It must occur in the bytecode, every occurrence must start on a byte
    /// boundary, and no `__Name__` style placeholder may remain afterwards.
    /// A library called from several places occurs once per call site.
    pub fn link(&self, links: &[(&str, Address)]) -> Result<Bytes, ConfigurationError> {
        let mut code = self.bytecode.clone();

        for (placeholder, address) in links {
            let placeholder = placeholder.trim_start_matches("0x");
            let invalid = |reason: String| ConfigurationError::InvalidPlaceholder {
                contract: self.contract_name.clone(),
                placeholder: placeholder.to_string(),
                reason,
            };

            if placeholder.len() != PLACEHOLDER_LEN {
                return Err(invalid(format!(
                    "is {} characters long instead of {PLACEHOLDER_LEN}",
                    placeholder.len()
                )));
            }

            let offsets: Vec<usize> = code.match_indices(placeholder).map(|(i, _)| i).collect();
            if offsets.is_empty() {
                return Err(ConfigurationError::UnknownPlaceholder {
                    contract: self.contract_name.clone(),
                    placeholder: placeholder.to_string(),
                });
            }
            if let Some(offset) = offsets.iter().find(|offset| *offset % 2 != 0) {
                return Err(invalid(format!(
                    "occurs at hex offset {offset}, which is not a byte boundary"
                )));
            }

            code = code.replace(placeholder, &hex::encode(address.as_slice()));
        }

        if let Some(start) = code.find("__") {
            let placeholder: String = code[start..].chars().take(40).collect();
            return Err(ConfigurationError::UnlinkedBytecode {
                contract: self.contract_name.clone(),
                placeholder,
            });
        }

        hex::decode(&code)
            .map(Bytes::from)
            .map_err(|e| ConfigurationError::MalformedArtifact {
                contract: self.contract_name.clone(),
                reason: format!("invalid bytecode hex: {e}"),
            })
    }
}

/// Flatten `{"file.sol": {"Lib": [...]}}` into `["Lib"]`.
fn library_names(link_references: &Value) -> Vec<String> {
    link_references
        .as_object()
        .into_iter()
        .flat_map(|files| files.values())
        .filter_map(Value::as_object)
        .flat_map(|libraries| libraries.keys().cloned())
        .collect()
}

/// Hex width of a library placeholder: one address.
pub const PLACEHOLDER_LEN: usize = 40;

/// Provides compiled artifacts by contract name.
pub trait ArtifactLoader {
    /// Load the artifact for `contract_name`. A missing or unparseable
    /// artifact is a configuration error.
    fn load(&self, contract_name: &str) -> Result<Artifact, ConfigurationError>;
}

/// Loads `<build_dir>/<ContractName>.json`.
#[derive(Debug, Clone)]
pub struct FsArtifactLoader {
    build_dir: PathBuf,
}

impl FsArtifactLoader {
    pub fn new(build_dir: impl Into<PathBuf>) -> Self {
        Self {
            build_dir: build_dir.into(),
        }
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    pub fn artifact_path(&self, contract_name: &str) -> PathBuf {
        self.build_dir.join(format!("{contract_name}.json"))
    }
}

impl ArtifactLoader for FsArtifactLoader {
    fn load(&self, contract_name: &str) -> Result<Artifact, ConfigurationError> {
        let path = self.artifact_path(contract_name);

        let content = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigurationError::ArtifactNotFound {
                contract: contract_name.to_string(),
                path: path.clone(),
            },
            _ => ConfigurationError::MalformedArtifact {
                contract: contract_name.to_string(),
                reason: format!("failed to read {}: {e}", path.display()),
            },
        })?;

        let artifact = Artifact::from_json(contract_name, &content)?;
        tracing::debug!(
            contract = contract_name,
            path = %path.display(),
            libraries = ?artifact.link_references,
            "Loaded contract artifact"
        );
        Ok(artifact)
    }
}

/// In-memory artifacts keyed by contract name.
impl ArtifactLoader for HashMap<String, Artifact> {
    fn load(&self, contract_name: &str) -> Result<Artifact, ConfigurationError> {
        self.get(contract_name)
            .cloned()
            .ok_or_else(|| ConfigurationError::ArtifactNotFound {
                contract: contract_name.to_string(),
                path: PathBuf::from(format!("<memory>/{contract_name}")),
            })
    }
}
