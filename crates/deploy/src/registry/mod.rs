//! The registry of deployed contracts produced by a run.

mod encode;
mod template;
mod writer;

pub use encode::{
    ABI_FIELD, ABI_FINGERPRINT_FIELD, ADDRESS_FIELD, NAME_FIELD, REQUIRED_FIELDS, RegistryEntry,
    encode_contract,
};
pub use template::{EdnTemplate, JsonTemplate, RegistryFormat, RegistryTemplate};
pub use writer::RegistryWriter;

use alloy_core::primitives::{Address, B256};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::ConfigurationError;

/// SHA-256 of the ABI's compact JSON form, hex encoded.
pub fn abi_fingerprint(abi: &Value) -> String {
    let json = serde_json::to_string(abi).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    hex::encode(hasher.finalize())
}

/// A contract confirmed on chain by a deploy step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployedContract {
    /// The compiled artifact that was deployed.
    pub contract_name: String,
    /// The key under which consumers look the contract up.
    pub registry_key: String,
    pub address: Address,
    pub abi: Value,
    pub abi_fingerprint: String,
    /// Extra annotations supplied by the step, in declaration order.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra_metadata: Map<String, Value>,
    /// The step that deployed it.
    pub step: String,
    pub transaction_hash: B256,
}

impl DeployedContract {
    pub fn new(
        contract_name: impl Into<String>,
        registry_key: impl Into<String>,
        address: Address,
        abi: Value,
        step: impl Into<String>,
        transaction_hash: B256,
    ) -> Self {
        Self {
            contract_name: contract_name.into(),
            registry_key: registry_key.into(),
            address,
            abi_fingerprint: abi_fingerprint(&abi),
            abi,
            extra_metadata: Map::new(),
            step: step.into(),
            transaction_hash,
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.extra_metadata = metadata;
        self
    }
}

/// Append-only, insertion-ordered collection of deployed contracts keyed by
/// registry key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Registry {
    entries: IndexMap<String, DeployedContract>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from recorded contracts, preserving their order.
    pub fn from_contracts(
        contracts: impl IntoIterator<Item = DeployedContract>,
    ) -> Result<Self, ConfigurationError> {
        let mut registry = Self::new();
        for contract in contracts {
            registry.insert(contract)?;
        }
        Ok(registry)
    }

    /// Fail if `key` is already taken, naming both steps.
    pub fn ensure_available(&self, key: &str, step: &str) -> Result<(), ConfigurationError> {
        match self.entries.get(key) {
            Some(existing) => Err(ConfigurationError::DuplicateRegistryKey {
                key: key.to_string(),
                first_step: existing.step.clone(),
                second_step: step.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Append a contract. A duplicate key is an error, never an overwrite.
    pub fn insert(&mut self, contract: DeployedContract) -> Result<(), ConfigurationError> {
        self.ensure_available(&contract.registry_key, &contract.step)?;
        self.entries.insert(contract.registry_key.clone(), contract);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&DeployedContract> {
        self.entries.get(key)
    }

    pub fn address_of(&self, key: &str) -> Option<Address> {
        self.entries.get(key).map(|contract| contract.address)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeployedContract> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The ordered document mapping each registry key to its encoded entry.
    pub fn to_document(&self) -> Map<String, Value> {
        self.iter()
            .map(encode_contract)
            .map(|entry| (entry.key, Value::Object(entry.value)))
            .collect()
    }

    pub fn into_contracts(self) -> Vec<DeployedContract> {
        self.entries.into_values().collect()
    }
}
