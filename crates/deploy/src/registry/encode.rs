//! Canonical registry entries.

use serde_json::{Map, Value};

use super::DeployedContract;

pub const NAME_FIELD: &str = "name";
pub const ADDRESS_FIELD: &str = "address";
pub const ABI_FIELD: &str = "abi";
pub const ABI_FINGERPRINT_FIELD: &str = "abi-fingerprint";

/// Fields every entry carries. Extra metadata can never replace them.
pub const REQUIRED_FIELDS: [&str; 4] = [NAME_FIELD, ADDRESS_FIELD, ABI_FIELD, ABI_FINGERPRINT_FIELD];

/// One registry key and its structured value.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryEntry {
    pub key: String,
    pub value: Map<String, Value>,
}

/// Encode a deployed contract into its registry entry.
///
/// Required fields come first; extra metadata follows in declaration order.
/// A metadata key that collides with a required field is dropped and logged.
pub fn encode_contract(contract: &DeployedContract) -> RegistryEntry {
    let mut value = Map::new();
    value.insert(NAME_FIELD.into(), Value::String(contract.contract_name.clone()));
    value.insert(
        ADDRESS_FIELD.into(),
        Value::String(contract.address.to_checksum(None)),
    );
    value.insert(ABI_FIELD.into(), contract.abi.clone());
    value.insert(
        ABI_FINGERPRINT_FIELD.into(),
        Value::String(contract.abi_fingerprint.clone()),
    );

    for (key, metadata) in &contract.extra_metadata {
        if REQUIRED_FIELDS.contains(&key.as_str()) {
            tracing::warn!(
                registry_key = %contract.registry_key,
                field = %key,
                "Metadata field collides with a required registry field, ignoring it"
            );
            continue;
        }
        value.insert(key.clone(), metadata.clone());
    }

    RegistryEntry {
        key: contract.registry_key.clone(),
        value,
    }
}
