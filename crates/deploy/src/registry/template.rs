//! Output templates wrapping the registry document in an environment-tagged
//! envelope.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::DeployError;

/// Renders the registry document for an environment.
pub trait RegistryTemplate: Send + Sync {
    fn render(&self, contracts: &Map<String, Value>, environment: &str)
    -> Result<String, DeployError>;
}

/// The supported output formats.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum RegistryFormat {
    /// `{"environment": ..., "contracts": {...}}`
    #[default]
    Json,
    /// A ClojureScript namespace defining `smart-contracts`.
    Edn,
}

impl RegistryFormat {
    pub fn template(&self) -> Box<dyn RegistryTemplate> {
        match self {
            RegistryFormat::Json => Box::new(JsonTemplate),
            RegistryFormat::Edn => Box::new(EdnTemplate::default()),
        }
    }
}

/// Pretty-printed JSON envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTemplate;

impl RegistryTemplate for JsonTemplate {
    fn render(
        &self,
        contracts: &Map<String, Value>,
        environment: &str,
    ) -> Result<String, DeployError> {
        let document = serde_json::json!({
            "environment": environment,
            "contracts": contracts,
        });

        let mut rendered = serde_json::to_string_pretty(&document)
            .map_err(|e| DeployError::Render(e.to_string()))?;
        rendered.push('\n');
        Ok(rendered)
    }
}

/// A ClojureScript namespace holding the listing as EDN:
///
/// ```text
/// (ns ethlance.shared.smart-contracts-dev)
///
/// (def smart-contracts
///   {:ds-guard {:name "DSGuard" :address "0x..." ...}})
/// ```
#[derive(Debug, Clone)]
pub struct EdnTemplate {
    /// Namespace prefix; the environment is appended as `-<env>`.
    pub namespace: String,
    /// Name of the var holding the listing.
    pub var: String,
}

impl Default for EdnTemplate {
    fn default() -> Self {
        Self {
            namespace: "ethlance.shared.smart-contracts".to_string(),
            var: "smart-contracts".to_string(),
        }
    }
}

impl RegistryTemplate for EdnTemplate {
    fn render(
        &self,
        contracts: &Map<String, Value>,
        environment: &str,
    ) -> Result<String, DeployError> {
        let mut listing = String::new();
        write_edn(&Value::Object(contracts.clone()), &mut listing);

        Ok(format!(
            "(ns {}-{})\n\n(def {}\n  {})\n",
            self.namespace, environment, self.var, listing
        ))
    }
}

fn is_keyword(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '?' | '!'))
}

fn write_edn_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Map keys become keywords when they can; other keys stay strings.
fn write_edn(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("nil"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_edn_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                write_edn(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                if is_keyword(key) {
                    out.push(':');
                    out.push_str(key);
                } else {
                    write_edn_string(key, out);
                }
                out.push(' ');
                write_edn(item, out);
            }
            out.push('}');
        }
    }
}
