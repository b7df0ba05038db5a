//! Logic module section.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ordered::OrderedMap;

/// Execution period used when none is given.
pub const DEFAULT_PERIOD: &str = "1s";

/// `metadata.logic` as declared on a node.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogicMetadata {
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub variables: OrderedMap<LogicVariable>,
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default, rename = "processUpdates")]
    pub process_updates: Option<bool>,
}

/// Initial value of a program variable, optionally bound to a tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogicVariable {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl LogicVariable {
    /// Value as written into the document.
    pub fn rendered_value(&self) -> String {
        match &self.value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }
}

/// `<logic>` section of a device document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct LogicSection {
    pub name: String,
    pub period: String,
    pub process_updates: bool,
    pub program: String,
    pub variables: OrderedMap<LogicVariable>,
}

impl LogicSection {
    /// Build the section, or `None` when no program is declared.
    pub fn from_metadata(meta: &LogicMetadata) -> Option<Self> {
        let program = meta.program.clone()?;

        Some(Self {
            name: "logic-module".to_string(),
            period: meta
                .period
                .clone()
                .unwrap_or_else(|| DEFAULT_PERIOD.to_string()),
            process_updates: meta.process_updates.unwrap_or(false),
            program,
            variables: meta.variables.clone(),
        })
    }
}
