//! YAML form of scripts, invocation variables, and results.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;

use crate::error::CoreError;
use crate::script::{RawScript, Script};
use crate::value::{Namespace, Value};

/// A parsed script together with the text it should be persisted as.
///
/// The submitted text is kept verbatim, except when the id was generated:
/// then the script is re-serialized so the generated id survives a restart.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptDocument {
    pub script: Script,
    pub source: String,
}

pub fn load_document(text: &str) -> Result<ScriptDocument, CoreError> {
    let raw: RawScript = serde_yaml::from_str(text).map_err(serialization)?;
    let generated_id = raw.id.is_none();
    let script = Script::try_from(raw)?;

    let source = if generated_id {
        dump_script(&script)?
    } else {
        text.to_string()
    };
    Ok(ScriptDocument { script, source })
}

pub fn load_script(text: &str) -> Result<Script, CoreError> {
    load_document(text).map(|document| document.script)
}

pub fn dump_script(script: &Script) -> Result<String, CoreError> {
    serde_yaml::to_string(script).map_err(serialization)
}

/// Deserialize any registered value type.
pub fn load<T: DeserializeOwned>(text: &str) -> Result<T, CoreError> {
    serde_yaml::from_str(text).map_err(serialization)
}

/// Parse invocation variables. Blank text and a null document mean "none".
pub fn load_variables(text: &str) -> Result<Namespace, CoreError> {
    if text.trim().is_empty() {
        return Ok(Namespace::new());
    }
    let variables: Option<BTreeMap<String, serde_json::Value>> =
        serde_yaml::from_str(text).map_err(serialization)?;
    Ok(variables
        .unwrap_or_default()
        .into_iter()
        .map(|(name, value)| (name, Value::from(value)))
        .collect())
}

pub fn dump_value(value: &Value) -> Result<String, CoreError> {
    serde_yaml::to_string(value).map_err(serialization)
}

fn serialization(err: serde_yaml::Error) -> CoreError {
    CoreError::Serialization(err.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
