//! Text serialization of scripts, variables, results, and tagged values.

pub mod tags;
pub mod yaml;

pub use tags::TagRegistry;
pub use yaml::{
    dump_script, dump_value, load, load_document, load_script, load_variables, ScriptDocument,
};

use serde::de::DeserializeOwned;

use crate::error::CoreError;

/// Deserialize the payload of a tagged value; a missing payload reads as `{}`.
pub fn from_tagged<T: DeserializeOwned>(payload: serde_yaml::Value) -> Result<T, CoreError> {
    let payload = match payload {
        serde_yaml::Value::Null => serde_yaml::Value::Mapping(serde_yaml::Mapping::new()),
        other => other,
    };
    serde_yaml::from_value(payload).map_err(|e| CoreError::Serialization(e.to_string()))
}
