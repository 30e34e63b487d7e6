//! The validated, immutable definition of one registered script.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::sandbox::SandboxManifest;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Language assumed when a definition does not name one.
pub const DEFAULT_LANGUAGE: &str = "expr";

/// Prefix of generated script ids. Keeps them valid as file names.
pub const GENERATED_ID_PREFIX: &str = "script-";

/// How a registered script is used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Usage {
    /// Evaluated afresh on every execution request.
    #[default]
    #[serde(alias = "INVOCABLE_SCRIPT")]
    Invocable,
    /// Evaluated once when prepared; the result is shared with dependents.
    #[serde(alias = "REUSABLE_SERVICE")]
    Service,
}

/// A validated script definition.
///
/// Construction goes through [`Script::builder`] or deserialization; both run
/// the same validation, so every `Script` in circulation satisfies:
///
/// - `id`, `language` and `body` are non-blank;
/// - `description`, when present, is non-blank;
/// - service names and variable names are non-blank;
/// - no name is both a service and a global variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawScript", into = "RawScript")]
pub struct Script {
    id: String,
    language: String,
    usage: Usage,
    description: Option<String>,
    services: BTreeSet<String>,
    global_variables: BTreeMap<String, serde_json::Value>,
    body: String,
    sandbox: Option<SandboxManifest>,
}

impl Script {
    /// Start building a script around `body`.
    pub fn builder(body: impl Into<String>) -> ScriptBuilder {
        ScriptBuilder {
            raw: RawScript {
                body: Some(body.into()),
                ..RawScript::default()
            },
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn services(&self) -> &BTreeSet<String> {
        &self.services
    }

    pub fn global_variables(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.global_variables
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn sandbox(&self) -> Option<&SandboxManifest> {
        self.sandbox.as_ref()
    }

    /// A copy of this script with a different language and body.
    ///
    /// Every other field is carried over untouched. The new body is validated
    /// like any other.
    pub fn with_source(
        &self,
        language: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Script, CoreError> {
        let language = required("language", Some(language.into()))?;
        let body = required("body", Some(body.into()))?;
        Ok(Script {
            language,
            body,
            ..self.clone()
        })
    }
}

/// Fluent constructor for [`Script`], mostly used by tests and embedders.
#[derive(Debug, Clone)]
pub struct ScriptBuilder {
    raw: RawScript,
}

impl ScriptBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.raw.id = Some(id.into());
        self
    }

    pub fn language(mut self, language: impl Into<String>) -> Self {
        self.raw.language = Some(language.into());
        self
    }

    pub fn usage(mut self, usage: Usage) -> Self {
        self.raw.usage = Some(usage);
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.raw.description = Some(description.into());
        self
    }

    pub fn service(mut self, name: impl Into<String>) -> Self {
        self.raw
            .services
            .get_or_insert_with(Vec::new)
            .push(Some(name.into()));
        self
    }

    pub fn variable(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.raw
            .global_variables
            .get_or_insert_with(BTreeMap::new)
            .insert(Some(name.into()), value);
        self
    }

    pub fn sandbox(mut self, manifest: SandboxManifest) -> Self {
        self.raw.sandbox = Some(manifest);
        self
    }

    pub fn build(self) -> Result<Script, CoreError> {
        Script::try_from(self.raw)
    }
}

// ---------------------------------------------------------------------------
// Wire form
// ---------------------------------------------------------------------------

/// Unvalidated shape of a script definition as it appears on the wire.
///
/// Collection entries are optional so that null names can be reported
/// instead of failing deserialization with an opaque message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct RawScript {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    services: Option<Vec<Option<String>>>,
    #[serde(
        default,
        alias = "globalVariables",
        skip_serializing_if = "Option::is_none"
    )]
    global_variables: Option<BTreeMap<Option<String>, serde_json::Value>>,
    #[serde(default, alias = "script", skip_serializing_if = "Option::is_none")]
    body: Option<String>,
    #[serde(
        default,
        alias = "classLoaderCreator",
        skip_serializing_if = "Option::is_none"
    )]
    sandbox: Option<SandboxManifest>,
}

impl TryFrom<RawScript> for Script {
    type Error = CoreError;

    fn try_from(raw: RawScript) -> Result<Self, Self::Error> {
        let id = match raw.id {
            Some(id) => required("id", Some(id))?,
            None => format!("{GENERATED_ID_PREFIX}{}", uuid::Uuid::new_v4()),
        };

        let language = match raw.language {
            Some(language) => required("language", Some(language))?,
            None => DEFAULT_LANGUAGE.to_string(),
        };

        let description = match raw.description {
            Some(description) => Some(required("description", Some(description))?),
            None => None,
        };

        let body = required("body", raw.body)?;

        let mut services = BTreeSet::new();
        for name in raw.services.unwrap_or_default() {
            services.insert(required("service name", name)?);
        }

        let mut global_variables = BTreeMap::new();
        for (name, value) in raw.global_variables.unwrap_or_default() {
            global_variables.insert(required("variable name", name)?, value);
        }

        let clashes: Vec<&str> = services
            .iter()
            .filter(|name| global_variables.contains_key(*name))
            .map(String::as_str)
            .collect();
        if !clashes.is_empty() {
            return Err(CoreError::Validation(format!(
                "Names used both as services and as global variables: {clashes:?}"
            )));
        }

        Ok(Script {
            id,
            language,
            usage: raw.usage.unwrap_or_default(),
            description,
            services,
            global_variables,
            body,
            sandbox: raw.sandbox,
        })
    }
}

impl From<Script> for RawScript {
    fn from(script: Script) -> Self {
        RawScript {
            id: Some(script.id),
            language: Some(script.language),
            usage: Some(script.usage),
            description: script.description,
            services: (!script.services.is_empty())
                .then(|| script.services.into_iter().map(Some).collect()),
            global_variables: (!script.global_variables.is_empty()).then(|| {
                script
                    .global_variables
                    .into_iter()
                    .map(|(k, v)| (Some(k), v))
                    .collect()
            }),
            body: Some(script.body),
            sandbox: script.sandbox,
        }
    }
}

/// Trimmed, non-blank value of a required field.
fn required(field: &str, value: Option<String>) -> Result<String, CoreError> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        Some(_) => Err(CoreError::Validation(format!("{field} cannot be blank"))),
        None => Err(CoreError::Validation(format!("{field} is required"))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    #[test]
    fn defaults_id_language_and_usage() {
        let script = Script::builder("uppercase(name)").build().expect("build");

        assert!(script.id().starts_with(GENERATED_ID_PREFIX));
        assert_eq!(script.language(), DEFAULT_LANGUAGE);
        assert_eq!(script.usage(), Usage::Invocable);
        assert_eq!(script.description(), None);
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = Script::builder("1").build().expect("build");
        let b = Script::builder("1").build().expect("build");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn blank_body_is_rejected() {
        let result = Script::builder("   ").build();
        assert_matches!(result, Err(CoreError::Validation(msg)) if msg.contains("body"));
    }

    #[test]
    fn missing_body_is_rejected() {
        let raw = RawScript {
            id: Some("x".to_string()),
            ..RawScript::default()
        };
        assert_matches!(Script::try_from(raw), Err(CoreError::Validation(msg)) if msg == "body is required");
    }

    #[test]
    fn blank_description_is_rejected() {
        let result = Script::builder("1").description(" ").build();
        assert_matches!(result, Err(CoreError::Validation(msg)) if msg.contains("description"));
    }

    #[test]
    fn blank_service_name_is_rejected() {
        let result = Script::builder("1").service("  ").build();
        assert_matches!(result, Err(CoreError::Validation(msg)) if msg.contains("service name"));
    }

    #[test]
    fn null_variable_name_is_rejected() {
        let mut raw = RawScript {
            body: Some("1".to_string()),
            ..RawScript::default()
        };
        raw.global_variables = Some(BTreeMap::from([(None, json!(1))]));
        assert_matches!(
            Script::try_from(raw),
            Err(CoreError::Validation(msg)) if msg == "variable name is required"
        );
    }

    #[test]
    fn null_variable_values_are_allowed() {
        let script = Script::builder("x")
            .variable("x", serde_json::Value::Null)
            .build()
            .expect("build");
        assert_eq!(script.global_variables()["x"], serde_json::Value::Null);
    }

    #[test]
    fn service_variable_clash_is_rejected() {
        let result = Script::builder("x")
            .service("x")
            .variable("x", json!(1))
            .build();
        assert_matches!(result, Err(CoreError::Validation(msg)) if msg.contains("\"x\""));
    }

    #[test]
    fn with_source_keeps_other_fields() {
        let script = Script::builder("a |> uppercase")
            .id("shout")
            .language("pipe")
            .variable("a", json!("hi"))
            .build()
            .expect("build");

        let rewritten = script.with_source("expr", "uppercase(a)").expect("rewrite");

        assert_eq!(rewritten.id(), "shout");
        assert_eq!(rewritten.language(), "expr");
        assert_eq!(rewritten.body(), "uppercase(a)");
        assert_eq!(rewritten.global_variables(), script.global_variables());
    }

    #[test]
    fn legacy_usage_names_are_accepted() {
        let usage: Usage = serde_json::from_value(json!("REUSABLE_SERVICE")).expect("usage");
        assert_eq!(usage, Usage::Service);
        assert_eq!(serde_json::to_value(Usage::Invocable).expect("json"), json!("invocable"));
    }
}
