//! Builds the namespace a script runs against.
//!
//! Bindings are layered in a fixed order, later layers winning on a name
//! clash: the script's global variables, then the invocation variables, then
//! one binding per declared service holding that service's instance.

use std::collections::BTreeMap;

use crate::error::CoreError;
use crate::prepared::PreparedObject;
use crate::script::Script;
use crate::value::{Namespace, Value};

/// Compose the namespace for `script`.
///
/// `resolved` maps each declared service name to what the registry holds
/// under it, or `None` when nothing is registered. A missing entry or a
/// non-service entry fails the whole composition with a
/// [`CoreError::Dependency`] naming every offending service.
pub fn populate_namespace(
    script: &Script,
    invocation: Option<Namespace>,
    resolved: &BTreeMap<String, Option<PreparedObject>>,
) -> Result<Namespace, CoreError> {
    let mut namespace: Namespace = script
        .global_variables()
        .iter()
        .map(|(name, value)| (name.clone(), Value::from(value.clone())))
        .collect();

    namespace.extend(invocation.unwrap_or_default());

    let services = collect_services(script, resolved)?;
    namespace.extend(services);
    Ok(namespace)
}

fn collect_services(
    script: &Script,
    resolved: &BTreeMap<String, Option<PreparedObject>>,
) -> Result<Vec<(String, Value)>, CoreError> {
    let mut services = Vec::with_capacity(script.services().len());
    let mut missing = Vec::new();
    let mut not_services = Vec::new();

    for name in script.services() {
        match resolved.get(name).and_then(Option::as_ref) {
            Some(PreparedObject::Service(service)) => {
                services.push((name.clone(), service.instance().clone()));
            }
            Some(PreparedObject::Script(_)) => not_services.push(name.as_str()),
            None => missing.push(name.as_str()),
        }
    }

    if missing.is_empty() && not_services.is_empty() {
        return Ok(services);
    }

    // `services()` is ordered, so both lists come out sorted.
    let mut message = format!("Service errors in script '{}' =>", script.id());
    if !missing.is_empty() {
        message.push_str(&format!(
            " References non-existent services [{}].",
            missing.join(", ")
        ));
    }
    if !not_services.is_empty() {
        message.push_str(&format!(
            " References non-service scripts [{}].",
            not_services.join(", ")
        ));
    }
    Err(CoreError::Dependency(message))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::prepared::{PreparedScript, PreparedService};
    use crate::script::Usage;
    use crate::scripting::{bind, test_helpers::host_sandbox, BackendRegistry};

    fn script_with(services: &[&str]) -> Script {
        services
            .iter()
            .fold(
                Script::builder("x").id("consumer").variable("x", json!(1)),
                |builder, name| builder.service(*name),
            )
            .build()
            .expect("script")
    }

    fn service(id: &str, instance: Value) -> PreparedObject {
        let script = Script::builder("1")
            .id(id)
            .usage(Usage::Service)
            .build()
            .expect("service");
        PreparedObject::Service(Arc::new(PreparedService::new(
            script,
            "source".to_string(),
            instance,
        )))
    }

    fn invocable(id: &str) -> PreparedObject {
        let script = Script::builder("1").id(id).build().expect("script");
        let backend = BackendRegistry::with_expr().get("expr").expect("expr");
        let executable = bind(backend, "1", host_sandbox()).expect("bind");
        PreparedObject::Script(Arc::new(PreparedScript::new(
            script,
            "source".to_string(),
            executable,
        )))
    }

    #[test]
    fn layers_globals_then_invocation_then_services() {
        let script = Script::builder("x")
            .id("consumer")
            .variable("x", json!(1))
            .variable("y", json!("global"))
            .service("svc")
            .build()
            .expect("script");
        let resolved = BTreeMap::from([(
            "svc".to_string(),
            Some(service("svc", Value::from("instance"))),
        )]);
        let invocation = Namespace::from([
            ("x".to_string(), Value::Int(2)),
            ("z".to_string(), Value::Bool(true)),
        ]);

        let namespace = populate_namespace(&script, Some(invocation), &resolved).expect("compose");

        assert_eq!(namespace.get("x"), Some(&Value::Int(2)));
        assert_eq!(namespace.get("y"), Some(&Value::from("global")));
        assert_eq!(namespace.get("z"), Some(&Value::Bool(true)));
        assert_eq!(namespace.get("svc"), Some(&Value::from("instance")));
    }

    #[test]
    fn services_override_invocation_variables() {
        let script = script_with(&["svc"]);
        let resolved = BTreeMap::from([("svc".to_string(), Some(service("svc", Value::Int(7))))]);
        let invocation = Namespace::from([("svc".to_string(), Value::Int(0))]);

        let namespace = populate_namespace(&script, Some(invocation), &resolved).expect("compose");

        assert_eq!(namespace.get("svc"), Some(&Value::Int(7)));
    }

    #[test]
    fn reports_every_broken_dependency() {
        let script = script_with(&["zeta", "alpha", "plain", "ok"]);
        let resolved = BTreeMap::from([
            ("zeta".to_string(), None),
            ("plain".to_string(), Some(invocable("plain"))),
            ("ok".to_string(), Some(service("ok", Value::Null))),
        ]);

        let err = populate_namespace(&script, None, &resolved).unwrap_err();

        assert_matches!(&err, CoreError::Dependency(message) if message ==
            "Service errors in script 'consumer' => References non-existent services [alpha, zeta]. References non-service scripts [plain].");
    }

    #[test]
    fn only_non_service_references() {
        let script = script_with(&["plain"]);
        let resolved = BTreeMap::from([("plain".to_string(), Some(invocable("plain")))]);

        let err = populate_namespace(&script, None, &resolved).unwrap_err();

        assert_matches!(&err, CoreError::Dependency(message) if message ==
            "Service errors in script 'consumer' => References non-service scripts [plain].");
    }

    #[test]
    fn no_services_and_no_invocation() {
        let script = script_with(&[]);

        let namespace = populate_namespace(&script, None, &BTreeMap::new()).expect("compose");

        assert_eq!(namespace, Namespace::from([("x".to_string(), Value::Int(1))]));
    }
}
