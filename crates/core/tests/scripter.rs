//! End-to-end tests for the script host: adding, executing, replacing,
//! removing, and reloading scripts from a home directory on disk.

use std::path::Path;

use assert_matches::assert_matches;
use scripter_core::{CoreError, Execution, Namespace, Scripter, ScripterOptions, Value};

async fn open(home: &Path) -> Scripter {
    Scripter::open(ScripterOptions::new(home))
        .await
        .expect("scripter should open")
}

fn vars(entries: &[(&str, Value)]) -> Namespace {
    entries
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

async fn run(scripter: &Scripter, id: &str, variables: Option<Namespace>) -> Value {
    match scripter.execute(id, variables).await.expect("execute") {
        Execution::Completed(value) => value,
        Execution::NotInvocable => panic!("'{id}' was not invocable"),
    }
}

const GREETER: &str = "id: greeter\nbody: uppercase(name)\n";
const NORMALIZER: &str = "id: normalizer\nusage: service\nbody: \"{normalize: |s| squish(s)}\"\n";
const TIDY: &str = "id: tidy\nservices: [normalizer]\nbody: normalizer.normalize(text)\n";

// ---------------------------------------------------------------------------
// Test: add then execute an invocable script
// ---------------------------------------------------------------------------

#[tokio::test]
async fn executes_an_added_script() {
    let home = tempfile::tempdir().expect("tempdir");
    let scripter = open(home.path()).await;

    let previous = scripter.add(GREETER, false).await.expect("add");
    assert_eq!(previous, None);

    let value = run(&scripter, "greeter", Some(vars(&[("name", "scripter".into())]))).await;
    assert_eq!(value, Value::from("SCRIPTER"));
}

// ---------------------------------------------------------------------------
// Test: services are bound into dependant scripts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn services_are_injected_by_name() {
    let home = tempfile::tempdir().expect("tempdir");
    let scripter = open(home.path()).await;
    scripter.add(NORMALIZER, false).await.expect("add service");
    scripter.add(TIDY, false).await.expect("add script");

    let value = run(&scripter, "tidy", Some(vars(&[("text", "  a  b  ".into())]))).await;

    assert_eq!(value, Value::from("a b"));
    assert_eq!(
        scripter.execute("normalizer", None).await.expect("execute"),
        Execution::NotInvocable
    );
}

// ---------------------------------------------------------------------------
// Test: replacing requires the replace flag
// ---------------------------------------------------------------------------

#[tokio::test]
async fn replacing_needs_permission() {
    let home = tempfile::tempdir().expect("tempdir");
    let scripter = open(home.path()).await;
    scripter.add(GREETER, false).await.expect("add");

    let lower = "id: greeter\nlanguage: pipe\nbody: name |> lowercase\n";
    let conflict = scripter.add(lower, false).await;
    assert_matches!(conflict, Err(CoreError::Conflict(message)) if message == "Can't replace script: greeter");

    let previous = scripter.add(lower, true).await.expect("replace");
    assert_eq!(previous.as_deref(), Some(GREETER));

    let value = run(&scripter, "greeter", Some(vars(&[("name", "MiXeD".into())]))).await;
    assert_eq!(value, Value::from("mixed"));
    assert_eq!(scripter.get_source("greeter").await.expect("source").as_deref(), Some(lower));
    let script = scripter.get_script("greeter").await.expect("script").expect("present");
    assert_eq!(script.language(), "pipe");
}

// ---------------------------------------------------------------------------
// Test: a failed replace leaves the live script and its sandbox untouched
// ---------------------------------------------------------------------------

fn reader(resources: &str) -> String {
    format!(
        "id: reader\nbody: resource(\"w.txt\")\nsandbox:\n  resources:\n{resources}  opener: !string\n    contents:\n      one: ONE\n      two: TWO\n"
    )
}

fn generations(home: &Path, id: &str) -> usize {
    std::fs::read_dir(home.join("sandboxes").join(id))
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.path().is_dir())
                .count()
        })
        .unwrap_or(0)
}

#[tokio::test]
async fn failed_replace_keeps_the_live_sandbox() {
    let home = tempfile::tempdir().expect("tempdir");
    let scripter = open(home.path()).await;
    let v1 = reader("    - path: w.txt\n      location: one\n");
    scripter.add(&v1, false).await.expect("add");
    assert_eq!(run(&scripter, "reader", None).await, Value::from("ONE"));

    let broken = reader(
        "    - path: w.txt\n      location: two\n    - path: z.txt\n      location: absent\n",
    );
    let result = scripter.add(&broken, true).await;
    assert_matches!(result, Err(CoreError::Sandbox(_)));

    assert_eq!(run(&scripter, "reader", None).await, Value::from("ONE"));
    assert_eq!(scripter.get_source("reader").await.expect("source"), Some(v1));
    assert_eq!(generations(home.path(), "reader"), 1);
}

#[tokio::test]
async fn replacing_swaps_in_a_fresh_sandbox() {
    let home = tempfile::tempdir().expect("tempdir");
    {
        let scripter = open(home.path()).await;
        scripter
            .add(&reader("    - path: w.txt\n      location: one\n"), false)
            .await
            .expect("add");
        scripter
            .add(&reader("    - path: w.txt\n      location: two\n"), true)
            .await
            .expect("replace");

        assert_eq!(run(&scripter, "reader", None).await, Value::from("TWO"));
        assert_eq!(generations(home.path(), "reader"), 1);
    }

    let scripter = open(home.path()).await;
    assert_eq!(run(&scripter, "reader", None).await, Value::from("TWO"));
    assert_eq!(generations(home.path(), "reader"), 1);

    scripter
        .add("id: reader\nbody: \"'plain'\"\n", true)
        .await
        .expect("replace without sandbox");
    assert_eq!(run(&scripter, "reader", None).await, Value::from("plain"));
    assert!(!home.path().join("sandboxes").join("reader").exists());
}

// ---------------------------------------------------------------------------
// Test: scripts survive a restart
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reopening_restores_scripts_and_services() {
    let home = tempfile::tempdir().expect("tempdir");
    {
        let scripter = open(home.path()).await;
        scripter.add(NORMALIZER, false).await.expect("add");
        scripter
            .add(
                "id: shouter\nusage: service\nservices: [normalizer]\nbody: \"{shout: |s| uppercase(normalizer.normalize(s))}\"\n",
                false,
            )
            .await
            .expect("add");
        scripter
            .add("id: announce\nservices: [shouter]\nbody: shouter.shout(text)\n", false)
            .await
            .expect("add");
        scripter.add(GREETER, false).await.expect("add");
    }

    let scripter = open(home.path()).await;

    assert_eq!(
        scripter.list_ids().await.expect("ids"),
        vec!["announce", "greeter", "normalizer", "shouter"]
    );
    let value = run(&scripter, "announce", Some(vars(&[("text", " hi   there ".into())]))).await;
    assert_eq!(value, Value::from("HI THERE"));
    let value = run(&scripter, "greeter", Some(vars(&[("name", "again".into())]))).await;
    assert_eq!(value, Value::from("AGAIN"));
}

// ---------------------------------------------------------------------------
// Test: services in use cannot be removed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn removal_respects_dependants() {
    let home = tempfile::tempdir().expect("tempdir");
    let scripter = open(home.path()).await;
    scripter.add(NORMALIZER, false).await.expect("add");
    scripter.add(TIDY, false).await.expect("add");

    let blocked = scripter.remove("normalizer").await;
    assert_matches!(blocked, Err(CoreError::Dependency(message)) if message == "normalizer has dependants: [tidy]");

    assert_eq!(scripter.remove("tidy").await.expect("remove").as_deref(), Some(TIDY));
    assert_eq!(
        scripter.remove("normalizer").await.expect("remove").as_deref(),
        Some(NORMALIZER)
    );
    assert!(scripter.list_ids().await.expect("ids").is_empty());
    assert!(!home.path().join("scripts/normalizer.yaml").exists());
}

// ---------------------------------------------------------------------------
// Test: missing services are reported by name
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_services_fail_until_added() {
    let home = tempfile::tempdir().expect("tempdir");
    let scripter = open(home.path()).await;
    scripter.add(TIDY, false).await.expect("add");

    let err = scripter
        .execute("tidy", Some(vars(&[("text", "x".into())])))
        .await
        .unwrap_err();
    assert_matches!(err, CoreError::Dependency(message) if message.contains("non-existent services [normalizer]"));

    scripter.add(NORMALIZER, false).await.expect("add");
    let value = run(&scripter, "tidy", Some(vars(&[("text", " x ".into())]))).await;
    assert_eq!(value, Value::from("x"));
}

// ---------------------------------------------------------------------------
// Test: invocation variables beat global variables
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invocation_variables_override_globals() {
    let home = tempfile::tempdir().expect("tempdir");
    let scripter = open(home.path()).await;
    scripter
        .add("id: scaled\nglobalVariables:\n  x: 1\n  factor: 10\nbody: x * factor\n", false)
        .await
        .expect("add");

    assert_eq!(run(&scripter, "scaled", None).await, Value::Int(10));
    assert_eq!(
        run(&scripter, "scaled", Some(vars(&[("x", Value::Int(2))]))).await,
        Value::Int(20)
    );
}

// ---------------------------------------------------------------------------
// Test: unknown ids
// ---------------------------------------------------------------------------

#[tokio::test]
async fn executing_unknown_scripts_is_not_found() {
    let home = tempfile::tempdir().expect("tempdir");
    let scripter = open(home.path()).await;

    let err = scripter.execute("ghost", None).await.unwrap_err();

    assert_matches!(err, CoreError::NotFound { entity: "Script", id } if id == "ghost");
    assert_eq!(scripter.get_source("ghost").await.expect("source"), None);
}

// ---------------------------------------------------------------------------
// Test: listing by pattern
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lists_ids_matching_any_pattern() {
    let home = tempfile::tempdir().expect("tempdir");
    let scripter = open(home.path()).await;
    for id in ["report-daily", "report-weekly", "cleanup", "backup"] {
        scripter
            .add(&format!("id: {id}\nbody: '1'\n"), false)
            .await
            .expect("add");
    }

    let reports = scripter
        .list_ids_matching(&["^report-".to_string()])
        .await
        .expect("list");
    assert_eq!(reports, vec!["report-daily", "report-weekly"]);

    let union = scripter
        .list_ids_matching(&["weekly".to_string(), "^c".to_string()])
        .await
        .expect("list");
    assert_eq!(union, vec!["cleanup", "report-weekly"]);

    let all = scripter.list_ids_matching(&[]).await.expect("list");
    assert_eq!(all.len(), 4);
}

// ---------------------------------------------------------------------------
// Test: pipe scripts are transformed but stored as submitted
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pipe_scripts_run_as_expressions() {
    let home = tempfile::tempdir().expect("tempdir");
    let scripter = open(home.path()).await;
    scripter
        .add(
            "id: piped\nlanguage: pipe\nbody: text |> squish |> replace(\" \", \"-\")\n",
            false,
        )
        .await
        .expect("add");

    let value = run(&scripter, "piped", Some(vars(&[("text", " a  b c ".into())]))).await;
    assert_eq!(value, Value::from("a-b-c"));

    let script = scripter.get_script("piped").await.expect("script").expect("present");
    assert_eq!(script.language(), "pipe");
    assert_eq!(
        scripter.get_body("piped").await.expect("body").as_deref(),
        Some("text |> squish |> replace(\" \", \"-\")")
    );
}

// ---------------------------------------------------------------------------
// Test: invalid scripts are rejected without being stored
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_scripts_are_not_stored() {
    let home = tempfile::tempdir().expect("tempdir");
    let scripter = open(home.path()).await;

    let blank = scripter.add("id: blank\nbody: '   '\n", false).await;
    assert_matches!(blank, Err(CoreError::Validation(_)));

    let broken = scripter.add("id: broken\nbody: (1 +\n", false).await;
    assert_matches!(broken, Err(CoreError::Backend { script_id, .. }) if script_id == "broken");

    let unknown = scripter.add("id: odd\nlanguage: cobol\nbody: x\n", false).await;
    assert_matches!(unknown, Err(CoreError::Validation(_)));

    assert!(scripter.list_ids().await.expect("ids").is_empty());
}
