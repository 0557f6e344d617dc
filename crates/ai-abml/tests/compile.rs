use std::sync::Arc;

use ai_abml::{
    AbmlError, ActionRegistry, AwaitMode, Compiler, DocumentType, GoapCatalog, StepKind, WaitMode,
};
use ai_core::ErrorCode;

fn diagnostics(source: &str) -> Vec<String> {
    match Compiler::new().compile_yaml(source) {
        Ok(document) => panic!("`{}` unexpectedly compiled", document.id),
        Err(err) => {
            assert_eq!(err.code(), ErrorCode::CompileError);
            err.diagnostics().iter().map(ToString::to_string).collect()
        }
    }
}

#[test]
fn compiles_shorthand_and_explicit_actions() {
    let document = Compiler::new()
        .compile_yaml(
            r#"
documentType: cutscene
metadata: { id: intro }
variables: { lines: 0 }
channels:
  camera:
    - { type: emit, point: ready }
    - wait_for: [lines_done, music_done]
  dialogue:
    - wait_for: ready
    - { speak: "hello ${name}", await: false, result: spoken }
    - { increment: lines }
    - emit: lines_done
  music:
    - wait_for: { any_of: [ready, skip], timeout: 2s, on_timeout: [{ emit: music_done }] }
    - emit: music_done
"#,
        )
        .unwrap();

    assert_eq!(document.id, "intro");
    assert_eq!(document.document_type, DocumentType::Cutscene);
    assert_eq!(document.channels.len(), 3);
    assert!(document.channels.iter().all(|c| c.auto_start));

    let camera = document.channel("camera").unwrap();
    assert!(matches!(&camera.steps[0].kind, StepKind::Emit { point } if point == "ready"));
    match &camera.steps[1].kind {
        StepKind::WaitFor(spec) => {
            assert_eq!(spec.mode, WaitMode::AllOf);
            assert_eq!(spec.points, vec!["lines_done", "music_done"]);
        }
        other => panic!("unexpected step {other:?}"),
    }

    let dialogue = document.channel("dialogue").unwrap();
    let speak = &dialogue.steps[1];
    assert!(matches!(&speak.kind, StepKind::Domain { action_type, .. } if action_type == "speak"));
    assert_eq!(speak.await_mode, AwaitMode::FireAndForget);
    assert_eq!(speak.result.as_deref(), Some("spoken"));
    assert_eq!(speak.location, "channels.dialogue[1]");

    let music = document.channel("music").unwrap();
    match &music.steps[0].kind {
        StepKind::WaitFor(spec) => {
            assert_eq!(spec.mode, WaitMode::AnyOf);
            assert_eq!(spec.timeout, Some(std::time::Duration::from_secs(2)));
            assert_eq!(spec.on_timeout.as_ref().map(|b| b.len()), Some(1));
        }
        other => panic!("unexpected step {other:?}"),
    }

    let mut emitters: Vec<&str> = document.emitters_of("music_done").collect();
    emitters.sort_unstable();
    assert_eq!(emitters, vec!["music"]);
}

#[test]
fn documents_without_channels_run_the_start_flow() {
    let document = Compiler::new()
        .compile_yaml(
            r#"
metadata: { id: solo }
flows:
  start:
    - { set: { variable: x, value: 1 } }
    - return
"#,
        )
        .unwrap();
    assert_eq!(document.channels.len(), 1);
    assert_eq!(document.channels[0].name, "main");
    assert!(matches!(document.channels[0].steps[1].kind, StepKind::Return));
}

#[test]
fn collects_every_diagnostic_with_locations() {
    let found = diagnostics(
        r#"
metadata: { id: broken }
flows:
  start:
    - { set: { variable: x, value: "${1 +}" } }
    - { goto: nowhere }
    - { emit: "${dynamic}" }
    - { wait_for: { point: p, on_timeout: [] } }
"#,
    );
    assert_eq!(found.len(), 4, "{found:#?}");
    assert!(found[0].starts_with("flows.start[0]: "), "{found:#?}");
    assert!(found[1].contains("unknown flow `nowhere`"), "{found:#?}");
    assert!(found[2].contains("must be static"), "{found:#?}");
    assert!(found[3].contains("`on_timeout` without a `timeout`"), "{found:#?}");
}

#[test]
fn rejects_a_missing_document_id() {
    let found = diagnostics("flows: { start: [ { emit: a } ] }");
    assert!(found.iter().any(|d| d.starts_with("metadata.id")), "{found:#?}");
}

#[test]
fn goto_to_a_channel_suggests_branch() {
    let found = diagnostics(
        r#"
metadata: { id: d }
channels:
  a: [ { goto: b } ]
  b: [ { emit: x } ]
"#,
    );
    assert_eq!(found.len(), 1, "{found:#?}");
    assert!(found[0].contains("use `branch`"), "{found:#?}");
}

#[test]
fn branch_to_a_flow_is_an_error() {
    let found = diagnostics(
        r#"
metadata: { id: d }
flows:
  helper: [ { emit: x } ]
channels:
  a: [ { branch: helper } ]
"#,
    );
    assert!(
        found.iter().any(|d| d.contains("`branch` targets flow `helper`")),
        "{found:#?}"
    );
}

#[test]
fn channels_cannot_branch_to_themselves() {
    let found = diagnostics(
        r#"
metadata: { id: d }
channels:
  a:
    - { emit: x }
    - cond:
        - { when: "true", then: [ { branch: a } ] }
  b: [ { emit: y } ]
"#,
    );
    assert!(
        found
            .iter()
            .any(|d| d.starts_with("channels.a[1]") && d.contains("channel `a` branches to itself")),
        "{found:#?}"
    );
}

#[test]
fn branch_targets_start_dormant() {
    let document = Compiler::new()
        .compile_yaml(
            r#"
metadata: { id: d }
channels:
  intro: [ { branch: outro } ]
  outro: [ { emit: done } ]
"#,
        )
        .unwrap();
    assert!(document.channel("intro").unwrap().auto_start);
    assert!(!document.channel("outro").unwrap().auto_start);
}

#[test]
fn unknown_action_types_are_rejected_with_a_registry() {
    let registry = ActionRegistry::with_builtins();
    let err = Compiler::new()
        .with_registry(&registry)
        .compile_yaml(
            r#"
metadata: { id: d }
flows:
  start:
    - { log: hi }
    - { teleport: { x: 1 } }
"#,
        )
        .unwrap_err();
    let found: Vec<String> = err.diagnostics().iter().map(ToString::to_string).collect();
    assert_eq!(
        found,
        vec!["flows.start[1]: unknown action type `teleport`".to_string()]
    );
}

#[test]
fn ambiguous_shorthand_needs_an_explicit_type() {
    let found = diagnostics(
        r#"
metadata: { id: d }
flows:
  start:
    - { speak: hi, wave: true }
"#,
    );
    assert!(found[0].contains("ambiguous shorthand"), "{found:#?}");
}

#[test]
fn rejects_unknown_error_table_codes() {
    let found = diagnostics(
        r#"
metadata: { id: d }
flows: { start: [ { emit: a } ] }
errors:
  not_a_code: [ { emit: b } ]
"#,
    );
    assert_eq!(found, vec!["errors.not_a_code: unknown error code `not_a_code`"]);
}

#[test]
fn reports_static_wait_cycles() {
    let found = diagnostics(
        r#"
metadata: { id: d }
channels:
  a:
    - wait_for: b_ready
    - emit: a_ready
  b:
    - wait_for: a_ready
    - emit: b_ready
"#,
    );
    assert_eq!(found.len(), 1, "{found:#?}");
    assert!(found[0].starts_with("channels: wait cycle `a` -> `b` -> `a`"), "{found:#?}");
}

#[test]
fn emit_before_wait_is_not_a_cycle() {
    let document = Compiler::new().compile_yaml(
        r#"
metadata: { id: d }
channels:
  a: [ { emit: a_ready }, { wait_for: b_ready } ]
  b: [ { emit: b_ready }, { wait_for: a_ready } ]
"#,
    );
    assert!(document.is_ok(), "{document:?}");
}

#[test]
fn timed_waits_never_count_as_cycles() {
    let document = Compiler::new().compile_yaml(
        r#"
metadata: { id: d }
channels:
  a: [ { wait_for: { point: b_ready, timeout: 50 } }, { emit: a_ready } ]
  b: [ { wait_for: a_ready }, { emit: b_ready } ]
"#,
    );
    assert!(document.is_ok(), "{document:?}");
}

#[test]
fn extracts_goap_actions_and_goals_into_the_catalog() {
    let catalog = Arc::new(GoapCatalog::new());
    let document = Compiler::new()
        .with_catalog(catalog.clone())
        .compile_yaml(
            r#"
metadata: { id: villager }
goals:
  stay_fed: { priority: 10, conditions: { hunger: "<= 0.3" } }
  rest: { priority: 1, conditions: { energy: ">= 5" } }
flows:
  start:
    - { eat: { food: bread }, goap: { preconditions: { has_food: true }, effects: { hunger: "-0.5", has_food: false }, cost: 2 } }
    - { sleep: {}, goap: { name: nap, effects: { energy: "+5" } } }
"#,
        )
        .unwrap();

    let ids: Vec<&str> = document.goap_actions.iter().map(|a| a.id.as_str()).collect();
    assert_eq!(ids, vec!["start.0", "nap"]);
    assert_eq!(document.goap_actions[0].cost, 2.0);
    assert_eq!(document.goap_actions[1].cost, 1.0);
    assert!(document.goap_step("nap").is_some());

    let goals: Vec<&str> = document.goals.iter().map(|g| g.name.as_str()).collect();
    assert_eq!(goals, vec!["stay_fed", "rest"]);

    assert_eq!(catalog.document_ids(), vec!["villager".to_string()]);
    assert_eq!(catalog.actions("villager").map(|a| a.len()), Some(2));
    assert_eq!(catalog.goals("villager").map(|g| g.len()), Some(2));
}

#[test]
fn rejects_negative_goap_cost_and_bad_conditions() {
    let found = diagnostics(
        r#"
metadata: { id: d }
flows:
  start:
    - { eat: {}, goap: { preconditions: { hunger: "< hungry" }, cost: -1 } }
"#,
    );
    assert_eq!(found.len(), 2, "{found:#?}");
    assert!(found.iter().any(|d| d.starts_with("flows.start[0].goap.cost")));
    assert!(found
        .iter()
        .any(|d| d.starts_with("flows.start[0].goap.preconditions.hunger")));
}

#[test]
fn malformed_yaml_is_a_parse_error() {
    let err = Compiler::new().compile_yaml("metadata: [").unwrap_err();
    assert!(matches!(err, AbmlError::Parse { .. }));
    assert_eq!(err.code(), ErrorCode::CompileError);
}
