use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ai_abml::{
    ActionHandler, ActionRegistry, ActionRequest, ActionResult, ChannelStatus, Compiler, Document,
    ExecutionReport, ExecutionStatus, Executor, ExecutorConfig,
};
use ai_core::{CancellationToken, Clock, ErrorCode, ManualClock, Value, VariableScope};

fn compile(source: &str) -> Document {
    Compiler::new().compile_yaml(source).unwrap()
}

fn executor(registry: ActionRegistry) -> (Executor, ManualClock) {
    let clock = ManualClock::new();
    let executor = Executor::new(Arc::new(registry)).with_clock(Arc::new(clock.clone()));
    (executor, clock)
}

fn run(source: &str) -> ExecutionReport {
    let (executor, _) = executor(ActionRegistry::with_builtins());
    executor.run(&compile(source), VariableScope::new(), &CancellationToken::new())
}

fn var<'r>(report: &'r ExecutionReport, name: &str) -> Option<&'r Value> {
    report.scope.get(name)
}

fn status(report: &ExecutionReport, channel: &str) -> ChannelStatus {
    report.channel(channel).unwrap().status
}

fn tagged(report: &ExecutionReport, tag: &str) -> usize {
    report.trace.with_tag(tag).count()
}

/// Always fails with `boom`.
struct Fail;

impl ActionHandler for Fail {
    fn execute(&self, _request: &ActionRequest<'_>) -> ActionResult {
        ActionResult::failed("boom")
    }
}

/// Reports `Started`, then completes after a fixed number of polls.
struct Walk {
    polls_left: AtomicU32,
}

impl ActionHandler for Walk {
    fn execute(&self, request: &ActionRequest<'_>) -> ActionResult {
        ActionResult::started(request.str_param("to").unwrap_or("nowhere"))
    }

    fn poll(&self, _request: &ActionRequest<'_>, ticket: &Value) -> ActionResult {
        if self.polls_left.fetch_sub(1, Ordering::SeqCst) > 1 {
            return ActionResult::started(ticket.clone());
        }
        ActionResult::completed().with_value(format!("arrived at {ticket}"))
    }
}

/// Never finishes; records cancellation.
#[derive(Default)]
struct Hang {
    cancelled: AtomicBool,
}

impl ActionHandler for Hang {
    fn execute(&self, _request: &ActionRequest<'_>) -> ActionResult {
        ActionResult::started(Value::Null)
    }

    fn poll(&self, _request: &ActionRequest<'_>, ticket: &Value) -> ActionResult {
        ActionResult::started(ticket.clone())
    }

    fn cancel(&self, _request: &ActionRequest<'_>, _ticket: &Value) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

fn with_fail() -> ActionRegistry {
    let mut registry = ActionRegistry::with_builtins();
    registry.register("fail", Arc::new(Fail)).unwrap();
    registry
}

#[test]
fn channels_that_emit_before_waiting_complete() {
    let report = run(
        r#"
metadata: { id: handshake }
channels:
  a:
    - emit: a_ready
    - wait_for: b_ready
    - { set: { variable: a_done, value: true } }
  b:
    - emit: b_ready
    - wait_for: a_ready
    - { set: { variable: b_done, value: true } }
"#,
    );
    assert_eq!(report.status, ExecutionStatus::Complete, "{:?}", report.errors);
    assert_eq!(var(&report, "a_done"), Some(&Value::Bool(true)));
    assert_eq!(var(&report, "b_done"), Some(&Value::Bool(true)));
    assert_eq!(report.emitted, vec!["a_ready", "b_ready"]);
    assert_eq!(status(&report, "a"), ChannelStatus::Complete);
    assert!(report.errors.is_empty());
}

#[test]
fn channels_waiting_on_points_nobody_emits_deadlock() {
    let report = run(
        r#"
metadata: { id: stuck }
channels:
  a: [ { wait_for: x } ]
  b: [ { wait_for: y } ]
"#,
    );
    assert_eq!(report.status, ExecutionStatus::Failed);
    let error = report.first_error(ErrorCode::DeadlockDetected).unwrap();
    assert!(error.message.contains("`a`") && error.message.contains("`b`"), "{error}");
    assert_eq!(status(&report, "a"), ChannelStatus::Failed);
    assert_eq!(status(&report, "b"), ChannelStatus::Failed);
    assert_eq!(
        report.channel("a").unwrap().error.as_ref().map(|e| e.code),
        Some(ErrorCode::DeadlockDetected)
    );
    assert_eq!(tagged(&report, "abml.deadlock"), 1);
}

#[test]
fn a_lone_unsatisfiable_wait_stalls() {
    let report = run(
        r#"
metadata: { id: lonely }
flows:
  start: [ { wait_for: never } ]
"#,
    );
    assert_eq!(report.status, ExecutionStatus::Failed);
    assert!(report.first_error(ErrorCode::StalledExecution).is_some());
    assert!(report.first_error(ErrorCode::DeadlockDetected).is_none());
    // One pass to start waiting, then the default three stalled passes.
    assert_eq!(report.passes, 4);
}

#[test]
fn waiters_on_a_failed_emitter_stall_instead_of_deadlocking() {
    let (executor, _) = executor(with_fail());
    let document = compile(
        r#"
metadata: { id: crashed }
channels:
  a: [ { wait_for: x } ]
  b: [ { wait_for: y } ]
  c:
    - fail: {}
    - emit: x
    - emit: y
"#,
    );
    let report = executor.run(&document, VariableScope::new(), &CancellationToken::new());

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_eq!(
        report.channel("c").unwrap().error.as_ref().map(|e| e.code),
        Some(ErrorCode::ActionHandlerFailure)
    );
    assert!(report.first_error(ErrorCode::StalledExecution).is_some(), "{:?}", report.errors);
    assert!(report.first_error(ErrorCode::DeadlockDetected).is_none(), "{:?}", report.errors);
    assert_eq!(tagged(&report, "abml.deadlock"), 0);
    assert_eq!(tagged(&report, "abml.stalled"), 1);
}

#[test]
fn barrier_waits_for_every_point() {
    let report = run(
        r#"
metadata: { id: barrier }
channels:
  a:
    - wait_for: [x, y]
    - { set: { variable: seen_mid, value: "${mid}" } }
  b:
    - emit: x
    - { set: { variable: mid, value: true } }
    - emit: y
"#,
    );
    assert!(report.is_complete(), "{:?}", report.errors);
    assert_eq!(var(&report, "seen_mid"), Some(&Value::Bool(true)));
    let wakes: Vec<_> = report.trace.with_tag("abml.wake").collect();
    assert_eq!(wakes.len(), 1);
    assert_eq!(wakes[0].subject, "a");
}

#[test]
fn any_of_wakes_on_the_first_point() {
    let report = run(
        r#"
metadata: { id: race }
channels:
  a:
    - wait_for: { any_of: [x, y] }
    - { set: { variable: got, value: true } }
  b:
    - emit: y
"#,
    );
    assert!(report.is_complete(), "{:?}", report.errors);
    assert_eq!(var(&report, "got"), Some(&Value::Bool(true)));
}

#[test]
fn timed_out_waits_run_their_fallback_and_continue() {
    let (executor, clock) = executor(ActionRegistry::with_builtins());
    let document = compile(
        r#"
metadata: { id: patience }
flows:
  start:
    - wait_for: { point: never, timeout: 100ms, on_timeout: [ { set: { variable: timed_out, value: true } } ] }
    - { set: { variable: after, value: true } }
"#,
    );
    let report = executor.run(&document, VariableScope::new(), &CancellationToken::new());

    assert!(report.is_complete(), "{:?}", report.errors);
    assert_eq!(var(&report, "timed_out"), Some(&Value::Bool(true)));
    assert_eq!(var(&report, "after"), Some(&Value::Bool(true)));
    assert_eq!(tagged(&report, "abml.wait.timeout"), 1);
    assert!(clock.now() >= Duration::from_millis(100));
}

#[test]
fn on_error_binds_the_error_and_resumes() {
    let (executor, _) = executor(with_fail());
    let document = compile(
        r#"
metadata: { id: recover }
flows:
  start:
    - fail: {}
      on_error:
        - { set: { variable: code, value: "${error.code}" } }
        - { set: { variable: message, value: "${error.message}" } }
        - { set: { variable: at, value: "${error.action}" } }
    - { set: { variable: after, value: "${error ?? 'unbound'}" } }
"#,
    );
    let report = executor.run(&document, VariableScope::new(), &CancellationToken::new());

    assert!(report.is_complete(), "{:?}", report.errors);
    assert_eq!(var(&report, "code"), Some(&Value::from("action_handler_failure")));
    assert_eq!(var(&report, "message"), Some(&Value::from("boom")));
    assert_eq!(var(&report, "at"), Some(&Value::from("flows.start[0]")));
    assert_eq!(var(&report, "after"), Some(&Value::from("unbound")));
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].handled);
    assert_eq!(report.unhandled_errors().count(), 0);
}

#[test]
fn the_errors_table_replaces_the_rest_of_the_channel() {
    let (executor, _) = executor(with_fail());
    let document = compile(
        r#"
metadata: { id: table }
flows:
  start:
    - fail: {}
    - { set: { variable: after, value: true } }
errors:
  action_handler_failure:
    - { set: { variable: handled, value: "${error.message}" } }
"#,
    );
    let report = executor.run(&document, VariableScope::new(), &CancellationToken::new());

    assert!(report.is_complete(), "{:?}", report.errors);
    assert_eq!(var(&report, "handled"), Some(&Value::from("boom")));
    assert_eq!(var(&report, "after"), None);
    assert!(report.errors[0].handled);
}

#[test]
fn the_default_error_handler_catches_unknown_action_types() {
    let report = run(
        r#"
metadata: { id: fallback }
flows:
  start: [ { teleport: { x: 1 } } ]
errors:
  default:
    - { set: { variable: code, value: "${error.code}" } }
"#,
    );
    assert!(report.is_complete(), "{:?}", report.errors);
    assert_eq!(var(&report, "code"), Some(&Value::from("unknown_action_type")));
}

#[test]
fn unhandled_failures_fail_only_their_channel() {
    let (executor, _) = executor(with_fail());
    let document = compile(
        r#"
metadata: { id: siblings }
channels:
  a: [ { fail: {} }, { set: { variable: a_after, value: true } } ]
  b: [ { set: { variable: x, value: 1 } }, { set: { variable: y, value: 2 } } ]
"#,
    );
    let report = executor.run(&document, VariableScope::new(), &CancellationToken::new());

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_eq!(status(&report, "a"), ChannelStatus::Failed);
    assert_eq!(status(&report, "b"), ChannelStatus::Complete);
    assert_eq!(var(&report, "y"), Some(&Value::from(2)));
    assert_eq!(var(&report, "a_after"), None);
    let error = report.channel("a").unwrap().error.as_ref().unwrap();
    assert_eq!(error.code, ErrorCode::ActionHandlerFailure);
    assert_eq!(error.channel.as_deref(), Some("a"));
}

#[test]
fn cancellation_before_start_cancels_every_channel() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let (executor, _) = executor(ActionRegistry::with_builtins());
    let document = compile(
        r#"
metadata: { id: cancelled }
channels:
  a: [ { set: { variable: x, value: 1 } } ]
  b: [ { set: { variable: y, value: 1 } } ]
"#,
    );
    let report = executor.run(&document, VariableScope::new(), &cancel);

    assert_eq!(report.status, ExecutionStatus::Cancelled);
    assert_eq!(status(&report, "a"), ChannelStatus::Cancelled);
    assert_eq!(report.channel("b").unwrap().steps_executed, 0);
    assert!(report.first_error(ErrorCode::Cancelled).is_some());
}

#[test]
fn cancellation_is_observed_between_steps() {
    struct CancelNow(CancellationToken);

    impl ActionHandler for CancelNow {
        fn execute(&self, _request: &ActionRequest<'_>) -> ActionResult {
            self.0.cancel();
            ActionResult::completed()
        }
    }

    let cancel = CancellationToken::new();
    let mut registry = ActionRegistry::with_builtins();
    registry
        .register("cancel_now", Arc::new(CancelNow(cancel.clone())))
        .unwrap();
    let (executor, _) = executor(registry);
    let document = compile(
        r#"
metadata: { id: interrupted }
flows:
  start: [ { cancel_now: {} }, { set: { variable: x, value: 1 } } ]
"#,
    );
    let report = executor.run(&document, VariableScope::new(), &cancel);

    assert_eq!(report.status, ExecutionStatus::Cancelled);
    assert_eq!(var(&report, "x"), None);
}

#[test]
fn awaited_actions_are_polled_until_complete() {
    let mut registry = ActionRegistry::with_builtins();
    registry
        .register(
            "walk",
            Arc::new(Walk {
                polls_left: AtomicU32::new(2),
            }),
        )
        .unwrap();
    let (executor, _) = executor(registry);
    let document = compile(
        r#"
metadata: { id: errand }
flows:
  start:
    - { walk: { to: door }, result: where }
    - { set: { variable: done, value: true } }
"#,
    );
    let report = executor.run(&document, VariableScope::new(), &CancellationToken::new());

    assert!(report.is_complete(), "{:?}", report.errors);
    assert_eq!(var(&report, "where"), Some(&Value::from("arrived at door")));
    assert_eq!(var(&report, "done"), Some(&Value::Bool(true)));
    assert_eq!(tagged(&report, "abml.action.resolved"), 1);
}

#[test]
fn awaited_actions_time_out_and_are_cancelled() {
    let hang = Arc::new(Hang::default());
    let mut registry =
        ActionRegistry::with_builtins().with_timeout("hang", Duration::from_millis(50));
    registry.register("hang", hang.clone()).unwrap();
    let (executor, clock) = executor(registry);
    let document = compile(
        r#"
metadata: { id: stuck_action }
flows:
  start:
    - hang: {}
      on_error:
        - { set: { variable: reason, value: "${error.message}" } }
"#,
    );
    let report = executor.run(&document, VariableScope::new(), &CancellationToken::new());

    assert!(report.is_complete(), "{:?}", report.errors);
    assert!(hang.cancelled.load(Ordering::SeqCst));
    assert_eq!(
        var(&report, "reason"),
        Some(&Value::from("`hang` timed out after 50ms"))
    );
    assert!(clock.now() >= Duration::from_millis(50));
}

#[test]
fn fire_and_forget_does_not_wait() {
    let hang = Arc::new(Hang::default());
    let mut registry = ActionRegistry::with_builtins();
    registry.register("hang", hang.clone()).unwrap();
    let (executor, _) = executor(registry);
    let document = compile(
        r#"
metadata: { id: forget }
flows:
  start:
    - { hang: {}, await: false }
    - { set: { variable: moved_on, value: true } }
"#,
    );
    let report = executor.run(&document, VariableScope::new(), &CancellationToken::new());

    assert!(report.is_complete(), "{:?}", report.errors);
    assert_eq!(var(&report, "moved_on"), Some(&Value::Bool(true)));
    assert!(!hang.cancelled.load(Ordering::SeqCst));
}

#[test]
fn branch_ends_the_channel_and_starts_its_target() {
    let report = run(
        r#"
metadata: { id: handoff }
channels:
  intro:
    - { set: { variable: a, value: 1 } }
    - { branch: outro }
    - { set: { variable: never, value: true } }
  outro:
    - { set: { variable: b, value: 2 } }
"#,
    );
    assert!(report.is_complete(), "{:?}", report.errors);
    assert_eq!(status(&report, "intro"), ChannelStatus::Branched);
    assert_eq!(status(&report, "outro"), ChannelStatus::Complete);
    assert_eq!(var(&report, "b"), Some(&Value::from(2)));
    assert_eq!(var(&report, "never"), None);
    assert_eq!(tagged(&report, "abml.branch"), 1);
}

#[test]
fn unreached_branch_targets_stay_dormant() {
    let report = run(
        r#"
metadata: { id: maybe }
channels:
  main:
    - cond:
        - { when: "false", then: [ { branch: extra } ] }
  extra:
    - { set: { variable: ran, value: true } }
"#,
    );
    assert!(report.is_complete(), "{:?}", report.errors);
    assert_eq!(status(&report, "extra"), ChannelStatus::Dormant);
    assert_eq!(var(&report, "ran"), None);
}

#[test]
fn branching_to_the_running_channel_just_ends_it() {
    let report = run(
        r#"
metadata: { id: loop_back }
channels:
  lead: [ { branch: worker } ]
  worker:
    - call: hop
    - { set: { variable: after, value: true } }
flows:
  hop: [ { branch: worker } ]
"#,
    );
    assert!(report.is_complete(), "{:?}", report.errors);
    assert_eq!(status(&report, "lead"), ChannelStatus::Branched);
    assert_eq!(status(&report, "worker"), ChannelStatus::Branched);
    assert_eq!(var(&report, "after"), None);
    assert_eq!(tagged(&report, "abml.branch"), 2);
}

#[test]
fn call_returns_and_goto_transfers() {
    let report = run(
        r#"
metadata: { id: flows }
flows:
  greet:
    - { increment: calls }
    - return
    - { set: { variable: unreachable, value: true } }
  start:
    - { call: greet }
    - { call: greet }
    - { goto: finish }
    - { set: { variable: skipped, value: true } }
  finish:
    - { set: { variable: done, value: true } }
"#,
    );
    assert!(report.is_complete(), "{:?}", report.errors);
    assert_eq!(var(&report, "calls"), Some(&Value::from(2)));
    assert_eq!(var(&report, "done"), Some(&Value::Bool(true)));
    assert_eq!(var(&report, "unreachable"), None);
    assert_eq!(var(&report, "skipped"), None);
}

#[test]
fn loops_bind_locals_that_do_not_leak() {
    let report = run(
        r#"
metadata: { id: loops }
flows:
  start:
    - for_each:
        variable: item
        collection: "${[1, 2, 3]}"
        do: [ { increment: { variable: total, by: "${item}" } } ]
    - repeat:
        times: 3
        variable: i
        do: [ { increment: { variable: index_sum, by: "${i}" } } ]
    - { set: { variable: leaked, value: "${item ?? 'no'}" } }
"#,
    );
    assert!(report.is_complete(), "{:?}", report.errors);
    assert_eq!(var(&report, "total"), Some(&Value::from(6)));
    assert_eq!(var(&report, "index_sum"), Some(&Value::from(3)));
    assert_eq!(var(&report, "leaked"), Some(&Value::from("no")));
    assert_eq!(var(&report, "item"), None);
}

#[test]
fn cond_picks_the_first_true_branch() {
    let report = run(
        r#"
metadata: { id: sizes }
variables: { n: 5 }
flows:
  start:
    - cond:
        - { when: "n > 10", then: [ { set: { variable: size, value: big } } ] }
        - { when: "${n > 3}", then: [ { set: { variable: size, value: medium } } ] }
        - { else: [ { set: { variable: size, value: small } } ] }
    - cond:
        if: "n == 0"
        then: [ { set: { variable: zero, value: true } } ]
        else: [ { set: { variable: zero, value: false } } ]
"#,
    );
    assert!(report.is_complete(), "{:?}", report.errors);
    assert_eq!(var(&report, "size"), Some(&Value::from("medium")));
    assert_eq!(var(&report, "zero"), Some(&Value::Bool(false)));
}

#[test]
fn caller_scope_overrides_document_defaults() {
    let (executor, _) = executor(ActionRegistry::with_builtins());
    let document = compile(
        r#"
metadata: { id: defaults }
variables: { alert: 0, mood: calm }
flows:
  start: [ { increment: alert } ]
"#,
    );
    let scope = VariableScope::new().with_variable("alert", 3);
    let report = executor.run(&document, scope, &CancellationToken::new());

    assert_eq!(var(&report, "alert"), Some(&Value::from(4)));
    assert_eq!(var(&report, "mood"), Some(&Value::from("calm")));
}

#[test]
fn log_returns_the_rendered_message() {
    let (executor, _) = executor(ActionRegistry::with_builtins());
    let document = compile(
        r#"
metadata: { id: chatter }
flows:
  start:
    - { log: { message: "hi ${name}", level: debug }, result: said }
"#,
    );
    let scope = VariableScope::new().with_variable("name", "bob");
    let report = executor.run(&document, scope, &CancellationToken::new());

    assert_eq!(var(&report, "said"), Some(&Value::from("hi bob")));
}

#[test]
fn call_depth_is_bounded() {
    let (executor, _) = executor(ActionRegistry::with_builtins());
    let executor = executor.with_config(ExecutorConfig {
        max_call_depth: 4,
        ..ExecutorConfig::default()
    });
    let document = compile(
        r#"
metadata: { id: recursion }
flows:
  recurse: [ { call: recurse } ]
  start: [ { call: recurse } ]
"#,
    );
    let report = executor.run(&document, VariableScope::new(), &CancellationToken::new());

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_eq!(status(&report, "main"), ChannelStatus::Failed);
    assert!(report.first_error(ErrorCode::CallDepthExceeded).is_some());
}

#[test]
fn the_overall_deadline_is_enforced() {
    let (executor, clock) = executor(ActionRegistry::with_builtins());
    let executor = executor.with_config(ExecutorConfig {
        overall_timeout_ms: Some(100),
        ..ExecutorConfig::default()
    });
    let document = compile(
        r#"
metadata: { id: slow }
flows:
  start: [ { wait_for: { point: never, timeout: 10s } } ]
"#,
    );
    let report = executor.run(&document, VariableScope::new(), &CancellationToken::new());

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert!(report.first_error(ErrorCode::DeadlineExceeded).is_some());
    assert_eq!(status(&report, "main"), ChannelStatus::Failed);
    assert!(clock.now() < Duration::from_secs(10));
}

#[test]
fn equal_seeds_give_equal_random_streams() {
    let document = compile(
        r#"
metadata: { id: dice }
flows:
  start:
    - { set: { variable: roll, value: "${random_int(1, 1000000)}" } }
"#,
    );
    let roll = |seed: u64| {
        let (executor, _) = executor(ActionRegistry::with_builtins());
        let executor = executor.with_config(ExecutorConfig {
            seed,
            ..ExecutorConfig::default()
        });
        let report = executor.run(&document, VariableScope::new(), &CancellationToken::new());
        report.scope.get("roll").cloned()
    };
    assert!(roll(7).is_some());
    assert_eq!(roll(7), roll(7));
}

#[test]
fn reports_serialize_to_json() {
    let report = run(
        r#"
metadata: { id: json }
flows:
  start: [ { emit: done } ]
"#,
    );
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["status"], "complete");
    assert_eq!(json["channels"]["main"]["status"], "complete");
    assert_eq!(json["emitted"][0], "done");
}
