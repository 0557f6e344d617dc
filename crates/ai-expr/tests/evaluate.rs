use std::collections::BTreeMap;
use std::sync::Arc;

use ai_core::{ErrorCode, MapProvider, Value, VariableScope};
use ai_expr::{CompiledExpression, EvalEnv, ExprError};

fn scope() -> VariableScope {
    let npc = Value::map()
        .with("name", "Garrick")
        .with("stats", Value::map().with("hp", 30).with("max_hp", 40))
        .with("tags", Value::List(vec!["guard".into(), "night".into()]));
    let mut world = BTreeMap::new();
    world.insert("hour".to_string(), Value::from(22));
    VariableScope::new()
        .with_variable("npc", npc)
        .with_variable("gold", 5)
        .with_variable("empty", Value::Null)
        .with_world(Arc::new(MapProvider::read_only(world)))
}

fn eval(source: &str) -> Result<Value, ExprError> {
    CompiledExpression::parse(source)?.evaluate(&scope())
}

#[test]
fn arithmetic_precedence_and_grouping() {
    assert_eq!(eval("1 + 2 * 3").unwrap(), Value::from(7));
    assert_eq!(eval("(1 + 2) * 3").unwrap(), Value::from(9));
    assert_eq!(eval("10 % 4 - -1").unwrap(), Value::from(3));
    assert_eq!(eval("${ gold / 2 }").unwrap(), Value::Number(2.5));
}

#[test]
fn comparison_and_logic() {
    assert_eq!(eval("gold >= 5 && npc.stats.hp < 40").unwrap(), Value::Bool(true));
    assert_eq!(eval("gold > 10 or not false").unwrap(), Value::Bool(true));
    assert_eq!(eval("'guard' in npc.tags").unwrap(), Value::Bool(true));
    assert_eq!(eval("'a' < 'b'").unwrap(), Value::Bool(true));
}

#[test]
fn short_circuit_skips_undefined_right_side() {
    assert_eq!(eval("false && missing.value").unwrap(), Value::Bool(false));
    assert_eq!(eval("true || missing.value").unwrap(), Value::Bool(true));
}

#[test]
fn member_and_index_access() {
    assert_eq!(eval("npc.tags[1]").unwrap(), Value::from("night"));
    assert_eq!(eval("npc.tags.0").unwrap(), Value::from("guard"));
    assert_eq!(eval("npc.tags[-1]").unwrap(), Value::from("night"));
    assert_eq!(eval("npc['name']").unwrap(), Value::from("Garrick"));
    assert_eq!(eval("world.hour").unwrap(), Value::from(22));
    assert_eq!(eval("hour").unwrap(), Value::from(22));
}

#[test]
fn missing_path_is_undefined_variable() {
    let err = eval("npc.mood").unwrap_err();
    assert_eq!(err.code(), ErrorCode::UndefinedVariable);
    assert_eq!(
        err,
        ExprError::UndefinedVariable {
            path: "npc.mood".into()
        }
    );
    assert_eq!(eval("nobody").unwrap_err().code(), ErrorCode::UndefinedVariable);
}

#[test]
fn null_safe_access_and_coalescing_guard_missing_paths() {
    assert_eq!(eval("nobody?.name").unwrap(), Value::Null);
    assert_eq!(eval("empty?.name").unwrap(), Value::Null);
    assert_eq!(eval("nobody ?? 'fallback'").unwrap(), Value::from("fallback"));
    assert_eq!(eval("npc.mood ?? 'calm'").unwrap(), Value::from("calm"));
    assert_eq!(eval("gold ?? 0").unwrap(), Value::from(5));
    assert_eq!(eval("nobody?.stats.hp ?? -1").unwrap(), Value::from(-1));
}

#[test]
fn ternary_selects_branch() {
    assert_eq!(eval("gold > 3 ? 'rich' : 'poor'").unwrap(), Value::from("rich"));
    assert_eq!(eval("empty ? 1 : 2").unwrap(), Value::from(2));
}

#[test]
fn string_concatenation_and_display() {
    assert_eq!(eval("npc.name + ' has ' + gold").unwrap(), Value::from("Garrick has 5"));
    assert_eq!(eval("[1] + [2, 3]").unwrap(), Value::List(vec![1.into(), 2.into(), 3.into()]));
}

#[test]
fn type_errors_are_reported_not_coerced() {
    assert_eq!(eval("gold < 'x'").unwrap_err().code(), ErrorCode::TypeMismatch);
    assert_eq!(eval("-npc").unwrap_err().code(), ErrorCode::TypeMismatch);
    assert_eq!(eval("gold.x").unwrap_err().code(), ErrorCode::TypeMismatch);
    assert_eq!(eval("gold / 0").unwrap_err().code(), ErrorCode::TypeMismatch);
}

#[test]
fn builtin_functions() {
    assert_eq!(eval("max(1, gold, 3)").unwrap(), Value::from(5));
    assert_eq!(eval("min([4, 2, 8])").unwrap(), Value::from(2));
    assert_eq!(eval("clamp(npc.stats.hp / npc.stats.max_hp, 0, 0.5)").unwrap(), Value::Number(0.5));
    assert_eq!(eval("round(2.346, 2)").unwrap(), Value::Number(2.35));
    assert_eq!(eval("len(npc.tags)").unwrap(), Value::from(2));
    assert_eq!(eval("upper(npc.name)").unwrap(), Value::from("GARRICK"));
    assert_eq!(eval("join(npc.tags, '+')").unwrap(), Value::from("guard+night"));
    assert_eq!(eval("substring('behavior', 2, 3)").unwrap(), Value::from("hav"));
    assert_eq!(eval("to_number('12.5') + 1").unwrap(), Value::Number(13.5));
    assert_eq!(eval("sum([1, 2, 3])").unwrap(), Value::from(6));
    assert_eq!(eval("keys(npc.stats)").unwrap(), Value::List(vec!["hp".into(), "max_hp".into()]));
    assert_eq!(eval("is_empty([])").unwrap(), Value::Bool(true));
    assert_eq!(eval("concat('a', 1, true)").unwrap(), Value::from("a1true"));
}

#[test]
fn unknown_function_fails_at_compile_time() {
    let err = CompiledExpression::parse("explode(npc)").unwrap_err();
    assert_eq!(err.code(), ErrorCode::CompileError);
    assert!(matches!(err, ExprError::UnknownFunction { ref name, .. } if name == "explode"));
}

#[test]
fn random_helpers_are_seeded() {
    let expr = CompiledExpression::parse("random_int(1, 100)").unwrap();
    let scope = scope();
    let draw = |seed| {
        let mut env = EvalEnv::new(seed);
        (0..5)
            .map(|_| expr.evaluate_with(&scope, &mut env).unwrap())
            .collect::<Vec<_>>()
    };
    assert_eq!(draw(7), draw(7));
    for value in draw(9) {
        let n = value.as_f64().unwrap();
        assert!((1.0..=100.0).contains(&n));
    }
}

#[test]
fn time_helpers_use_the_fixed_clock() {
    let expr = CompiledExpression::parse("format_time(now(), '%Y-%m-%d')").unwrap();
    let mut env = EvalEnv::new(0).with_now(86_400.0);
    assert_eq!(expr.evaluate_with(&scope(), &mut env).unwrap(), Value::from("1970-01-02"));
}

#[test]
fn evaluation_does_not_write_the_scope() {
    let scope = scope();
    let before = scope.document().clone();
    CompiledExpression::parse("npc.stats.hp + gold")
        .unwrap()
        .evaluate(&scope)
        .unwrap();
    assert_eq!(scope.document(), &before);
}
