use std::collections::BTreeMap;
use std::sync::Arc;

use ai_core::{
    CoreError, ErrorCode, Locals, MapProvider, ScopeChain, ScopeLayer, Value, VariableLookup,
    VariableScope,
};

fn world() -> Arc<MapProvider> {
    let mut values = BTreeMap::new();
    values.insert("weather".to_string(), Value::from("rain"));
    values.insert("hour".to_string(), Value::from(21));
    Arc::new(MapProvider::read_only(values))
}

#[test]
fn unprefixed_lookup_walks_local_document_then_providers() {
    let mut shared = VariableScope::new()
        .with_variable("hour", 9)
        .with_world(world());
    let mut locals = Locals::new();
    locals.insert("weather".to_string(), Value::from("sun"));

    let chain = ScopeChain::new(&mut locals, &mut shared);
    assert_eq!(chain.lookup("weather"), Some(Value::from("sun")));
    assert_eq!(chain.lookup("hour"), Some(Value::from(9)));
    assert_eq!(chain.lookup_in(ScopeLayer::World, "hour"), Some(Value::from(21)));
    assert_eq!(chain.get_path("world.weather"), Some(Value::from("rain")));
    assert_eq!(chain.lookup("missing"), None);
}

#[test]
fn set_creates_nested_maps_in_document_layer() {
    let mut shared = VariableScope::new();
    let mut locals = Locals::new();
    {
        let mut chain = ScopeChain::new(&mut locals, &mut shared);
        chain.set("inventory.iron", Value::from(3)).unwrap();
        chain.set("inventory.wood", Value::from(1)).unwrap();
    }
    assert!(locals.is_empty());
    assert_eq!(shared.get_path("inventory.iron"), Some(Value::from(3)));
    assert_eq!(shared.get_path("inventory.wood"), Some(Value::from(1)));
}

#[test]
fn set_prefers_existing_local_binding() {
    let mut shared = VariableScope::new().with_variable("item", "doc");
    let mut locals = Locals::new();
    locals.insert("item".to_string(), Value::from("local"));
    {
        let mut chain = ScopeChain::new(&mut locals, &mut shared);
        chain.set("item", Value::from("updated")).unwrap();
    }
    assert_eq!(locals.get("item"), Some(&Value::from("updated")));
    assert_eq!(shared.document().get("item"), Some(&Value::from("doc")));
}

#[test]
fn read_only_provider_rejects_writes() {
    let mut shared = VariableScope::new().with_world(world());
    let err = shared.set("world.weather", Value::from("snow")).unwrap_err();
    assert!(matches!(err, CoreError::ReadOnlyScope { .. }));
}

#[test]
fn writable_provider_accepts_nested_writes() {
    let provider = Arc::new(MapProvider::writable(BTreeMap::new()));
    let mut shared = VariableScope::new().with_entity(provider.clone());
    shared.set("entity.mood.anger", Value::from(0.5)).unwrap();
    let snapshot = provider.snapshot();
    assert_eq!(
        snapshot.get("mood").and_then(|m| m.member("anger")),
        Some(&Value::from(0.5))
    );
}

#[test]
fn increment_rejects_non_numeric_values() {
    let mut shared = VariableScope::new().with_variable("name", "guard");
    let mut locals = Locals::new();
    let mut chain = ScopeChain::new(&mut locals, &mut shared);

    assert_eq!(chain.increment("counter", 2.0).unwrap(), 2.0);
    assert_eq!(chain.increment("counter", -0.5).unwrap(), 1.5);

    let err = chain.increment("name", 1.0).unwrap_err();
    assert_eq!(err.code(), ErrorCode::TypeMismatch);
}

#[test]
fn truthiness_and_display() {
    assert!(!Value::Null.is_truthy());
    assert!(!Value::from(0).is_truthy());
    assert!(Value::from("x").is_truthy());
    assert!(!Value::List(vec![]).is_truthy());
    assert_eq!(Value::from(3).to_string(), "3");
    assert_eq!(Value::from(0.25).to_string(), "0.25");
    assert_eq!(
        Value::List(vec![Value::from(1), Value::from("a")]).to_string(),
        "[1, a]"
    );
}

#[test]
fn error_codes_round_trip_through_names() {
    for code in ErrorCode::ALL {
        assert_eq!(ErrorCode::parse(code.as_str()), Some(code));
    }
    assert_eq!(
        serde_json::to_string(&ErrorCode::DeadlockDetected).unwrap(),
        "\"deadlock_detected\""
    );
}
