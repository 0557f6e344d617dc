use ai_goap::{plan, GoapAction, GoapGoal, GoapPlanner, HeuristicWarning, PlannerOptions, WorldState};

fn stay_fed() -> GoapGoal {
    GoapGoal::new("stay_fed", 10).require("hunger", "<= 0.3").unwrap()
}

fn eat() -> GoapAction {
    GoapAction::new("eat", 2.0)
        .precondition("hunger", "> 0.5")
        .unwrap()
        .precondition("gold", ">= 5")
        .unwrap()
        .effect("hunger", "-0.8")
        .unwrap()
        .effect("gold", "-5")
        .unwrap()
}

#[test]
fn eat_scenario_finds_single_step_plan() {
    let start = WorldState::new().with("hunger", 0.8).with("gold", 10);
    let outcome = plan(&start, &stay_fed(), &[eat()], PlannerOptions::default()).unwrap();

    let found = outcome.plan.expect("plan");
    assert_eq!(found.action_ids(), vec!["eat"]);
    assert_eq!(found.total_cost, 2.0);
    assert_eq!(found.goal_id, "stay_fed");

    let mut state = start.clone();
    for action in &found.actions {
        state = state.apply_effects(&action.effects).unwrap();
    }
    assert!(state.number("hunger").unwrap().abs() < 1e-9);
    assert_eq!(state.number("gold"), Some(5.0));
    assert!(state.satisfies_goal(&stay_fed()).unwrap());
}

#[test]
fn insufficient_gold_yields_no_plan() {
    let start = WorldState::new().with("hunger", 0.8).with("gold", 3);
    let outcome = plan(&start, &stay_fed(), &[eat()], PlannerOptions::default()).unwrap();
    assert!(outcome.plan.is_none());
    assert_eq!(outcome.nodes_expanded, 1);
}

#[test]
fn satisfied_goal_yields_empty_plan() {
    let start = WorldState::new().with("hunger", 0.1);
    let outcome = plan(&start, &stay_fed(), &[eat()], PlannerOptions::default()).unwrap();
    let found = outcome.plan.expect("plan");
    assert!(found.is_empty());
    assert_eq!(found.total_cost, 0.0);
    assert_eq!(outcome.nodes_expanded, 0);
}

fn wood_actions() -> Vec<GoapAction> {
    vec![
        GoapAction::new("chop_by_hand", 6.0).effect("wood", "+5").unwrap(),
        GoapAction::new("get_axe", 1.0)
            .precondition("has_axe", "false")
            .unwrap()
            .effect("has_axe", "true")
            .unwrap(),
        GoapAction::new("chop_with_axe", 10.0)
            .precondition("has_axe", "true")
            .unwrap()
            .effect("wood", "+10")
            .unwrap(),
    ]
}

fn wood_goal() -> GoapGoal {
    GoapGoal::new("stockpile", 1).require("wood", ">= 10").unwrap()
}

#[test]
fn returns_cheapest_plan_not_shortest_first_found() {
    let outcome = plan(
        &WorldState::new(),
        &wood_goal(),
        &wood_actions(),
        PlannerOptions::default(),
    )
    .unwrap();
    let found = outcome.plan.expect("plan");
    assert_eq!(found.action_ids(), vec!["get_axe", "chop_with_axe"]);
    assert_eq!(found.total_cost, 11.0);
}

#[test]
fn depth_bound_returns_none_rather_than_partial_plan() {
    let options = PlannerOptions {
        max_depth: 1,
        ..PlannerOptions::default()
    };
    let outcome = plan(&WorldState::new(), &wood_goal(), &wood_actions(), options).unwrap();
    assert!(outcome.plan.is_none());
}

#[test]
fn cheap_deep_visits_do_not_hide_shallow_ones() {
    // `inc, inc` reaches a == 2 cheaply but with no depth left; `jump` reaches it in one step.
    let actions = vec![
        GoapAction::new("inc", 0.1).effect("a", "+1").unwrap(),
        GoapAction::new("jump", 5.0)
            .precondition("a", "0")
            .unwrap()
            .effect("a", "=2")
            .unwrap(),
        GoapAction::new("finish", 1.0)
            .precondition("a", "2")
            .unwrap()
            .effect("done", "true")
            .unwrap(),
    ];
    let goal = GoapGoal::new("done", 1).require("done", "true").unwrap();
    let options = PlannerOptions {
        max_depth: 2,
        ..PlannerOptions::default()
    };

    let outcome = plan(&WorldState::new().with("a", 0.0), &goal, &actions, options).unwrap();
    let found = outcome.plan.expect("plan within two steps");
    assert_eq!(found.action_ids(), vec!["jump", "finish"]);
    assert_eq!(found.total_cost, 6.0);

    let unbounded = plan(
        &WorldState::new().with("a", 0.0),
        &goal,
        &actions,
        PlannerOptions::default(),
    )
    .unwrap();
    assert_eq!(
        unbounded.plan.expect("plan").action_ids(),
        vec!["inc", "inc", "finish"]
    );
}

#[test]
fn node_budget_returns_none() {
    let options = PlannerOptions {
        max_depth: 10,
        max_nodes_expanded: 1,
    };
    let outcome = plan(&WorldState::new(), &wood_goal(), &wood_actions(), options).unwrap();
    assert!(outcome.plan.is_none());
    assert_eq!(outcome.nodes_expanded, 1);
}

#[test]
fn planning_is_deterministic() {
    let planner = GoapPlanner::new(wood_actions()).unwrap();
    let first = planner.plan(&WorldState::new(), &wood_goal()).unwrap();
    for _ in 0..5 {
        let again = planner.plan(&WorldState::new(), &wood_goal()).unwrap();
        assert_eq!(again.plan, first.plan);
        assert_eq!(again.nodes_expanded, first.nodes_expanded);
    }
}

#[test]
fn equal_cost_ties_break_by_declaration_order() {
    let actions = vec![
        GoapAction::new("walk", 1.0).effect("at_door", "true").unwrap(),
        GoapAction::new("run", 1.0).effect("at_door", "true").unwrap(),
    ];
    let goal = GoapGoal::new("door", 0).require("at_door", "true").unwrap();
    let found = plan(&WorldState::new(), &goal, &actions, PlannerOptions::default())
        .unwrap()
        .plan
        .expect("plan");
    assert_eq!(found.action_ids(), vec!["walk"]);
}

#[test]
fn negative_cost_is_rejected() {
    let err = GoapPlanner::new(vec![GoapAction::new("cheat", -1.0)]).unwrap_err();
    assert_eq!(err.code(), ai_core::ErrorCode::CompileError);
}

#[test]
fn overshooting_effects_are_reported() {
    let planner = GoapPlanner::new(vec![
        GoapAction::new("feast", 1.0).effect("hunger", "-5").unwrap(),
        GoapAction::new("reset", 1.0).effect("hunger", "=0").unwrap(),
        eat(),
    ])
    .unwrap();
    let warnings = planner.check_admissibility(&[stay_fed()]);
    assert_eq!(
        warnings,
        vec![
            HeuristicWarning::Overshoot {
                action: "feast".into(),
                key: "hunger".into(),
                delta: -5.0,
                cost: 1.0,
            },
            HeuristicWarning::AbsoluteAssignment {
                action: "reset".into(),
                key: "hunger".into(),
            },
        ]
    );
}
