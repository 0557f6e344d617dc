use ai_goap::{GoapAction, GoapGoal, GoapPlanner, WorldState};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

/// `n` independent flags, each set by its own unit-cost action; the goal needs all of them.
fn toy_planner(n: usize) -> (GoapPlanner, WorldState, GoapGoal) {
    let mut actions = Vec::with_capacity(n + 1);
    let mut goal = GoapGoal::new("all_flags", 1);
    for i in 0..n {
        let key = format!("flag_{i}");
        actions.push(
            GoapAction::new(format!("set_{i}"), 1.0)
                .effect(key.clone(), "true")
                .expect("effect"),
        );
        goal = goal.require(key, "true").expect("condition");
    }
    // A numeric chain gives the heuristic something to steer by.
    actions.push(
        GoapAction::new("gather", 1.0)
            .effect("wood", "+1")
            .expect("effect"),
    );
    goal = goal.require("wood", ">= 3").expect("condition");

    let planner = GoapPlanner::new(actions).expect("planner");
    (planner, WorldState::new(), goal)
}

fn bench_goap_planner(c: &mut Criterion) {
    let (planner, start, goal) = toy_planner(6);

    c.bench_function("ai-goap/planner.plan(flags=6,wood=3)", |b| {
        b.iter(|| {
            let outcome = planner.plan(&start, &goal).expect("plan");
            black_box(outcome.plan.map(|p| p.len()));
        })
    });
}

criterion_group!(benches, bench_goap_planner);
criterion_main!(benches);
