use core::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{admissibility_warnings, GoapAction, GoapGoal, GoapPlan, HeuristicWarning};
use crate::world::{StateKey, WorldState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerOptions {
    /// Maximum actions in a candidate plan.
    pub max_depth: usize,
    /// Maximum node expansions per call.
    pub max_nodes_expanded: usize,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_nodes_expanded: 1000,
        }
    }
}

/// Planner response: `plan` is `None` when no plan exists within the bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutcome {
    pub plan: Option<GoapPlan>,
    pub nodes_expanded: usize,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct GoapPlanner {
    actions: Vec<GoapAction>,
    options: PlannerOptions,
}

impl GoapPlanner {
    /// Rejects actions with negative cost.
    pub fn new(actions: Vec<GoapAction>) -> Result<Self> {
        for action in &actions {
            action.validate()?;
        }
        Ok(Self {
            actions,
            options: PlannerOptions::default(),
        })
    }

    pub fn with_options(mut self, options: PlannerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn actions(&self) -> &[GoapAction] {
        &self.actions
    }

    pub fn options(&self) -> PlannerOptions {
        self.options
    }

    /// Log (and return) actions whose effects break the heuristic's assumptions for `goals`.
    pub fn check_admissibility(&self, goals: &[GoapGoal]) -> Vec<HeuristicWarning> {
        let warnings = admissibility_warnings(&self.actions, goals);
        for warning in &warnings {
            tracing::warn!(%warning, "heuristic admissibility");
        }
        warnings
    }

    pub fn plan(&self, start: &WorldState, goal: &GoapGoal) -> Result<PlanOutcome> {
        plan(start, goal, &self.actions, self.options)
    }
}

/// A* over world states.
///
/// Nodes are ordered by `f = g + h`, then lower `g`, then insertion order. The goal test runs
/// when a node is popped, so the first goal node popped is cost-optimal under an admissible
/// heuristic.
pub fn plan(
    start: &WorldState,
    goal: &GoapGoal,
    actions: &[GoapAction],
    options: PlannerOptions,
) -> Result<PlanOutcome> {
    let started = Instant::now();

    if start.satisfies_goal(goal)? {
        return Ok(PlanOutcome {
            plan: Some(GoapPlan {
                goal_id: goal.name.clone(),
                actions: Vec::new(),
                total_cost: 0.0,
            }),
            nodes_expanded: 0,
            elapsed: started.elapsed(),
        });
    }

    #[derive(Debug, Clone, Copy)]
    struct OpenNode {
        f: f64,
        g: f64,
        node: usize,
        tie: u64,
    }

    impl OpenNode {
        fn compare(&self, other: &Self) -> Ordering {
            self.f
                .total_cmp(&other.f)
                .then_with(|| self.g.total_cmp(&other.g))
                .then_with(|| self.tie.cmp(&other.tie))
        }
    }

    impl PartialEq for OpenNode {
        fn eq(&self, other: &Self) -> bool {
            self.compare(other) == Ordering::Equal
        }
    }

    impl Eq for OpenNode {}

    impl Ord for OpenNode {
        fn cmp(&self, other: &Self) -> Ordering {
            // Reverse ordering to make BinaryHeap behave like a min-heap.
            other.compare(self)
        }
    }

    impl PartialOrd for OpenNode {
        fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
            Some(self.cmp(other))
        }
    }

    struct SearchNode {
        state: WorldState,
        parent: Option<(usize, usize)>,
        g: f64,
        depth: usize,
    }

    let h = |state: &WorldState| state.distance_to_goal(&goal.conditions);

    let mut nodes: Vec<SearchNode> = vec![SearchNode {
        state: start.clone(),
        parent: None,
        g: 0.0,
        depth: 0,
    }];
    // Pareto frontier of (cost, depth) per visited state. A visit prunes another only when it is
    // no worse on both.
    let mut visits: BTreeMap<StateKey, Vec<(f64, usize)>> = BTreeMap::new();
    visits.insert(start.key(), vec![(0.0, 0)]);

    let mut open = BinaryHeap::<OpenNode>::new();
    let mut tie: u64 = 0;
    open.push(OpenNode {
        f: h(start),
        g: 0.0,
        node: 0,
        tie,
    });
    tie += 1;

    let mut expanded: usize = 0;
    let mut found: Option<usize> = None;

    while let Some(entry) = open.pop() {
        let current = &nodes[entry.node];
        let superseded = visits.get(&current.state.key()).is_some_and(|frontier| {
            frontier.iter().any(|&(g, depth)| {
                g <= current.g && depth <= current.depth && (g < current.g || depth < current.depth)
            })
        });
        if superseded {
            continue; // stale heap entry
        }

        if current.state.satisfies_goal(goal)? {
            found = Some(entry.node);
            break;
        }

        if current.depth >= options.max_depth {
            continue;
        }
        if expanded >= options.max_nodes_expanded {
            break;
        }
        expanded += 1;

        let (state, g, depth) = (current.state.clone(), current.g, current.depth);
        for (action_idx, action) in actions.iter().enumerate() {
            if !state.satisfies(&action.preconditions)? {
                continue;
            }
            let next = state.apply_effects(&action.effects)?;
            if next == state {
                continue;
            }

            let next_g = g + action.cost;
            let next_depth = depth + 1;
            let frontier = visits.entry(next.key()).or_default();
            if frontier
                .iter()
                .any(|&(g, d)| g <= next_g && d <= next_depth)
            {
                continue;
            }
            frontier.retain(|&(g, d)| !(next_g <= g && next_depth <= d));
            frontier.push((next_g, next_depth));

            let f = next_g + h(&next);
            nodes.push(SearchNode {
                state: next,
                parent: Some((entry.node, action_idx)),
                g: next_g,
                depth: next_depth,
            });
            open.push(OpenNode {
                f,
                g: next_g,
                node: nodes.len() - 1,
                tie,
            });
            tie += 1;
        }
    }

    let plan = found.map(|goal_node| {
        let mut steps = Vec::new();
        let mut cursor = goal_node;
        while let Some((parent, action_idx)) = nodes[cursor].parent {
            steps.push(actions[action_idx].clone());
            cursor = parent;
        }
        steps.reverse();
        GoapPlan {
            goal_id: goal.name.clone(),
            actions: steps,
            total_cost: nodes[goal_node].g,
        }
    });

    let elapsed = started.elapsed();
    match &plan {
        Some(plan) => tracing::debug!(
            goal = %goal.name,
            steps = plan.len(),
            cost = plan.total_cost,
            expanded,
            "plan found"
        ),
        None => tracing::debug!(goal = %goal.name, expanded, "no plan within bounds"),
    }

    Ok(PlanOutcome {
        plan,
        nodes_expanded: expanded,
        elapsed,
    })
}
