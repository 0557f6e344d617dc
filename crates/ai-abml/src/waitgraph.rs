//! Channel wait-for graph and cycle detection.
//!
//! An edge `a -> b` means channel `a` is blocked on a sync point that channel `b` would have to
//! emit. A cycle is a deadlock.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl WaitGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, channel: impl Into<String>) {
        self.edges.entry(channel.into()).or_default();
    }

    pub fn add_edge(&mut self, waiter: impl Into<String>, producer: impl Into<String>) {
        let producer = producer.into();
        self.add_node(producer.clone());
        self.edges.entry(waiter.into()).or_default().insert(producer);
    }

    pub fn successors(&self, channel: &str) -> impl Iterator<Item = &str> {
        self.edges
            .get(channel)
            .into_iter()
            .flat_map(|next| next.iter().map(String::as_str))
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// First cycle found by depth-first search, as the channels along it in edge order.
    ///
    /// Nodes are visited in name order, so the result is deterministic.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        fn visit<'a>(
            graph: &'a WaitGraph,
            node: &'a str,
            marks: &mut BTreeMap<&'a str, Mark>,
            stack: &mut Vec<&'a str>,
        ) -> Option<Vec<String>> {
            marks.insert(node, Mark::OnStack);
            stack.push(node);
            for next in graph.successors(node) {
                match marks.get(next).copied().unwrap_or(Mark::Unvisited) {
                    Mark::OnStack => {
                        let start = stack.iter().position(|n| *n == next).unwrap_or(0);
                        return Some(stack[start..].iter().map(|n| n.to_string()).collect());
                    }
                    Mark::Unvisited => {
                        if let Some(cycle) = visit(graph, next, marks, stack) {
                            return Some(cycle);
                        }
                    }
                    Mark::Done => {}
                }
            }
            stack.pop();
            marks.insert(node, Mark::Done);
            None
        }

        let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();
        let mut stack = Vec::new();
        for node in self.edges.keys() {
            if marks.get(node.as_str()).copied().unwrap_or(Mark::Unvisited) == Mark::Unvisited {
                if let Some(cycle) = visit(self, node, &mut marks, &mut stack) {
                    return Some(cycle);
                }
            }
        }
        None
    }
}
