//! Action dependency graph.
//!
//! Nodes are actions, edges run predecessor → successor. The topological order
//! is computed once at build time with Kahn's algorithm, always taking the
//! earliest-declared ready action next so the order is reproducible for a given
//! template.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::error::GraphError;
use crate::run::ActionState;
use crate::template::ExperimentTemplate;

/// A validated DAG over the actions of one template.
#[derive(Debug, Clone)]
pub struct ActionGraph {
    /// Action names in declaration order; indices below refer to this.
    names: Vec<String>,
    index: HashMap<String, usize>,
    predecessors: Vec<Vec<usize>>,
    successors: Vec<Vec<usize>>,
    order: Vec<usize>,
}

impl ActionGraph {
    /// Build the graph, failing on dangling `startAfter` entries or cycles.
    pub fn build(template: &ExperimentTemplate) -> Result<Self, GraphError> {
        let names: Vec<String> = template.actions.keys().cloned().collect();
        let index: HashMap<String, usize> = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        let n = names.len();
        let mut predecessors: Vec<Vec<usize>> = vec![vec![]; n];
        let mut successors: Vec<Vec<usize>> = vec![vec![]; n];

        for (idx, action) in template.actions.values().enumerate() {
            for pred in &action.start_after {
                let pred_idx = *index.get(pred).ok_or_else(|| GraphError::UnknownPredecessor {
                    action: names[idx].clone(),
                    predecessor: pred.clone(),
                })?;
                // Repeated startAfter entries collapse into one edge
                if !predecessors[idx].contains(&pred_idx) {
                    predecessors[idx].push(pred_idx);
                    successors[pred_idx].push(idx);
                }
            }
        }

        let order = match topological_order(&predecessors, &successors) {
            Some(order) => order,
            None => {
                let members = cycles(&successors)
                    .into_iter()
                    .flatten()
                    .map(|i| names[i].clone())
                    .collect();
                return Err(GraphError::Cycle { members });
            }
        };

        debug!(
            actions = n,
            order = ?order.iter().map(|&i| names[i].as_str()).collect::<Vec<_>>(),
            "Built action graph"
        );

        Ok(Self {
            names,
            index,
            predecessors,
            successors,
            order,
        })
    }

    /// Action names in topological order.
    pub fn topological_order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.names[i].as_str()).collect()
    }

    /// Direct predecessors of `action`, in declaration order.
    pub fn predecessors(&self, action: &str) -> Vec<&str> {
        self.neighbours(action, &self.predecessors)
    }

    /// Direct successors of `action`, in declaration order.
    pub fn successors(&self, action: &str) -> Vec<&str> {
        self.neighbours(action, &self.successors)
    }

    /// Every action reachable from `action`, in topological order.
    pub fn descendants(&self, action: &str) -> Vec<&str> {
        let Some(&start) = self.index.get(action) else {
            return Vec::new();
        };
        let mut seen = vec![false; self.names.len()];
        let mut stack = self.successors[start].clone();
        while let Some(i) = stack.pop() {
            if !seen[i] {
                seen[i] = true;
                stack.extend(&self.successors[i]);
            }
        }
        self.order
            .iter()
            .filter(|&&i| seen[i])
            .map(|&i| self.names[i].as_str())
            .collect()
    }

    /// Pending actions whose predecessors have all reached `Completed` or
    /// `Skipped`, in topological order.
    ///
    /// Actions missing from `states` are treated as `Pending`.
    pub fn ready_set(&self, states: &HashMap<String, ActionState>) -> Vec<&str> {
        let state_of = |i: usize| {
            states
                .get(&self.names[i])
                .copied()
                .unwrap_or(ActionState::Pending)
        };
        self.order
            .iter()
            .copied()
            .filter(|&i| state_of(i) == ActionState::Pending)
            .filter(|&i| {
                self.predecessors[i]
                    .iter()
                    .all(|&p| matches!(state_of(p), ActionState::Completed | ActionState::Skipped))
            })
            .map(|i| self.names[i].as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    fn neighbours<'a>(&'a self, action: &str, edges: &[Vec<usize>]) -> Vec<&'a str> {
        let Some(&i) = self.index.get(action) else {
            return Vec::new();
        };
        let mut out: Vec<usize> = edges[i].clone();
        out.sort_unstable();
        out.into_iter().map(|j| self.names[j].as_str()).collect()
    }
}

/// Kahn's algorithm with declaration-order tie breaking. `None` on a cycle.
fn topological_order(predecessors: &[Vec<usize>], successors: &[Vec<usize>]) -> Option<Vec<usize>> {
    let n = predecessors.len();
    let mut in_degree: Vec<usize> = predecessors.iter().map(Vec::len).collect();
    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(node) = ready.pop_first() {
        order.push(node);
        for &next in &successors[node] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.insert(next);
            }
        }
    }

    (order.len() == n).then_some(order)
}

/// Strongly connected components that form cycles (size > 1, or a self
/// loop), each sorted by declaration index. Components are ordered by their
/// first member.
pub(crate) fn cycles(successors: &[Vec<usize>]) -> Vec<Vec<usize>> {
    struct Tarjan<'a> {
        successors: &'a [Vec<usize>],
        index: Vec<Option<usize>>,
        lowlink: Vec<usize>,
        on_stack: Vec<bool>,
        stack: Vec<usize>,
        next_index: usize,
        components: Vec<Vec<usize>>,
    }

    impl Tarjan<'_> {
        fn visit(&mut self, v: usize) {
            self.index[v] = Some(self.next_index);
            self.lowlink[v] = self.next_index;
            self.next_index += 1;
            self.stack.push(v);
            self.on_stack[v] = true;

            let successors = self.successors;
            for &w in &successors[v] {
                match self.index[w] {
                    None => {
                        self.visit(w);
                        self.lowlink[v] = self.lowlink[v].min(self.lowlink[w]);
                    }
                    Some(w_index) if self.on_stack[w] => {
                        self.lowlink[v] = self.lowlink[v].min(w_index);
                    }
                    Some(_) => {}
                }
            }

            if Some(self.lowlink[v]) == self.index[v] {
                let mut component = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.on_stack[w] = false;
                    component.push(w);
                    if w == v {
                        break;
                    }
                }
                self.components.push(component);
            }
        }
    }

    let n = successors.len();
    let mut tarjan = Tarjan {
        successors,
        index: vec![None; n],
        lowlink: vec![0; n],
        on_stack: vec![false; n],
        stack: Vec::new(),
        next_index: 0,
        components: Vec::new(),
    };
    for v in 0..n {
        if tarjan.index[v].is_none() {
            tarjan.visit(v);
        }
    }

    let mut found: Vec<Vec<usize>> = tarjan
        .components
        .into_iter()
        .filter(|c| c.len() > 1 || successors[c[0]].contains(&c[0]))
        .map(|mut c| {
            c.sort_unstable();
            c
        })
        .collect();
    found.sort_by_key(|c| c[0]);
    found
}
