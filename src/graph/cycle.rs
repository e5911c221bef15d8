//! Cycle detection for the target graph.

use super::{Edge, GraphError};
use crate::model::TargetId;

/// Tracks the visitation state of a node during cycle detection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum VisitState {
    Unvisited,
    Visiting,
    Visited,
}

/// Find a cycle in `deps`, where `deps[i]` lists the targets target `i`
/// depends on.
///
/// Roots are visited in declaration order so the reported cycle is stable.
/// The returned path is closed (first == last) and rotated so that the node
/// with the smallest `name` comes first.
pub(crate) fn find_cycle<'n>(
    deps: &[Vec<TargetId>],
    name: impl Fn(TargetId) -> &'n str,
) -> Option<Vec<TargetId>> {
    let mut detector = CycleDetector::new(deps);
    for index in 0..deps.len() {
        let node = TargetId::new(index);
        if detector.state(node) != VisitState::Unvisited {
            continue;
        }
        if let Some(cycle) = detector.visit(node) {
            return Some(canonicalize_cycle(cycle, name));
        }
    }
    None
}

/// Fail with [`GraphError::Cycle`] when the producer → consumer `edges`
/// over `len` targets contain a cycle.
pub(crate) fn check_edges<'n>(
    len: usize,
    edges: &[Edge],
    name: impl Fn(TargetId) -> &'n str + Copy,
) -> Result<(), GraphError> {
    let mut deps: Vec<Vec<TargetId>> = vec![Vec::new(); len];
    for edge in edges {
        if let Some(slot) = deps.get_mut(edge.consumer.index()) {
            slot.push(edge.producer);
        }
    }
    match find_cycle(&deps, name) {
        Some(cycle) => Err(GraphError::Cycle {
            cycle: cycle.into_iter().map(|id| name(id).to_owned()).collect(),
        }),
        None => Ok(()),
    }
}

struct CycleDetector<'a> {
    deps: &'a [Vec<TargetId>],
    stack: Vec<TargetId>,
    states: Vec<VisitState>,
}

impl<'a> CycleDetector<'a> {
    fn new(deps: &'a [Vec<TargetId>]) -> Self {
        Self {
            deps,
            stack: Vec::new(),
            states: vec![VisitState::Unvisited; deps.len()],
        }
    }

    fn state(&self, node: TargetId) -> VisitState {
        self.states
            .get(node.index())
            .copied()
            .unwrap_or(VisitState::Visited)
    }

    fn set_state(&mut self, node: TargetId, state: VisitState) {
        if let Some(slot) = self.states.get_mut(node.index()) {
            *slot = state;
        }
    }

    fn visit(&mut self, node: TargetId) -> Option<Vec<TargetId>> {
        match self.state(node) {
            VisitState::Visited => return None,
            VisitState::Visiting => {
                let idx = self
                    .stack
                    .iter()
                    .position(|n| *n == node)
                    .unwrap_or_else(|| {
                        debug_assert!(false, "visiting node must be on the stack");
                        0
                    });
                let mut cycle: Vec<TargetId> = self.stack.iter().skip(idx).copied().collect();
                cycle.push(node);
                return Some(cycle);
            }
            VisitState::Unvisited => self.set_state(node, VisitState::Visiting),
        }

        self.stack.push(node);
        let deps = self.deps;
        for dep in deps.get(node.index()).into_iter().flatten() {
            if let Some(cycle) = self.visit(*dep) {
                return Some(cycle);
            }
        }
        self.stack.pop();
        self.set_state(node, VisitState::Visited);
        None
    }
}

fn canonicalize_cycle<'n>(
    mut cycle: Vec<TargetId>,
    name: impl Fn(TargetId) -> &'n str,
) -> Vec<TargetId> {
    if cycle.len() < 2 {
        return cycle;
    }
    let len = cycle.len() - 1;
    let start = cycle
        .iter()
        .take(len)
        .enumerate()
        .min_by(|(_, a), (_, b)| name(**a).cmp(name(**b)))
        .map_or(0, |(idx, _)| idx);
    let (open, closing) = cycle.split_at_mut(len);
    open.rotate_left(start);
    if let (Some(first), Some(slot)) = (open.first().copied(), closing.first_mut()) {
        *slot = first;
    }
    cycle
}
