use std::collections::BinaryHeap;

use dd::bdd;
use dd::{DdResult, ForestHandle, Handle, Terminal};
use search_core::{Direction, SearchSide};
use transition::OperatorId;

use crate::selector::PlanSelector;
use crate::manager::PlanManager;
use crate::{Plan, SolutionRegistry};

/// Comparator used to order the reconstruction priority queue: by remaining
/// cost first (so plans are materialized in non-decreasing cost order), or
/// by plan length first for simple planning with unit costs.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ReconstructionOrder {
    CostFirst,
    PlanLengthFirst,
}

/// Combinable pruning strategies for reconstruction.
#[derive(Copy, Clone, Debug, Default)]
pub struct PruneModes {
    /// Stop after the first accepted plan, globally.
    pub single: bool,
    /// Never revisit a state along one reconstruction path.
    pub simple: bool,
    /// Stop expanding a reconstruction root after its first accepted plan.
    pub justified: bool,
}

struct ReconNode {
    remaining: i64,
    plan_length: i64,
    states: Handle,
    parent: Option<usize>,
    via_operator: Option<OperatorId>,
    visited: Handle,
}

fn priority_key(node: &ReconNode, order: ReconstructionOrder) -> (i64, i64) {
    match order {
        ReconstructionOrder::CostFirst => (node.remaining, node.plan_length),
        ReconstructionOrder::PlanLengthFirst => (node.plan_length, node.remaining),
    }
}

/// Walks `arena` from `leaf_idx` up to its root, collecting `via_operator`
/// at each step. This naturally yields the operators in forward-chronological
/// order when reconstructing toward the forward side's own start set
/// (further nodes are earlier in time); for the backward side the same walk
/// yields reverse-chronological order and must be flipped, since there an
/// edge's operator is applied moving from the parent (earlier) to the child
/// (later, closer to the side's own start/goal set).
fn materialize(arena: &[ReconNode], leaf_idx: usize, direction: Direction) -> Vec<OperatorId> {
    let mut ops = Vec::new();
    let mut cur = leaf_idx;
    loop {
        if let Some(op) = arena[cur].via_operator {
            ops.push(op);
        }
        match arena[cur].parent {
            Some(p) => cur = p,
            None => break,
        }
    }
    if direction == Direction::Backward {
        ops.reverse();
    }
    ops
}

/// Reconstructs every loop-respecting path from `start_states` (at
/// `start_remaining` steps from this side's own start set) down to that
/// start set, returning one operator sequence per distinct path found.
/// `side.buckets()` are replayed with the inverse of the operation the side
/// itself used to advance during search: `preimage` for a forward side
/// (walking back toward the initial state), `image` for a backward side
/// (walking forward toward the goal).
fn reconstruct_side(forest: &ForestHandle, side: &SearchSide, start_states: Handle, start_remaining: i64, order: ReconstructionOrder, prune: &PruneModes) -> DdResult<Vec<Vec<OperatorId>>> {
    let false_bdd = Handle::Terminal(Terminal::Bool(false));
    let mut arena = vec![ReconNode { remaining: start_remaining, plan_length: 0, states: start_states, parent: None, via_operator: None, visited: false_bdd }];
    let mut heap = BinaryHeap::new();
    heap.push((std::cmp::Reverse(priority_key(&arena[0], order)), 0usize));

    let mut results = Vec::new();
    // Bounds the zero-cost fixed point during reconstruction: states already
    // produced as a remaining==0 node are not re-enqueued, mirroring the
    // search side's own zero-layer fixed point (without replaying its exact
    // per-sublayer schedule).
    let mut zero_seen = if start_remaining == 0 { start_states } else { false_bdd };

    while let Some((_, idx)) = heap.pop() {
        if prune.justified && !results.is_empty() {
            break;
        }
        let remaining = arena[idx].remaining;
        let states = arena[idx].states;
        if states == false_bdd {
            continue;
        }

        if remaining == 0 {
            let reached = {
                let mut f = forest.borrow_mut();
                bdd::and(&mut f, states, side.initial)? != false_bdd
            };
            if reached {
                results.push(materialize(&arena, idx, side.direction));
                if prune.single {
                    return Ok(results);
                }
                continue;
            }
        }

        for bucket in side.buckets() {
            let cost = bucket.cost;
            if cost < 0 || cost > remaining {
                continue;
            }
            let new_remaining = remaining - cost;
            let Some(&closed_at) = side.closed.get(&new_remaining) else { continue };

            for tr in &bucket.relations {
                let pred = match side.direction {
                    Direction::Forward => tr.preimage(states)?,
                    Direction::Backward => tr.image(states)?,
                };
                let mut candidate = {
                    let mut f = forest.borrow_mut();
                    bdd::and(&mut f, pred, closed_at)?
                };
                if prune.simple {
                    let mut f = forest.borrow_mut();
                    let not_visited = bdd::not(&mut f, arena[idx].visited)?;
                    candidate = bdd::and(&mut f, candidate, not_visited)?;
                }
                if new_remaining == 0 {
                    let mut f = forest.borrow_mut();
                    let not_seen = bdd::not(&mut f, zero_seen)?;
                    candidate = bdd::and(&mut f, candidate, not_seen)?;
                }
                if candidate == false_bdd {
                    continue;
                }
                if new_remaining == 0 {
                    let mut f = forest.borrow_mut();
                    zero_seen = bdd::or(&mut f, zero_seen, candidate)?;
                }
                let visited_next = if prune.simple {
                    let mut f = forest.borrow_mut();
                    bdd::or(&mut f, arena[idx].visited, candidate)?
                } else {
                    arena[idx].visited
                };
                let child = ReconNode { remaining: new_remaining, plan_length: arena[idx].plan_length + 1, states: candidate, parent: Some(idx), via_operator: Some(tr.operator), visited: visited_next };
                let child_idx = arena.len();
                arena.push(child);
                heap.push((std::cmp::Reverse(priority_key(&arena[child_idx], order)), child_idx));
            }
        }
    }

    Ok(results)
}

/// Reconstructs every cut registered in `registry` with `f < bound`, in
/// ascending cost order, handing accepted plans to `selector` and
/// `manager`. Reconstructs each cut's forward half (toward `fwd`'s own start
/// set) and backward half (toward `bwd`'s own start set) independently and
/// concatenates every combination — a deliberate simplification of the
/// single shared bidirectional priority queue, since each half only ever
/// needs the other's endpoint (the cut) to stitch together, not its
/// intermediate search state.
///
/// A cut that cannot be walked all the way down to a side's start set (its
/// closed layers are missing or were pruned away) is unreconstructible and
/// is skipped rather than treated as fatal, per the defensive reconstruction
/// policy: a cut the search itself produced should always be reconstructible,
/// so this only fires on a genuine programmer error elsewhere in the engine.
pub fn construct_cheaper_solutions(forest: &ForestHandle, registry: &SolutionRegistry, fwd: &SearchSide, bwd: &SearchSide, bound: i64, order: ReconstructionOrder, prune: PruneModes, selector: &mut dyn PlanSelector, manager: &mut dyn PlanManager) -> anyhow::Result<usize> {
    let mut accepted = 0;
    'cuts: for cut in registry.cuts_below(bound) {
        if !selector.reconstruct_further(cut.f) {
            break;
        }

        let fwd_paths = reconstruct_side(forest, fwd, cut.states, cut.g_fwd, order, &prune)?;
        if fwd_paths.is_empty() {
            tracing::warn!(g_fwd = cut.g_fwd, g_bwd = cut.g_bwd, "cut unreconstructible on forward side, skipping");
            continue;
        }
        let bwd_paths = reconstruct_side(forest, bwd, cut.states, cut.g_bwd, order, &prune)?;
        if bwd_paths.is_empty() {
            tracing::warn!(g_fwd = cut.g_fwd, g_bwd = cut.g_bwd, "cut unreconstructible on backward side, skipping");
            continue;
        }

        for fwd_ops in &fwd_paths {
            for bwd_ops in &bwd_paths {
                let mut operators = fwd_ops.clone();
                operators.extend(bwd_ops.iter().copied());
                let plan = Plan { operators, cost: cut.f };
                if selector.accept(&plan) {
                    manager.save_plan(&plan, false, true)?;
                    accepted += 1;
                    if prune.single || selector.enough() {
                        break 'cuts;
                    }
                }
                if prune.justified {
                    break;
                }
            }
            if prune.justified {
                break;
            }
        }
    }
    Ok(accepted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dd::{ClassicStorage, Forest, GcPolicy, Grid, RangeType, Reduction};
    use search_core::SymSolutionCut;
    use symvars::{SymVariables, VarId};
    use transition::{CostBucket, TransitionRelation};

    use crate::selector::TopKSelector;

    struct RecordingManager {
        saved: Vec<Plan>,
    }

    impl PlanManager for RecordingManager {
        fn save_plan(&mut self, plan: &Plan, _dump_to_stdout: bool, _multiple: bool) -> anyhow::Result<()> {
            self.saved.push(plan.clone());
            Ok(())
        }
        fn dump_plan(&self, _plan: &Plan) {}
    }

    fn setup() -> (SymVariables, ForestHandle) {
        let forest = Forest::new(RangeType::Boolean, Reduction::Fully, GcPolicy::Optimistic, Box::new(Grid::default()), Box::new(ClassicStorage));
        let vars = SymVariables::build(forest.clone(), &[2], &[false], &[0], 0).unwrap();
        (vars, forest)
    }

    /// A single operator `a: 0 -> 1` with cost 1, searched forward from
    /// `a=0` against a non-expanding backward side seeded with the goal
    /// `a=1` at `closed[0]`.
    #[test]
    fn reconstructs_the_single_operator_plan() {
        let (mut vars, forest) = setup();
        let a = VarId::from_index(0);
        let pre = vars.pre_bdd(a, 0).unwrap();
        let eff = vars.eff_bdd(a, 1).unwrap();
        let tr = TransitionRelation::build(&mut vars, OperatorId(7), pre, eff, &[a]).unwrap();
        let mut bucket = CostBucket::new(1);
        bucket.relations.push(tr);

        let s0 = vars.state_bdd(&[0]).unwrap();
        let goal = vars.state_bdd(&[1]).unwrap();

        let mut fwd_side = SearchSide::new(Direction::Forward, forest.clone(), s0, vec![bucket]);
        let mut bwd_side = SearchSide::new(Direction::Backward, forest.clone(), goal, vec![]);
        bwd_side.closed.insert(0, goal);

        let mut registry = SolutionRegistry::new(false);
        let other_closed = bwd_side.closed.clone();
        let cuts = fwd_side.step(&other_closed).unwrap();
        assert_eq!(cuts.len(), 1);
        for cut in cuts {
            registry.register_solution(&forest, cut).unwrap();
        }

        let mut selector = TopKSelector::new(10);
        let mut manager = RecordingManager { saved: Vec::new() };
        let accepted = construct_cheaper_solutions(&forest, &registry, &fwd_side, &bwd_side, i64::MAX, ReconstructionOrder::CostFirst, PruneModes::default(), &mut selector, &mut manager).unwrap();

        assert_eq!(accepted, 1);
        assert_eq!(manager.saved.len(), 1);
        assert_eq!(manager.saved[0].operators, vec![OperatorId(7)]);
        assert_eq!(manager.saved[0].cost, 1);
    }

    /// A cut at `g_fwd=3` with no recorded closed layers anywhere near it is
    /// unreconstructible; it should be skipped, not treated as fatal.
    #[test]
    fn unreconstructible_cut_is_skipped_not_fatal() {
        let (_vars, forest) = setup();
        let s0 = Handle::Terminal(Terminal::Bool(true));
        let fwd_side = SearchSide::new(Direction::Forward, forest.clone(), s0, vec![]);
        let bwd_side = SearchSide::new(Direction::Backward, forest.clone(), s0, vec![]);

        let mut registry = SolutionRegistry::new(false);
        registry.register_solution(&forest, SymSolutionCut { g_fwd: 3, g_bwd: 0, states: s0, f: 3 }).unwrap();

        let mut selector = TopKSelector::new(10);
        let mut manager = RecordingManager { saved: Vec::new() };
        let accepted = construct_cheaper_solutions(&forest, &registry, &fwd_side, &bwd_side, i64::MAX, ReconstructionOrder::CostFirst, PruneModes::default(), &mut selector, &mut manager).unwrap();
        assert_eq!(accepted, 0);
        assert!(manager.saved.is_empty());
    }
}
