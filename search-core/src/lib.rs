//! C8 — uniform-cost bidirectional symbolic search: per-direction open/closed
//! frontiers, zero-cost sublayer fixed-point handling, and solution-cut
//! detection against the opposite direction's closed lists.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use dd::bdd;
use dd::{DdError, DdResult, ForestHandle, Handle, Terminal};
use transition::CostBucket;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Direction {
    Forward,
    Backward,
}

/// A pair of closed frontiers from opposite directions intersecting:
/// `f = g_fwd + g_bwd` is a candidate plan cost, `states` the intersection
/// handed to the solution registry for reconstruction.
#[derive(Clone, Debug)]
pub struct SymSolutionCut {
    pub g_fwd: i64,
    pub g_bwd: i64,
    pub states: Handle,
    pub f: i64,
}

/// One direction's search state: open/closed frontiers by cost, plus the
/// ordered zero-cost sublayers recorded while a cost layer's zero-cost
/// fixed point was being computed (referenced by plan reconstruction to
/// place steps within a layer in total order).
pub struct SearchSide {
    pub direction: Direction,
    forest: ForestHandle,
    pub initial: Handle,
    pub open: BTreeMap<i64, Handle>,
    pub closed: BTreeMap<i64, Handle>,
    pub zero_layers: BTreeMap<i64, Vec<Handle>>,
    buckets: Vec<CostBucket>,
}

impl SearchSide {
    pub fn new(direction: Direction, forest: ForestHandle, initial: Handle, mut buckets: Vec<CostBucket>) -> Self {
        buckets.sort_by_key(|b| b.cost);
        let mut open = BTreeMap::new();
        open.insert(0, initial);
        SearchSide { direction, forest, initial, open, closed: BTreeMap::new(), zero_layers: BTreeMap::new(), buckets }
    }

    pub fn lowest_open_cost(&self) -> Option<i64> {
        self.open.keys().next().copied()
    }

    /// Cost buckets backing this side's `step`, in ascending cost order;
    /// plan reconstruction replays the same buckets in reverse to recover
    /// the operator that produced each closed-layer transition.
    pub fn buckets(&self) -> &[CostBucket] {
        &self.buckets
    }

    fn step_image(&self, bucket: &CostBucket, states: Handle) -> DdResult<Handle> {
        match self.direction {
            Direction::Forward => bucket.image(&self.forest, states),
            Direction::Backward => bucket.preimage(&self.forest, states),
        }
    }

    fn union_closed_upto(&self, g: i64) -> DdResult<Handle> {
        let mut acc = Handle::Terminal(Terminal::Bool(false));
        let mut f = self.forest.borrow_mut();
        for (_, &bdd_h) in self.closed.range(..=g) {
            acc = bdd::or(&mut f, acc, bdd_h)?;
        }
        Ok(acc)
    }

    fn find_cuts(&self, my_g: i64, new_states: Handle, other_closed: &BTreeMap<i64, Handle>) -> DdResult<Vec<SymSolutionCut>> {
        if new_states == Handle::Terminal(Terminal::Bool(false)) {
            return Ok(Vec::new());
        }
        let mut cuts = Vec::new();
        let mut f = self.forest.borrow_mut();
        for (&g_other, &closed_bdd) in other_closed {
            let inter = bdd::and(&mut f, new_states, closed_bdd)?;
            if inter == Handle::Terminal(Terminal::Bool(false)) {
                continue;
            }
            let cut = match self.direction {
                Direction::Forward => SymSolutionCut { g_fwd: my_g, g_bwd: g_other, states: inter, f: my_g + g_other },
                Direction::Backward => SymSolutionCut { g_fwd: g_other, g_bwd: my_g, states: inter, f: my_g + g_other },
            };
            cuts.push(cut);
        }
        Ok(cuts)
    }

    /// Expands the lowest-cost open layer: zero-cost actions are applied to
    /// a fixed point first (each new increment recorded as a zero sublayer),
    /// then every positive-cost bucket is imaged from the fully-settled
    /// layer into its target open bucket. Returns every solution cut found
    /// against `other_closed` along the way.
    pub fn step(&mut self, other_closed: &BTreeMap<i64, Handle>) -> DdResult<Vec<SymSolutionCut>> {
        let Some(g) = self.lowest_open_cost() else { return Ok(Vec::new()) };
        let initial = self.open.remove(&g).unwrap();
        let mut accumulated = initial;
        let mut frontier = initial;
        let mut cuts = Vec::new();
        let closed_upto_g = self.union_closed_upto(g)?;

        loop {
            let mut zero_new = Handle::Terminal(Terminal::Bool(false));
            for idx in 0..self.buckets.len() {
                if self.buckets[idx].cost != 0 {
                    continue;
                }
                let succ = self.step_image(&self.buckets[idx], frontier)?;
                let new = {
                    let mut f = self.forest.borrow_mut();
                    let not_closed = bdd::not(&mut f, closed_upto_g)?;
                    let not_accum = bdd::not(&mut f, accumulated)?;
                    let s1 = bdd::and(&mut f, succ, not_closed)?;
                    bdd::and(&mut f, s1, not_accum)?
                };
                cuts.extend(self.find_cuts(g, new, other_closed)?);
                if new != Handle::Terminal(Terminal::Bool(false)) {
                    let mut f = self.forest.borrow_mut();
                    zero_new = bdd::or(&mut f, zero_new, new)?;
                }
            }
            if zero_new == Handle::Terminal(Terminal::Bool(false)) {
                break;
            }
            self.zero_layers.entry(g).or_default().push(zero_new);
            accumulated = {
                let mut f = self.forest.borrow_mut();
                bdd::or(&mut f, accumulated, zero_new)?
            };
            frontier = zero_new;
        }

        for idx in 0..self.buckets.len() {
            let cost = self.buckets[idx].cost;
            if cost == 0 {
                continue;
            }
            let succ = self.step_image(&self.buckets[idx], accumulated)?;
            let new = {
                let mut f = self.forest.borrow_mut();
                let not_closed = bdd::not(&mut f, closed_upto_g)?;
                bdd::and(&mut f, succ, not_closed)?
            };
            let target_g = g + cost;
            cuts.extend(self.find_cuts(target_g, new, other_closed)?);
            if new != Handle::Terminal(Terminal::Bool(false)) {
                let mut f = self.forest.borrow_mut();
                let prior = self.open.get(&target_g).copied().unwrap_or(Handle::Terminal(Terminal::Bool(false)));
                let merged = bdd::or(&mut f, prior, new)?;
                self.open.insert(target_g, merged);
            }
        }

        let prior_closed = self.closed.get(&g).copied().unwrap_or(Handle::Terminal(Terminal::Bool(false)));
        let merged_closed = {
            let mut f = self.forest.borrow_mut();
            bdd::or(&mut f, prior_closed, accumulated)?
        };
        self.closed.insert(g, merged_closed);
        tracing::debug!(g, cuts = cuts.len(), "expanded layer");
        Ok(cuts)
    }
}

pub struct SearchConfig {
    pub plan_cost_bound: i64,
    pub single_solution: bool,
    pub time_limit: Option<Duration>,
    pub max_nodes: usize,
}

#[derive(Debug)]
pub enum StepOutcome {
    Cuts(Vec<SymSolutionCut>),
    TimedOut,
    Exhausted,
}

/// Drives one forward side and, optionally, one backward side, tracking the
/// monotone lower/upper cost bounds used by the termination check.
pub struct SymbolicSearch {
    pub forward: SearchSide,
    pub backward: Option<SearchSide>,
    pub lower_bound: i64,
    pub upper_bound: i64,
    config: SearchConfig,
    started_at: Instant,
}

impl SymbolicSearch {
    pub fn new(forward: SearchSide, backward: Option<SearchSide>, config: SearchConfig) -> Self {
        let upper_bound = config.plan_cost_bound;
        SymbolicSearch { forward, backward, lower_bound: 0, upper_bound, config, started_at: Instant::now() }
    }

    fn recompute_lower_bound(&mut self) {
        let f_g = self.forward.lowest_open_cost();
        let b_g = self.backward.as_ref().and_then(|b| b.lowest_open_cost());
        let candidate = match (f_g, b_g) {
            (Some(fg), Some(bg)) => fg + bg,
            (Some(fg), None) => fg,
            (None, Some(bg)) => bg,
            (None, None) => self.lower_bound,
        };
        self.lower_bound = self.lower_bound.max(candidate);
    }

    fn recover_oom(side: &mut SearchSide, max_nodes: &mut usize) {
        tracing::warn!(new_max_nodes = (*max_nodes / 2).max(1), "bucket merge cap exceeded, compacting and halving cap");
        side.forest.borrow_mut().compact();
        *max_nodes = (*max_nodes / 2).max(1);
    }

    /// Advances one round of search: a forward step and, if present, a
    /// backward step, each checked cooperatively against the configured
    /// time limit before it starts (this engine's BDD operations run to
    /// completion rather than checking the clock mid-apply, so "abort the
    /// step" degenerates to "never dequeue the bucket" here).
    pub fn advance(&mut self) -> DdResult<StepOutcome> {
        if let Some(limit) = self.config.time_limit {
            if self.started_at.elapsed() >= limit {
                return Ok(StepOutcome::TimedOut);
            }
        }
        let fwd_empty = self.forward.open.is_empty();
        let bwd_empty = self.backward.as_ref().map_or(true, |b| b.open.is_empty());
        if fwd_empty && bwd_empty {
            return Ok(StepOutcome::Exhausted);
        }

        let mut all_cuts = Vec::new();
        if !fwd_empty {
            let other_closed = self.backward.as_ref().map(|b| b.closed.clone()).unwrap_or_default();
            match self.forward.step(&other_closed) {
                Ok(cuts) => all_cuts.extend(cuts),
                Err(DdError::InsufficientMemory) => Self::recover_oom(&mut self.forward, &mut self.config.max_nodes),
                Err(e) => return Err(e),
            }
        }
        if let Some(bwd) = self.backward.as_mut() {
            if !bwd.open.is_empty() {
                let fwd_closed = self.forward.closed.clone();
                match bwd.step(&fwd_closed) {
                    Ok(cuts) => all_cuts.extend(cuts),
                    Err(DdError::InsufficientMemory) => Self::recover_oom(bwd, &mut self.config.max_nodes),
                    Err(e) => return Err(e),
                }
            }
        }

        self.recompute_lower_bound();
        for cut in &all_cuts {
            self.upper_bound = self.upper_bound.min(cut.f);
        }
        Ok(StepOutcome::Cuts(all_cuts))
    }

    /// `L ≥ U`: combined with the solution registry's "enough plans"
    /// signal (owned outside this crate) this is one of the three
    /// termination disjuncts; the other two (open exhausted, selector
    /// signals enough) are checked by the caller via `open_exhausted` and
    /// the registry/selector directly.
    pub fn bound_exhausted(&self) -> bool {
        self.lower_bound >= self.upper_bound
    }

    pub fn open_exhausted(&self) -> bool {
        self.forward.open.is_empty() && self.backward.as_ref().map_or(true, |b| b.open.is_empty())
    }

    pub fn single_solution_mode(&self) -> bool {
        self.config.single_solution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dd::{ClassicStorage, Forest, GcPolicy, Grid, RangeType, Reduction};
    use symvars::{SymVariables, VarId};
    use transition::{OperatorId, TransitionRelation};

    fn setup() -> (SymVariables, ForestHandle) {
        let forest = Forest::new(RangeType::Boolean, Reduction::Fully, GcPolicy::Optimistic, Box::new(Grid::default()), Box::new(ClassicStorage));
        let vars = SymVariables::build(forest.clone(), &[2], &[false], &[0], 0).unwrap();
        (vars, forest)
    }

    #[test]
    fn forward_step_expands_and_closes_the_initial_layer() {
        let (mut vars, forest) = setup();
        let a = VarId::from_index(0);
        let pre = vars.pre_bdd(a, 0).unwrap();
        let eff = vars.eff_bdd(a, 1).unwrap();
        let tr = TransitionRelation::build(&mut vars, OperatorId(0), pre, eff, &[a]).unwrap();
        let mut bucket = CostBucket::new(1);
        bucket.relations.push(tr);

        let s0 = vars.state_bdd(&[0]).unwrap();
        let mut side = SearchSide::new(Direction::Forward, forest, s0, vec![bucket]);
        let cuts = side.step(&BTreeMap::new()).unwrap();
        assert!(cuts.is_empty());
        assert!(side.closed.contains_key(&0));
        assert_eq!(side.open.get(&1).copied(), Some(vars.state_bdd(&[1]).unwrap()));
    }

    #[test]
    fn meeting_frontiers_produce_a_solution_cut() {
        let (mut vars, forest) = setup();
        let a = VarId::from_index(0);
        let pre = vars.pre_bdd(a, 0).unwrap();
        let eff = vars.eff_bdd(a, 1).unwrap();
        let tr_fwd = TransitionRelation::build(&mut vars, OperatorId(0), pre, eff, &[a]).unwrap();
        let mut fwd_bucket = CostBucket::new(1);
        fwd_bucket.relations.push(tr_fwd);

        let s0 = vars.state_bdd(&[0]).unwrap();
        let mut fwd = SearchSide::new(Direction::Forward, forest.clone(), s0, vec![fwd_bucket]);

        let s1 = vars.state_bdd(&[1]).unwrap();
        let mut bwd_closed = BTreeMap::new();
        bwd_closed.insert(0i64, s1);

        let cuts = fwd.step(&bwd_closed).unwrap();
        assert_eq!(cuts.len(), 1);
        assert_eq!(cuts[0].f, 1);
    }
}
