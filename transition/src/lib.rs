//! C7 — transition relations: one BDD per operator (or SDAC facet) relating
//! a state's pre-copy to its successor's eff-copy, plus the image/preimage
//! operators built on top of [`dd::bdd::exists`]/[`dd::bdd::swap`].

use std::cell::RefMut;

use hashbrown::HashMap;

use dd::bdd;
use dd::{DdResult, Forest, ForestHandle, Handle, Level, Terminal};
use symvars::{SymVariables, VarId};

fn forest_borrow(vars: &SymVariables) -> RefMut<'_, Forest> {
    vars.forest_handle().borrow_mut()
}

/// Counts the distinct non-terminal nodes reachable from `h`, used to cap
/// [`TransitionRelation::merge`] by size rather than by letting an unbounded
/// disjunction run away.
pub fn count_nodes(forest: &Forest, h: Handle) -> usize {
    let mut seen = hashbrown::HashSet::new();
    let mut stack = vec![h];
    let mut count = 0;
    while let Some(cur) = stack.pop() {
        let Some(_) = cur.as_node() else { continue };
        if !seen.insert(cur) {
            continue;
        }
        count += 1;
        if let Ok(node) = forest.unpack(cur) {
            for (_, d) in node.downs.iter_entries() {
                stack.push(Handle::from_raw(d, forest.range));
            }
        }
    }
    count
}

/// Identifies the original task operator (or, for an SDAC-split action, the
/// owning operator) a [`TransitionRelation`] was built from, so plan
/// reconstruction can report operator ids rather than facet-internal ones.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct OperatorId(pub u32);

/// One operator's (or SDAC facet's) transition relation:
/// `pre(pre) ∧ eff(eff) ∧ ⋀_{v∉eff_vars} biimp(v)`, restricted to
/// `valid_states()`.
pub struct TransitionRelation {
    forest: ForestHandle,
    pub operator: OperatorId,
    pub bdd: Handle,
    pub eff_vars: Vec<VarId>,
    pre_cube: Vec<Level>,
    eff_cube: Vec<Level>,
    swap_map: HashMap<i32, i32>,
}

impl TransitionRelation {
    /// `pre`/`eff` are the operator's precondition BDD (over pre-copy
    /// variables) and effect BDD (over eff-copy variables); `eff_vars` lists
    /// every variable the effect assigns (sorted, deduplicated by caller).
    pub fn build(vars: &mut SymVariables, operator: OperatorId, pre: Handle, eff: Handle, eff_vars: &[VarId]) -> DdResult<Self> {
        let mut acc = {
            let mut f = forest_borrow(vars);
            bdd::and(&mut f, pre, eff)?
        };
        let changed: hashbrown::HashSet<usize> = eff_vars.iter().map(|v| v.index()).collect();
        for i in 0..vars.num_variables() {
            if changed.contains(&i) {
                continue;
            }
            let v = VarId::from_index(i);
            let bi = vars.biimp(v)?;
            let mut f = forest_borrow(vars);
            acc = bdd::and(&mut f, acc, bi)?;
        }
        let valid = vars.valid_states()?;
        acc = {
            let mut f = forest_borrow(vars);
            bdd::and(&mut f, acc, valid)?
        };

        let pre_cube = vars.get_cube_pre(eff_vars);
        let eff_cube = vars.get_cube_eff(eff_vars);
        let mut swap_map = HashMap::new();
        for (&p, &e) in pre_cube.iter().zip(eff_cube.iter()) {
            swap_map.insert(p.0, e.0);
            swap_map.insert(e.0, p.0);
        }

        tracing::debug!(operator = operator.0, nodes = count_nodes(&forest_borrow(vars), acc), "built transition relation");
        Ok(TransitionRelation { forest: vars.forest_handle().clone(), operator, bdd: acc, eff_vars: eff_vars.to_vec(), pre_cube, eff_cube, swap_map })
    }

    /// `image(s)`: states reachable from `s` in one step.
    pub fn image(&self, s: Handle) -> DdResult<Handle> {
        let mut f = self.forest.borrow_mut();
        let conj = bdd::and(&mut f, s, self.bdd)?;
        let abstracted = bdd::exists(&mut f, conj, &self.pre_cube)?;
        bdd::swap(&mut f, abstracted, &self.swap_map)
    }

    /// `preimage(s)`: states that reach `s` in one step.
    pub fn preimage(&self, s: Handle) -> DdResult<Handle> {
        let mut f = self.forest.borrow_mut();
        let swapped = bdd::swap(&mut f, s, &self.swap_map)?;
        let conj = bdd::and(&mut f, swapped, self.bdd)?;
        bdd::exists(&mut f, conj, &self.eff_cube)
    }

    /// Disjoins two transition relations with the same `eff_vars`, used to
    /// combine operators sharing a cost bucket. Returns `None` (leaving
    /// `self` untouched) if the merged BDD would exceed `max_nodes`.
    pub fn merge(&mut self, other: &TransitionRelation, max_nodes: usize) -> DdResult<bool> {
        let mut f = self.forest.borrow_mut();
        let merged = bdd::or(&mut f, self.bdd, other.bdd)?;
        let size = count_nodes(&f, merged);
        if size > max_nodes {
            tracing::warn!(size, max_nodes, operator = other.operator.0, "skipping bucket merge, would exceed node cap");
            return Ok(false);
        }
        self.bdd = merged;
        Ok(true)
    }

    /// Tightens the relation by conjoining per-fluent mutex BDDs (each
    /// expressed over eff-copy variables) so mutex-violating successors are
    /// never generated by `image`.
    pub fn edeletion(&mut self, mutex_bdds: &[Handle]) -> DdResult<()> {
        let mut f = self.forest.borrow_mut();
        for &mutex in mutex_bdds {
            self.bdd = bdd::and(&mut f, self.bdd, mutex)?;
        }
        Ok(())
    }
}

/// A bucket of transition relations sharing one constant cost; `image`/
/// `preimage` disjoin the successor sets of every relation in the bucket.
pub struct CostBucket {
    pub cost: i64,
    pub relations: Vec<TransitionRelation>,
}

impl CostBucket {
    pub fn new(cost: i64) -> Self {
        CostBucket { cost, relations: Vec::new() }
    }

    pub fn image(&self, forest: &ForestHandle, s: Handle) -> DdResult<Handle> {
        let mut acc = Handle::Terminal(Terminal::Bool(false));
        for tr in &self.relations {
            let succ = tr.image(s)?;
            let mut f = forest.borrow_mut();
            acc = bdd::or(&mut f, acc, succ)?;
        }
        Ok(acc)
    }

    pub fn preimage(&self, forest: &ForestHandle, s: Handle) -> DdResult<Handle> {
        let mut acc = Handle::Terminal(Terminal::Bool(false));
        for tr in &self.relations {
            let pred = tr.preimage(s)?;
            let mut f = forest.borrow_mut();
            acc = bdd::or(&mut f, acc, pred)?;
        }
        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dd::{ClassicStorage, Forest as F, GcPolicy, Grid, RangeType, Reduction};

    fn setup() -> SymVariables {
        let forest = F::new(RangeType::Boolean, Reduction::Fully, GcPolicy::Optimistic, Box::new(Grid::default()), Box::new(ClassicStorage));
        // two boolean variables, a and b
        SymVariables::build(forest, &[2, 2], &[false, false], &[0, 1], 0).unwrap()
    }

    #[test]
    fn image_of_an_operator_flips_the_effect_variable() {
        let mut vars = setup();
        let a = VarId::from_index(0);
        let b = VarId::from_index(1);
        // operator: pre: a=0; eff: b=1 (a untouched)
        let pre = vars.pre_bdd(a, 0).unwrap();
        let eff = vars.eff_bdd(b, 1).unwrap();
        let tr = TransitionRelation::build(&mut vars, OperatorId(0), pre, eff, &[b]).unwrap();

        let s0 = vars.state_bdd(&[0, 0]).unwrap();
        let succ = tr.image(s0).unwrap();
        let expected = vars.state_bdd(&[0, 1]).unwrap();
        assert_eq!(succ, expected);
    }

    #[test]
    fn image_is_empty_when_precondition_fails() {
        let mut vars = setup();
        let a = VarId::from_index(0);
        let b = VarId::from_index(1);
        let pre = vars.pre_bdd(a, 1).unwrap();
        let eff = vars.eff_bdd(b, 1).unwrap();
        let tr = TransitionRelation::build(&mut vars, OperatorId(0), pre, eff, &[b]).unwrap();

        let s0 = vars.state_bdd(&[0, 0]).unwrap();
        let succ = tr.image(s0).unwrap();
        assert_eq!(succ, Handle::Terminal(Terminal::Bool(false)));
    }

    #[test]
    fn preimage_inverts_image() {
        let mut vars = setup();
        let a = VarId::from_index(0);
        let b = VarId::from_index(1);
        let pre = vars.pre_bdd(a, 0).unwrap();
        let eff = vars.eff_bdd(b, 1).unwrap();
        let tr = TransitionRelation::build(&mut vars, OperatorId(0), pre, eff, &[b]).unwrap();

        let s1 = vars.state_bdd(&[0, 1]).unwrap();
        let pred = tr.preimage(s1).unwrap();
        let expected = vars.pre_bdd(a, 0).unwrap();
        assert_eq!(pred, expected);
    }

    #[test]
    fn merge_rejects_when_over_budget() {
        let mut vars = setup();
        let a = VarId::from_index(0);
        let b = VarId::from_index(1);
        let pre1 = vars.pre_bdd(a, 0).unwrap();
        let eff1 = vars.eff_bdd(b, 1).unwrap();
        let mut tr1 = TransitionRelation::build(&mut vars, OperatorId(0), pre1, eff1, &[b]).unwrap();

        let pre2 = vars.pre_bdd(a, 1).unwrap();
        let eff2 = vars.eff_bdd(b, 0).unwrap();
        let tr2 = TransitionRelation::build(&mut vars, OperatorId(1), pre2, eff2, &[b]).unwrap();

        assert!(!tr1.merge(&tr2, 0).unwrap());
        assert!(tr1.merge(&tr2, 1000).unwrap());
    }
}
