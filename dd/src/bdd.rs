//! Recursive apply/exists/swap on top of [`crate::forest`]'s unique table and
//! op cache. Every higher layer (symbolic variables, axioms, transition
//! relations, search) shares these instead of re-deriving BDD algebra.

use hashbrown::HashMap as HMap;

use crate::error::DdResult;
use crate::forest::{Forest, OpKey};
use crate::handle::{Handle, Level, RangeType, Terminal};
use crate::storage::Downs;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum BoolOp {
    And,
    Or,
    Xor,
}

impl BoolOp {
    fn tag(self) -> u32 {
        match self {
            BoolOp::And => 1,
            BoolOp::Or => 2,
            BoolOp::Xor => 3,
        }
    }

    fn eval(self, a: bool, b: bool) -> bool {
        match self {
            BoolOp::And => a && b,
            BoolOp::Or => a || b,
            BoolOp::Xor => a ^ b,
        }
    }

    /// Short-circuit value and which operand survives, if this operator is
    /// absorbing for one side's terminal value (`And` with `false`, `Or`
    /// with `true`).
    fn absorbing(self, t: bool) -> Option<bool> {
        match (self, t) {
            (BoolOp::And, false) => Some(false),
            (BoolOp::Or, true) => Some(true),
            _ => None,
        }
    }
}

fn cofactor(forest: &Forest, h: Handle, level: Level) -> DdResult<(Handle, Handle)> {
    if forest.level_of(h) != level {
        return Ok((h, h));
    }
    let node = forest.unpack(h)?;
    match &node.downs {
        Downs::Full(v) => Ok((Handle::from_raw(v[0], forest.range), Handle::from_raw(v[1], forest.range))),
        Downs::Sparse(v) => {
            let find = |want: u32| {
                v.iter()
                    .find(|&&(idx, _)| idx == want)
                    .map(|&(_, h)| Handle::from_raw(h, forest.range))
                    .unwrap_or(Handle::transparent(forest.range))
            };
            Ok((find(0), find(1)))
        }
    }
}

fn bdd_node(forest: &mut Forest, level: Level, low: Handle, high: Handle) -> DdResult<Handle> {
    forest.create_reduced_node(level, Downs::Full(smallvec::smallvec![low.to_raw(), high.to_raw()]))
}

fn apply(forest: &mut Forest, op: BoolOp, a: Handle, b: Handle) -> DdResult<Handle> {
    if let (Handle::Terminal(Terminal::Bool(x)), Handle::Terminal(Terminal::Bool(y))) = (a, b) {
        return Ok(Handle::Terminal(Terminal::Bool(op.eval(x, y))));
    }
    if let Handle::Terminal(Terminal::Bool(x)) = a {
        if let Some(v) = op.absorbing(x) {
            return Ok(Handle::Terminal(Terminal::Bool(v)));
        }
    }
    if let Handle::Terminal(Terminal::Bool(y)) = b {
        if let Some(v) = op.absorbing(y) {
            return Ok(Handle::Terminal(Terminal::Bool(v)));
        }
    }
    if a == b && op != BoolOp::Xor {
        return Ok(a);
    }

    let key = OpKey::new(op.tag(), &[a, b]);
    if let Some(cached) = forest.cache_lookup(&key) {
        return Ok(cached);
    }

    let la = forest.level_of(a);
    let lb = forest.level_of(b);
    let top = la.max(lb);
    let (a_lo, a_hi) = cofactor(forest, a, top)?;
    let (b_lo, b_hi) = cofactor(forest, b, top)?;
    let lo = apply(forest, op, a_lo, b_lo)?;
    let hi = apply(forest, op, a_hi, b_hi)?;
    let result = bdd_node(forest, top, lo, hi)?;
    forest.cache_insert(key, result);
    Ok(result)
}

pub fn and(forest: &mut Forest, a: Handle, b: Handle) -> DdResult<Handle> {
    apply(forest, BoolOp::And, a, b)
}

pub fn or(forest: &mut Forest, a: Handle, b: Handle) -> DdResult<Handle> {
    apply(forest, BoolOp::Or, a, b)
}

pub fn xor(forest: &mut Forest, a: Handle, b: Handle) -> DdResult<Handle> {
    apply(forest, BoolOp::Xor, a, b)
}

pub fn not(forest: &mut Forest, a: Handle) -> DdResult<Handle> {
    xor(forest, a, Handle::Terminal(Terminal::Bool(true)))
}

pub fn implies(forest: &mut Forest, a: Handle, b: Handle) -> DdResult<Handle> {
    let na = not(forest, a)?;
    or(forest, na, b)
}

/// `a <-> b`.
pub fn biimp(forest: &mut Forest, a: Handle, b: Handle) -> DdResult<Handle> {
    let x = xor(forest, a, b)?;
    not(forest, x)
}

pub fn ite(forest: &mut Forest, cond: Handle, then: Handle, els: Handle) -> DdResult<Handle> {
    let a = and(forest, cond, then)?;
    let ncond = not(forest, cond)?;
    let b = and(forest, ncond, els)?;
    or(forest, a, b)
}

const EXISTS_TAG: u32 = 100;

fn exists_rec(forest: &mut Forest, h: Handle, vars: &hashbrown::HashSet<i32>) -> DdResult<Handle> {
    if h.is_terminal() {
        return Ok(h);
    }
    let key = OpKey::new(EXISTS_TAG, &[h]);
    // `vars` participates in the cache key implicitly through the call
    // site: callers abstracting different variable sets must not share a
    // forest's op cache entries across calls, so we fold the set's
    // signature into the tag via a cheap rotation instead of allocating a
    // fresh cache per call.
    let set_tag = vars.iter().fold(0u32, |acc, &v| acc.rotate_left(1) ^ (v as u32));
    let key = OpKey { op: key.op.wrapping_add(set_tag), operands: key.operands };
    if let Some(cached) = forest.cache_lookup(&key) {
        return Ok(cached);
    }
    let level = forest.level_of(h);
    let (lo, hi) = cofactor(forest, h, level)?;
    let lo = exists_rec(forest, lo, vars)?;
    let hi = exists_rec(forest, hi, vars)?;
    let result = if vars.contains(&level.0) {
        or(forest, lo, hi)?
    } else {
        bdd_node(forest, level, lo, hi)?
    };
    forest.cache_insert(key, result);
    Ok(result)
}

/// Existentially abstracts every level in `vars` out of `h`.
pub fn exists(forest: &mut Forest, h: Handle, vars: &[Level]) -> DdResult<Handle> {
    let set: hashbrown::HashSet<i32> = vars.iter().map(|l| l.0).collect();
    exists_rec(forest, h, &set)
}

const SWAP_TAG: u32 = 200;

fn swap_rec(forest: &mut Forest, h: Handle, mapping: &HMap<i32, i32>) -> DdResult<Handle> {
    if h.is_terminal() {
        return Ok(h);
    }
    let map_tag = mapping.iter().fold(0u32, |acc, (&k, &v)| acc.rotate_left(1) ^ (k as u32) ^ (v as u32).rotate_left(16));
    let base = OpKey::new(SWAP_TAG, &[h]);
    let key = OpKey { op: base.op.wrapping_add(map_tag), operands: base.operands };
    if let Some(cached) = forest.cache_lookup(&key) {
        return Ok(cached);
    }
    let level = forest.level_of(h);
    let (lo, hi) = cofactor(forest, h, level)?;
    let lo = swap_rec(forest, lo, mapping)?;
    let hi = swap_rec(forest, hi, mapping)?;
    let new_level = Level(*mapping.get(&level.0).unwrap_or(&level.0));
    let result = bdd_node(forest, new_level, lo, hi)?;
    forest.cache_insert(key, result);
    Ok(result)
}

/// Renames every level in `h` according to `mapping` (level -> level),
/// rebuilding nodes as needed. Used to flip primed/unprimed copies when
/// computing images and preimages.
pub fn swap(forest: &mut Forest, h: Handle, mapping: &HMap<i32, i32>) -> DdResult<Handle> {
    swap_rec(forest, h, mapping)
}

pub fn range_bool() -> RangeType {
    RangeType::Boolean
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::{Forest as F, GcPolicy, Reduction};
    use crate::holes::Grid;
    use crate::storage::ClassicStorage;

    fn forest() -> crate::forest::ForestHandle {
        F::new(RangeType::Boolean, Reduction::Fully, GcPolicy::Optimistic, Box::new(Grid::default()), Box::new(ClassicStorage))
    }

    fn var(f: &mut Forest, level: i32) -> Handle {
        let t = Handle::Terminal(Terminal::Bool(true));
        let b = Handle::Terminal(Terminal::Bool(false));
        f.create_reduced_node(Level(level), Downs::Full(smallvec::smallvec![b.to_raw(), t.to_raw()])).unwrap()
    }

    #[test]
    fn and_of_a_variable_with_itself_is_itself() {
        let fh = forest();
        let mut f = fh.borrow_mut();
        let a = var(&mut f, 1);
        let r = and(&mut f, a, a).unwrap();
        assert_eq!(r, a);
    }

    #[test]
    fn or_two_variables_then_exists_both_is_true() {
        let fh = forest();
        let mut f = fh.borrow_mut();
        let a = var(&mut f, 1);
        let b = var(&mut f, 2);
        let both = or(&mut f, a, b).unwrap();
        let abstracted = exists(&mut f, both, &[Level(1), Level(2)]).unwrap();
        assert_eq!(abstracted, Handle::Terminal(Terminal::Bool(true)));
    }

    #[test]
    fn not_not_is_identity() {
        let fh = forest();
        let mut f = fh.borrow_mut();
        let a = var(&mut f, 1);
        let n = not(&mut f, a).unwrap();
        let nn = not(&mut f, n).unwrap();
        assert_eq!(nn, a);
    }

    #[test]
    fn swap_renames_levels() {
        let fh = forest();
        let mut f = fh.borrow_mut();
        let a = var(&mut f, 1);
        let mut mapping = HMap::new();
        mapping.insert(1, 2);
        let swapped = swap(&mut f, a, &mapping).unwrap();
        assert_eq!(f.level_of(swapped), Level(2));
    }
}
