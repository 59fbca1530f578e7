//! Folding a [`crate::expr::CostExpr`] into an ADD over an `Integer`-range
//! forest, and splitting an operator into constant-cost facets by walking
//! every path of the resulting ADD.

use hashbrown::HashMap;
use thiserror::Error;

use dd::{DdError, DdResult, Downs, Forest, Handle, Level, OpKey, RangeType, Terminal};
use symvars::{SymVariables, VarId};

use crate::expr::{BinOp, CostExpr};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SdacError {
    #[error("division by zero while folding a cost expression")]
    DivisionByZero,
    #[error("unknown variable \"{0}\" referenced in cost expression")]
    UnknownVariable(String),
    #[error(transparent)]
    Dd(#[from] DdError),
}

pub type SdacResult<T> = Result<T, SdacError>;

/// Sentinel terminal values standing in for "reached via overflowing
/// constant arithmetic"; facets landing on these are dropped rather than
/// treated as real costs.
pub const INFINITE_HIGH: i32 = i32::MAX;
pub const INFINITE_LOW: i32 = i32::MIN;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum NumOp {
    Add,
    Sub,
    Mul,
    Div,
    Max,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    And,
    Or,
}

impl NumOp {
    fn tag(self) -> u32 {
        300 + self as u32
    }

    fn eval(self, x: i32, y: i32) -> SdacResult<i32> {
        Ok(match self {
            NumOp::Add => x.saturating_add(y),
            NumOp::Sub => x.saturating_sub(y),
            NumOp::Mul => x.saturating_mul(y),
            NumOp::Div => {
                if y == 0 {
                    return Err(SdacError::DivisionByZero);
                }
                x / y
            }
            NumOp::Max => x.max(y),
            NumOp::Lt => (x < y) as i32,
            NumOp::Le => (x <= y) as i32,
            NumOp::Gt => (x > y) as i32,
            NumOp::Ge => (x >= y) as i32,
            NumOp::Eq => (x == y) as i32,
            NumOp::And => ((x != 0) && (y != 0)) as i32,
            NumOp::Or => ((x != 0) || (y != 0)) as i32,
        })
    }
}

fn int_cofactor(forest: &Forest, h: Handle, level: Level) -> DdResult<(Handle, Handle)> {
    if forest.level_of(h) != level {
        return Ok((h, h));
    }
    let node = forest.unpack(h)?;
    match &node.downs {
        Downs::Full(v) => Ok((Handle::from_raw(v[0], forest.range), Handle::from_raw(v[1], forest.range))),
        Downs::Sparse(_) => Err(DdError::Miscellaneous("cost ADD node unexpectedly sparse".into())),
    }
}

fn int_node(forest: &mut Forest, level: Level, lo: Handle, hi: Handle) -> DdResult<Handle> {
    forest.create_reduced_node(level, Downs::Full(smallvec::smallvec![lo.to_raw(), hi.to_raw()]))
}

fn apply_num(forest: &mut Forest, op: NumOp, a: Handle, b: Handle) -> SdacResult<Handle> {
    if let (Handle::Terminal(Terminal::Int(x)), Handle::Terminal(Terminal::Int(y))) = (a, b) {
        return Ok(Handle::Terminal(Terminal::Int(op.eval(x, y)?)));
    }
    let key = OpKey::new(op.tag(), &[a, b]);
    if let Some(cached) = forest.cache_lookup(&key) {
        return Ok(cached);
    }
    let top = forest.level_of(a).max(forest.level_of(b));
    let (a_lo, a_hi) = int_cofactor(forest, a, top)?;
    let (b_lo, b_hi) = int_cofactor(forest, b, top)?;
    let lo = apply_num(forest, op, a_lo, b_lo)?;
    let hi = apply_num(forest, op, a_hi, b_hi)?;
    let result = int_node(forest, top, lo, hi)?;
    forest.cache_insert(key, result);
    Ok(result)
}

/// Builds the "variable value" ADD for one planning variable's binary
/// encoding: the minterm selecting bits that encode `v = i` maps to the
/// terminal `i`. `levels` must be the same pre-copy levels `symvars`
/// allocated for this variable, most-significant bit first, so the
/// resulting ADD shares level numbering with every BDD built over the same
/// variable elsewhere.
pub fn var_value_add(forest: &mut Forest, levels: &[Level]) -> DdResult<Handle> {
    build_value_tree(forest, levels, 0, 1i64 << levels.len().saturating_sub(1).min(30))
}

/// [`var_value_add`] for a planning variable already known to a
/// [`SymVariables`] layout, reusing its pre-copy level assignment.
pub fn var_value_add_for(forest: &mut Forest, vars: &SymVariables, v: VarId) -> DdResult<Handle> {
    let levels = vars.get_cube_pre(&[v]);
    var_value_add(forest, &levels)
}

fn build_value_tree(forest: &mut Forest, levels: &[Level], base: i64, bit_weight: i64) -> DdResult<Handle> {
    if levels.is_empty() {
        return Ok(Handle::Terminal(Terminal::Int(base as i32)));
    }
    let lo = build_value_tree(forest, &levels[1..], base, bit_weight / 2)?;
    let hi = build_value_tree(forest, &levels[1..], base + bit_weight, bit_weight / 2)?;
    int_node(forest, levels[0], lo, hi)
}

fn binop_to_numop(op: BinOp) -> NumOp {
    match op {
        BinOp::Add => NumOp::Add,
        BinOp::Sub => NumOp::Sub,
        BinOp::Mul => NumOp::Mul,
        BinOp::Div => NumOp::Div,
        BinOp::Lt => NumOp::Lt,
        BinOp::Le => NumOp::Le,
        BinOp::Gt => NumOp::Gt,
        BinOp::Ge => NumOp::Ge,
        BinOp::Eq => NumOp::Eq,
        BinOp::And => NumOp::And,
        BinOp::Or => NumOp::Or,
    }
}

/// Folds `expr` into an ADD, resolving variable references through
/// `resolve_var` (typically a lookup into the task's per-variable
/// [`var_value_add`] results).
pub fn fold(forest: &mut Forest, expr: &CostExpr, resolve_var: &mut dyn FnMut(&str) -> SdacResult<Handle>) -> SdacResult<Handle> {
    match expr {
        CostExpr::Const(c) => Ok(Handle::Terminal(Terminal::Int(*c as i32))),
        CostExpr::Var(name) => resolve_var(name),
        CostExpr::Bin(op, l, r) => {
            let lh = fold(forest, l, resolve_var)?;
            let rh = fold(forest, r, resolve_var)?;
            apply_num(forest, binop_to_numop(*op), lh, rh)
        }
        CostExpr::Abs(e) => {
            let h = fold(forest, e, resolve_var)?;
            let neg = apply_num(forest, NumOp::Sub, Handle::Terminal(Terminal::Int(0)), h)?;
            apply_num(forest, NumOp::Max, h, neg)
        }
        CostExpr::Not(e) => {
            let h = fold(forest, e, resolve_var)?;
            apply_num(forest, NumOp::Sub, Handle::Terminal(Terminal::Int(1)), h)
        }
    }
}

/// Collects the distinct terminal values reachable in an ADD.
pub fn terminal_set(forest: &Forest, h: Handle) -> DdResult<Vec<i32>> {
    let mut seen = hashbrown::HashSet::new();
    let mut out = Vec::new();
    let mut stack = vec![h];
    let mut visited = hashbrown::HashSet::new();
    while let Some(cur) = stack.pop() {
        if !visited.insert(cur) {
            continue;
        }
        match cur {
            Handle::Terminal(Terminal::Int(v)) => {
                if seen.insert(v) {
                    out.push(v);
                }
            }
            Handle::Terminal(_) => return Err(DdError::TypeMismatch { expected: "integer terminal", found: "non-integer terminal" }),
            Handle::Node(_) => {
                let node = forest.unpack(cur)?;
                for (_, d) in node.downs.iter_entries() {
                    stack.push(Handle::from_raw(d, forest.range));
                }
            }
        }
    }
    Ok(out)
}

/// Transcribes the level set `{ s : add(s) = target }` of an ADD into a
/// boolean BDD over the same variable levels, built in a separate forest
/// (preconditions live in the `Boolean`-range forest, costs in the
/// `Integer`-range one; the two share level numbers, not a `Forest`).
pub fn level_set_bdd(add_forest: &Forest, bool_forest: &mut Forest, h: Handle, target: i32, memo: &mut HashMap<Handle, Handle>) -> DdResult<Handle> {
    if let Handle::Terminal(Terminal::Int(v)) = h {
        return Ok(Handle::Terminal(Terminal::Bool(v == target)));
    }
    if let Some(&cached) = memo.get(&h) {
        return Ok(cached);
    }
    let level = add_forest.level_of(h);
    let node = add_forest.unpack(h)?;
    let (lo, hi) = match &node.downs {
        Downs::Full(v) => (Handle::from_raw(v[0], add_forest.range), Handle::from_raw(v[1], add_forest.range)),
        Downs::Sparse(_) => return Err(DdError::Miscellaneous("cost ADD node unexpectedly sparse".into())),
    };
    let lo_b = level_set_bdd(add_forest, bool_forest, lo, target, memo)?;
    let hi_b = level_set_bdd(add_forest, bool_forest, hi, target, memo)?;
    let result = bool_forest.create_reduced_node(level, Downs::Full(smallvec::smallvec![lo_b.to_raw(), hi_b.to_raw()]))?;
    memo.insert(h, result);
    Ok(result)
}

/// One constant-cost facet of an SDAC operator: `precondition` is the
/// original operator's precondition intersected with the region of a single
/// path through the cost ADD.
#[derive(Clone, Debug)]
pub struct Facet {
    pub cost: i32,
    pub precondition: Handle,
}

/// Raw positive-literal BDD for `level`, mirroring `symvars`'s private
/// `level_var`: the node whose low child is false and high child is true.
fn level_literal(bool_forest: &mut Forest, level: Level) -> DdResult<Handle> {
    bool_forest.create_reduced_node(
        level,
        Downs::Full(smallvec::smallvec![Handle::Terminal(Terminal::Bool(false)).to_raw(), Handle::Terminal(Terminal::Bool(true)).to_raw()]),
    )
}

/// Walks every path of `h`, accumulating the conjunction of per-level
/// literals crossed so far in `region`, and emits one [`Facet`] per path
/// reaching a finite terminal. Unlike a terminal-value split, paths that
/// reach the same cost along different branches are never merged: each
/// domain value an SDAC variable can take gets its own facet, even when two
/// values happen to cost the same.
fn enumerate_paths(add_forest: &Forest, bool_forest: &mut Forest, h: Handle, region: Handle, out: &mut Vec<Facet>) -> DdResult<()> {
    if region == Handle::Terminal(Terminal::Bool(false)) {
        return Ok(());
    }
    match h {
        Handle::Terminal(Terminal::Int(v)) => {
            if v != INFINITE_HIGH && v != INFINITE_LOW {
                out.push(Facet { cost: v, precondition: region });
            }
            Ok(())
        }
        Handle::Terminal(_) => Err(DdError::TypeMismatch { expected: "integer terminal", found: "non-integer terminal" }),
        Handle::Node(_) => {
            let level = add_forest.level_of(h);
            let node = add_forest.unpack(h)?;
            let (lo, hi) = match &node.downs {
                Downs::Full(v) => (Handle::from_raw(v[0], add_forest.range), Handle::from_raw(v[1], add_forest.range)),
                Downs::Sparse(_) => return Err(DdError::Miscellaneous("cost ADD node unexpectedly sparse".into())),
            };
            let lit = level_literal(bool_forest, level)?;
            let not_lit = dd::bdd::not(bool_forest, lit)?;
            let lo_region = dd::bdd::and(bool_forest, region, not_lit)?;
            let hi_region = dd::bdd::and(bool_forest, region, lit)?;
            enumerate_paths(add_forest, bool_forest, lo, lo_region, out)?;
            enumerate_paths(add_forest, bool_forest, hi, hi_region, out)?;
            Ok(())
        }
    }
}

/// Splits an operator whose cost ADD is `cost_add` into one facet per path
/// through the ADD, each paired with the original precondition narrowed to
/// that path's region. Facets landing on [`INFINITE_HIGH`] / [`INFINITE_LOW`]
/// (overflow sentinels reached via constant arithmetic) are silently
/// dropped, as are facets whose region contradicts `precondition`.
pub fn split_facets(add_forest: &Forest, bool_forest: &mut Forest, cost_add: Handle, precondition: Handle) -> DdResult<Vec<Facet>> {
    let mut facets = Vec::new();
    enumerate_paths(add_forest, bool_forest, cost_add, precondition, &mut facets)?;
    facets.sort_by_key(|f| f.cost);
    tracing::debug!(facets = facets.len(), "split operator into cost facets");
    Ok(facets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse_infix;
    use dd::{ClassicStorage, Forest as F, GcPolicy, Grid, Reduction};

    fn add_forest() -> dd::ForestHandle {
        F::new(RangeType::Integer, Reduction::Fully, GcPolicy::Optimistic, Box::new(Grid::default()), Box::new(ClassicStorage))
    }

    fn bool_forest() -> dd::ForestHandle {
        F::new(RangeType::Boolean, Reduction::Fully, GcPolicy::Optimistic, Box::new(Grid::default()), Box::new(ClassicStorage))
    }

    // x has domain {0..5}, encoded with 3 bits at levels [3,2,1] (MSB first).
    fn x_levels() -> Vec<Level> {
        vec![Level(3), Level(2), Level(1)]
    }

    #[test]
    fn abs_x_minus_3_splits_into_one_facet_per_domain_value() {
        let addf = add_forest();
        let boolf = bool_forest();
        let expr = parse_infix("abs(x - 3)").unwrap();
        let levels = x_levels();
        let x_add = {
            let mut f = addf.borrow_mut();
            var_value_add(&mut f, &levels).unwrap()
        };
        let cost_add = {
            let mut f = addf.borrow_mut();
            fold(&mut f, &expr, &mut |name| if name == "x" { Ok(x_add) } else { Err(SdacError::UnknownVariable(name.to_string())) }).unwrap()
        };
        // x's raw 3-bit encoding spans 0..7; restrict to the declared domain
        // {0..5} by excluding bit-patterns 6 (110) and 7 (111), i.e. ruling
        // out level 3 and level 2 both set.
        let precondition = {
            let mut bf = boolf.borrow_mut();
            let lit3 = level_literal(&mut bf, levels[0]).unwrap();
            let lit2 = level_literal(&mut bf, levels[1]).unwrap();
            let both = dd::bdd::and(&mut bf, lit3, lit2).unwrap();
            dd::bdd::not(&mut bf, both).unwrap()
        };
        let facets = {
            let af = addf.borrow();
            let mut bf = boolf.borrow_mut();
            split_facets(&af, &mut bf, cost_add, precondition).unwrap()
        };
        let mut costs: Vec<i32> = facets.iter().map(|f| f.cost).collect();
        costs.sort_unstable();
        assert_eq!(costs, vec![0, 1, 1, 2, 2, 3]);
    }

    #[test]
    fn division_by_zero_is_a_fold_error() {
        let addf = add_forest();
        let expr = parse_infix("1 / 0").unwrap();
        let mut f = addf.borrow_mut();
        let result = fold(&mut f, &expr, &mut |name| Err(SdacError::UnknownVariable(name.to_string())));
        assert_eq!(result, Err(SdacError::DivisionByZero));
    }
}
