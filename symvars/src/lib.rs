//! C4 — symbolic variables: maps planning-task variables onto interleaved
//! pre/eff/aux BDD variable sets and builds the state/precondition/effect
//! BDDs over them.

use std::num::NonZeroU32;

use dd::bdd;
use dd::{DdError, DdResult, ForestHandle, Handle, Level, Terminal};
use hashbrown::{HashMap, HashSet};
use smallvec::SmallVec;

/// Index of a planning-task variable (0-based on the wire, 1-based
/// internally so the id can never alias a null handle).
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct VarId(NonZeroU32);

impl VarId {
    pub fn from_index(i: usize) -> Self {
        VarId(NonZeroU32::new(i as u32 + 1).expect("variable index overflow"))
    }

    pub fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

fn bits_for_domain(domain: u32) -> u32 {
    if domain <= 1 {
        0
    } else {
        32 - (domain - 1).leading_zeros()
    }
}

/// One planning variable's binary encoding: the pre-copy and eff-copy
/// levels, one pair per bit, most-significant bit first.
#[derive(Clone, Debug)]
struct VarEncoding {
    domain: u32,
    pre: Vec<Level>,
    eff: Vec<Level>,
}

/// Variable-order permutation and per-variable binary encodings shared by
/// every BDD built for one planning task.
pub struct SymVariables {
    forest: ForestHandle,
    encodings: Vec<VarEncoding>,
    derived: Vec<bool>,
    aux: Vec<Level>,
    valid_cache: Option<Handle>,
}

impl SymVariables {
    /// Builds the variable layout for a task with the given per-variable
    /// domain sizes and derived flags, in `order` (a permutation of
    /// `0..domains.len()`; pass `0..n` for the task-provided order, or a
    /// precomputed Gamer-like ordering).
    pub fn build(
        forest: ForestHandle,
        domains: &[u32],
        derived: &[bool],
        order: &[usize],
        num_aux: usize,
    ) -> DdResult<Self> {
        if domains.len() != derived.len() {
            return Err(DdError::InvalidArgument("domains/derived length mismatch".into()));
        }
        if order.len() != domains.len() {
            return Err(DdError::InvalidArgument("variable order must be a permutation of all variables".into()));
        }
        let mut seen = HashSet::new();
        for &v in order {
            if v >= domains.len() || !seen.insert(v) {
                return Err(DdError::InvalidArgument("variable order is not a permutation".into()));
            }
        }

        let mut encodings: Vec<VarEncoding> = domains
            .iter()
            .map(|&d| VarEncoding { domain: d, pre: Vec::new(), eff: Vec::new() })
            .collect();

        // Levels closest to the terminal are assigned first; `order` lists
        // variables root-to-terminal, so we walk it in reverse.
        let mut next_level = 1i32;
        for &v in order.iter().rev() {
            let bits = bits_for_domain(domains[v]);
            for _ in 0..bits {
                encodings[v].eff.push(Level(next_level));
                encodings[v].pre.push(Level(next_level + 1));
                next_level += 2;
            }
        }
        let aux: Vec<Level> = (0..num_aux).map(|i| Level(next_level + i as i32)).collect();

        tracing::debug!(
            num_variables = domains.len(),
            num_aux = aux.len(),
            num_levels = next_level as usize - 1 + aux.len(),
            "built variable encoding"
        );
        Ok(SymVariables { forest, encodings, derived: derived.to_vec(), aux, valid_cache: None })
    }

    pub fn num_variables(&self) -> usize {
        self.encodings.len()
    }

    /// The forest every BDD returned by this type lives in. Exposed so
    /// callers (axioms, transition relations, search) can run further
    /// `dd::bdd` operations without this type having to wrap every possible
    /// combinator itself.
    pub fn forest_handle(&self) -> &ForestHandle {
        &self.forest
    }

    pub fn is_derived(&self, v: VarId) -> bool {
        self.derived[v.index()]
    }

    pub fn aux_levels(&self) -> &[Level] {
        &self.aux
    }

    fn level_var(&self, level: Level) -> DdResult<Handle> {
        let t = Handle::Terminal(Terminal::Bool(true));
        let f = Handle::Terminal(Terminal::Bool(false));
        self.forest.borrow_mut().create_reduced_node(level, dd::Downs::Full(smallvec::smallvec![f.to_raw(), t.to_raw()]))
    }

    fn bits_bdd(&self, levels: &[Level], val: u32) -> DdResult<Handle> {
        let mut acc = Handle::Terminal(Terminal::Bool(true));
        // `levels` is stored most-significant-bit first.
        let nbits = levels.len();
        for (i, &level) in levels.iter().enumerate() {
            let bit = (val >> (nbits - 1 - i)) & 1 == 1;
            let var = self.level_var(level)?;
            let lit = if bit { var } else { bdd::not(&mut self.forest.borrow_mut(), var)? };
            acc = bdd::and(&mut self.forest.borrow_mut(), acc, lit)?;
        }
        Ok(acc)
    }

    /// Conjunction encoding `v = val` on the pre-copy of `v`'s bits.
    pub fn pre_bdd(&self, v: VarId, val: u32) -> DdResult<Handle> {
        self.bits_bdd(&self.encodings[v.index()].pre, val)
    }

    /// Conjunction encoding `v = val` on the eff-copy of `v`'s bits.
    pub fn eff_bdd(&self, v: VarId, val: u32) -> DdResult<Handle> {
        self.bits_bdd(&self.encodings[v.index()].eff, val)
    }

    /// `pre(v) = eff(v)`, used to frame a variable untouched by an effect.
    pub fn biimp(&self, v: VarId) -> DdResult<Handle> {
        let enc = &self.encodings[v.index()];
        let mut acc = Handle::Terminal(Terminal::Bool(true));
        for (&p, &e) in enc.pre.iter().zip(enc.eff.iter()) {
            let pv = self.level_var(p)?;
            let ev = self.level_var(e)?;
            let bi = bdd::biimp(&mut self.forest.borrow_mut(), pv, ev)?;
            acc = bdd::and(&mut self.forest.borrow_mut(), acc, bi)?;
        }
        Ok(acc)
    }

    /// Conjunction of `pre_bdd(v, state[v])` over every variable.
    pub fn state_bdd(&self, state: &[u32]) -> DdResult<Handle> {
        if state.len() != self.encodings.len() {
            return Err(DdError::InvalidArgument("state length does not match variable count".into()));
        }
        let mut acc = Handle::Terminal(Terminal::Bool(true));
        for (i, &val) in state.iter().enumerate() {
            let lit = self.pre_bdd(VarId::from_index(i), val)?;
            acc = bdd::and(&mut self.forest.borrow_mut(), acc, lit)?;
        }
        Ok(acc)
    }

    /// Conjunction of `pre_bdd(v, val)` over the given partial assignment.
    pub fn partial_state_bdd(&self, assignment: &HashMap<VarId, u32>) -> DdResult<Handle> {
        let mut acc = Handle::Terminal(Terminal::Bool(true));
        for (&v, &val) in assignment {
            let lit = self.pre_bdd(v, val)?;
            acc = bdd::and(&mut self.forest.borrow_mut(), acc, lit)?;
        }
        Ok(acc)
    }

    /// Conjunction over all variables of "the pre-copy encodes a value
    /// inside the variable's declared domain", removing junk binary
    /// encodings left over when a domain size is not a power of two.
    pub fn valid_states(&mut self) -> DdResult<Handle> {
        if let Some(h) = self.valid_cache {
            return Ok(h);
        }
        let mut acc = Handle::Terminal(Terminal::Bool(true));
        for i in 0..self.encodings.len() {
            let v = VarId::from_index(i);
            let domain = self.encodings[i].domain;
            let mut per_var = Handle::Terminal(Terminal::Bool(false));
            for val in 0..domain {
                let lit = self.pre_bdd(v, val)?;
                per_var = bdd::or(&mut self.forest.borrow_mut(), per_var, lit)?;
            }
            acc = bdd::and(&mut self.forest.borrow_mut(), acc, per_var)?;
        }
        self.valid_cache = Some(acc);
        tracing::debug!("computed and cached valid_states");
        Ok(acc)
    }

    /// The pre-copy cube (level list) for a set of variables, for use as the
    /// abstraction argument to [`dd::bdd::exists`].
    pub fn get_cube_pre(&self, vars: &[VarId]) -> Vec<Level> {
        vars.iter().flat_map(|&v| self.encodings[v.index()].pre.iter().copied()).collect()
    }

    /// The eff-copy cube (level list) for a set of variables.
    pub fn get_cube_eff(&self, vars: &[VarId]) -> Vec<Level> {
        vars.iter().flat_map(|&v| self.encodings[v.index()].eff.iter().copied()).collect()
    }

    /// All levels in use (pre, eff, aux), descending from the root.
    fn all_levels_desc(&self) -> Vec<Level> {
        let mut levels: SmallVec<[Level; 32]> = SmallVec::new();
        for enc in &self.encodings {
            levels.extend(enc.pre.iter().copied());
            levels.extend(enc.eff.iter().copied());
        }
        levels.extend(self.aux.iter().copied());
        let mut v: Vec<Level> = levels.into_vec();
        v.sort_by(|a, b| b.cmp(a));
        v
    }

    pub fn has_aux_variables_in_support(&self, h: Handle) -> bool {
        let forest = self.forest.borrow();
        let mut stack = vec![h];
        let mut seen = HashSet::new();
        while let Some(cur) = stack.pop() {
            if cur.is_terminal() || !seen.insert(cur) {
                continue;
            }
            let level = forest.level_of(cur);
            if self.aux.contains(&level) {
                return true;
            }
            if let Ok(node) = forest.unpack(cur) {
                for (_, d) in node.downs.iter_entries() {
                    stack.push(Handle::from_raw(d, forest.range));
                }
            }
        }
        false
    }

    /// Counts minterms over the pre-copy cube only: a "state" is an
    /// assignment to every variable's pre bits, so eff levels (which
    /// `state_bdd`/`pre_bdd` never branch on) must not be treated as free
    /// variables that double the count. Callers should existentially
    /// abstract aux variables out of `h` first; an aux level left in `h`'s
    /// actual support still desyncs this count, the same precondition the
    /// previous aux-only division relied on.
    pub fn num_states(&self, h: Handle) -> f64 {
        let forest = self.forest.borrow();
        let all_vars: Vec<VarId> = (0..self.encodings.len()).map(VarId::from_index).collect();
        let mut levels = self.get_cube_pre(&all_vars);
        levels.sort_by(|a, b| b.cmp(a));
        let mut memo: HashMap<Handle, f64> = HashMap::new();
        count_rec(&forest, h, &levels, 0, &mut memo)
    }
}

fn count_rec(forest: &dd::Forest, h: Handle, levels: &[Level], pos: usize, memo: &mut HashMap<Handle, f64>) -> f64 {
    if let Handle::Terminal(Terminal::Bool(b)) = h {
        let remaining = levels.len() - pos;
        return if b { 2f64.powi(remaining as i32) } else { 0.0 };
    }
    if let Some(&cached) = memo.get(&h) {
        return cached;
    }
    let level = forest.level_of(h);
    let idx = levels.iter().position(|&l| l == level).unwrap_or(pos);
    let skipped = idx.saturating_sub(pos);
    let node = forest.unpack(h).expect("live handle");
    let (lo, hi) = match &node.downs {
        dd::Downs::Full(v) => (Handle::from_raw(v[0], forest.range), Handle::from_raw(v[1], forest.range)),
        dd::Downs::Sparse(_) => unreachable!("boolean variable nodes are always dense"),
    };
    let lo_count = count_rec(forest, lo, levels, idx + 1, memo);
    let hi_count = count_rec(forest, hi, levels, idx + 1, memo);
    let result = 2f64.powi(skipped as i32) * (lo_count + hi_count);
    memo.insert(h, result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use dd::{ClassicStorage, Forest, GcPolicy, Grid, RangeType, Reduction};

    fn bool_forest() -> ForestHandle {
        Forest::new(RangeType::Boolean, Reduction::Fully, GcPolicy::Optimistic, Box::new(Grid::default()), Box::new(ClassicStorage))
    }

    #[test]
    fn two_boolean_variables_get_two_bits_each_interleaved() {
        let sv = SymVariables::build(bool_forest(), &[2, 2], &[false, false], &[0, 1], 0).unwrap();
        assert_eq!(sv.encodings[0].pre.len(), 1);
        assert_eq!(sv.encodings[1].pre.len(), 1);
    }

    #[test]
    fn pre_bdd_distinguishes_values() {
        let sv = SymVariables::build(bool_forest(), &[2], &[false], &[0], 0).unwrap();
        let v0 = sv.pre_bdd(VarId::from_index(0), 0).unwrap();
        let v1 = sv.pre_bdd(VarId::from_index(0), 1).unwrap();
        assert_ne!(v0, v1);
    }

    #[test]
    fn biimp_self_is_tautology() {
        let sv = SymVariables::build(bool_forest(), &[2], &[false], &[0], 0).unwrap();
        let b = sv.biimp(VarId::from_index(0)).unwrap();
        assert_ne!(b, Handle::Terminal(Terminal::Bool(false)));
    }

    #[test]
    fn num_states_counts_state_bdd_as_one() {
        let mut sv = SymVariables::build(bool_forest(), &[2, 2], &[false, false], &[0, 1], 0).unwrap();
        let s = sv.state_bdd(&[0, 1]).unwrap();
        let _ = sv.valid_states().unwrap();
        assert_eq!(sv.num_states(s), 1.0);
    }

    #[test]
    fn valid_states_excludes_out_of_domain_encoding() {
        // domain 3 needs 2 bits (0,1,2 valid; 3 is junk)
        let mut sv = SymVariables::build(bool_forest(), &[3], &[false], &[0], 0).unwrap();
        let valid = sv.valid_states().unwrap();
        let junk = sv.pre_bdd(VarId::from_index(0), 3).unwrap();
        let overlap = bdd::and(&mut sv.forest.borrow_mut(), valid, junk).unwrap();
        assert_eq!(overlap, Handle::Terminal(Terminal::Bool(false)));
    }
}
