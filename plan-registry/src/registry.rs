use hashbrown::HashMap;

use dd::bdd;
use dd::{DdResult, ForestHandle};
use search_core::SymSolutionCut;

/// Errors a caller is expected to treat as programmer error: a cut or
/// reconstruction step referenced a part of the search state that was never
/// recorded.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("forward and backward search operate over different domains")]
    DomainMismatch,
    #[error("forward and backward search use different forests")]
    ForestMismatch,
    #[error("plan reconstruction referenced closed layer g={missing_g} which was never recorded")]
    ReconstructionInconsistency { missing_g: i64 },
}

/// Cuts registered so far, grouped by the `(g_fwd, g_bwd)` pair that produced
/// them. Two cuts sharing a pair are merged by unioning their state sets
/// rather than kept as separate entries.
pub struct SolutionRegistry {
    cuts: HashMap<(i64, i64), SymSolutionCut>,
    single_solution: bool,
    best_bound: Option<i64>,
}

impl SolutionRegistry {
    pub fn new(single_solution: bool) -> Self {
        SolutionRegistry { cuts: HashMap::new(), single_solution, best_bound: None }
    }

    pub fn best_bound(&self) -> Option<i64> {
        self.best_bound
    }

    /// Registers a newly found cut. In single-solution mode, only the
    /// cheapest cut seen so far is retained.
    pub fn register_solution(&mut self, forest: &ForestHandle, cut: SymSolutionCut) -> DdResult<()> {
        if self.single_solution {
            if self.best_bound.map_or(true, |b| cut.f < b) {
                self.cuts.clear();
                self.best_bound = Some(cut.f);
                self.cuts.insert((cut.g_fwd, cut.g_bwd), cut);
            }
            return Ok(());
        }

        self.best_bound = Some(self.best_bound.map_or(cut.f, |b| b.min(cut.f)));
        match self.cuts.get_mut(&(cut.g_fwd, cut.g_bwd)) {
            Some(existing) => {
                let mut f = forest.borrow_mut();
                existing.states = bdd::or(&mut f, existing.states, cut.states)?;
            }
            None => {
                self.cuts.insert((cut.g_fwd, cut.g_bwd), cut);
            }
        }
        Ok(())
    }

    /// Every registered cut with `f < bound`, in ascending `f` order — the
    /// order `construct_cheaper_solutions` must reconstruct them in so that
    /// accepted plans are enumerated in non-decreasing cost.
    pub fn cuts_below(&self, bound: i64) -> Vec<SymSolutionCut> {
        let mut v: Vec<SymSolutionCut> = self.cuts.values().filter(|c| c.f < bound).cloned().collect();
        v.sort_by_key(|c| c.f);
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dd::{ClassicStorage, Forest, GcPolicy, Grid, Handle, RangeType, Reduction, Terminal};

    fn forest() -> ForestHandle {
        Forest::new(RangeType::Boolean, Reduction::Fully, GcPolicy::Optimistic, Box::new(Grid::default()), Box::new(ClassicStorage))
    }

    #[test]
    fn cuts_with_the_same_g_pair_merge_by_union() {
        let forest = forest();
        let mut reg = SolutionRegistry::new(false);
        // Two cuts at the same (g_fwd, g_bwd) should collapse to one entry.
        reg.register_solution(&forest, SymSolutionCut { g_fwd: 1, g_bwd: 2, states: Handle::Terminal(Terminal::Bool(true)), f: 3 }).unwrap();
        reg.register_solution(&forest, SymSolutionCut { g_fwd: 1, g_bwd: 2, states: Handle::Terminal(Terminal::Bool(true)), f: 3 }).unwrap();
        assert_eq!(reg.cuts_below(10).len(), 1);
    }

    #[test]
    fn cuts_below_bound_are_sorted_ascending_by_f() {
        let forest = forest();
        let mut reg = SolutionRegistry::new(false);
        reg.register_solution(&forest, SymSolutionCut { g_fwd: 3, g_bwd: 0, states: Handle::Terminal(Terminal::Bool(true)), f: 3 }).unwrap();
        reg.register_solution(&forest, SymSolutionCut { g_fwd: 1, g_bwd: 0, states: Handle::Terminal(Terminal::Bool(true)), f: 1 }).unwrap();
        reg.register_solution(&forest, SymSolutionCut { g_fwd: 10, g_bwd: 0, states: Handle::Terminal(Terminal::Bool(true)), f: 10 }).unwrap();
        let cuts = reg.cuts_below(5);
        assert_eq!(cuts.iter().map(|c| c.f).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn single_solution_mode_keeps_only_the_cheapest_cut() {
        let forest = forest();
        let mut reg = SolutionRegistry::new(true);
        reg.register_solution(&forest, SymSolutionCut { g_fwd: 5, g_bwd: 0, states: Handle::Terminal(Terminal::Bool(true)), f: 5 }).unwrap();
        reg.register_solution(&forest, SymSolutionCut { g_fwd: 2, g_bwd: 0, states: Handle::Terminal(Terminal::Bool(true)), f: 2 }).unwrap();
        reg.register_solution(&forest, SymSolutionCut { g_fwd: 9, g_bwd: 0, states: Handle::Terminal(Terminal::Bool(true)), f: 9 }).unwrap();
        let cuts = reg.cuts_below(100);
        assert_eq!(cuts.len(), 1);
        assert_eq!(cuts[0].f, 2);
    }
}
