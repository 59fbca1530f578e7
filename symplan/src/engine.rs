//! Wires C4 (variables) through C9 (reconstruction) into one pipeline a CLI
//! or test can drive end to end: build the variable layout, compile axioms,
//! split SDAC operators into facets, build transition relations, run the
//! bidirectional search, and reconstruct accepted plans.

use hashbrown::HashMap;

use dd::{bdd, ClassicStorage, Forest, GcPolicy, Grid, Handle, RangeType, Reduction, Terminal};
use plan_registry::{construct_cheaper_solutions, PlanManager, PlanSelector, PruneModes, ReconstructionOrder, SolutionRegistry};
use sdac::{fold_expr, parse_infix, split_facets, var_value_add_for};
use search_core::{Direction, SearchConfig, SearchSide, StepOutcome, SymbolicSearch};
use symvars::{SymVariables, VarId};
use transition::{CostBucket, OperatorId, TransitionRelation};
use symplan_task::{OperatorCost, PartialState, Task, TaskOperator};

use crate::Config;

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Dd(#[from] dd::DdError),
    #[error(transparent)]
    Sdac(#[from] sdac::SdacError),
    #[error(transparent)]
    CostParse(#[from] sdac::CostParseError),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// A fully compiled task: variable layout, compiled axiom representations,
/// and the per-cost transition relation buckets every search side replays.
pub struct Engine<'t> {
    task: &'t dyn Task,
    vars: SymVariables,
    forest: dd::ForestHandle,
    /// Integer-range forest backing every cost-expression ADD, sharing level
    /// numbers with `forest` but never BDD nodes; built once so every
    /// operator's cost expression folds against the same var-value ADDs.
    cost_forest: dd::ForestHandle,
    primary_rep: HashMap<VarId, Handle>,
    /// `var_value_add` for every task variable, over a dedicated Integer-range
    /// forest sharing level numbers with `forest`; precomputed once so cost
    /// expression folding never needs to re-borrow that forest from inside
    /// its own `resolve_var` callback (which `fold_expr` calls while already
    /// holding the forest borrow it was given).
    cost_var_adds: HashMap<usize, Handle>,
    pub operator_names: HashMap<OperatorId, String>,
}

fn domain_order(num_vars: usize, gamer_ordering: bool) -> Vec<usize> {
    let mut order: Vec<usize> = (0..num_vars).collect();
    // The Gamer ordering heuristic itself (graph-based variable causal
    // grouping) is out of scope; this stands in with the one static
    // reordering `reorder_variables` actually supports at construction time.
    if gamer_ordering {
        order.reverse();
    }
    order
}

impl<'t> Engine<'t> {
    pub fn build(task: &'t dyn Task, gamer_ordering: bool) -> EngineResult<Self> {
        let forest = Forest::new(RangeType::Boolean, Reduction::Fully, GcPolicy::Optimistic, Box::new(Grid::default()), Box::new(ClassicStorage));
        let domains: Vec<u32> = (0..task.num_variables()).map(|i| task.domain_size(VarId::from_index(i))).collect();
        let derived: Vec<bool> = (0..task.num_variables()).map(|i| task.is_derived(VarId::from_index(i))).collect();
        let order = domain_order(task.num_variables(), gamer_ordering);
        let mut vars = SymVariables::build(forest.clone(), &domains, &derived, &order, 0)?;
        let _ = vars.valid_states()?;

        let default_val = HashMap::new();
        let compiler = axioms::AxiomCompiler::new(&vars, task.axioms(), default_val);
        let primary_rep = compiler.compile()?;

        let mut operator_names = HashMap::new();
        for op in task.operators() {
            operator_names.insert(op.id, op.name.clone());
        }

        let cost_forest = Forest::new(RangeType::Integer, Reduction::Fully, GcPolicy::Optimistic, Box::new(Grid::default()), Box::new(ClassicStorage));
        let needs_cost_adds = task.operators().iter().any(|op| matches!(op.cost, OperatorCost::Expression(_)));
        let mut cost_var_adds = HashMap::new();
        if needs_cost_adds {
            let mut af = cost_forest.borrow_mut();
            for i in 0..task.num_variables() {
                let add = var_value_add_for(&mut af, &vars, VarId::from_index(i))?;
                cost_var_adds.insert(i, add);
            }
        }

        Ok(Engine { task, vars, forest, cost_forest, primary_rep, cost_var_adds, operator_names })
    }

    fn literal_bdd(&self, v: VarId, val: u32) -> dd::DdResult<Handle> {
        if self.task.is_derived(v) {
            let rep = self.primary_rep.get(&v).copied().unwrap_or(Handle::Terminal(Terminal::Bool(false)));
            if val == 0 {
                bdd::not(&mut self.forest.borrow_mut(), rep)
            } else {
                Ok(rep)
            }
        } else {
            self.vars.pre_bdd(v, val)
        }
    }

    fn partial_bdd(&self, partial: &PartialState) -> dd::DdResult<Handle> {
        let mut acc = Handle::Terminal(Terminal::Bool(true));
        for &(v, val) in &partial.0 {
            let lit = self.literal_bdd(v, val)?;
            acc = bdd::and(&mut self.forest.borrow_mut(), acc, lit)?;
        }
        Ok(acc)
    }

    /// `ITE`-chains every effect touching `v`, in declaration order, so a
    /// later-declared effect's condition takes precedence over an earlier
    /// one when both hold; a variable with no effect satisfied keeps its
    /// prior value via `biimp`.
    fn effect_bdd_for(&self, op: &TaskOperator, v: VarId) -> dd::DdResult<Handle> {
        let mut acc = self.vars.biimp(v)?;
        for eff in &op.effects {
            if eff.var != v {
                continue;
            }
            let cond = self.partial_bdd(&eff.condition)?;
            let val_bdd = self.vars.eff_bdd(v, eff.value)?;
            acc = bdd::ite(&mut self.forest.borrow_mut(), cond, val_bdd, acc)?;
        }
        Ok(acc)
    }

    fn touched_vars(&self, op: &TaskOperator) -> Vec<VarId> {
        let mut vars: Vec<VarId> = op.effects.iter().map(|e| e.var).collect();
        vars.sort();
        vars.dedup();
        vars
    }

    fn resolve_cost_var(&self, name: &str) -> Result<Handle, sdac::SdacError> {
        let idx: usize = name.strip_prefix('v').and_then(|s| s.parse().ok()).ok_or_else(|| sdac::SdacError::UnknownVariable(name.to_string()))?;
        self.cost_var_adds.get(&idx).copied().ok_or_else(|| sdac::SdacError::UnknownVariable(name.to_string()))
    }

    /// One [`TransitionRelation`] per constant-cost facet of `op`, grouped by
    /// their integer cost.
    fn operator_relations(&mut self, op: &TaskOperator) -> EngineResult<Vec<(i64, TransitionRelation)>> {
        let precondition = self.partial_bdd(&op.preconditions)?;
        let eff_vars = self.touched_vars(op);
        let mut eff_bdd = Handle::Terminal(Terminal::Bool(true));
        for &v in &eff_vars {
            let per_var = self.effect_bdd_for(op, v)?;
            eff_bdd = bdd::and(&mut self.forest.borrow_mut(), eff_bdd, per_var)?;
        }

        match &op.cost {
            OperatorCost::Constant(c) => {
                let tr = TransitionRelation::build(&mut self.vars, op.id, precondition, eff_bdd, &eff_vars)?;
                Ok(vec![(*c, tr)])
            }
            OperatorCost::Expression(expr) => {
                let parsed = parse_infix(expr)?;
                let cost_add = {
                    let mut af = self.cost_forest.borrow_mut();
                    fold_expr(&mut af, &parsed, &mut |name| self.resolve_cost_var(name))?
                };
                let facets = {
                    let af = self.cost_forest.borrow();
                    let mut bf = self.forest.borrow_mut();
                    split_facets(&af, &mut bf, cost_add, precondition)?
                };
                let mut out = Vec::new();
                for facet in facets {
                    let tr = TransitionRelation::build(&mut self.vars, op.id, facet.precondition, eff_bdd, &eff_vars)?;
                    out.push((facet.cost as i64, tr));
                }
                Ok(out)
            }
        }
    }

    /// Builds a fresh, independently owned copy of every operator's
    /// transition relations grouped into cost buckets; called once per
    /// search side so the forward and backward `SearchSide`s each own their
    /// own relations rather than sharing one `Vec` by reference.
    pub fn build_buckets(&mut self) -> EngineResult<Vec<CostBucket>> {
        let mut by_cost: HashMap<i64, CostBucket> = HashMap::new();
        let operators: Vec<TaskOperator> = self.task.operators().to_vec();
        for op in &operators {
            for (cost, tr) in self.operator_relations(op)? {
                by_cost.entry(cost).or_insert_with(|| CostBucket::new(cost)).relations.push(tr);
            }
        }
        Ok(by_cost.into_values().collect())
    }

    pub fn initial_bdd(&self) -> dd::DdResult<Handle> {
        self.partial_bdd(self.task.initial_state())
    }

    pub fn goal_bdd(&self) -> dd::DdResult<Handle> {
        self.partial_bdd(self.task.goal())
    }

    pub fn forest(&self) -> &dd::ForestHandle {
        &self.forest
    }

    pub fn task(&self) -> &'t dyn Task {
        self.task
    }
}

/// Runs the forward/backward search to termination and reconstructs every
/// accepted plan, handing each to `selector` and `manager`.
pub fn run(engine: &mut Engine<'_>, config: &Config, selector: &mut dyn PlanSelector, manager: &mut dyn PlanManager) -> anyhow::Result<usize> {
    let initial = engine.initial_bdd()?;
    let goal = engine.goal_bdd()?;
    let forest = engine.forest().clone();

    let fwd_buckets = engine.build_buckets()?;
    let bwd_buckets = engine.build_buckets()?;
    let fwd_side = SearchSide::new(Direction::Forward, forest.clone(), initial, fwd_buckets);
    let bwd_side = SearchSide::new(Direction::Backward, forest.clone(), goal, bwd_buckets);

    let search_config = SearchConfig {
        plan_cost_bound: config.plan_cost_bound,
        single_solution: config.num_plans <= 1,
        time_limit: None,
        max_nodes: 1_000_000,
    };
    let mut search = SymbolicSearch::new(fwd_side, Some(bwd_side), search_config);
    let mut registry = SolutionRegistry::new(config.num_plans <= 1);

    loop {
        match search.advance()? {
            StepOutcome::Cuts(cuts) => {
                for cut in cuts {
                    registry.register_solution(&forest, cut)?;
                }
            }
            StepOutcome::TimedOut => {
                tracing::warn!("search timed out before exhausting the open frontier");
                break;
            }
            StepOutcome::Exhausted => break,
        }
        if !config.silent {
            tracing::debug!(lower_bound = search.lower_bound, upper_bound = search.upper_bound, "search progress");
        }
        if search.bound_exhausted() || search.open_exhausted() || selector.enough() {
            break;
        }
    }

    let prune = PruneModes { single: config.num_plans <= 1, simple: config.simple, justified: false };
    let accepted = construct_cheaper_solutions(
        &forest,
        &registry,
        &search.forward,
        search.backward.as_ref().expect("backward side always present"),
        i64::MAX,
        ReconstructionOrder::CostFirst,
        prune,
        selector,
        manager,
    )?;
    Ok(accepted)
}
