//! Wires the variable, axiom, SDAC, transition, search and plan-registry
//! crates into one end-to-end symbolic planner. The binary in `main.rs` is a
//! thin CLI shell around this library; integration tests drive [`Config`]
//! and [`engine::run`] directly without going through argument parsing.

pub mod demo;
pub mod engine;

use clap::{Parser, ValueEnum};

/// One field per configuration key the planner reads; mirrors the knobs a
/// Fast-Downward-style `search` binary takes on its command line.
#[derive(Parser, Clone, Debug)]
#[command(name = "symplan", about = "Symbolic bidirectional search planner", version)]
pub struct Config {
    /// Built-in demo task to run; there is no PDDL/SAS front end here.
    #[arg(long, value_enum, default_value = "a")]
    pub scenario: Scenario,

    #[arg(long, value_enum, default_value = "top-k")]
    pub selector: SelectorKind,

    #[arg(long, default_value_t = 1)]
    pub num_plans: usize,

    #[arg(long, default_value_t = false)]
    pub dump_plans: bool,

    /// Reject cuts that revisit an already-closed state instead of only
    /// deduplicating identical plans.
    #[arg(long, default_value_t = false)]
    pub simple: bool,

    #[arg(long, default_value_t = false)]
    pub silent: bool,

    #[arg(long, default_value_t = i64::MAX)]
    pub plan_cost_bound: i64,

    #[arg(long, default_value_t = false)]
    pub gamer_ordering: bool,

    /// Accepted for command-line compatibility; `Forest::reorder_variables`
    /// only supports reordering before any node is created, so there is
    /// nothing this flag can trigger mid-search.
    #[arg(long, default_value_t = false)]
    pub dynamic_reordering: bool,

    #[arg(long)]
    pub cudd_init_nodes: Option<usize>,
    #[arg(long)]
    pub cudd_init_cache_size: Option<usize>,
    #[arg(long)]
    pub cudd_init_available_memory: Option<usize>,

    #[arg(long, value_enum, default_value = "unchanged")]
    pub transform: CostTransform,

    #[arg(long)]
    pub plan_file: Option<std::path::PathBuf>,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, ValueEnum)]
pub enum Scenario {
    A,
    B,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, ValueEnum)]
pub enum SelectorKind {
    TopK,
    IterativeCost,
    Simple,
    Unordered,
}

/// The `task-transform` configuration key: a pre-search rewrite of every
/// operator's cost, applied before the engine ever sees the task.
#[derive(Copy, Clone, PartialEq, Eq, Debug, ValueEnum)]
pub enum CostTransform {
    Unchanged,
    /// Every operator costs exactly 1, regardless of its declared cost.
    UnitCost,
    /// Every constant cost is incremented by one; expression costs are left
    /// alone, since shifting a parsed SDAC expression is out of scope here.
    PlusOne,
}

/// Applies `transform` to a copy of `task`'s operators, leaving domains,
/// axioms, the initial state and the goal untouched.
pub fn transform_task(task: &dyn symplan_task::Task, transform: CostTransform) -> symplan_task::InMemoryTask {
    use symplan_task::{InMemoryTask, OperatorCost};
    use symvars::VarId;

    let n = task.num_variables();
    let domains: Vec<u32> = (0..n).map(|i| task.domain_size(VarId::from_index(i))).collect();
    let derived: Vec<bool> = (0..n).map(|i| task.is_derived(VarId::from_index(i))).collect();
    let axiom_layers: Vec<Option<u32>> = (0..n).map(|i| task.axiom_layer(VarId::from_index(i))).collect();
    let axioms = task.axioms().to_vec();
    let operators = task
        .operators()
        .iter()
        .cloned()
        .map(|mut op| {
            op.cost = match (transform, op.cost) {
                (CostTransform::Unchanged, c) => c,
                (CostTransform::UnitCost, _) => OperatorCost::Constant(1),
                (CostTransform::PlusOne, OperatorCost::Constant(c)) => OperatorCost::Constant(c + 1),
                (CostTransform::PlusOne, expr @ OperatorCost::Expression(_)) => expr,
            };
            op
        })
        .collect();

    InMemoryTask::new(domains, derived, axiom_layers, axioms, operators, task.initial_state().clone(), task.goal().clone())
        .expect("transform_task preserves the source task's derived/axiom-layer invariants")
}
