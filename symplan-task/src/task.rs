//! The `Task` trait: read-only access to a planning task's variables,
//! axioms, operators, initial state and goal, as consumed by the search and
//! reconstruction crates without them depending on any particular task
//! representation (PDDL, SAS+, or otherwise).

use axioms::Axiom;
use symvars::VarId;
use transition::OperatorId;

/// A partial variable assignment: a goal, or an operator's precondition /
/// conditional-effect condition. Variables absent from the list are
/// unconstrained.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PartialState(pub Vec<(VarId, u32)>);

impl PartialState {
    pub fn holds(&self, state: &[u32]) -> bool {
        self.0.iter().all(|&(v, val)| state.get(v.index()).copied() == Some(val))
    }
}

/// A conditional effect: `var := value` if `condition` holds in the state
/// the operator is applied to (empty `condition` means unconditional).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConditionalEffect {
    pub condition: PartialState,
    pub var: VarId,
    pub value: u32,
}

/// An operator's cost, either a precomputed constant or a textual cost
/// expression (`sdac::expr`'s grammar) to be folded and split into facets
/// before search.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperatorCost {
    Constant(i64),
    Expression(String),
}

/// One task operator, as consumed by C4–C7 before it is compiled into
/// per-facet [`transition::TransitionRelation`]s.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskOperator {
    pub id: OperatorId,
    pub name: String,
    pub preconditions: PartialState,
    pub effects: Vec<ConditionalEffect>,
    pub cost: OperatorCost,
}

/// Read-only access to everything the search/axiom/SDAC layers need from a
/// planning task. The spec does not fix a wire format; implementors are
/// free to translate from PDDL, SAS+, or any other front end.
pub trait Task {
    fn num_variables(&self) -> usize;
    fn domain_size(&self, v: VarId) -> u32;
    fn is_derived(&self, v: VarId) -> bool;
    fn axiom_layer(&self, v: VarId) -> Option<u32>;
    fn axioms(&self) -> &[Axiom];
    fn operators(&self) -> &[TaskOperator];
    fn initial_state(&self) -> &PartialState;
    fn goal(&self) -> &PartialState;

    /// Applies the operator's unconditional and satisfied conditional
    /// effects to `state` (a complete assignment, one value per variable),
    /// returning `None` if its precondition does not hold. Used by the
    /// validation selector to replay a reconstructed plan against the
    /// original task rather than the search's own BDD encoding; does not
    /// re-evaluate derived-variable axioms, since the validation selector
    /// only needs to confirm the plan's primary-variable trajectory.
    fn apply(&self, state: &[u32], op_id: OperatorId) -> Option<Vec<u32>> {
        let op = self.operators().iter().find(|o| o.id == op_id)?;
        if !op.preconditions.holds(state) {
            return None;
        }
        let mut next = state.to_vec();
        for eff in &op.effects {
            if eff.condition.holds(state) {
                next[eff.var.index()] = eff.value;
            }
        }
        Some(next)
    }

    fn is_goal(&self, state: &[u32]) -> bool {
        self.goal().holds(state)
    }

    /// Initial state as a complete assignment, one value per variable, with
    /// every variable absent from `initial_state()`'s partial assignment
    /// defaulting to `0`.
    fn initial_complete_state(&self) -> Vec<u32> {
        let mut state = vec![0u32; self.num_variables()];
        for &(v, val) in &self.initial_state().0 {
            state[v.index()] = val;
        }
        state
    }
}
