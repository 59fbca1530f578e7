//! A minimal, fully in-memory [`Task`] implementation used by `symplan`'s
//! integration tests and CLI demos; not a PDDL/SAS translator, only a
//! convenient way to hand-construct small tasks.

use axioms::Axiom;
use symvars::VarId;

use crate::task::{PartialState, Task, TaskOperator};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum InMemoryTaskError {
    #[error("{0} variables declared but {1} derived flags given")]
    DerivedLenMismatch(usize, usize),
    #[error("variable {0} is derived but has no axiom layer")]
    MissingAxiomLayer(usize),
    #[error("variable {0} is not derived but has an axiom layer")]
    UnexpectedAxiomLayer(usize),
}

#[derive(Debug)]
pub struct InMemoryTask {
    domains: Vec<u32>,
    derived: Vec<bool>,
    axiom_layers: Vec<Option<u32>>,
    axioms: Vec<Axiom>,
    operators: Vec<TaskOperator>,
    initial_state: PartialState,
    goal: PartialState,
}

impl InMemoryTask {
    pub fn new(
        domains: Vec<u32>,
        derived: Vec<bool>,
        axiom_layers: Vec<Option<u32>>,
        axioms: Vec<Axiom>,
        operators: Vec<TaskOperator>,
        initial_state: PartialState,
        goal: PartialState,
    ) -> Result<Self, InMemoryTaskError> {
        if derived.len() != domains.len() || axiom_layers.len() != domains.len() {
            return Err(InMemoryTaskError::DerivedLenMismatch(domains.len(), derived.len()));
        }
        for (i, (&is_derived, layer)) in derived.iter().zip(axiom_layers.iter()).enumerate() {
            match (is_derived, layer) {
                (true, None) => return Err(InMemoryTaskError::MissingAxiomLayer(i)),
                (false, Some(_)) => return Err(InMemoryTaskError::UnexpectedAxiomLayer(i)),
                _ => {}
            }
        }
        Ok(InMemoryTask { domains, derived, axiom_layers, axioms, operators, initial_state, goal })
    }
}

impl Task for InMemoryTask {
    fn num_variables(&self) -> usize {
        self.domains.len()
    }

    fn domain_size(&self, v: VarId) -> u32 {
        self.domains[v.index()]
    }

    fn is_derived(&self, v: VarId) -> bool {
        self.derived[v.index()]
    }

    fn axiom_layer(&self, v: VarId) -> Option<u32> {
        self.axiom_layers[v.index()]
    }

    fn axioms(&self) -> &[Axiom] {
        &self.axioms
    }

    fn operators(&self) -> &[TaskOperator] {
        &self.operators
    }

    fn initial_state(&self) -> &PartialState {
        &self.initial_state
    }

    fn goal(&self) -> &PartialState {
        &self.goal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ConditionalEffect, OperatorCost};
    use transition::OperatorId;

    fn var(i: usize) -> VarId {
        VarId::from_index(i)
    }

    #[test]
    fn rejects_a_derived_variable_without_an_axiom_layer() {
        let err = InMemoryTask::new(vec![2, 2], vec![false, true], vec![None, None], vec![], vec![], PartialState::default(), PartialState::default()).unwrap_err();
        assert_eq!(err, InMemoryTaskError::MissingAxiomLayer(1));
    }

    #[test]
    fn apply_ignores_an_operator_whose_precondition_fails() {
        let op = TaskOperator {
            id: OperatorId(0),
            name: "set_true".into(),
            preconditions: PartialState(vec![(var(0), 1)]),
            effects: vec![ConditionalEffect { condition: PartialState::default(), var: var(1), value: 1 }],
            cost: OperatorCost::Constant(1),
        };
        let task = InMemoryTask::new(vec![2, 2], vec![false, false], vec![None, None], vec![], vec![op], PartialState(vec![(var(0), 0)]), PartialState(vec![(var(1), 1)])).unwrap();
        assert_eq!(task.apply(&[0, 0], OperatorId(0)), None);
        assert_eq!(task.apply(&[1, 0], OperatorId(0)), Some(vec![1, 1]));
    }

    #[test]
    fn conditional_effect_only_fires_when_its_condition_holds() {
        let op = TaskOperator {
            id: OperatorId(0),
            name: "maybe_flip".into(),
            preconditions: PartialState::default(),
            effects: vec![ConditionalEffect { condition: PartialState(vec![(var(0), 1)]), var: var(1), value: 1 }],
            cost: OperatorCost::Constant(1),
        };
        let task = InMemoryTask::new(vec![2, 2], vec![false, false], vec![None, None], vec![], vec![op], PartialState::default(), PartialState::default()).unwrap();
        assert_eq!(task.apply(&[0, 0], OperatorId(0)), Some(vec![0, 0]));
        assert_eq!(task.apply(&[1, 0], OperatorId(0)), Some(vec![1, 1]));
    }

    #[test]
    fn is_goal_checks_only_the_constrained_variables() {
        let task = InMemoryTask::new(vec![2, 2], vec![false, false], vec![None, None], vec![], vec![], PartialState::default(), PartialState(vec![(var(1), 1)])).unwrap();
        assert!(task.is_goal(&[0, 1]));
        assert!(task.is_goal(&[1, 1]));
        assert!(!task.is_goal(&[0, 0]));
    }
}
