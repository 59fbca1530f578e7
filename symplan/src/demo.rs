//! Two hand-built [`symplan_task::InMemoryTask`] fixtures exercising the full
//! engine pipeline without a PDDL/SAS front end: a 3-variable independent
//! conjunctive-goal task, and a 1-variable cyclic-counter task whose nop
//! operator exists only to be pruned as a state repeat.

use symplan_task::{ConditionalEffect, InMemoryTask, OperatorCost, PartialState, TaskOperator};
use symvars::VarId;
use transition::OperatorId;

fn var(i: usize) -> VarId {
    VarId::from_index(i)
}

/// `{p, q, r}`, each boolean, initially all false, goal all true. Three unit
/// cost operators each set one variable; every interleaving of the three
/// reaches the goal at cost 3.
pub fn scenario_a() -> InMemoryTask {
    let set = |id: u32, name: &str, v: VarId| TaskOperator {
        id: OperatorId(id),
        name: name.to_string(),
        preconditions: PartialState(vec![(v, 0)]),
        effects: vec![ConditionalEffect { condition: PartialState::default(), var: v, value: 1 }],
        cost: OperatorCost::Constant(1),
    };
    let (p, q, r) = (var(0), var(1), var(2));
    InMemoryTask::new(
        vec![2, 2, 2],
        vec![false, false, false],
        vec![None, None, None],
        vec![],
        vec![set(0, "set-p", p), set(1, "set-q", q), set(2, "set-r", r)],
        PartialState(vec![(p, 0), (q, 0), (r, 0)]),
        PartialState(vec![(p, 1), (q, 1), (r, 1)]),
    )
    .expect("scenario_a fixture is well-formed")
}

/// `{a}` over domain `{0, 1, 2}`, initially `0`, goal `2`. `o_inc` cycles `a`
/// forward modulo 3 via three mutually exclusive conditional effects and
/// costs 1; `o_nop` touches nothing and costs 0, so appending it after any
/// plan revisits the same state and is rejected by simple pruning.
pub fn scenario_b() -> InMemoryTask {
    let a = var(0);
    let o_inc = TaskOperator {
        id: OperatorId(0),
        name: "o_inc".to_string(),
        preconditions: PartialState::default(),
        effects: vec![
            ConditionalEffect { condition: PartialState(vec![(a, 0)]), var: a, value: 1 },
            ConditionalEffect { condition: PartialState(vec![(a, 1)]), var: a, value: 2 },
            ConditionalEffect { condition: PartialState(vec![(a, 2)]), var: a, value: 0 },
        ],
        cost: OperatorCost::Constant(1),
    };
    let o_nop = TaskOperator {
        id: OperatorId(1),
        name: "o_nop".to_string(),
        preconditions: PartialState::default(),
        effects: vec![],
        cost: OperatorCost::Constant(0),
    };
    InMemoryTask::new(vec![3], vec![false], vec![None], vec![], vec![o_inc, o_nop], PartialState(vec![(a, 0)]), PartialState(vec![(a, 2)]))
        .expect("scenario_b fixture is well-formed")
}
