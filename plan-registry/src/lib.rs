//! C9/C10 — the solution-cut registry, bidirectional plan reconstruction,
//! and the pluggable selector/manager interfaces a caller plugs in to decide
//! which reconstructed plans are kept and where they go.

mod manager;
mod reconstruct;
mod registry;
mod selector;

pub use manager::PlanManager;
pub use reconstruct::{construct_cheaper_solutions, PruneModes, ReconstructionOrder};
pub use registry::{RegistryError, SolutionRegistry};
pub use selector::{
    multiset_hash, sequence_hash, CustomSelector, IterativeCostSelector, PlanSelector, SelectorBookkeeping, SimpleSelector, TopKEvenSelector,
    TopKSelector, UnorderedSelector, ValidationSelector,
};

use transition::OperatorId;

/// A materialized, total-ordered operator sequence and its summed cost.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plan {
    pub operators: Vec<OperatorId>,
    pub cost: i64,
}
