//! C11 and the external `Task` collaborator: a read-only task model the
//! search/axiom/SDAC crates compile against, plus enough in-memory
//! scaffolding to run them end-to-end without a PDDL front end.

mod in_memory;
mod sas_plan;
mod task;

pub use in_memory::{InMemoryTask, InMemoryTaskError};
pub use sas_plan::SasPlanFileManager;
pub use task::{ConditionalEffect, OperatorCost, PartialState, Task, TaskOperator};
