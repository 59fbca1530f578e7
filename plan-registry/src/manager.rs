use crate::Plan;

/// External collaborator responsible for persisting accepted plans; not
/// specified beyond this interface. `symplan-task` provides concrete
/// implementations (e.g. writing `sas_plan[.k]` files).
pub trait PlanManager {
    fn save_plan(&mut self, plan: &Plan, dump_to_stdout: bool, multiple: bool) -> anyhow::Result<()>;

    fn dump_plan(&self, plan: &Plan);
}
