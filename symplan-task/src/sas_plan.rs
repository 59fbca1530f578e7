//! C11 — a concrete [`plan_registry::PlanManager`] writing Fast-Downward-style
//! `sas_plan[.k]` files, grounded on `original_source/.../plan_manager.h`'s
//! `plan_filename`/`num_previously_generated_plans`/`save_plan` contract.

use std::fs;
use std::path::PathBuf;

use hashbrown::HashMap;

use plan_registry::{Plan, PlanManager};
use transition::OperatorId;

/// Writes accepted plans as `<plan_filename>` (single-plan runs) or
/// `<plan_filename>.1`, `<plan_filename>.2`, ... (`multiple = true`), one
/// operator name per line followed by a cost comment, matching the planner's
/// on-disk plan format.
pub struct SasPlanFileManager {
    plan_filename: PathBuf,
    num_previously_generated_plans: usize,
    operator_names: HashMap<OperatorId, String>,
}

impl SasPlanFileManager {
    pub fn new(plan_filename: impl Into<PathBuf>, operator_names: HashMap<OperatorId, String>) -> Self {
        SasPlanFileManager { plan_filename: plan_filename.into(), num_previously_generated_plans: 0, operator_names }
    }

    pub fn num_previously_generated_plans(&self) -> usize {
        self.num_previously_generated_plans
    }

    fn name_of(&self, op: OperatorId) -> String {
        self.operator_names.get(&op).cloned().unwrap_or_else(|| format!("op-{}", op.0))
    }

    fn render(&self, plan: &Plan) -> String {
        let mut out = String::new();
        for &op in &plan.operators {
            out.push('(');
            out.push_str(&self.name_of(op));
            out.push_str(")\n");
        }
        out.push_str(&format!("; cost = {} (general cost)\n", plan.cost));
        out
    }

    fn target_path(&self, multiple: bool) -> PathBuf {
        if multiple {
            let mut path = self.plan_filename.clone().into_os_string();
            path.push(format!(".{}", self.num_previously_generated_plans + 1));
            PathBuf::from(path)
        } else {
            self.plan_filename.clone()
        }
    }
}

impl PlanManager for SasPlanFileManager {
    fn save_plan(&mut self, plan: &Plan, dump_to_stdout: bool, multiple: bool) -> anyhow::Result<()> {
        let path = self.target_path(multiple);
        fs::write(&path, self.render(plan))?;
        self.num_previously_generated_plans += 1;
        tracing::info!(path = %path.display(), cost = plan.cost, steps = plan.operators.len(), "wrote plan");
        if dump_to_stdout {
            self.dump_plan(plan);
        }
        Ok(())
    }

    fn dump_plan(&self, plan: &Plan) {
        print!("{}", self.render(plan));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_mode_numbers_successive_plan_files() {
        let dir = std::env::temp_dir().join(format!("symplan-task-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sas_plan");
        let mut names = HashMap::new();
        names.insert(OperatorId(0), "move-a-b".to_string());
        let mut manager = SasPlanFileManager::new(&path, names);

        let plan = Plan { operators: vec![OperatorId(0)], cost: 1 };
        manager.save_plan(&plan, false, true).unwrap();
        manager.save_plan(&plan, false, true).unwrap();

        assert!(dir.join("sas_plan.1").exists());
        assert!(dir.join("sas_plan.2").exists());
        let contents = fs::read_to_string(dir.join("sas_plan.1")).unwrap();
        assert!(contents.contains("(move-a-b)"));
        assert!(contents.contains("cost = 1"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn single_mode_overwrites_the_same_file() {
        let dir = std::env::temp_dir().join(format!("symplan-task-test-single-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sas_plan");
        let mut manager = SasPlanFileManager::new(&path, HashMap::new());

        manager.save_plan(&Plan { operators: vec![OperatorId(0)], cost: 1 }, false, false).unwrap();
        manager.save_plan(&Plan { operators: vec![OperatorId(0), OperatorId(1)], cost: 2 }, false, false).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains("cost = 2"));
        assert!(!dir.join("sas_plan.1").exists());

        let _ = fs::remove_dir_all(&dir);
    }
}
