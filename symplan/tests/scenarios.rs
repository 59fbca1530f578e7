//! End-to-end checks driving `Engine::build` through `engine::run` against
//! the two built-in demo tasks, with no CLI argument parsing involved.

use plan_registry::{Plan, PlanManager, SimpleSelector, TopKSelector};
use symplan::{demo, engine, CostTransform, Config, Scenario, SelectorKind};
use transition::OperatorId;

struct CollectingManager {
    plans: Vec<Plan>,
}

impl PlanManager for CollectingManager {
    fn save_plan(&mut self, plan: &Plan, _dump_to_stdout: bool, _multiple: bool) -> anyhow::Result<()> {
        self.plans.push(plan.clone());
        Ok(())
    }

    fn dump_plan(&self, _plan: &Plan) {}
}

fn base_config() -> Config {
    Config {
        scenario: Scenario::A,
        selector: SelectorKind::TopK,
        num_plans: 1,
        dump_plans: false,
        simple: false,
        silent: true,
        plan_cost_bound: i64::MAX,
        gamer_ordering: false,
        dynamic_reordering: false,
        cudd_init_nodes: None,
        cudd_init_cache_size: None,
        cudd_init_available_memory: None,
        transform: CostTransform::Unchanged,
        plan_file: None,
    }
}

#[test]
fn scenario_a_finds_three_cost_three_plans() {
    let task = demo::scenario_a();
    let mut eng = engine::Engine::build(&task, false).unwrap();
    let config = Config { num_plans: 3, ..base_config() };
    let mut selector = TopKSelector::new(3);
    let mut manager = CollectingManager { plans: Vec::new() };

    let accepted = engine::run(&mut eng, &config, &mut selector, &mut manager).unwrap();

    assert_eq!(accepted, 3);
    assert_eq!(manager.plans.len(), 3);
    for plan in &manager.plans {
        assert_eq!(plan.cost, 3);
        assert_eq!(plan.operators.len(), 3);
    }
}

#[test]
fn scenario_b_rejects_the_state_repeating_nop_plan() {
    let task = demo::scenario_b();
    let mut eng = engine::Engine::build(&task, false).unwrap();
    let config = Config { scenario: Scenario::B, num_plans: 2, simple: true, ..base_config() };
    let mut selector = SimpleSelector::new(2);
    let mut manager = CollectingManager { plans: Vec::new() };

    let accepted = engine::run(&mut eng, &config, &mut selector, &mut manager).unwrap();

    assert_eq!(accepted, 1);
    assert_eq!(manager.plans.len(), 1);
    let plan = &manager.plans[0];
    assert_eq!(plan.cost, 2);
    assert_eq!(plan.operators.len(), 2);
    assert!(plan.operators.iter().all(|&op| op == OperatorId(0)));
}
