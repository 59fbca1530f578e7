use clap::Parser;
use hashbrown::HashMap;

use plan_registry::{IterativeCostSelector, Plan, PlanManager, SimpleSelector, TopKSelector, UnorderedSelector};
use symplan::{demo, engine, transform_task, Config, Scenario, SelectorKind};
use symplan_task::{InMemoryTask, SasPlanFileManager};
use transition::OperatorId;

/// Dumps every accepted plan to stdout without touching the filesystem, for
/// runs that pass no `--plan-file`.
struct StdoutManager {
    operator_names: HashMap<OperatorId, String>,
}

impl PlanManager for StdoutManager {
    fn save_plan(&mut self, plan: &Plan, dump_to_stdout: bool, _multiple: bool) -> anyhow::Result<()> {
        if dump_to_stdout {
            self.dump_plan(plan);
        }
        Ok(())
    }

    fn dump_plan(&self, plan: &Plan) {
        for &op in &plan.operators {
            let name = self.operator_names.get(&op).cloned().unwrap_or_else(|| format!("op-{}", op.0));
            println!("({})", name);
        }
        println!("; cost = {} (general cost)", plan.cost);
    }
}

fn build_task(config: &Config) -> InMemoryTask {
    let base = match config.scenario {
        Scenario::A => demo::scenario_a(),
        Scenario::B => demo::scenario_b(),
    };
    transform_task(&base, config.transform)
}

fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let max_level = if config.silent { tracing::Level::WARN } else { tracing::Level::INFO };
    let subscriber = tracing_subscriber::fmt().with_max_level(max_level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let task = build_task(&config);
    let mut engine = engine::Engine::build(&task, config.gamer_ordering)?;

    let mut manager: Box<dyn PlanManager> = match &config.plan_file {
        Some(path) => Box::new(SasPlanFileManager::new(path.clone(), engine.operator_names.clone())),
        None => Box::new(StdoutManager { operator_names: engine.operator_names.clone() }),
    };

    let accepted = match config.selector {
        SelectorKind::TopK => {
            let mut selector = TopKSelector::new(config.num_plans);
            engine::run(&mut engine, &config, &mut selector, manager.as_mut())?
        }
        SelectorKind::IterativeCost => {
            let mut selector = IterativeCostSelector::new(config.plan_cost_bound);
            engine::run(&mut engine, &config, &mut selector, manager.as_mut())?
        }
        SelectorKind::Simple => {
            let mut selector = SimpleSelector::new(config.num_plans);
            engine::run(&mut engine, &config, &mut selector, manager.as_mut())?
        }
        SelectorKind::Unordered => {
            let mut selector = UnorderedSelector::new(config.num_plans);
            engine::run(&mut engine, &config, &mut selector, manager.as_mut())?
        }
    };

    if !config.silent {
        tracing::info!(accepted, "search finished");
    }
    println!("accepted {} plan(s)", accepted);
    Ok(())
}
