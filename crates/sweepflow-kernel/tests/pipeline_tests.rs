use pretty_assertions::assert_eq;
use std::sync::Arc;
use sweepflow_kernel::cache::{RunReason, Verdict};
use sweepflow_kernel::config::Pipeline;
use sweepflow_kernel::error::{KernelError, SweepError};
use sweepflow_kernel::graph::DependencyGraph;
use sweepflow_kernel::rule::ScriptRef;
use sweepflow_kernel::sweep::MigrationSweep;
use sweepflow_kernel::{exit_codes, NodeState};
use sweepflow_test_utils::{ScriptedRunner, TestWorkspace};

const PIPELINE: &str = r#"
settings:
  max_concurrency: 2
  working_dir: work
rules:
  - name: "sim_{seed}"
    output: "runs/{seed}.vice/"
    script: python sim.py
    cache: true
    params:
      seed: "{seed}"
      zone_width: 0.1
    sweep:
      axes:
        - { name: seed, values: [1, 2] }
  - name: summary
    input: [runs/1.vice/, runs/2.vice/]
    output: summary.txt
    script: [python, summary.py]
    cache: true
"#;

fn write_pipeline(ws: &TestWorkspace) -> Pipeline {
    let path = ws.path().join("pipeline.yaml");
    std::fs::write(&path, PIPELINE).unwrap();
    std::fs::create_dir_all(ws.path().join("work")).unwrap();
    Pipeline::load(&path).unwrap()
}

#[tokio::test]
async fn test_loaded_pipeline_plans_then_runs() {
    let ws = TestWorkspace::new();
    let pipeline = write_pipeline(&ws);
    assert_eq!(pipeline.settings.working_dir, ws.path().join("work"));

    let runner = Arc::new(ScriptedRunner::new());
    let engine = ws.engine_with(pipeline.settings.clone(), runner.clone());

    let plan = engine.plan(&pipeline.rules).unwrap();
    let names: Vec<_> = plan.nodes.iter().map(|n| n.name.as_str()).collect();
    assert_eq!(names, ["sim_1", "sim_2", "summary"]);
    assert_eq!(plan.to_run(), 3);
    assert!(runner.calls().is_empty());

    let report = engine.run(&pipeline.rules).await.unwrap();
    assert_eq!(report.counts.done, 3);
    assert!(ws.exists("work/runs/1.vice/payload"));
    assert!(ws.exists("work/summary.txt"));

    let sim = runner
        .invocations()
        .into_iter()
        .find(|inv| inv.rule == "sim_2")
        .unwrap();
    assert_eq!(sim.program, "python");
    assert_eq!(sim.args, ["sim.py", "--seed=2", "--zone_width=0.1"]);

    let replan = engine.plan(&pipeline.rules).unwrap();
    assert_eq!(replan.to_run(), 0);
    assert!(replan.generate_text().contains("CACHED  sim_1"));
}

#[tokio::test]
async fn test_deleted_output_reruns_consumers() {
    let ws = TestWorkspace::new();
    let pipeline = write_pipeline(&ws);
    let runner = Arc::new(ScriptedRunner::new());
    let engine = ws.engine_with(pipeline.settings.clone(), runner.clone());
    engine.run(&pipeline.rules).await.unwrap();

    std::fs::remove_dir_all(ws.path().join("work/runs/2.vice")).unwrap();
    let plan = engine.plan(&pipeline.rules).unwrap();
    let verdicts: Vec<_> = plan.nodes.iter().map(|n| n.verdict.clone()).collect();
    assert_eq!(verdicts[0], Verdict::Cached);
    assert!(matches!(verdicts[1], Verdict::Run(RunReason::OutputMissing(_))));
    assert_eq!(verdicts[2], Verdict::Run(RunReason::UpstreamChanged("sim_2".into())));

    runner.clear_calls();
    let report = engine.run(&pipeline.rules).await.unwrap();
    assert_eq!(runner.calls(), ["sim_2", "summary"]);
    assert_eq!(report.node("sim_1").unwrap().state, NodeState::SkippedCached);
    assert_eq!(report.node("summary").unwrap().state, NodeState::Done);
}

fn migration() -> MigrationSweep {
    MigrationSweep::new(ScriptRef::new("python", ["scripts/migration.py"]))
        .with_evolutions(["insideout", "lateburst"])
        .with_dtd("powerlaw", "slope=-1.1", "powerlaw_slope11")
        .with_dtd("powerlaw", "slope=-1.4", "powerlaw_slope14")
        .with_dtd("plateau", "width=0.3_slope=-1.1", "plateau_width300_slope11")
}

#[tokio::test]
async fn test_migration_sweep_runs_every_combination() {
    let ws = TestWorkspace::new();
    let runner = Arc::new(ScriptedRunner::new());
    let graph = DependencyGraph::build(migration().with_cache(true).instances().unwrap()).unwrap();
    assert_eq!(graph.len(), 6);
    assert_eq!(graph.edge_count(), 0);

    let engine = ws.engine(runner.clone());
    let report = engine.run_graph(graph).await.unwrap();

    assert_eq!(report.counts.done, 6);
    assert!(ws.exists("data/migration/gaussian/lateburst/plateau_width300_slope11.vice/payload"));
    let inv = runner
        .invocations()
        .into_iter()
        .find(|inv| inv.rule == "gaussian/insideout/powerlaw_slope14")
        .unwrap();
    assert!(inv.args.contains(&"--RIa=powerlaw".to_string()));
    assert!(inv.args.contains(&"--RIa-params=slope=-1.4".to_string()));
    assert!(inv.args.contains(&"--name=data/migration/gaussian/insideout/powerlaw_slope14".to_string()));
    assert_eq!(inv.args.last().map(String::as_str), Some("-f"));

    runner.clear_calls();
    let graph = DependencyGraph::build(migration().with_cache(true).instances().unwrap()).unwrap();
    let again = engine.run_graph(graph).await.unwrap();
    assert!(runner.calls().is_empty());
    assert_eq!(again.counts.skipped_cached, 6);
}

#[test]
fn test_ragged_dtd_lists_rejected() {
    let mut sweep = migration();
    sweep.dtd_names.pop();

    let err = KernelError::from(sweep.instances().unwrap_err());

    assert!(matches!(err, KernelError::Sweep(SweepError::RaggedGroup { .. })));
    assert_eq!(err.exit_code(), exit_codes::BUILD_ERROR);
}

#[tokio::test]
async fn test_plain_rule_keeps_braced_params() {
    let ws = TestWorkspace::new();
    let path = ws.path().join("plots.yaml");
    std::fs::write(
        &path,
        r#"
rules:
  - name: mdf
    output: plots/mdf.pdf
    script: python plot.py
    params:
      xlabel: "$\\mathrm{[Fe/H]}$"
      bins: ["{lo}", "{hi}"]
"#,
    )
    .unwrap();
    let pipeline = Pipeline::load(&path).unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    let engine = ws.engine(runner.clone());

    let instances = engine.expand(&pipeline.rules).unwrap();
    assert_eq!(instances[0].params["xlabel"], serde_json::json!(r"$\mathrm{[Fe/H]}$"));

    let report = engine.run(&pipeline.rules).await.unwrap();
    assert!(report.succeeded(), "{}", report.generate_text());
    let inv = runner.invocations().remove(0);
    assert_eq!(inv.args, ["plot.py", r"--xlabel=$\mathrm{[Fe/H]}$", "--bins={lo},{hi}"]);
}
