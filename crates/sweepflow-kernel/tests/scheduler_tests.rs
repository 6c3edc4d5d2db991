use std::sync::Arc;
use std::time::Duration;
use sweepflow_kernel::config::RuleEntry;
use sweepflow_kernel::error::{BuildError, CollisionKind, KernelError};
use sweepflow_kernel::journal::verify_chain;
use sweepflow_kernel::state_machine::validate_transition;
use sweepflow_kernel::sweep::ParameterSweepSpec;
use sweepflow_kernel::{exit_codes, NodeState};
use sweepflow_test_utils::{chain_rule, dir, file, rule, Behavior, ScriptedRunner, TestWorkspace};

fn cached(entry: RuleEntry) -> RuleEntry {
    RuleEntry::plain(entry.definition.with_cache(true))
}

fn diamond() -> Vec<RuleEntry> {
    vec![
        chain_rule("prepare", &[], "prep.txt"),
        chain_rule("left", &["prep.txt"], "left.txt"),
        chain_rule("right", &["prep.txt"], "right.txt"),
        chain_rule("merge", &["left.txt", "right.txt"], "merged.txt"),
    ]
}

fn position(calls: &[String], name: &str) -> usize {
    calls.iter().position(|c| c == name).unwrap()
}

#[tokio::test]
async fn test_chain_runs_in_dependency_order() {
    let ws = TestWorkspace::new();
    let runner = Arc::new(ScriptedRunner::new());
    let rules = vec![
        chain_rule("plot", &["b.txt"], "c.txt"),
        chain_rule("analyse", &["a.txt"], "b.txt"),
        chain_rule("simulate", &[], "a.txt"),
    ];

    let report = ws.engine(runner.clone()).run(&rules).await.unwrap();

    assert_eq!(runner.calls(), ["simulate", "analyse", "plot"]);
    assert!(report.succeeded());
    assert_eq!(report.exit_code(), exit_codes::SUCCESS);
    assert_eq!(report.counts.done, 3);
    assert!(ws.exists("c.txt"));
}

#[tokio::test]
async fn test_diamond_respects_every_edge() {
    let ws = TestWorkspace::new();
    let runner = Arc::new(ScriptedRunner::new().with_delay(Duration::from_millis(5)));

    let report = ws.engine(runner.clone()).run(&diamond()).await.unwrap();

    let calls = runner.calls();
    assert_eq!(calls.len(), 4);
    assert!(position(&calls, "prepare") < position(&calls, "left"));
    assert!(position(&calls, "prepare") < position(&calls, "right"));
    assert!(position(&calls, "left") < position(&calls, "merge"));
    assert!(position(&calls, "right") < position(&calls, "merge"));
    assert_eq!(report.nodes.last().unwrap().name, "merge");
}

#[tokio::test]
async fn test_failure_propagates_to_descendants_only() {
    let ws = TestWorkspace::new();
    let runner = Arc::new(ScriptedRunner::new().with_behavior("simulate", Behavior::ExitWith(3)));
    let rules = vec![
        chain_rule("simulate", &[], "sim.txt"),
        chain_rule("plot", &["sim.txt"], "plot.txt"),
        chain_rule("summary", &["plot.txt"], "summary.txt"),
        chain_rule("other", &[], "other.txt"),
        chain_rule("other_plot", &["other.txt"], "other_plot.txt"),
    ];

    let report = ws.engine(runner.clone()).run(&rules).await.unwrap();

    assert!(!report.succeeded());
    assert_eq!(report.exit_code(), exit_codes::NODE_FAILED);

    let sim = report.node("simulate").unwrap();
    assert_eq!(sim.state, NodeState::Failed);
    assert!(sim.executed);
    assert_eq!(sim.exit_code, Some(3));
    assert_eq!(sim.diagnostics.as_deref(), Some("simulate exploded"));

    for name in ["plot", "summary"] {
        let node = report.node(name).unwrap();
        assert_eq!(node.state, NodeState::Failed);
        assert!(!node.executed);
        assert!(node.error.as_deref().unwrap().contains("upstream rule 'simulate' failed"));
    }
    assert_eq!(report.node("other").unwrap().state, NodeState::Done);
    assert_eq!(report.node("other_plot").unwrap().state, NodeState::Done);

    assert_eq!(runner.call_count("plot"), 0);
    assert_eq!(runner.call_count("summary"), 0);
    assert!(report.generate_text().contains("=== Result: FAILED ==="));
}

#[tokio::test]
async fn test_concurrency_never_exceeds_limit() {
    let ws = TestWorkspace::new();
    let runner = Arc::new(ScriptedRunner::new().with_delay(Duration::from_millis(20)));
    let rules: Vec<_> = (0..8)
        .map(|i| chain_rule(&format!("job{i}"), &[], &format!("out/{i}.txt")))
        .collect();

    let engine = ws.engine_with(ws.settings().with_max_concurrency(2), runner.clone());
    let report = engine.run(&rules).await.unwrap();

    assert_eq!(report.counts.done, 8);
    assert_eq!(runner.max_in_flight(), 2);
}

#[tokio::test]
async fn test_single_worker_runs_sequentially() {
    let ws = TestWorkspace::new();
    let runner = Arc::new(ScriptedRunner::new().with_delay(Duration::from_millis(5)));

    let engine = ws.engine_with(ws.settings().with_max_concurrency(1), runner.clone());
    let report = engine.run(&diamond()).await.unwrap();

    assert!(report.succeeded());
    assert_eq!(runner.max_in_flight(), 1);
}

#[tokio::test]
async fn test_cached_rerun_executes_nothing() {
    let ws = TestWorkspace::new();
    let runner = Arc::new(ScriptedRunner::new());
    let rules: Vec<_> = diamond().into_iter().map(cached).collect();
    let engine = ws.engine(runner.clone());

    let first = engine.run(&rules).await.unwrap();
    assert_eq!(first.counts.done, 4);

    runner.clear_calls();
    let second = engine.run(&rules).await.unwrap();
    assert!(runner.calls().is_empty());
    assert_eq!(second.counts.skipped_cached, 4);
    assert!(second.executed_names().is_empty());
    assert!(second.succeeded());
}

#[tokio::test]
async fn test_downstream_reruns_when_producer_runs() {
    let ws = TestWorkspace::new();
    let runner = Arc::new(ScriptedRunner::new());
    let rules = vec![
        chain_rule("simulate", &[], "sim.txt"),
        cached(chain_rule("plot", &["sim.txt"], "plot.txt")),
    ];
    ws.touch("sim.txt");
    ws.touch("plot.txt");

    let report = ws.engine(runner.clone()).run(&rules).await.unwrap();

    // simulate is not cacheable, so plot is stale even though its output exists
    assert_eq!(runner.calls(), ["simulate", "plot"]);
    assert_eq!(report.counts.done, 2);
}

#[tokio::test]
async fn test_cache_disabled_always_runs() {
    let ws = TestWorkspace::new();
    ws.touch("a.txt");
    let runner = Arc::new(ScriptedRunner::new());
    let rules = vec![chain_rule("simulate", &[], "a.txt")];

    let report = ws.engine(runner.clone()).run(&rules).await.unwrap();

    assert_eq!(runner.call_count("simulate"), 1);
    assert_eq!(report.node("simulate").unwrap().state, NodeState::Done);
}

#[tokio::test]
async fn test_missing_output_fails_node() {
    let ws = TestWorkspace::new();
    let runner = Arc::new(ScriptedRunner::new().with_behavior("simulate", Behavior::SkipOutputs));
    let rules = vec![
        chain_rule("simulate", &[], "a.txt"),
        chain_rule("plot", &["a.txt"], "b.txt"),
    ];

    let report = ws.engine(runner).run(&rules).await.unwrap();

    let sim = report.node("simulate").unwrap();
    assert_eq!(sim.state, NodeState::Failed);
    assert_eq!(sim.exit_code, Some(0));
    assert!(sim.error.as_deref().unwrap().contains("did not produce: a.txt"));
    assert_eq!(report.node("plot").unwrap().state, NodeState::Failed);
}

#[tokio::test]
async fn test_empty_directory_output_is_missing() {
    let ws = TestWorkspace::new();
    let runner = Arc::new(ScriptedRunner::new().with_behavior("simulate", Behavior::SkipOutputs));
    let rules = vec![RuleEntry::plain(rule("simulate").with_output(dir("runs/seed1.vice")))];

    // directory exists but the script leaves it empty
    std::fs::create_dir_all(ws.path().join("runs/seed1.vice")).unwrap();
    let report = ws.engine(runner).run(&rules).await.unwrap();

    assert_eq!(report.node("simulate").unwrap().state, NodeState::Failed);
}

#[tokio::test]
async fn test_cycle_rejected_before_execution() {
    let ws = TestWorkspace::new();
    let runner = Arc::new(ScriptedRunner::new());
    let rules = vec![
        chain_rule("a", &["b.txt"], "a.txt"),
        chain_rule("b", &["a.txt"], "b.txt"),
        chain_rule("free", &[], "free.txt"),
    ];

    let err = ws.engine(runner.clone()).run(&rules).await.unwrap_err();

    match &err {
        KernelError::Build(BuildError::Cycle { path }) => {
            assert_eq!(path.first(), path.last());
            assert!(path.contains(&"a".to_string()));
            assert!(path.contains(&"b".to_string()));
        }
        other => panic!("expected cycle, got {other}"),
    }
    assert_eq!(err.exit_code(), exit_codes::BUILD_ERROR);
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_output_collision_rejected() {
    let ws = TestWorkspace::new();
    let runner = Arc::new(ScriptedRunner::new());
    let rules = vec![
        chain_rule("first", &[], "shared.txt"),
        chain_rule("second", &[], "shared.txt"),
    ];

    let err = ws.engine(runner.clone()).run(&rules).await.unwrap_err();

    assert!(matches!(
        err,
        KernelError::Build(BuildError::NameCollision {
            kind: CollisionKind::OutputPath,
            ..
        })
    ));
    assert!(runner.calls().is_empty());
}

#[tokio::test]
async fn test_dangling_input_rejected_until_present() {
    let ws = TestWorkspace::new();
    let runner = Arc::new(ScriptedRunner::new());
    let rules = vec![
        chain_rule("ingest", &["raw/catalog.dat"], "clean.txt"),
        chain_rule("unrelated", &[], "u.txt"),
    ];
    let engine = ws.engine(runner.clone());

    let err = engine.run(&rules).await.unwrap_err();
    match &err {
        KernelError::Build(BuildError::DanglingInput { rule, input }) => {
            assert_eq!(rule, "ingest");
            assert_eq!(input.to_string(), "raw/catalog.dat");
        }
        other => panic!("expected dangling input, got {other}"),
    }
    assert_eq!(err.exit_code(), exit_codes::BUILD_ERROR);
    assert!(runner.calls().is_empty());

    ws.touch("raw/catalog.dat");
    let report = engine.run(&rules).await.unwrap();
    assert!(report.succeeded());
}

#[tokio::test]
async fn test_cancel_before_dispatch_runs_nothing() {
    let ws = TestWorkspace::new();
    let runner = Arc::new(ScriptedRunner::new());
    let engine = ws.engine(runner.clone());
    engine.cancel_handle().cancel();

    let report = engine.run(&diamond()).await.unwrap();

    assert!(runner.calls().is_empty());
    assert_eq!(report.counts.failed, 4);
    for node in &report.nodes {
        assert!(node.error.as_deref().unwrap().contains("cancelled"));
    }
}

#[tokio::test]
async fn test_cancel_lets_running_work_finish() {
    let ws = TestWorkspace::new();
    let runner = Arc::new(ScriptedRunner::new().with_delay(Duration::from_millis(150)));
    let rules = vec![
        chain_rule("simulate", &[], "a.txt"),
        chain_rule("plot", &["a.txt"], "b.txt"),
    ];
    let engine = ws.engine(runner.clone());
    let handle = engine.cancel_handle();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();
    });

    let report = engine.run(&rules).await.unwrap();

    assert_eq!(runner.calls(), ["simulate"]);
    assert_eq!(report.node("simulate").unwrap().state, NodeState::Done);
    let plot = report.node("plot").unwrap();
    assert_eq!(plot.state, NodeState::Failed);
    assert!(!plot.executed);
}

#[tokio::test]
async fn test_worker_panic_is_contained() {
    let ws = TestWorkspace::new();
    let runner = Arc::new(ScriptedRunner::new().with_behavior("simulate", Behavior::Panic));
    let rules = vec![
        chain_rule("simulate", &[], "a.txt"),
        chain_rule("plot", &["a.txt"], "b.txt"),
        chain_rule("other", &[], "c.txt"),
    ];

    let report = ws.engine(runner).run(&rules).await.unwrap();

    let sim = report.node("simulate").unwrap();
    assert_eq!(sim.state, NodeState::Failed);
    assert!(sim.error.as_deref().unwrap().contains("scripted panic in simulate"));
    assert_eq!(report.node("plot").unwrap().state, NodeState::Failed);
    assert_eq!(report.node("other").unwrap().state, NodeState::Done);
}

#[tokio::test]
async fn test_stamps_rerun_leftover_outputs() {
    let ws = TestWorkspace::new();
    let runner = Arc::new(ScriptedRunner::new());
    let rules = vec![RuleEntry::plain(
        rule("simulate")
            .with_output(file("x.txt"))
            .with_output(file("y.txt"))
            .with_cache(true),
    )];
    // left behind by an interrupted run: present but never stamped
    ws.touch("x.txt");
    ws.touch("y.txt");
    let engine = ws.engine_with(ws.settings().with_stamps(true), runner.clone());

    let plan = engine.plan(&rules).unwrap();
    assert_eq!(plan.to_run(), 1);

    engine.run(&rules).await.unwrap();
    assert_eq!(runner.call_count("simulate"), 1);

    let again = engine.run(&rules).await.unwrap();
    assert_eq!(runner.call_count("simulate"), 1);
    assert_eq!(again.counts.skipped_cached, 1);
}

#[tokio::test]
async fn test_stamps_invalidated_by_param_change() {
    let ws = TestWorkspace::new();
    let runner = Arc::new(ScriptedRunner::new());
    let settings = ws.settings().with_stamps(true);
    let base = rule("simulate").with_output(file("x.txt")).with_cache(true);

    let engine = ws.engine_with(settings, runner.clone());
    engine.run(&[RuleEntry::plain(base.clone().with_param("seed", 1))]).await.unwrap();
    engine.run(&[RuleEntry::plain(base.with_param("seed", 2))]).await.unwrap();

    assert_eq!(runner.call_count("simulate"), 2);
}

#[tokio::test]
async fn test_journal_records_legal_transitions() {
    let ws = TestWorkspace::new();
    let runner = Arc::new(ScriptedRunner::new().with_behavior("left", Behavior::ExitWith(1)));

    let report = ws.engine(runner).run(&diamond()).await.unwrap();

    assert!(verify_chain(&report.journal).is_ok());
    for event in &report.journal {
        assert!(validate_transition(event.node, event.from, event.to).is_ok());
    }
    // every node reaches exactly one terminal state
    for node in &report.nodes {
        let terminal = report
            .journal
            .iter()
            .filter(|e| e.rule == node.name && e.to.is_terminal())
            .count();
        assert_eq!(terminal, 1, "{}", node.name);
    }
}

#[tokio::test]
async fn test_directory_output_satisfies_nested_input() {
    let ws = TestWorkspace::new();
    let runner = Arc::new(ScriptedRunner::new());
    let rules = vec![
        RuleEntry::plain(rule("grid").with_output(dir("data/grid"))),
        RuleEntry::plain(
            rule("plot")
                .with_input(file("data/grid/payload"))
                .with_output(file("plot.txt")),
        ),
    ];

    let report = ws.engine(runner.clone()).run(&rules).await.unwrap();

    assert_eq!(runner.calls(), ["grid", "plot"]);
    assert!(report.succeeded());
}

#[tokio::test]
async fn test_swept_rule_feeds_aggregate() {
    let ws = TestWorkspace::new();
    let runner = Arc::new(ScriptedRunner::new().with_delay(Duration::from_millis(2)));
    let sim = RuleEntry::swept(
        rule("sim_{seed}")
            .with_output(dir("runs/{seed}.vice"))
            .with_param("seed", "{seed}"),
        ParameterSweepSpec::new().axis("seed", [1, 2, 3]),
    );
    let summary = RuleEntry::plain(
        rule("summary")
            .with_input(dir("runs/1.vice"))
            .with_input(dir("runs/2.vice"))
            .with_input(dir("runs/3.vice"))
            .with_output(file("summary.txt")),
    );

    let report = ws.engine(runner.clone()).run(&[sim, summary]).await.unwrap();

    assert_eq!(report.counts.done, 4);
    let calls = runner.calls();
    assert_eq!(calls.last().map(String::as_str), Some("summary"));
    let seeds: Vec<_> = runner
        .invocations()
        .iter()
        .filter(|inv| inv.rule.starts_with("sim_"))
        .flat_map(|inv| inv.args.clone())
        .filter(|arg| arg.starts_with("--seed="))
        .collect();
    assert_eq!(seeds.len(), 3);
    assert!(ws.exists("runs/2.vice/payload"));
}
