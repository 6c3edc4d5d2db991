#![cfg(unix)]

use sweepflow_kernel::config::{EngineSettings, RuleEntry};
use sweepflow_kernel::engine::Engine;
use sweepflow_kernel::executor::{Invocation, ProcessRunner, ScriptRunner, PARAMS_ENV, RULE_ENV};
use sweepflow_kernel::rule::{ArtifactDecl, RuleDefinition, ScriptRef};
use sweepflow_kernel::{NodeError, NodeState};
use sweepflow_test_utils::TestWorkspace;

fn sh(name: &str, body: &str) -> RuleDefinition {
    RuleDefinition::new(name, ScriptRef::new("sh", ["-c", body, "sh"]))
}

fn engine(ws: &TestWorkspace) -> Engine {
    Engine::new(
        EngineSettings::new()
            .with_working_dir(ws.path())
            .with_max_concurrency(2)
            .with_launcher(["env", "SWEEPFLOW_ENV={env}"]),
    )
}

#[tokio::test]
async fn test_process_runner_captures_exit_and_streams() {
    let ws = TestWorkspace::new();
    let runner = ProcessRunner::new(64);
    let invocation = Invocation {
        rule: "probe".into(),
        program: "sh".into(),
        args: vec!["-c".into(), "echo out; echo err >&2; exit 7".into()],
        env: Vec::new(),
        working_dir: ws.path().to_path_buf(),
        outputs: Vec::new(),
    };

    let outcome = runner.run(&invocation).await.unwrap();

    assert_eq!(outcome.exit_code, Some(7));
    assert_eq!(outcome.stdout_tail.trim(), "out");
    assert_eq!(outcome.stderr_tail.trim(), "err");
    assert!(!outcome.success());
}

#[tokio::test]
async fn test_process_runner_keeps_only_stream_tails() {
    let ws = TestWorkspace::new();
    let runner = ProcessRunner::new(32);
    let invocation = Invocation {
        rule: "chatty".into(),
        program: "sh".into(),
        args: vec![
            "-c".into(),
            "yes zone | head -c 2000000; echo finished; yes warn | head -c 500000 >&2; echo last >&2".into(),
        ],
        env: Vec::new(),
        working_dir: ws.path().to_path_buf(),
        outputs: Vec::new(),
    };

    let outcome = runner.run(&invocation).await.unwrap();

    assert!(outcome.success());
    assert_eq!(outcome.stdout_tail.len(), 32);
    assert!(outcome.stdout_tail.ends_with("finished\n"));
    assert!(outcome.stderr_tail.len() <= 32);
    assert!(outcome.stderr_tail.ends_with("last\n"));
}

#[tokio::test]
async fn test_process_runner_reports_launch_failure() {
    let ws = TestWorkspace::new();
    let invocation = Invocation {
        rule: "ghost".into(),
        program: "sweepflow-no-such-program".into(),
        args: Vec::new(),
        env: Vec::new(),
        working_dir: ws.path().to_path_buf(),
        outputs: Vec::new(),
    };

    let err = ProcessRunner::default().run(&invocation).await.unwrap_err();

    assert!(matches!(err, NodeError::Launch { ref program, .. } if program == "sweepflow-no-such-program"));
}

#[tokio::test]
async fn test_script_receives_params_and_environment() {
    let ws = TestWorkspace::new();
    let rules = vec![RuleEntry::plain(
        sh(
            "record",
            // args after the script name land in $@
            r#"printf '%s\n' "$@" > out/args.txt; printf '%s|%s|%s' "$SWEEPFLOW_RULE" "$SWEEPFLOW_PARAMS" "$SWEEPFLOW_ENV" > out/env.txt"#,
        )
        .with_output(ArtifactDecl::file("out/args.txt"))
        .with_output(ArtifactDecl::file("out/env.txt"))
        .with_param("nstars", 2)
        .with_param("evolution", "insideout")
        .with_env("vice")
        .with_flag("-f"),
    )];

    let report = engine(&ws).run(&rules).await.unwrap();
    assert!(report.succeeded(), "{}", report.generate_text());

    let args = std::fs::read_to_string(ws.path().join("out/args.txt")).unwrap();
    assert_eq!(args.lines().collect::<Vec<_>>(), ["--nstars=2", "--evolution=insideout", "-f"]);

    let env = std::fs::read_to_string(ws.path().join("out/env.txt")).unwrap();
    let parts: Vec<_> = env.split('|').collect();
    assert_eq!(parts[0], "record");
    assert_eq!(parts[1], r#"{"nstars":2,"evolution":"insideout"}"#);
    assert_eq!(parts[2], "vice");
    assert_eq!(RULE_ENV, "SWEEPFLOW_RULE");
    assert_eq!(PARAMS_ENV, "SWEEPFLOW_PARAMS");
}

#[tokio::test]
async fn test_failing_script_reports_stderr_tail() {
    let ws = TestWorkspace::new();
    let rules = vec![
        RuleEntry::plain(
            sh("simulate", "echo 'zone 12 diverged' >&2; exit 2")
                .with_output(ArtifactDecl::file("sim.txt")),
        ),
        RuleEntry::plain(
            sh("plot", "cp sim.txt plot.txt")
                .with_input(ArtifactDecl::file("sim.txt"))
                .with_output(ArtifactDecl::file("plot.txt")),
        ),
    ];

    let report = engine(&ws).run(&rules).await.unwrap();

    let sim = report.node("simulate").unwrap();
    assert_eq!(sim.state, NodeState::Failed);
    assert_eq!(sim.exit_code, Some(2));
    assert_eq!(sim.diagnostics.as_deref(), Some("zone 12 diverged"));
    assert_eq!(report.node("plot").unwrap().state, NodeState::Failed);
    assert!(!ws.exists("plot.txt"));

    let text = report.generate_text();
    assert!(text.contains("=== Diagnostics ==="));
    assert!(text.contains("zone 12 diverged"));
}

#[tokio::test]
async fn test_directory_outputs_flow_downstream() {
    let ws = TestWorkspace::new();
    let rules = vec![
        RuleEntry::plain(
            sh("simulate", "mkdir -p data/run.vice && echo 1 > data/run.vice/history.out")
                .with_output(ArtifactDecl::directory("data/run.vice")),
        ),
        RuleEntry::plain(
            sh("plot", "wc -l < data/run.vice/history.out > plot.txt")
                .with_input(ArtifactDecl::directory("data/run.vice"))
                .with_output(ArtifactDecl::file("plot.txt")),
        ),
    ];

    let report = engine(&ws).run(&rules).await.unwrap();

    assert!(report.succeeded(), "{}", report.generate_text());
    assert!(ws.exists("plot.txt"));
}
