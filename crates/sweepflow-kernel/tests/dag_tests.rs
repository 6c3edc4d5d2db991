use proptest::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use sweepflow_kernel::config::RuleEntry;
use sweepflow_kernel::graph::DependencyGraph;
use sweepflow_kernel::state_machine::allowed_transitions;
use sweepflow_kernel::NodeState;
use sweepflow_test_utils::{chain_rule, Behavior, ScriptedRunner, TestWorkspace};

/// Rule `i` may only read outputs of rules `j < i`, so the result is acyclic
fn layered(node_count: usize, edges: &[(usize, usize)]) -> Vec<Vec<usize>> {
    let mut inputs = vec![Vec::new(); node_count];
    for &(a, b) in edges {
        let (a, b) = (a % node_count, b % node_count);
        if a < b && !inputs[b].contains(&a) {
            inputs[b].push(a);
        }
    }
    inputs
}

fn entries(inputs: &[Vec<usize>]) -> Vec<RuleEntry> {
    // declared in reverse so the scheduler cannot rely on declaration order
    (0..inputs.len())
        .rev()
        .map(|i| {
            let reads: Vec<String> = inputs[i].iter().map(|j| format!("n{j}.txt")).collect();
            let reads: Vec<&str> = reads.iter().map(String::as_str).collect();
            chain_rule(&format!("n{i}"), &reads, &format!("n{i}.txt"))
        })
        .collect()
}

fn ancestors(inputs: &[Vec<usize>], node: usize) -> HashSet<usize> {
    let mut seen = HashSet::new();
    let mut stack = inputs[node].clone();
    while let Some(next) = stack.pop() {
        if seen.insert(next) {
            stack.extend(inputs[next].iter().copied());
        }
    }
    seen
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_topological_order_respects_edges(
        node_count in 1..24usize,
        edges in proptest::collection::vec((0..24usize, 0..24usize), 0..60)
    ) {
        let inputs = layered(node_count, &edges);
        let graph = DependencyGraph::build(
            entries(&inputs)
                .into_iter()
                .map(|e| e.definition.instantiate().unwrap())
                .collect(),
        )
        .unwrap();

        prop_assert_eq!(graph.len(), node_count);
        let order = graph.topological_order();
        let position = |id| order.iter().position(|n| *n == id).unwrap();
        for node in graph.node_ids() {
            for producer in graph.producers(node) {
                prop_assert!(position(producer) < position(node));
            }
        }
    }

    #[test]
    fn prop_run_settles_every_node(
        node_count in 1..14usize,
        edges in proptest::collection::vec((0..14usize, 0..14usize), 0..30),
        failing in proptest::collection::hash_set(0..14usize, 0..3),
        jobs in 1..5usize,
    ) {
        let inputs = layered(node_count, &edges);
        let failing: HashSet<usize> = failing.into_iter().filter(|f| *f < node_count).collect();

        let ws = TestWorkspace::new();
        let runner = Arc::new(ScriptedRunner::new());
        for f in &failing {
            runner.set_behavior(&format!("n{f}"), Behavior::ExitWith(1));
        }
        let engine = ws.engine_with(ws.settings().with_max_concurrency(jobs), runner.clone());
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let report = rt.block_on(engine.run(&entries(&inputs))).unwrap();

        let calls = runner.calls();
        for i in 0..node_count {
            let name = format!("n{i}");
            let node = report.node(&name).unwrap();
            let blocked = ancestors(&inputs, i).iter().any(|a| failing.contains(a));

            let expected = if blocked || failing.contains(&i) {
                NodeState::Failed
            } else {
                NodeState::Done
            };
            prop_assert_eq!(node.state, expected, "{}", name);
            prop_assert_eq!(runner.call_count(&name), usize::from(!blocked));

            if let Some(at) = calls.iter().position(|c| *c == name) {
                for producer in &inputs[i] {
                    let before = calls.iter().position(|c| *c == format!("n{producer}"));
                    prop_assert!(before.is_some_and(|p| p < at));
                }
            }

            let terminal = report
                .journal
                .iter()
                .filter(|e| e.rule == name && e.to.is_terminal())
                .count();
            prop_assert_eq!(terminal, 1);
        }

        for event in &report.journal {
            prop_assert!(allowed_transitions(event.from).contains(&event.to));
        }
        prop_assert!(runner.max_in_flight() <= jobs);
    }
}

#[test]
fn test_wide_fan_in_builds() {
    let mut rules: Vec<RuleEntry> = (0..200)
        .map(|i| chain_rule(&format!("sim{i}"), &[], &format!("runs/{i}.txt")))
        .collect();
    let reads: Vec<String> = (0..200).map(|i| format!("runs/{i}.txt")).collect();
    let reads: Vec<&str> = reads.iter().map(String::as_str).collect();
    rules.push(chain_rule("summary", &reads, "summary.txt"));

    let graph = DependencyGraph::build(
        rules
            .into_iter()
            .map(|e| e.definition.instantiate().unwrap())
            .collect(),
    )
    .unwrap();

    let summary = graph.find("summary").unwrap();
    assert_eq!(graph.producers(summary).len(), 200);
    assert_eq!(graph.entry_nodes().len(), 200);
    assert_eq!(graph.exit_nodes(), vec![summary]);
    assert_eq!(*graph.topological_order().last().unwrap(), summary);
}
