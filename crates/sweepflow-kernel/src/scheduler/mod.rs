//! Scheduler
//!
//! Walks a [`DependencyGraph`] with at most `max_concurrency` scripts in
//! flight. A node becomes ready once every producer is DONE or
//! SKIPPED_CACHED; the cache oracle then either skips it or the node is
//! claimed (PENDING -> RUNNING) and handed to a worker task.
//!
//! # Invariants
//!
//! - only this loop mutates the [`RecordTable`]; workers report
//!   `(NodeId, result)` over a channel
//! - a failed node fails every transitive consumer without running it, while
//!   unrelated nodes continue
//! - after cancellation nothing new is dispatched; in-flight work finishes
//!   and never-dispatched nodes fail with [`NodeError::Cancelled`]

mod cancel;

pub use cancel::{cancellation, CancelHandle, CancelSignal};

use crate::cache::{CacheOracle, Verdict};
use crate::error::{NodeError, StateMachineError};
use crate::executor::{ExecutionSuccess, Executor};
use crate::graph::DependencyGraph;
use crate::journal::RunJournal;
use crate::records::RecordTable;
use crate::types::{NodeId, NodeState};
use futures::FutureExt;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

type WorkerReport = (NodeId, Result<ExecutionSuccess, NodeError>);

/// Bounded dispatcher that walks a graph in dependency order
///
/// Ready nodes are consulted against the cache oracle, then skipped or handed
/// to the executor; at most `max_concurrency` executions are in flight.
pub struct Scheduler {
    executor: Arc<Executor>,
    oracle: Arc<CacheOracle>,
    max_concurrency: usize,
    cancel: CancelSignal,
}

impl Scheduler {
    /// `max_concurrency` is clamped to at least 1
    pub fn new(executor: Arc<Executor>, oracle: Arc<CacheOracle>, max_concurrency: usize) -> Self {
        Self {
            executor,
            oracle,
            max_concurrency: max_concurrency.max(1),
            cancel: CancelSignal::never(),
        }
    }

    /// Stop dispatching once `cancel` fires
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Effective worker bound, never zero
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Drive every node of `graph` to a terminal state
    ///
    /// # Errors
    /// [`StateMachineError`] only if the loop attempts an illegal transition,
    /// which indicates a bug rather than a node failure
    pub async fn run(
        &self,
        graph: Arc<DependencyGraph>,
        journal: Arc<RunJournal>,
    ) -> Result<RecordTable, StateMachineError> {
        let mut records = RecordTable::for_graph(&graph, journal);
        let mut waiting: Vec<usize> = graph.node_ids().map(|n| graph.producers(n).len()).collect();
        let mut ready: VecDeque<NodeId> = graph
            .topological_order()
            .iter()
            .copied()
            .filter(|n| waiting[n.index()] == 0)
            .collect();

        let (tx, mut rx) = mpsc::unbounded_channel::<WorkerReport>();
        let mut cancel = self.cancel.clone();
        let mut running = 0usize;

        info!(nodes = graph.len(), max_concurrency = self.max_concurrency, "run started");

        loop {
            while running < self.max_concurrency && !cancel.is_cancelled() {
                let Some(node) = ready.pop_front() else {
                    break;
                };
                if records.status(node) != NodeState::Pending {
                    continue;
                }

                let instance = graph.instance(node);
                let producers: Vec<(&str, NodeState)> = graph
                    .producers(node)
                    .into_iter()
                    .map(|p| (graph.instance(p).name.as_str(), records.status(p)))
                    .collect();

                match self.oracle.verdict(instance, &producers) {
                    Verdict::Cached => {
                        info!(rule = %instance.name, "cached, skipping");
                        records.skip_cached(node)?;
                        release(&graph, &records, &mut waiting, &mut ready, node);
                    }
                    Verdict::Run(reason) => {
                        debug!(rule = %instance.name, %reason, "dispatching");
                        records.claim(node)?;
                        running += 1;
                        self.spawn_worker(&graph, node, tx.clone());
                    }
                }
            }

            if running == 0 {
                break;
            }

            tokio::select! {
                Some((node, result)) = rx.recv() => {
                    running -= 1;
                    let name = &graph.instance(node).name;
                    match result {
                        Ok(success) => {
                            info!(rule = %name, "done");
                            records.complete(node, success.diagnostics)?;
                            release(&graph, &records, &mut waiting, &mut ready, node);
                        }
                        Err(error) => {
                            warn!(rule = %name, %error, "failed");
                            records.fail(node, error)?;
                            fail_descendants(&graph, &mut records, node)?;
                        }
                    }
                }
                () = cancel.cancelled(), if !cancel.is_cancelled() => {
                    warn!(in_flight = running, "cancellation requested; waiting for running rules");
                }
                else => break,
            }
        }

        for node in graph.topological_order() {
            if records.status(*node) == NodeState::Pending {
                records.fail(*node, NodeError::Cancelled)?;
            }
        }

        let counts = records.counts();
        info!(
            done = counts.done,
            skipped_cached = counts.skipped_cached,
            failed = counts.failed,
            "run finished"
        );
        Ok(records)
    }

    fn spawn_worker(&self, graph: &DependencyGraph, node: NodeId, tx: mpsc::UnboundedSender<WorkerReport>) {
        let executor = Arc::clone(&self.executor);
        let instance = graph.instance(node).clone();
        tokio::spawn(async move {
            let result = AssertUnwindSafe(executor.execute(&instance))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(NodeError::WorkerPanicked(panic_message(payload.as_ref()))));
            // receiver only goes away once the run is over
            let _ = tx.send((node, result));
        });
    }
}

/// Mark `node` satisfied for its consumers
fn release(
    graph: &DependencyGraph,
    records: &RecordTable,
    waiting: &mut [usize],
    ready: &mut VecDeque<NodeId>,
    node: NodeId,
) {
    for consumer in graph.consumers(node) {
        let left = &mut waiting[consumer.index()];
        *left = left.saturating_sub(1);
        if *left == 0 && records.status(consumer) == NodeState::Pending {
            ready.push_back(consumer);
        }
    }
}

fn fail_descendants(
    graph: &DependencyGraph,
    records: &mut RecordTable,
    node: NodeId,
) -> Result<(), StateMachineError> {
    let upstream = graph.instance(node).name.clone();
    for descendant in graph.descendants(node) {
        if records.status(descendant) == NodeState::Pending {
            records.fail(
                descendant,
                NodeError::UpstreamFailed {
                    upstream: upstream.clone(),
                },
            )?;
        }
    }
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_message_extracts_strings() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
