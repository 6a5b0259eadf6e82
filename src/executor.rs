use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

use indicatif::ProgressStyle;
use petgraph::graph::NodeIndex;
use serde_json::Value;
use tracing::Level;
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::deployment::{Deployment, MaterializeRequest, NodeStatus, Readiness};
use crate::error::{RunError, panic_message};
use crate::options::{FailurePolicy, Options};
use crate::report::{Diagnostics, Execution, RunReport};

/// Creates resources. This is where an executor meets the outside world.
pub trait Provider: Send + Sync {
    /// Materializes one resource and returns its attributes.
    fn materialize(&self, request: &MaterializeRequest) -> anyhow::Result<BTreeMap<String, Value>>;
}

impl<F> Provider for F
where
    F: Fn(&MaterializeRequest) -> anyhow::Result<BTreeMap<String, Value>> + Send + Sync,
{
    fn materialize(&self, request: &MaterializeRequest) -> anyhow::Result<BTreeMap<String, Value>> {
        self(request)
    }
}

struct Outcome {
    result: anyhow::Result<BTreeMap<String, Value>>,
    start: Instant,
    duration: Duration,
    attempts: u32,
}

/// Drives a [`Deployment`] to completion on a thread pool.
///
/// Resources are materialized as soon as all of their dependencies have
/// materialized, independent resources run in parallel.
#[derive(Debug, Clone, Default)]
pub struct Executor {
    options: Options,
}

impl Executor {
    pub fn new(options: Options) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Materializes every resource of `deployment` with `provider`.
    ///
    /// The scheduling works as follows:
    /// 1. Every resource starts with the number of dependencies it waits on.
    /// 2. Resources with no dependencies are handed to the thread pool.
    /// 3. The calling thread waits for results on a channel and reports each
    ///    one back to the deployment, settling the resource's outputs.
    /// 4. Every finished resource decrements the counters of its dependents,
    ///    a dependent reaching zero is handed to the pool in turn.
    /// 5. Resources the deployment already settled, because a dependency
    ///    failed or the run was aborted, finish without running.
    ///
    /// Provider failures do not end the run, they end up in the report.
    pub fn run<P: Provider>(
        &self,
        deployment: &Deployment,
        provider: &P,
    ) -> Result<RunReport, RunError> {
        let queue = deployment.queue();
        let total = queue.len();

        let mut dependency_counts: HashMap<NodeIndex, usize> = queue
            .iter()
            .map(|&index| (index, deployment.dependencies(index).len()))
            .collect();

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.parallelism)
            .thread_name(|i| format!("kumitate-{i}"))
            .build()?;

        let root_span = tracing::span!(Level::INFO, "deploy", project = deployment.project());
        if self.options.progress {
            root_span.pb_set_length(total as u64);
            root_span.pb_set_style(
                &ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
                    .progress_chars("=>-"),
            );
            root_span.pb_set_message("Materializing resources...");
        }
        let _enter = root_span.enter();

        let task_style = ProgressStyle::default_spinner().template("{spinner:.blue} {msg}")?;
        let progress = self.options.progress;
        let retries = self.options.retries;

        tracing::info!(resources = total, "starting deployment");

        let mut executions = BTreeMap::new();

        pool.in_place_scope(|s| -> Result<(), RunError> {
            let (sender, receiver) = channel::<(NodeIndex, Outcome)>();

            let spawn = |request: MaterializeRequest| {
                let sender = sender.clone();
                let task_style = task_style.clone();

                s.spawn(move |_| {
                    let span = tracing::span!(Level::INFO, "materialize", urn = %request.urn);
                    if progress {
                        span.pb_set_style(&task_style);
                        span.pb_set_message(&format!("Creating {}", request.urn));
                    }
                    let _enter = span.enter();

                    let start = Instant::now();
                    let (result, attempts) = materialize(provider, &request, retries);
                    let duration = start.elapsed();

                    let outcome = Outcome {
                        result,
                        start,
                        duration,
                        attempts,
                    };
                    // the scheduler only hangs up after it has failed itself
                    sender.send((request.index, outcome)).ok();
                });
            };

            let mut ready: VecDeque<NodeIndex> = queue
                .iter()
                .copied()
                .filter(|index| dependency_counts.get(index) == Some(&0))
                .collect();
            let mut finished: Vec<NodeIndex> = Vec::new();
            let mut completed = 0;

            loop {
                while let Some(index) = ready.pop_front() {
                    match prepare(deployment, index)? {
                        Some(request) => spawn(request),
                        None => finished.push(index),
                    }
                }

                if let Some(index) = finished.pop() {
                    completed += 1;
                    if progress {
                        root_span.pb_inc(1);
                    }

                    for dependent in deployment.dependents(index) {
                        if let Some(count) = dependency_counts.get_mut(&dependent) {
                            *count -= 1;
                            if *count == 0 {
                                ready.push_back(dependent);
                            }
                        }
                    }
                    continue;
                }

                if completed == total {
                    break;
                }

                let (index, outcome) = receiver.recv().map_err(|_| RunError::Disconnected)?;
                let failed = outcome.result.is_err();

                if let Some(urn) = deployment.urn(index) {
                    executions.insert(
                        urn.clone(),
                        Execution {
                            start: outcome.start,
                            duration: outcome.duration,
                            attempts: outcome.attempts,
                        },
                    );
                }

                deployment.resolve(index, outcome.result)?;

                if failed && self.options.policy == FailurePolicy::Abort {
                    deployment.abort();
                }

                finished.push(index);
            }

            Ok(())
        })?;

        let mut report = deployment.report();
        report.diagnostics = Diagnostics { executions };

        if report.is_success() {
            tracing::info!("deployment complete");
        } else {
            tracing::warn!(failures = report.failures.len(), "deployment finished with failures");
        }

        Ok(report)
    }
}

/// Turns a resource whose dependencies are done into a request, or `None` if
/// it settled without needing the provider.
fn prepare(
    deployment: &Deployment,
    index: NodeIndex,
) -> Result<Option<MaterializeRequest>, RunError> {
    if !matches!(deployment.status(index), Some(NodeStatus::Pending)) {
        return Ok(None);
    }

    match deployment.request(index)? {
        Readiness::Ready(request) => Ok(Some(request)),
        Readiness::Skipped(_) => Ok(None),
        Readiness::Waiting => {
            let error = anyhow::anyhow!("inputs depend on a value no resource will provide");
            deployment.resolve(index, Err(error))?;
            Ok(None)
        }
    }
}

/// Calls the provider, retrying failures up to `retries` times. A panicking
/// provider counts as a failed attempt.
fn materialize<P: Provider>(
    provider: &P,
    request: &MaterializeRequest,
    retries: u32,
) -> (anyhow::Result<BTreeMap<String, Value>>, u32) {
    let mut attempts = 0;

    loop {
        attempts += 1;

        // AssertUnwindSafe: a provider which panics half way is treated as a
        // failed attempt, its partial state is never read by us.
        let result = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            provider.materialize(request)
        })) {
            Ok(result) => result,
            Err(panic) => Err(anyhow::anyhow!(
                "Provider panicked: {}",
                panic_message(&*panic)
            )),
        };

        match result {
            Err(error) if attempts <= retries => {
                tracing::warn!(urn = %request.urn, attempt = attempts, "{error:#}, retrying");
            }
            result => return (result, attempts),
        }
    }
}
