//! A frozen program, ready to be materialized.
//!
//! The deployment is the surface an execution engine drives. The engine asks
//! which resources are [`ready`](Deployment::ready), turns each into a
//! [`MaterializeRequest`] through [`Deployment::request`], talks to the actual
//! provider, and reports the outcome back with [`Deployment::resolve`].
//! Reporting settles the resource's outputs, which lets the inputs of its
//! dependents resolve in turn.
//!
//! A failure settles every resource downstream of the failed one as skipped,
//! carrying the original error, so nothing waits on a value which can never
//! arrive. Unrelated resources are not affected.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::{self, Display, Formatter};
use std::sync::{Arc, Mutex};

use petgraph::graph::NodeIndex;
use serde_json::Value;

use crate::error::{EngineError, ExportError, OutputError};
use crate::graph::DependencyGraph;
use crate::hash::Fingerprint;
use crate::node::{Node, ResourceNode};
use crate::output::lock;
use crate::report::{Failure, FailureKind, RunReport};
use crate::{Output, ProgramId, Urn};

/// Lifecycle of a resource within a deployment.
#[derive(Debug, Clone)]
pub enum NodeStatus {
    Pending,
    /// Handed to the engine, waiting for its report.
    Materializing,
    Materialized,
    Failed(OutputError),
    /// A dependency failed, carries that dependency's error.
    Skipped(OutputError),
    Aborted,
}

impl NodeStatus {
    pub fn is_settled(&self) -> bool {
        !matches!(self, NodeStatus::Pending | NodeStatus::Materializing)
    }
}

/// Everything a provider needs to create one resource.
#[derive(Debug, Clone)]
pub struct MaterializeRequest {
    pub index: NodeIndex,
    pub urn: Urn,
    pub parent: Option<Urn>,
    /// The resource's inputs with every output replaced by its value.
    pub inputs: Value,
    pub fingerprint: Fingerprint,
}

impl MaterializeRequest {
    pub fn kind(&self) -> &str {
        self.urn.kind()
    }

    pub fn name(&self) -> &str {
        self.urn.name()
    }

    pub fn input(&self, key: &str) -> Option<&Value> {
        self.inputs.get(key)
    }
}

/// Answer to [`Deployment::request`].
#[derive(Debug)]
pub enum Readiness {
    Ready(MaterializeRequest),
    /// Some input was built from an output which no resource will ever
    /// settle, such as an unresolved [`Output::channel`].
    Waiting,
    /// The inputs failed to resolve, the resource has been settled as
    /// skipped together with everything downstream.
    Skipped(OutputError),
}

pub struct Deployment {
    program: ProgramId,
    project: Arc<str>,
    graph: DependencyGraph<Node>,
    order: Vec<NodeIndex>,
    inputs: HashMap<NodeIndex, Output<Value>>,
    exports: BTreeMap<String, Output<Value>>,
    status: Mutex<HashMap<NodeIndex, NodeStatus>>,
}

impl Deployment {
    pub(crate) fn new(
        program: ProgramId,
        project: Arc<str>,
        graph: DependencyGraph<Node>,
        order: Vec<NodeIndex>,
        exports: BTreeMap<String, Output<Value>>,
    ) -> Self {
        let mut inputs = HashMap::new();
        let mut status = HashMap::new();

        for index in graph.node_indices() {
            if let Some(node) = graph[index].as_resource() {
                inputs.insert(index, node.inputs.resolve());
                status.insert(index, NodeStatus::Pending);
            }
        }

        Self {
            program,
            project,
            graph,
            order,
            inputs,
            exports,
            status: Mutex::new(status),
        }
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// All nodes, components included, in a valid materialization order.
    pub fn order(&self) -> &[NodeIndex] {
        &self.order
    }

    /// Resources in the order a sequential engine would materialize them.
    pub fn queue(&self) -> Vec<NodeIndex> {
        self.order
            .iter()
            .copied()
            .filter(|&index| self.graph[index].is_resource())
            .collect()
    }

    pub fn urn(&self, index: NodeIndex) -> Option<&Urn> {
        self.graph.get(index).map(Node::urn)
    }

    pub fn parent(&self, index: NodeIndex) -> Option<&Urn> {
        let parent = self.graph.get(index)?.parent()?;
        self.urn(parent)
    }

    /// Direct dependencies of a resource, components already expanded.
    pub fn dependencies(&self, index: NodeIndex) -> Vec<NodeIndex> {
        if self.graph.contains(index) {
            self.graph.dependencies(index)
        } else {
            Vec::new()
        }
    }

    pub fn dependents(&self, index: NodeIndex) -> Vec<NodeIndex> {
        if self.graph.contains(index) {
            self.graph.dependents(index)
        } else {
            Vec::new()
        }
    }

    /// `None` for components and unknown indices.
    pub fn status(&self, index: NodeIndex) -> Option<NodeStatus> {
        lock(&self.status).get(&index).cloned()
    }

    /// Pending resources whose dependencies have all materialized.
    pub fn ready(&self) -> Vec<NodeIndex> {
        let status = lock(&self.status);
        self.queue()
            .into_iter()
            .filter(|index| matches!(status.get(index), Some(NodeStatus::Pending)))
            .filter(|&index| {
                self.graph
                    .dependencies(index)
                    .iter()
                    .all(|dependency| matches!(status.get(dependency), Some(NodeStatus::Materialized)))
            })
            .collect()
    }

    /// True once every resource has settled one way or another.
    pub fn is_complete(&self) -> bool {
        lock(&self.status).values().all(NodeStatus::is_settled)
    }

    fn resource(&self, index: NodeIndex) -> Result<&ResourceNode, EngineError> {
        match self.graph.get(index) {
            Some(Node::Resource(node)) => Ok(node),
            Some(node) => Err(EngineError::NotAResource(node.urn().clone())),
            None => Err(EngineError::UnknownNode(index)),
        }
    }

    fn check_dependencies(
        &self,
        index: NodeIndex,
        status: &HashMap<NodeIndex, NodeStatus>,
    ) -> Result<(), EngineError> {
        for dependency in self.graph.dependencies(index) {
            if !matches!(status.get(&dependency), Some(NodeStatus::Materialized)) {
                return Err(EngineError::DependencyPending {
                    urn: self.graph[index].urn().clone(),
                    dependency: self.graph[dependency].urn().clone(),
                });
            }
        }
        Ok(())
    }

    /// Prepares a resource for materialization.
    ///
    /// All dependencies have to be materialized. On [`Readiness::Ready`] the
    /// resource is marked as materializing and the engine owes a
    /// [`Deployment::resolve`] call for it.
    pub fn request(&self, index: NodeIndex) -> Result<Readiness, EngineError> {
        let node = self.resource(index)?;
        let mut status = lock(&self.status);

        match status.get(&index) {
            Some(NodeStatus::Pending) => {}
            Some(NodeStatus::Materializing) => {
                return Err(EngineError::AlreadyRequested(node.cell.urn().clone()));
            }
            _ => return Err(EngineError::AlreadySettled(node.cell.urn().clone())),
        }
        self.check_dependencies(index, &status)?;

        let inputs = match self.inputs.get(&index).and_then(Output::peek) {
            None => return Ok(Readiness::Waiting),
            Some(Ok(inputs)) => inputs,
            Some(Err(error)) => {
                let skipped = self.cascade(index, &error, &mut status);
                status.insert(index, NodeStatus::Skipped(error.clone()));
                drop(status);

                node.cell.fail(error.clone());
                self.fail_all(&skipped, &error);
                return Ok(Readiness::Skipped(error));
            }
        };

        status.insert(index, NodeStatus::Materializing);

        let urn = node.cell.urn().clone();
        Ok(Readiness::Ready(MaterializeRequest {
            index,
            fingerprint: Fingerprint::of(urn.kind(), &inputs),
            parent: self.parent(index).cloned(),
            urn,
            inputs,
        }))
    }

    /// Reports the outcome of a materialization.
    ///
    /// Attributes missing from a successful result resolve to `null`. An
    /// error fails the resource and skips everything downstream of it.
    ///
    /// The resource's outputs, and every transform queued on them, settle
    /// before its status leaves [`NodeStatus::Materializing`]. Dependents are
    /// therefore never [`ready`](Deployment::ready) while their inputs are
    /// still being computed.
    pub fn resolve(
        &self,
        index: NodeIndex,
        result: anyhow::Result<BTreeMap<String, Value>>,
    ) -> Result<(), EngineError> {
        let node = self.resource(index)?;

        {
            let status = lock(&self.status);
            if status.get(&index).is_none_or(NodeStatus::is_settled) {
                return Err(EngineError::AlreadySettled(node.cell.urn().clone()));
            }
            self.check_dependencies(index, &status)?;
        }

        // Settling the cell runs user transforms, which may call back into
        // the deployment, so the status lock is not held. The cell settles
        // once, which also settles concurrent reports of the same resource.
        match result {
            Ok(attributes) => {
                if !node.cell.settle(Ok(attributes)) {
                    return Err(EngineError::AlreadySettled(node.cell.urn().clone()));
                }
                lock(&self.status).insert(index, NodeStatus::Materialized);

                tracing::info!(urn = %node.cell.urn(), "materialized");
            }
            Err(cause) => {
                let error = OutputError::materialization(node.cell.urn().clone(), cause);
                if !node.cell.fail(error.clone()) {
                    return Err(EngineError::AlreadySettled(node.cell.urn().clone()));
                }

                let skipped = {
                    let mut status = lock(&self.status);
                    let skipped = self.cascade(index, &error, &mut status);
                    status.insert(index, NodeStatus::Failed(error.clone()));
                    skipped
                };

                tracing::error!(urn = %node.cell.urn(), skipped = skipped.len(), "{error}");
                self.fail_all(&skipped, &error);
            }
        }

        Ok(())
    }

    /// Marks every pending resource downstream of `index` as skipped and
    /// returns them.
    fn cascade(
        &self,
        index: NodeIndex,
        error: &OutputError,
        status: &mut HashMap<NodeIndex, NodeStatus>,
    ) -> Vec<NodeIndex> {
        let mut skipped = Vec::new();
        for dependent in self.graph.downstream(index) {
            if let Some(current @ NodeStatus::Pending) = status.get_mut(&dependent) {
                *current = NodeStatus::Skipped(error.clone());
                skipped.push(dependent);
            }
        }
        skipped
    }

    fn fail_all(&self, indices: &[NodeIndex], error: &OutputError) {
        for &index in indices {
            if let Some(node) = self.graph[index].as_resource() {
                tracing::warn!(urn = %node.cell.urn(), "skipped");
                node.cell.fail(error.clone());
            }
        }
    }

    /// Settles every resource which has not been requested yet as aborted.
    /// Resources being materialized are left for the engine to report.
    pub fn abort(&self) -> Vec<NodeIndex> {
        let aborted: Vec<NodeIndex> = {
            let mut status = lock(&self.status);
            let mut aborted: Vec<_> = status
                .iter_mut()
                .filter(|(_, current)| matches!(current, NodeStatus::Pending))
                .map(|(index, current)| {
                    *current = NodeStatus::Aborted;
                    *index
                })
                .collect();
            aborted.sort_unstable();
            aborted
        };

        for &index in &aborted {
            if let Some(node) = self.graph[index].as_resource() {
                let urn = node.cell.urn().clone();
                node.cell.fail(OutputError::Aborted { urn });
            }
        }

        if !aborted.is_empty() {
            tracing::warn!(count = aborted.len(), "aborted pending resources");
        }

        aborted
    }

    /// The exports as registered, each resolves once everything it was built
    /// from has settled.
    pub fn final_exports(&self) -> &BTreeMap<String, Output<Value>> {
        &self.exports
    }

    /// Summarizes the current state. Typically called once the deployment
    /// [`is_complete`](Deployment::is_complete).
    pub fn report(&self) -> RunReport {
        let mut report = RunReport::default();

        for (name, output) in &self.exports {
            match output.peek() {
                Some(Ok(value)) => {
                    report.exports.insert(name.clone(), value);
                }
                Some(Err(error)) => {
                    let error = ExportError::Failed {
                        name: name.clone(),
                        error,
                    };
                    report.export_errors.insert(name.clone(), error);
                }
                None => {
                    let error = ExportError::Unresolved { name: name.clone() };
                    report.export_errors.insert(name.clone(), error);
                }
            }
        }

        let reach: Vec<(&String, BTreeSet<NodeIndex>)> = self
            .exports
            .iter()
            .map(|(name, output)| {
                let roots = output
                    .origins()
                    .iter()
                    .filter(|origin| origin.program == self.program)
                    .map(|origin| origin.index);
                (name, self.graph.upstream(roots))
            })
            .collect();

        let status = lock(&self.status);
        for index in self.queue() {
            let (kind, error) = match status.get(&index) {
                Some(NodeStatus::Failed(error)) => (FailureKind::Failed, error.clone()),
                Some(NodeStatus::Skipped(error)) => (FailureKind::Skipped, error.clone()),
                Some(NodeStatus::Aborted) => {
                    let urn = self.graph[index].urn().clone();
                    (FailureKind::Aborted, OutputError::Aborted { urn })
                }
                _ => continue,
            };

            let exports = reach
                .iter()
                .filter(|(_, upstream)| upstream.contains(&index))
                .map(|(name, _)| (*name).clone())
                .collect();

            report.failures.push(Failure {
                urn: self.graph[index].urn().clone(),
                kind,
                error,
                exports,
            });
        }

        report
    }
}

/// Renders the deployment as a Mermaid flowchart, components as subgraphs.
impl Display for Deployment {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            if self.graph[index].parent().is_none() {
                self.render_node(f, index, 1)?;
            }
        }

        for (dependency, dependent) in self.graph.edges() {
            writeln!(f, "    {} --> {}", dependency.index(), dependent.index())?;
        }

        Ok(())
    }
}

impl Deployment {
    fn render_node(&self, f: &mut Formatter<'_>, index: NodeIndex, depth: usize) -> fmt::Result {
        let indent = "    ".repeat(depth);
        let urn = self.graph[index].urn();
        let label = format!("{}\\n{}", urn.name(), urn.kind()).replace('"', "\\\"");

        match &self.graph[index] {
            Node::Resource(_) => writeln!(f, "{indent}{}[\"{label}\"]", index.index()),
            Node::Component(scope) => {
                writeln!(f, "{indent}subgraph c{}[\"{label}\"]", index.index())?;
                for &child in &scope.children {
                    self.render_node(f, child, depth + 1)?;
                }
                writeln!(f, "{indent}end")
            }
        }
    }
}

impl fmt::Debug for Deployment {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deployment")
            .field("project", &self.project)
            .field("nodes", &self.graph.len())
            .field("exports", &self.exports.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::Inputs;
    use crate::resource::{Declared, ResourceOptions};
    use crate::{Program, Resource};
    use anyhow::anyhow;
    use serde_json::json;

    fn attributes(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    fn ready(deployment: &Deployment, resource: &Resource) -> MaterializeRequest {
        match deployment.request(resource.index()).unwrap() {
            Readiness::Ready(request) => request,
            other => panic!("expected ready, got {other:?}"),
        }
    }

    /// Website component holding a bucket and its website configuration.
    struct Site {
        deployment: Deployment,
        bucket: Resource,
        config: Resource,
    }

    fn site() -> Site {
        let mut program = Program::new("site");
        let scope = program
            .component("S", "quickstart:index:AwsS3Website", ResourceOptions::new())
            .unwrap();
        let bucket = program
            .declare("bucket", "aws:s3:Bucket", Inputs::new(), ResourceOptions::new().parent(&scope))
            .unwrap();
        let config = program
            .declare(
                "config",
                "aws:s3:BucketWebsiteConfiguration",
                Inputs::new()
                    .set("bucket", bucket.id())
                    .set("indexDocument", Inputs::new().set("suffix", "index.html")),
                ResourceOptions::new().parent(&scope),
            )
            .unwrap();

        let url = config
            .output_as::<String>("websiteEndpoint")
            .map(|endpoint| format!("http://{endpoint}"));
        program.register_outputs(&scope, [("url", &url)]);
        program.export("url", scope.output("url").unwrap());

        Site {
            deployment: program.finish().unwrap(),
            bucket,
            config,
        }
    }

    #[test]
    fn test_component_scenario() {
        let Site {
            deployment,
            bucket,
            config,
        } = site();

        assert_eq!(deployment.ready(), vec![bucket.index()]);
        assert_eq!(deployment.queue(), vec![bucket.index(), config.index()]);

        let request = ready(&deployment, &bucket);
        assert_eq!(request.kind(), "aws:s3:Bucket");
        assert_eq!(
            request.parent.as_ref().map(|urn| urn.name()),
            Some("S")
        );
        deployment
            .resolve(bucket.index(), Ok(attributes(&[("id", json!("b-1"))])))
            .unwrap();

        let request = ready(&deployment, &config);
        assert_eq!(
            request.inputs,
            json!({"bucket": "b-1", "indexDocument": {"suffix": "index.html"}})
        );
        deployment
            .resolve(
                config.index(),
                Ok(attributes(&[("websiteEndpoint", json!("b-1.example.com"))])),
            )
            .unwrap();

        assert!(deployment.is_complete());
        let report = deployment.report();
        assert!(report.is_success());
        assert_eq!(report.exports["url"], json!("http://b-1.example.com"));
    }

    #[test]
    fn test_request_before_dependency_is_rejected() {
        let Site {
            deployment, config, ..
        } = site();
        assert!(matches!(
            deployment.request(config.index()),
            Err(EngineError::DependencyPending { .. })
        ));
    }

    #[test]
    fn test_double_request_and_resolve() {
        let Site {
            deployment, bucket, ..
        } = site();
        ready(&deployment, &bucket);
        assert!(matches!(
            deployment.request(bucket.index()),
            Err(EngineError::AlreadyRequested(_))
        ));

        deployment.resolve(bucket.index(), Ok(BTreeMap::new())).unwrap();
        assert!(matches!(
            deployment.resolve(bucket.index(), Ok(BTreeMap::new())),
            Err(EngineError::AlreadySettled(_))
        ));
    }

    #[test]
    fn test_components_are_not_requested() {
        let mut program = Program::new("p");
        let scope = program
            .component("S", "quickstart:index:Website", ResourceOptions::new())
            .unwrap();
        program.register_outputs(&scope, [("name", "S")]);
        let deployment = program.finish().unwrap();

        assert!(deployment.status(scope.index()).is_none());
        assert!(matches!(
            deployment.request(scope.index()),
            Err(EngineError::NotAResource(_))
        ));
        assert!(matches!(
            deployment.request(NodeIndex::new(42)),
            Err(EngineError::UnknownNode(_))
        ));
    }

    #[test]
    fn test_failure_skips_downstream_only() {
        let mut program = Program::new("p");
        let x = program
            .declare("x", "aws:s3:Bucket", Inputs::new(), ResourceOptions::new())
            .unwrap();
        let y = program
            .declare(
                "y",
                "aws:s3:BucketObject",
                Inputs::new().set("bucket", x.id()),
                ResourceOptions::new(),
            )
            .unwrap();
        let z = program
            .declare("z", "aws:s3:Bucket", Inputs::new(), ResourceOptions::new())
            .unwrap();
        program.export("object", y.id());
        program.export("other", z.id());
        let deployment = program.finish().unwrap();

        ready(&deployment, &x);
        deployment
            .resolve(x.index(), Err(anyhow!("bucket quota exceeded")))
            .unwrap();

        assert!(matches!(deployment.status(x.index()), Some(NodeStatus::Failed(_))));
        assert!(matches!(deployment.status(y.index()), Some(NodeStatus::Skipped(_))));
        assert!(matches!(
            y.id().peek(),
            Some(Err(OutputError::Materialization { urn, .. })) if urn == *x.urn()
        ));
        assert_eq!(deployment.ready(), vec![z.index()]);

        ready(&deployment, &z);
        deployment
            .resolve(z.index(), Ok(attributes(&[("id", json!("z-1"))])))
            .unwrap();
        assert!(deployment.is_complete());

        let report = deployment.report();
        assert_eq!(report.exports["other"], json!("z-1"));
        let object = &report.export_errors["object"];
        assert!(matches!(object, ExportError::Failed { .. }));
        assert_eq!(object.name(), "object");
        assert_eq!(object.error().and_then(OutputError::origin), Some(x.urn()));

        let failure = report.failure(x.urn()).unwrap();
        assert_eq!(failure.kind, FailureKind::Failed);
        assert_eq!(failure.exports, vec!["object".to_string()]);
        let skipped = report.failure(y.urn()).unwrap();
        assert_eq!(skipped.kind, FailureKind::Skipped);
        assert_eq!(skipped.error.origin(), Some(x.urn()));
    }

    #[test]
    fn test_failed_transform_skips_resource() {
        let mut program = Program::new("p");
        let x = program
            .declare("x", "aws:s3:Bucket", Inputs::new(), ResourceOptions::new())
            .unwrap();
        let name = x.output("name").try_map(|value| match value {
            Value::String(name) => Ok(name),
            other => Err(anyhow!("expected a string, got {other}")),
        });
        let y = program
            .declare(
                "y",
                "aws:s3:BucketObject",
                Inputs::new().set("key", name),
                ResourceOptions::new(),
            )
            .unwrap();
        let deployment = program.finish().unwrap();

        ready(&deployment, &x);
        deployment.resolve(x.index(), Ok(BTreeMap::new())).unwrap();

        assert!(matches!(
            deployment.request(y.index()).unwrap(),
            Readiness::Skipped(OutputError::Transform(_))
        ));
        assert!(deployment.is_complete());
    }

    #[test]
    fn test_never_resolved_input_waits() {
        let mut program = Program::new("p");
        let (never, _resolver) = Output::<Value>::channel();
        let x = program
            .declare("x", "aws:s3:Bucket", Inputs::new().set("tag", never), ResourceOptions::new())
            .unwrap();
        let deployment = program.finish().unwrap();

        assert!(matches!(
            deployment.request(x.index()).unwrap(),
            Readiness::Waiting
        ));
        assert!(matches!(deployment.status(x.index()), Some(NodeStatus::Pending)));
    }

    #[test]
    fn test_abort_leaves_in_flight_resources() {
        let Site {
            deployment,
            bucket,
            config,
        } = site();
        ready(&deployment, &bucket);

        assert_eq!(deployment.abort(), vec![config.index()]);
        assert!(matches!(
            config.id().peek(),
            Some(Err(OutputError::Aborted { .. }))
        ));

        deployment.resolve(bucket.index(), Ok(BTreeMap::new())).unwrap();
        let report = deployment.report();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, FailureKind::Aborted);
        assert_eq!(report.failures[0].exports, vec!["url".to_string()]);
    }

    #[test]
    fn test_unresolved_export() {
        let mut program = Program::new("p");
        let (never, _resolver) = Output::<Value>::channel();
        program.export("never", never);
        let deployment = program.finish().unwrap();

        let report = deployment.report();
        assert!(matches!(
            report.export_errors["never"],
            ExportError::Unresolved { .. }
        ));
        assert!(report.export_errors["never"].error().is_none());
    }

    #[test]
    fn test_foreign_export_is_not_attributed() {
        let mut other = Program::new("other");
        let foreign = other
            .declare("x", "aws:s3:Bucket", Inputs::new(), ResourceOptions::new())
            .unwrap();

        let mut program = Program::new("p");
        let x = program
            .declare("x", "aws:s3:Bucket", Inputs::new(), ResourceOptions::new())
            .unwrap();
        program.export("foreign", foreign.id());
        let deployment = program.finish().unwrap();

        ready(&deployment, &x);
        deployment.resolve(x.index(), Err(anyhow!("denied"))).unwrap();

        let report = deployment.report();
        assert!(report.failure(x.urn()).unwrap().exports.is_empty());
        assert!(matches!(
            report.export_errors["foreign"],
            ExportError::Unresolved { .. }
        ));
    }

    #[test]
    fn test_dependents_wait_until_outputs_settle() {
        let Site {
            deployment,
            bucket,
            config,
        } = site();
        let deployment = Arc::new(deployment);
        let seen = Arc::new(Mutex::new(None));

        {
            let deployment = deployment.clone();
            let seen = seen.clone();
            let config = config.index();
            bucket.id().on_settled(move |_| {
                // another engine thread polls while the bucket is being reported
                let observed = std::thread::spawn(move || {
                    let request = deployment.request(config);
                    let pending = matches!(request, Err(EngineError::DependencyPending { .. }));
                    (pending, deployment.ready())
                })
                .join();
                *lock(&seen) = observed.ok();
            });
        }

        ready(&deployment, &bucket);
        deployment
            .resolve(bucket.index(), Ok(attributes(&[("id", json!("b-1"))])))
            .unwrap();

        let (pending, ready_then) = lock(&seen).take().unwrap();
        assert!(pending);
        assert!(ready_then.is_empty());

        assert_eq!(deployment.ready(), vec![config.index()]);
        assert_eq!(ready(&deployment, &config).inputs["bucket"], json!("b-1"));
    }

    #[test]
    fn test_fingerprint_follows_inputs() {
        let first = site();
        let second = site();

        let a = ready(&first.deployment, &first.bucket);
        let b = ready(&second.deployment, &second.bucket);
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn test_mermaid() {
        let Site { deployment, .. } = site();
        let chart = deployment.to_string();
        assert!(chart.starts_with("graph LR\n"));
        assert!(chart.contains("subgraph c0"));
        assert!(chart.contains("1 --> 2"));
    }
}
