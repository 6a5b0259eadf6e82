use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use petgraph::graph::NodeIndex;
use serde_json::Value;

use crate::component::ComponentCell;
use crate::deployment::Deployment;
use crate::error::DeclarationError;
use crate::graph::DependencyGraph;
use crate::input::{Input, Inputs};
use crate::node::{ComponentNode, Node, NodeRef, ResourceNode};
use crate::resource::{Declared, ResourceCell, ResourceOptions};
use crate::{Component, Output, Resource, Urn};

/// Identity of a [`Program`].
///
/// Node indices restart at zero in every program, so handles and outputs
/// carry this next to their index. A program refuses nodes declared
/// elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProgramId(u64);

impl ProgramId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// The declaration phase of an infrastructure program.
///
/// `Program` is where resources and components are declared, wired together
/// through their outputs, and where the final exports are registered. Once
/// everything is declared, [`Program::finish`] validates the whole graph and
/// freezes it into a [`Deployment`] which an engine can execute.
///
/// # Example
///
/// ```rust
/// use kumitate::{Inputs, Program, ResourceOptions};
///
/// let mut program = Program::new("site");
/// let bucket = program
///     .declare("my-bucket", "aws:s3:Bucket", Inputs::new(), ResourceOptions::new())
///     .unwrap();
/// let website = program
///     .declare(
///         "website",
///         "aws:s3:BucketWebsiteConfiguration",
///         Inputs::new().set("bucket", bucket.id()),
///         ResourceOptions::new(),
///     )
///     .unwrap();
///
/// let url = website
///     .output_as::<String>("websiteEndpoint")
///     .map(|endpoint| format!("http://{endpoint}"));
/// program.export("url", &url);
///
/// let deployment = program.finish().unwrap();
/// assert_eq!(deployment.queue().len(), 2);
/// ```
pub struct Program {
    id: ProgramId,
    project: Arc<str>,
    graph: DependencyGraph<Node>,
    names: HashSet<(Option<NodeIndex>, String)>,
    exports: BTreeMap<String, Output<Value>>,
}

impl Program {
    pub fn new(project: impl Into<Arc<str>>) -> Self {
        Self {
            id: ProgramId::next(),
            project: project.into(),
            graph: DependencyGraph::new(),
            names: HashSet::new(),
            exports: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> ProgramId {
        self.id
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Declares a resource.
    ///
    /// Every output embedded in `inputs` turns into a dependency on the
    /// resource it came from. `name` has to be unique among the siblings
    /// sharing the same parent.
    pub fn declare(
        &mut self,
        name: impl Into<String>,
        kind: &str,
        inputs: Inputs,
        options: ResourceOptions,
    ) -> Result<Resource, DeclarationError> {
        let name = name.into();
        let (parent, depends_on) = self.validate(&options)?;

        let implicit = inputs
            .origins()
            .into_iter()
            .map(|origin| self.local(origin))
            .collect::<Result<Vec<_>, _>>()?;

        let urn = self.claim(parent, name, kind)?;
        let index = NodeIndex::new(self.graph.len());
        let cell = Arc::new(ResourceCell::new(NodeRef::new(self.id, index), urn.clone()));

        self.graph.add_node(Node::Resource(ResourceNode {
            cell: cell.clone(),
            parent,
            inputs,
            depends_on: depends_on.clone(),
        }));

        for dependency in implicit.iter().chain(&depends_on) {
            if self.graph[*dependency].is_resource() {
                self.graph.add_edge(index, *dependency);
            }
        }

        self.adopt(parent, index);

        tracing::debug!(
            %urn,
            dependencies = ?self.graph.dependencies(index),
            "declared resource"
        );

        Ok(Resource { cell })
    }

    /// Opens a component scope. Resources declared with this component as
    /// their parent belong to it.
    pub fn component(
        &mut self,
        name: impl Into<String>,
        kind: &str,
        options: ResourceOptions,
    ) -> Result<Component, DeclarationError> {
        let name = name.into();
        let (parent, depends_on) = self.validate(&options)?;

        let urn = self.claim(parent, name, kind)?;
        let index = NodeIndex::new(self.graph.len());
        let cell = Arc::new(ComponentCell::new(NodeRef::new(self.id, index), urn.clone()));

        self.graph.add_node(Node::Component(ComponentNode {
            cell: cell.clone(),
            parent,
            depends_on,
            children: Vec::new(),
        }));

        self.adopt(parent, index);

        tracing::debug!(%urn, "opened component");

        Ok(Component { cell })
    }

    /// Publishes the outputs of `component`. This has to happen exactly once
    /// per component, [`Program::finish`] rejects the program otherwise.
    pub fn register_outputs<I, K, V>(&mut self, component: &Component, outputs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Input>,
    {
        let outputs = outputs
            .into_iter()
            .map(|(key, value)| (key.into(), value.into().resolve()))
            .collect();

        component.cell.register(outputs);
    }

    /// Adds an explicit dependency between two declared nodes.
    ///
    /// Either side may be a component. A component dependent passes the
    /// dependency on to every resource inside it, a component dependency
    /// stands for every resource inside it.
    pub fn add_dependency(
        &mut self,
        dependent: &impl Declared,
        dependency: &impl Declared,
    ) -> Result<(), DeclarationError> {
        let dependent = self.local(NodeRef::of(dependent))?;
        let dependency = self.local(NodeRef::of(dependency))?;

        let both_resources =
            self.graph[dependent].is_resource() && self.graph[dependency].is_resource();

        if both_resources {
            self.graph.add_edge(dependent, dependency);
            return Ok(());
        }

        match self.graph.get_mut(dependent) {
            Some(Node::Resource(node)) => node.depends_on.push(dependency),
            Some(Node::Component(node)) => node.depends_on.push(dependency),
            None => return Err(DeclarationError::UnknownNode(dependent)),
        }

        Ok(())
    }

    /// Exports a value under `name`. Exporting the same name again replaces
    /// the earlier value.
    pub fn export(&mut self, name: impl Into<String>, value: impl Into<Input>) {
        let name = name.into();
        tracing::debug!(%name, "registered export");
        self.exports.insert(name, value.into().resolve());
    }

    pub fn exports(&self) -> &BTreeMap<String, Output<Value>> {
        &self.exports
    }

    /// Ends the declaration phase.
    ///
    /// Checks that every component registered its outputs exactly once,
    /// expands dependencies on components into dependencies on the resources
    /// they contain, and rejects dependency cycles. On success the graph and
    /// the exports are frozen into a [`Deployment`].
    pub fn finish(mut self) -> Result<Deployment, DeclarationError> {
        for index in self.graph.node_indices() {
            if let Node::Component(node) = &self.graph[index] {
                let registrations = node.cell.registrations();
                if registrations != 1 {
                    return Err(DeclarationError::IncompleteScope {
                        scope: node.cell.urn().clone(),
                        registrations,
                    });
                }
            }
        }

        let mut expanded = Vec::new();
        for index in self.graph.node_indices() {
            let Some(node) = self.graph[index].as_resource() else {
                continue;
            };

            let mut explicit = node.depends_on.clone();
            let mut parent = node.parent;
            while let Some(Node::Component(scope)) = parent.and_then(|p| self.graph.get(p)) {
                explicit.extend(&scope.depends_on);
                parent = scope.parent;
            }

            for dependency in explicit {
                for resource in self.resources_within(dependency) {
                    expanded.push((index, resource));
                }
            }
        }

        for (dependent, dependency) in expanded {
            self.graph.add_edge(dependent, dependency);
        }

        let order = self.graph.topological_order().map_err(|cycle| {
            DeclarationError::Cycle {
                cycle: cycle
                    .nodes
                    .iter()
                    .map(|&index| self.graph[index].urn().clone())
                    .collect(),
            }
        })?;

        tracing::info!(
            project = %self.project,
            nodes = self.graph.len(),
            edges = self.graph.edge_count(),
            exports = self.exports.len(),
            "declaration complete"
        );

        Ok(Deployment::new(
            self.id,
            self.project,
            self.graph,
            order,
            self.exports,
        ))
    }

    /// Index of a node declared in this program, indices handed out by other
    /// programs are rejected even when they are in range.
    fn local(&self, node: NodeRef) -> Result<NodeIndex, DeclarationError> {
        if node.program == self.id && self.graph.contains(node.index) {
            Ok(node.index)
        } else {
            Err(DeclarationError::UnknownNode(node.index))
        }
    }

    /// Resolves the parent and the explicit dependencies of `options`.
    fn validate(
        &self,
        options: &ResourceOptions,
    ) -> Result<(Option<NodeIndex>, Vec<NodeIndex>), DeclarationError> {
        let parent = match options.parent {
            Some(parent) => {
                let index = self.local(parent)?;
                match self.graph[index] {
                    Node::Component(_) => Some(index),
                    Node::Resource(_) => return Err(DeclarationError::UnknownNode(index)),
                }
            }
            None => None,
        };

        let depends_on = options
            .depends_on
            .iter()
            .map(|&dependency| self.local(dependency))
            .collect::<Result<_, _>>()?;

        Ok((parent, depends_on))
    }

    /// Reserves `name` among the children of `parent` and builds the URN.
    fn claim(
        &mut self,
        parent: Option<NodeIndex>,
        name: String,
        kind: &str,
    ) -> Result<Urn, DeclarationError> {
        let parent_urn = parent.map(|parent| self.graph[parent].urn().clone());

        if !self.names.insert((parent, name.clone())) {
            return Err(DeclarationError::DuplicateName {
                name,
                parent: parent_urn,
            });
        }

        Ok(Urn::new(
            self.project.clone(),
            parent_urn.as_ref(),
            kind,
            name.into(),
        ))
    }

    fn adopt(&mut self, parent: Option<NodeIndex>, child: NodeIndex) {
        if let Some(Node::Component(scope)) = parent.and_then(|p| self.graph.get_mut(p)) {
            scope.children.push(child);
        }
    }

    /// The resources a dependency on `index` stands for.
    fn resources_within(&self, index: NodeIndex) -> BTreeSet<NodeIndex> {
        let mut resources = BTreeSet::new();
        let mut stack = vec![index];

        while let Some(index) = stack.pop() {
            match self.graph.get(index) {
                Some(Node::Resource(_)) => {
                    resources.insert(index);
                }
                Some(Node::Component(scope)) => stack.extend(&scope.children),
                None => {}
            }
        }

        resources
    }
}
