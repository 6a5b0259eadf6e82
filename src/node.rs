use std::sync::Arc;

use petgraph::graph::NodeIndex;

use crate::component::ComponentCell;
use crate::input::Inputs;
use crate::resource::{Declared, ResourceCell};
use crate::{ProgramId, Urn};

/// A node index qualified by the program which handed it out. Indices of
/// different programs overlap, so they are never compared on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct NodeRef {
    pub program: ProgramId,
    pub index: NodeIndex,
}

impl NodeRef {
    pub(crate) fn new(program: ProgramId, index: NodeIndex) -> Self {
        Self { program, index }
    }

    pub(crate) fn of(node: &impl Declared) -> Self {
        Self::new(node.program(), node.index())
    }
}

/// Weight of a node in the dependency graph.
///
/// Physical resources and component scopes share one graph, but only
/// resources take part in dependency edges and materialization. Components
/// are there for containment and reporting.
pub(crate) enum Node {
    Resource(ResourceNode),
    Component(ComponentNode),
}

pub(crate) struct ResourceNode {
    pub cell: Arc<ResourceCell>,
    pub parent: Option<NodeIndex>,
    pub inputs: Inputs,
    /// Explicit dependencies as declared, components not yet expanded.
    pub depends_on: Vec<NodeIndex>,
}

pub(crate) struct ComponentNode {
    pub cell: Arc<ComponentCell>,
    pub parent: Option<NodeIndex>,
    pub depends_on: Vec<NodeIndex>,
    /// Resources and components declared directly inside, in declaration order.
    pub children: Vec<NodeIndex>,
}

impl Node {
    pub(crate) fn urn(&self) -> &Urn {
        match self {
            Node::Resource(node) => node.cell.urn(),
            Node::Component(node) => node.cell.urn(),
        }
    }

    pub(crate) fn parent(&self) -> Option<NodeIndex> {
        match self {
            Node::Resource(node) => node.parent,
            Node::Component(node) => node.parent,
        }
    }

    pub(crate) fn as_resource(&self) -> Option<&ResourceNode> {
        match self {
            Node::Resource(node) => Some(node),
            Node::Component(_) => None,
        }
    }

    pub(crate) fn is_resource(&self) -> bool {
        matches!(self, Node::Resource(_))
    }
}
