use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use petgraph::graph::NodeIndex;
use serde_json::Value;

use crate::error::OutputError;
use crate::node::NodeRef;
use crate::output::{Resolver, Settled, lock};
use crate::{Component, Output, ProgramId, Urn};

/// Anything which occupies a node in a program: resources and components.
pub trait Declared {
    /// Position in the declaring program's graph.
    fn index(&self) -> NodeIndex;

    /// The program this node was declared in. Other programs reject it.
    fn program(&self) -> ProgramId;
}

/// Options accepted when declaring a resource or a component.
#[derive(Clone, Debug, Default)]
pub struct ResourceOptions {
    pub(crate) parent: Option<NodeRef>,
    pub(crate) depends_on: Vec<NodeRef>,
}

impl ResourceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places the node inside `component`.
    pub fn parent(mut self, component: &Component) -> Self {
        self.parent = Some(NodeRef::of(component));
        self
    }

    /// Adds an explicit dependency. Depending on a component means depending
    /// on every resource declared inside it.
    pub fn depends_on(mut self, node: &impl Declared) -> Self {
        self.depends_on.push(NodeRef::of(node));
        self
    }
}

enum Attributes {
    Pending(BTreeMap<String, (Output<Value>, Resolver<Value>)>),
    Settled(Settled<BTreeMap<String, Value>>),
}

/// Output table of a resource, shared between the declaring program and the
/// engine which eventually fills it in.
pub(crate) struct ResourceCell {
    node: NodeRef,
    urn: Urn,
    attributes: Mutex<Attributes>,
}

impl ResourceCell {
    pub(crate) fn new(node: NodeRef, urn: Urn) -> Self {
        Self {
            node,
            urn,
            attributes: Mutex::new(Attributes::Pending(BTreeMap::new())),
        }
    }

    pub(crate) fn urn(&self) -> &Urn {
        &self.urn
    }

    fn output(&self, name: &str) -> Output<Value> {
        let origins = BTreeSet::from([self.node]);
        let mut attributes = lock(&self.attributes);

        match &mut *attributes {
            Attributes::Pending(pending) => pending
                .entry(name.to_string())
                .or_insert_with(|| Output::pending(origins))
                .0
                .clone(),
            Attributes::Settled(Ok(values)) => Output::settled(
                Ok(values.get(name).cloned().unwrap_or(Value::Null)),
                origins,
            ),
            Attributes::Settled(Err(error)) => Output::settled(Err(error.clone()), origins),
        }
    }

    /// Settles every output handed out so far, and any requested later.
    /// Attributes the engine did not report resolve to `null`.
    pub(crate) fn settle(&self, result: Settled<BTreeMap<String, Value>>) -> bool {
        let pending = {
            let mut attributes = lock(&self.attributes);
            let pending = match &mut *attributes {
                Attributes::Settled(_) => return false,
                Attributes::Pending(pending) => std::mem::take(pending),
            };
            *attributes = Attributes::Settled(result.clone());
            pending
        };

        for (name, (_, resolver)) in pending {
            let value = match &result {
                Ok(values) => Ok(values.get(&name).cloned().unwrap_or(Value::Null)),
                Err(error) => Err(error.clone()),
            };
            resolver.settle(value);
        }

        true
    }

    pub(crate) fn fail(&self, error: OutputError) -> bool {
        self.settle(Err(error))
    }
}

/// Handle to a declared resource.
///
/// Attribute outputs can be requested before the resource is materialized;
/// they resolve once the engine reports the resource's attributes.
#[derive(Clone)]
pub struct Resource {
    pub(crate) cell: Arc<ResourceCell>,
}

impl Resource {
    pub fn urn(&self) -> &Urn {
        &self.cell.urn
    }

    /// Deferred value of the attribute `name`.
    pub fn output(&self, name: &str) -> Output<Value> {
        self.cell.output(name)
    }

    /// Typed deferred value of the attribute `name`.
    pub fn output_as<T>(&self, name: &str) -> Output<T>
    where
        T: serde::de::DeserializeOwned + Clone + Send + Sync + 'static,
    {
        self.output(name).deserialize()
    }

    /// The provider assigned ID, the `id` attribute.
    pub fn id(&self) -> Output<Value> {
        self.output("id")
    }
}

impl Declared for Resource {
    fn index(&self) -> NodeIndex {
        self.cell.node.index
    }

    fn program(&self) -> ProgramId {
        self.cell.node.program
    }
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Resource({})", self.cell.urn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cell() -> ResourceCell {
        let urn = Urn::new("p".into(), None, "aws:s3:Bucket", "b".into());
        ResourceCell::new(NodeRef::new(ProgramId::next(), NodeIndex::new(0)), urn)
    }

    #[test]
    fn test_outputs_before_and_after_settle() {
        let cell = cell();
        let id = cell.output("id");
        let same = cell.output("id");
        assert!(id.peek().is_none());
        assert_eq!(id.dependencies(), BTreeSet::from([NodeIndex::new(0)]));

        let values = BTreeMap::from([("id".to_string(), json!("b-1"))]);
        assert!(cell.settle(Ok(values)));

        assert_eq!(id.peek().unwrap().unwrap(), json!("b-1"));
        assert_eq!(same.peek().unwrap().unwrap(), json!("b-1"));
        assert_eq!(cell.output("id").peek().unwrap().unwrap(), json!("b-1"));
        assert_eq!(cell.output("arn").peek().unwrap().unwrap(), Value::Null);
    }

    #[test]
    fn test_failure_reaches_every_output() {
        let cell = cell();
        let id = cell.output("id");
        let error = OutputError::materialization(cell.urn().clone(), anyhow::anyhow!("denied"));

        assert!(cell.fail(error));
        assert!(!cell.settle(Ok(BTreeMap::new())));

        assert!(matches!(
            id.peek().unwrap(),
            Err(OutputError::Materialization { .. })
        ));
        assert!(cell.output("late").peek().unwrap().is_err());
    }
}
