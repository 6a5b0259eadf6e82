use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use petgraph::graph::NodeIndex;
use serde_json::Value;

use crate::node::NodeRef;
use crate::output::lock;
use crate::resource::Declared;
use crate::{Output, ProgramId, Urn};

#[derive(Default)]
struct Registration {
    outputs: Option<BTreeMap<String, Output<Value>>>,
    count: usize,
}

pub(crate) struct ComponentCell {
    node: NodeRef,
    urn: Urn,
    registration: Mutex<Registration>,
}

impl ComponentCell {
    pub(crate) fn new(node: NodeRef, urn: Urn) -> Self {
        Self {
            node,
            urn,
            registration: Mutex::new(Registration::default()),
        }
    }

    pub(crate) fn urn(&self) -> &Urn {
        &self.urn
    }

    /// Records a registration. Only the first output set is kept, the count
    /// is checked once the program finishes.
    pub(crate) fn register(&self, outputs: BTreeMap<String, Output<Value>>) {
        let mut registration = lock(&self.registration);
        registration.count += 1;
        if registration.outputs.is_none() {
            registration.outputs = Some(outputs);
        }
    }

    pub(crate) fn registrations(&self) -> usize {
        lock(&self.registration).count
    }
}

/// Handle to a component scope.
///
/// A component groups resources declared with
/// [`ResourceOptions::parent`](crate::ResourceOptions::parent) and exposes
/// its own outputs, registered once with
/// [`Program::register_outputs`](crate::Program::register_outputs).
/// Consumers only ever see those outputs, never the resources inside.
#[derive(Clone)]
pub struct Component {
    pub(crate) cell: Arc<ComponentCell>,
}

impl Component {
    pub fn urn(&self) -> &Urn {
        &self.cell.urn
    }

    /// A registered output, `None` until outputs are registered or if the
    /// name was not part of the registration.
    pub fn output(&self, name: &str) -> Option<Output<Value>> {
        lock(&self.cell.registration)
            .outputs
            .as_ref()
            .and_then(|outputs| outputs.get(name).cloned())
    }

    /// All registered outputs resolved into one map.
    pub fn outputs(&self) -> Option<Output<BTreeMap<String, Value>>> {
        let registration = lock(&self.cell.registration);
        let outputs = registration.outputs.as_ref()?;
        let keys: Vec<String> = outputs.keys().cloned().collect();

        Some(
            Output::all(outputs.values().cloned())
                .map(move |values| keys.into_iter().zip(values).collect()),
        )
    }

    /// Completion signal of the scope. Resolves once every registered output
    /// has resolved, fails with the first failed one.
    pub fn completion(&self) -> Option<Output<()>> {
        self.outputs().map(|outputs| outputs.map(|_| ()))
    }
}

impl Declared for Component {
    fn index(&self) -> NodeIndex {
        self.cell.node.index
    }

    fn program(&self) -> ProgramId {
        self.cell.node.program
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Component({})", self.cell.urn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn component() -> Component {
        let urn = Urn::new("p".into(), None, "quickstart:index:Website", "web".into());
        Component {
            cell: Arc::new(ComponentCell::new(
                NodeRef::new(ProgramId::next(), NodeIndex::new(0)),
                urn,
            )),
        }
    }

    #[test]
    fn test_unregistered_has_no_outputs() {
        let component = component();
        assert!(component.output("url").is_none());
        assert!(component.completion().is_none());
        assert_eq!(component.cell.registrations(), 0);
    }

    #[test]
    fn test_completion_waits_for_outputs() {
        let component = component();
        let (url, resolver) = Output::<Value>::channel();
        component
            .cell
            .register(BTreeMap::from([("url".to_string(), url)]));

        let completion = component.completion().unwrap();
        assert!(completion.peek().is_none());

        resolver.resolve(json!("http://b-1.example.com"));
        assert!(completion.peek().unwrap().is_ok());
        assert_eq!(
            component.outputs().unwrap().peek().unwrap().unwrap(),
            BTreeMap::from([("url".to_string(), json!("http://b-1.example.com"))])
        );
    }

    #[test]
    fn test_first_registration_wins() {
        let component = component();
        component
            .cell
            .register(BTreeMap::from([("a".to_string(), Output::of(json!(1)))]));
        component
            .cell
            .register(BTreeMap::from([("b".to_string(), Output::of(json!(2)))]));

        assert_eq!(component.cell.registrations(), 2);
        assert!(component.output("a").is_some());
        assert!(component.output("b").is_none());
    }
}
