//! Resource inputs.
//!
//! Inputs form a tree mixing literal JSON with deferred [`Output`]s taken from
//! other resources. Declaring a resource scans this tree for outputs and turns
//! every node they originate from into a dependency edge, so callers never
//! order resources by hand.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::graph::NodeIndex;
use serde_json::{Map, Value};

use crate::Output;
use crate::node::NodeRef;

/// A single input value, literal or deferred, possibly nested.
#[derive(Clone, Debug)]
pub enum Input {
    Value(Value),
    Output(Output<Value>),
    Array(Vec<Input>),
    Object(BTreeMap<String, Input>),
}

impl Input {
    /// Adds the nodes every embedded output originates from to `into`.
    pub(crate) fn collect_origins(&self, into: &mut BTreeSet<NodeRef>) {
        match self {
            Input::Value(_) => {}
            Input::Output(output) => into.extend(output.origins().iter().copied()),
            Input::Array(items) => items.iter().for_each(|item| item.collect_origins(into)),
            Input::Object(fields) => fields
                .values()
                .for_each(|field| field.collect_origins(into)),
        }
    }

    /// Indices of the nodes every embedded output originates from.
    pub fn dependencies(&self) -> BTreeSet<NodeIndex> {
        let mut origins = BTreeSet::new();
        self.collect_origins(&mut origins);
        origins.into_iter().map(|origin| origin.index).collect()
    }

    /// Folds the whole tree into a single output which resolves once every
    /// embedded output has resolved.
    pub fn resolve(&self) -> Output<Value> {
        match self {
            Input::Value(value) => Output::of(value.clone()),
            Input::Output(output) => output.clone(),
            Input::Array(items) => {
                Output::all(items.iter().map(Input::resolve)).map(Value::Array)
            }
            Input::Object(fields) => resolve_object(fields),
        }
    }
}

fn resolve_object(fields: &BTreeMap<String, Input>) -> Output<Value> {
    let keys: Vec<String> = fields.keys().cloned().collect();
    Output::all(fields.values().map(Input::resolve)).map(move |values| {
        Value::Object(keys.into_iter().zip(values).collect::<Map<String, Value>>())
    })
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        Input::Value(value)
    }
}

impl From<&str> for Input {
    fn from(value: &str) -> Self {
        Input::Value(Value::String(value.to_string()))
    }
}

impl From<String> for Input {
    fn from(value: String) -> Self {
        Input::Value(Value::String(value))
    }
}

impl From<bool> for Input {
    fn from(value: bool) -> Self {
        Input::Value(Value::Bool(value))
    }
}

impl From<i64> for Input {
    fn from(value: i64) -> Self {
        Input::Value(value.into())
    }
}

impl From<u64> for Input {
    fn from(value: u64) -> Self {
        Input::Value(value.into())
    }
}

impl<T> From<Output<T>> for Input
where
    T: serde::Serialize + Clone + Send + Sync + 'static,
{
    fn from(output: Output<T>) -> Self {
        Input::Output(output.to_value())
    }
}

impl<T> From<&Output<T>> for Input
where
    T: serde::Serialize + Clone + Send + Sync + 'static,
{
    fn from(output: &Output<T>) -> Self {
        Input::Output(output.to_value())
    }
}

impl<I: Into<Input>> From<Vec<I>> for Input {
    fn from(items: Vec<I>) -> Self {
        Input::Array(items.into_iter().map(Into::into).collect())
    }
}

impl From<Inputs> for Input {
    fn from(inputs: Inputs) -> Self {
        Input::Object(inputs.0)
    }
}

/// The named inputs of a resource.
///
/// ```
/// # use kumitate::{Inputs, Output};
/// let inputs = Inputs::new()
///     .set("bucket", Output::of("b-1".to_string()))
///     .set("indexDocument", Inputs::new().set("suffix", "index.html"));
/// ```
#[derive(Clone, Debug, Default)]
pub struct Inputs(BTreeMap<String, Input>);

impl Inputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, replacing any earlier value.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Input>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Input> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn dependencies(&self) -> BTreeSet<NodeIndex> {
        self.origins().into_iter().map(|origin| origin.index).collect()
    }

    pub(crate) fn origins(&self) -> BTreeSet<NodeRef> {
        let mut origins = BTreeSet::new();
        for input in self.0.values() {
            input.collect_origins(&mut origins);
        }
        origins
    }

    /// Resolves all inputs into a single JSON object.
    pub fn resolve(&self) -> Output<Value> {
        resolve_object(&self.0)
    }
}

impl<K, V> FromIterator<(K, V)> for Inputs
where
    K: Into<String>,
    V: Into<Input>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_literals_resolve_immediately() {
        let inputs = Inputs::new()
            .set("name", "site")
            .set("public", false)
            .set("size", 3i64);

        assert!(inputs.dependencies().is_empty());
        assert_eq!(
            inputs.resolve().peek().unwrap().unwrap(),
            json!({"name": "site", "public": false, "size": 3})
        );
    }

    #[test]
    fn test_nested_outputs_are_scanned() {
        let program = crate::ProgramId::next();
        let node = |index| BTreeSet::from([NodeRef::new(program, NodeIndex::new(index))]);
        let (id, _) = Output::<Value>::pending(node(4));
        let (arn, _) = Output::<Value>::pending(node(1));

        let inputs = Inputs::new()
            .set("bucket", id)
            .set("rule", Inputs::new().set("targets", vec![Input::from(arn)]));

        assert_eq!(
            inputs.dependencies(),
            BTreeSet::from([NodeIndex::new(1), NodeIndex::new(4)])
        );
    }

    #[test]
    fn test_resolve_waits_for_outputs() {
        let (id, resolver) = Output::<Value>::channel();
        let inputs = Inputs::new()
            .set("bucket", id)
            .set("index", Inputs::new().set("suffix", "index.html"));

        let resolved = inputs.resolve();
        assert!(resolved.peek().is_none());

        resolver.resolve(json!("b-1"));
        assert_eq!(
            resolved.peek().unwrap().unwrap(),
            json!({"bucket": "b-1", "index": {"suffix": "index.html"}})
        );
    }

    #[test]
    fn test_typed_outputs_become_json() {
        let port = Output::of(8080u16);
        let inputs: Inputs = [("port", Input::from(&port))].into_iter().collect();
        assert_eq!(inputs.resolve().peek().unwrap().unwrap(), json!({"port": 8080}));
    }
}
