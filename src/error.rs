use std::any::Any;
use std::sync::Arc;

use petgraph::graph::NodeIndex;
use thiserror::Error;

use crate::Urn;

/// Failure carried by an [`Output`](crate::Output) in place of a value.
///
/// Cloned into every output derived from the failed one, so callers can trace
/// any failed value back to its origin.
#[derive(Debug, Error, Clone)]
pub enum OutputError {
    #[error("resource '{urn}' failed to materialize: {cause:#}")]
    Materialization { urn: Urn, cause: Arc<anyhow::Error> },

    #[error("transform failed: {0:#}")]
    Transform(Arc<anyhow::Error>),

    #[error("resource '{urn}' was aborted before materializing")]
    Aborted { urn: Urn },

    #[error("value was never resolved")]
    Unresolved,
}

impl OutputError {
    pub(crate) fn materialization(urn: Urn, cause: impl Into<anyhow::Error>) -> Self {
        Self::Materialization {
            urn,
            cause: Arc::new(cause.into()),
        }
    }

    pub(crate) fn transform(cause: impl Into<anyhow::Error>) -> Self {
        Self::Transform(Arc::new(cause.into()))
    }

    /// The resource whose failure produced this error, if any.
    pub fn origin(&self) -> Option<&Urn> {
        match self {
            OutputError::Materialization { urn, .. } | OutputError::Aborted { urn } => Some(urn),
            OutputError::Transform(_) | OutputError::Unresolved => None,
        }
    }
}

/// Errors raised while the program is being declared. Any of these aborts the
/// whole declaration, nothing gets materialized.
#[derive(Debug, Error)]
pub enum DeclarationError {
    #[error("duplicate name '{name}' under {}", describe_parent(.parent))]
    DuplicateName { name: String, parent: Option<Urn> },

    #[error("dependency cycle: {}", format_cycle(.cycle))]
    Cycle { cycle: Vec<Urn> },

    #[error("component '{scope}' registered its outputs {registrations} times, expected exactly once")]
    IncompleteScope { scope: Urn, registrations: usize },

    #[error("node {0:?} does not belong to this program")]
    UnknownNode(NodeIndex),
}

fn describe_parent(parent: &Option<Urn>) -> String {
    match parent {
        Some(parent) => format!("'{parent}'"),
        None => "the program root".to_string(),
    }
}

fn format_cycle(cycle: &[Urn]) -> String {
    let mut names: Vec<String> = cycle.iter().map(ToString::to_string).collect();
    if let Some(first) = names.first().cloned() {
        names.push(first);
    }
    names.join(" -> ")
}

/// Errors returned to an execution engine misusing the callback surface.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("node {0:?} is not part of this deployment")]
    UnknownNode(NodeIndex),

    #[error("'{0}' is a component, only resources are materialized")]
    NotAResource(Urn),

    #[error("resource '{0}' has already settled")]
    AlreadySettled(Urn),

    #[error("resource '{0}' is already being materialized")]
    AlreadyRequested(Urn),

    #[error("resource '{urn}' still waits on '{dependency}'")]
    DependencyPending { urn: Urn, dependency: Urn },
}

/// An export whose value could not be reported.
///
/// Both variants mean the export is unresolved. They only differ in why:
/// `Failed` carries the error of the node it was built from, which failed,
/// was skipped or was aborted. `Unresolved` is an export no settled node ever
/// reached, such as one built from an [`Output::channel`](crate::Output::channel)
/// nobody resolved.
#[derive(Debug, Error, Clone)]
pub enum ExportError {
    #[error("export '{name}' failed: {error}")]
    Failed { name: String, error: OutputError },

    #[error("export '{name}' never resolved")]
    Unresolved { name: String },
}

impl ExportError {
    pub fn name(&self) -> &str {
        match self {
            ExportError::Failed { name, .. } | ExportError::Unresolved { name } => name,
        }
    }

    /// The underlying error, `None` if nothing upstream ever settled.
    pub fn error(&self) -> Option<&OutputError> {
        match self {
            ExportError::Failed { error, .. } => Some(error),
            ExportError::Unresolved { .. } => None,
        }
    }
}

/// Errors which prevent the executor from driving a deployment at all.
/// Materialization failures are not in here, they end up in the report.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Failed to build the thread pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Invalid progress template")]
    Style(#[from] indicatif::style::TemplateError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("worker channel disconnected")]
    Disconnected,
}

/// Text of a panic payload, as far as it can be recovered.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown payload"
    }
}
