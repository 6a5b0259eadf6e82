#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod component;
mod deployment;
mod error;
mod executor;
pub mod graph;
mod hash;
pub mod input;
mod node;
mod options;
mod output;
mod program;
mod report;
mod resource;
mod urn;

pub use petgraph::graph::NodeIndex;

pub use crate::component::Component;
pub use crate::deployment::{Deployment, MaterializeRequest, NodeStatus, Readiness};
pub use crate::error::*;
pub use crate::executor::{Executor, Provider};
pub use crate::graph::{CycleError, DependencyGraph};
pub use crate::hash::Fingerprint;
pub use crate::input::{Input, Inputs};
pub use crate::options::{FailurePolicy, Options};
pub use crate::output::{Output, Resolver, Settled};
pub use crate::program::{Program, ProgramId};
pub use crate::report::{Diagnostics, Execution, Failure, FailureKind, RunReport};
pub use crate::resource::{Declared, Resource, ResourceOptions};
pub use crate::urn::Urn;

/// Installs a global tracing subscriber which prints log events and draws
/// progress bars for the executor's spans. Filtered through `RUST_LOG`,
/// defaults to `info`.
#[cfg(feature = "logging")]
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_indicatif::IndicatifLayer;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, fmt};

    let indicatif = IndicatifLayer::new();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(indicatif.get_stderr_writer()).with_target(false))
        .with(indicatif)
        .try_init()?;

    Ok(())
}
