use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::time::{Duration, Instant};

use console::style;
use serde_json::Value;

use crate::Urn;
use crate::error::{ExportError, OutputError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The provider reported an error.
    Failed,
    /// Never attempted because something it depends on failed.
    Skipped,
    /// Never attempted because the run was aborted.
    Aborted,
}

/// A resource which did not materialize.
#[derive(Debug, Clone)]
pub struct Failure {
    pub urn: Urn,
    pub kind: FailureKind,
    pub error: OutputError,
    /// Exports which transitively depend on this resource.
    pub exports: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Execution {
    pub start: Instant,
    pub duration: Duration,
    pub attempts: u32,
}

/// Timings of every materialization an executor ran.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub executions: BTreeMap<Urn, Execution>,
}

impl Diagnostics {
    /// Wall time between the first start and the last finish.
    pub fn elapsed(&self) -> Duration {
        let start = self.executions.values().map(|e| e.start).min();
        let end = self.executions.values().map(|e| e.start + e.duration).max();
        match (start, end) {
            (Some(start), Some(end)) => end.duration_since(start),
            _ => Duration::ZERO,
        }
    }

    /// The `n` slowest materializations, slowest first.
    pub fn slowest(&self, n: usize) -> Vec<(&Urn, &Execution)> {
        let mut executions: Vec<_> = self.executions.iter().collect();
        executions.sort_by(|a, b| b.1.duration.cmp(&a.1.duration).then(a.0.cmp(b.0)));
        executions.truncate(n);
        executions
    }
}

/// Outcome of a deployment.
#[derive(Debug, Default)]
pub struct RunReport {
    /// Exports which resolved.
    pub exports: BTreeMap<String, Value>,
    /// Exports which failed or never resolved.
    pub export_errors: BTreeMap<String, ExportError>,
    /// Resources which did not materialize, in deployment order.
    pub failures: Vec<Failure>,
    pub diagnostics: Diagnostics,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.export_errors.is_empty()
    }

    pub fn failure(&self, urn: &Urn) -> Option<&Failure> {
        self.failures.iter().find(|failure| &failure.urn == urn)
    }
}

impl Display for RunReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for failure in &self.failures {
            let label = match failure.kind {
                FailureKind::Failed => style("failed").red().bold(),
                FailureKind::Skipped => style("skipped").yellow(),
                FailureKind::Aborted => style("aborted").dim(),
            };
            writeln!(f, "{label} {}", failure.urn)?;
            if failure.kind == FailureKind::Failed {
                writeln!(f, "    {}", failure.error)?;
            }
            if !failure.exports.is_empty() {
                writeln!(f, "    affects: {}", failure.exports.join(", "))?;
            }
        }

        if !self.exports.is_empty() || !self.export_errors.is_empty() {
            writeln!(f, "{}", style("Outputs:").bold())?;
        }
        for (name, value) in &self.exports {
            writeln!(f, "    {name}: {value}")?;
        }
        for error in self.export_errors.values() {
            writeln!(f, "    {}", style(error).red())?;
        }

        let summary = format!(
            "{} resources materialized in {:.2?}, {} failed",
            self.diagnostics.executions.len(),
            self.diagnostics.elapsed(),
            self.failures.len()
        );
        if self.is_success() {
            write!(f, "{}", style(summary).green())
        } else {
            write!(f, "{}", style(summary).red())
        }
    }
}
