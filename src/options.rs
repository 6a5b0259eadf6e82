use serde::{Deserialize, Serialize};

/// What happens to the rest of a deployment once a resource fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Only the failed resource's dependents are skipped, independent
    /// resources keep materializing.
    #[default]
    Isolate,
    /// No new materializations start after the first failure; everything
    /// still pending is aborted. In-flight ones are allowed to finish.
    Abort,
}

/// Configuration of an [`Executor`](crate::Executor).
///
/// Deserializable so that it can live in a project's configuration file:
///
/// ```
/// # use kumitate::{FailurePolicy, Options};
/// let options: Options = serde_json::from_str(r#"{"policy": "abort", "retries": 2}"#).unwrap();
/// assert_eq!(options.policy, FailurePolicy::Abort);
/// assert_eq!(options.parallelism, 0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Options {
    pub policy: FailurePolicy,
    /// Number of worker threads, `0` picks one per CPU.
    pub parallelism: usize,
    /// How many times a failed materialization is retried before the
    /// failure is reported.
    pub retries: u32,
    /// Draw progress bars through the tracing span tree.
    pub progress: bool,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn parallelism(mut self, threads: usize) -> Self {
        self.parallelism = threads;
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options: Options = serde_json::from_str("{}").unwrap();
        assert_eq!(options, Options::default());
        assert_eq!(options.policy, FailurePolicy::Isolate);
    }

    #[test]
    fn test_kebab_case_keys() {
        let options = Options::new().policy(FailurePolicy::Abort).parallelism(4);
        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["policy"], "abort");
        assert_eq!(json["parallelism"], 4);
    }
}
