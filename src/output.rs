//! Deferred values.
//!
//! An [`Output<T>`] stands for a value which is not known while the program is
//! being declared, typically an attribute a cloud provider assigns only after a
//! resource has been created. Outputs settle at most once, either to a value or
//! to an [`OutputError`], and never change afterwards.
//!
//! Transformations registered before the output settles are queued and fire in
//! registration order once it does. Transformations registered afterwards run
//! right away on the calling thread. Either way every transformation runs at
//! most once.
//!
//! Each output also remembers which declared nodes it originates from. Passing
//! an output as an input of another resource is how dependency edges get
//! inferred, so this set is carried through every combinator.
//!
//! User code running inside a transform or a settlement callback may panic.
//! A panicking transform fails its derived output, a panicking callback is
//! logged and skipped. Neither keeps the remaining callbacks from running.

use std::collections::BTreeSet;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use petgraph::graph::NodeIndex;

use crate::error::{OutputError, panic_message};
use crate::node::NodeRef;

/// Result an output settles to.
pub type Settled<T> = Result<T, OutputError>;

type Callback<T> = Box<dyn FnOnce(&Settled<T>) + Send>;

enum State<T> {
    Pending(Vec<Callback<T>>),
    Settled(Settled<T>),
}

struct Shared<T> {
    state: Mutex<State<T>>,
    origins: BTreeSet<NodeRef>,
}

/// Outputs are only touched by short, non-panicking critical sections, so a
/// poisoned lock still holds consistent data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A deferred, possibly unresolved value.
///
/// Cloning an `Output` is cheap and yields a handle to the same value.
pub struct Output<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

/// The write side of an [`Output`] created with [`Output::channel`].
pub struct Resolver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Output<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn with_state(state: State<T>, origins: BTreeSet<NodeRef>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                origins,
            }),
        }
    }

    /// An output which is already resolved to `value`.
    pub fn of(value: T) -> Self {
        Self::with_state(State::Settled(Ok(value)), BTreeSet::new())
    }

    /// An output which has already failed with `error`.
    pub fn failed(error: OutputError) -> Self {
        Self::with_state(State::Settled(Err(error)), BTreeSet::new())
    }

    /// A pending output together with the handle used to settle it.
    pub fn channel() -> (Self, Resolver<T>) {
        Self::pending(BTreeSet::new())
    }

    pub(crate) fn pending(origins: BTreeSet<NodeRef>) -> (Self, Resolver<T>) {
        let output = Self::with_state(State::Pending(Vec::new()), origins);
        let resolver = Resolver {
            shared: output.shared.clone(),
        };
        (output, resolver)
    }

    pub(crate) fn settled(result: Settled<T>, origins: BTreeSet<NodeRef>) -> Self {
        Self::with_state(State::Settled(result), origins)
    }

    /// Nodes this value is derived from, as indices within the program which
    /// declared them.
    pub fn dependencies(&self) -> BTreeSet<NodeIndex> {
        self.shared.origins.iter().map(|origin| origin.index).collect()
    }

    pub(crate) fn origins(&self) -> &BTreeSet<NodeRef> {
        &self.shared.origins
    }

    pub fn is_settled(&self) -> bool {
        matches!(*lock(&self.shared.state), State::Settled(_))
    }

    /// Returns the settled result, or `None` while the output is pending.
    pub fn peek(&self) -> Option<Settled<T>> {
        match &*lock(&self.shared.state) {
            State::Pending(_) => None,
            State::Settled(result) => Some(result.clone()),
        }
    }

    /// Runs `callback` once this output settles. If it already has, the
    /// callback runs immediately on the current thread.
    pub fn on_settled<F>(&self, callback: F)
    where
        F: FnOnce(&Settled<T>) + Send + 'static,
    {
        let mut state = lock(&self.shared.state);
        match &mut *state {
            State::Pending(queue) => queue.push(Box::new(callback)),
            State::Settled(result) => {
                let result = result.clone();
                drop(state);
                fire(Box::new(callback), &result);
            }
        }
    }

    /// Derives a new output by applying `transform` to the resolved value.
    ///
    /// A failure of this output is passed through unchanged.
    pub fn map<U, F>(&self, transform: F) -> Output<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.try_map(move |value| Ok(transform(value)))
    }

    /// Like [`Output::map`], but the transform may fail. Its error becomes an
    /// [`OutputError::Transform`] on the derived output, and so does a panic.
    pub fn try_map<U, F>(&self, transform: F) -> Output<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> anyhow::Result<U> + Send + 'static,
    {
        let (output, resolver) = Output::pending(self.shared.origins.clone());

        self.on_settled(move |result| {
            let result = match result {
                Ok(value) => {
                    let value = value.clone();
                    match catch_unwind(AssertUnwindSafe(move || transform(value))) {
                        Ok(result) => result.map_err(OutputError::transform),
                        Err(panic) => Err(OutputError::transform(anyhow::anyhow!(
                            "transform panicked: {}",
                            panic_message(&*panic)
                        ))),
                    }
                }
                Err(error) => Err(error.clone()),
            };
            resolver.settle(result);
        });

        output
    }

    /// Pairs this output with `other`.
    ///
    /// The pair settles only after both sides have settled. If both failed,
    /// the error of `self` wins regardless of which one failed first.
    pub fn zip<U>(&self, other: &Output<U>) -> Output<(T, U)>
    where
        U: Clone + Send + Sync + 'static,
    {
        let origins = self
            .shared
            .origins
            .union(&other.shared.origins)
            .copied()
            .collect();
        let (output, resolver) = Output::pending(origins);
        let slots = Arc::new(Mutex::new(Pair::<T, U> {
            left: None,
            right: None,
        }));

        {
            let slots = slots.clone();
            let resolver = resolver.clone();
            self.on_settled(move |result| {
                lock(&slots).left = Some(result.clone());
                Pair::finish(&slots, &resolver);
            });
        }

        other.on_settled(move |result| {
            lock(&slots).right = Some(result.clone());
            Pair::finish(&slots, &resolver);
        });

        output
    }

    /// Combines two outputs with `combiner` once both have resolved.
    ///
    /// For more than two outputs of different types use [`combine!`], which
    /// nests [`Output::zip`] the same way. Outputs of one type can be
    /// gathered with [`Output::all`].
    ///
    /// [`combine!`]: crate::combine
    pub fn combine<U, R, F>(left: &Output<T>, right: &Output<U>, combiner: F) -> Output<R>
    where
        U: Clone + Send + Sync + 'static,
        R: Clone + Send + Sync + 'static,
        F: FnOnce(T, U) -> R + Send + 'static,
    {
        left.zip(right).map(move |(l, r)| combiner(l, r))
    }

    /// Collects any number of outputs into one.
    ///
    /// Settles once every input has settled. On failure reports the error of
    /// the leftmost failed input.
    pub fn all<I>(outputs: I) -> Output<Vec<T>>
    where
        I: IntoIterator<Item = Output<T>>,
    {
        let outputs: Vec<_> = outputs.into_iter().collect();
        let origins = outputs
            .iter()
            .flat_map(|output| output.shared.origins.iter().copied())
            .collect();

        if outputs.is_empty() {
            return Output::settled(Ok(Vec::new()), origins);
        }

        let (output, resolver) = Output::pending(origins);
        let gather = Arc::new(Mutex::new(Gather {
            slots: vec![None; outputs.len()],
            remaining: outputs.len(),
        }));

        for (slot, input) in outputs.iter().enumerate() {
            let gather = gather.clone();
            let resolver = resolver.clone();
            input.on_settled(move |result| {
                let slots = {
                    let mut gather = lock(&gather);
                    gather.slots[slot] = Some(result.clone());
                    gather.remaining -= 1;
                    if gather.remaining > 0 {
                        return;
                    }
                    std::mem::take(&mut gather.slots)
                };

                // Every slot is filled at this point, and `collect` into a
                // `Result` stops at the first error in input order.
                let result = slots
                    .into_iter()
                    .map(|slot| slot.unwrap_or(Err(OutputError::Unresolved)))
                    .collect();
                resolver.settle(result);
            });
        }

        output
    }
}

impl Output<serde_json::Value> {
    /// Typed view of a JSON output.
    pub fn deserialize<U>(&self) -> Output<U>
    where
        U: serde::de::DeserializeOwned + Clone + Send + Sync + 'static,
    {
        self.try_map(|value| Ok(serde_json::from_value(value)?))
    }
}

impl<T> Output<T>
where
    T: serde::Serialize + Clone + Send + Sync + 'static,
{
    /// Untyped JSON view of this output.
    pub fn to_value(&self) -> Output<serde_json::Value> {
        self.try_map(|value| Ok(serde_json::to_value(value)?))
    }
}

impl<T> fmt::Debug for Output<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("Output");
        match &*lock(&self.shared.state) {
            State::Pending(queue) => debug.field("pending", &queue.len()),
            State::Settled(Ok(value)) => debug.field("value", value),
            State::Settled(Err(error)) => debug.field("error", error),
        };
        debug.field("origins", &self.shared.origins).finish()
    }
}

impl<T> Resolver<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Resolves the output to `value`. See [`Resolver::settle`].
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Fails the output with `error`. See [`Resolver::settle`].
    pub fn reject(&self, error: OutputError) -> bool {
        self.settle(Err(error))
    }

    /// Settles the output and fires every queued transformation in the order
    /// they were registered.
    ///
    /// Returns `false` without doing anything if the output had already
    /// settled.
    pub fn settle(&self, result: Settled<T>) -> bool {
        let queue = {
            let mut state = lock(&self.shared.state);
            let queue = match &mut *state {
                State::Settled(_) => return false,
                State::Pending(queue) => std::mem::take(queue),
            };
            *state = State::Settled(result.clone());
            queue
        };

        for callback in queue {
            fire(callback, &result);
        }

        true
    }

    /// The output this resolver settles.
    pub fn output(&self) -> Output<T> {
        Output {
            shared: self.shared.clone(),
        }
    }
}

/// Runs one settlement callback. A panic is contained here so the callbacks
/// queued after it still run.
fn fire<T>(callback: Callback<T>, result: &Settled<T>) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(result))) {
        tracing::error!("output callback panicked: {}", panic_message(&*panic));
    }
}

/// Combines any number of outputs of possibly different types.
///
/// The combined output settles once every input has settled and fails with
/// the error of the leftmost failed input, just like [`Output::zip`].
///
/// ```
/// use kumitate::{Output, combine};
///
/// let bucket = Output::of("site-bucket".to_string());
/// let region = Output::of("eu-west-1");
/// let port = Output::of(8080);
///
/// let url = combine!(bucket, region, port => |bucket, region, port| {
///     format!("http://{bucket}.{region}.example.com:{port}")
/// });
/// assert_eq!(
///     url.peek().unwrap().unwrap(),
///     "http://site-bucket.eu-west-1.example.com:8080"
/// );
/// ```
#[macro_export]
macro_rules! combine {
    (@zip $acc:expr) => { $acc };
    (@zip $acc:expr, $next:expr $(, $rest:expr)*) => {
        $crate::combine!(@zip $crate::Output::zip(&$acc, &$next) $(, $rest)*)
    };
    (@pat $acc:pat_param) => { $acc };
    (@pat $acc:pat_param, $next:pat_param $(, $rest:pat_param)*) => {
        $crate::combine!(@pat ($acc, $next) $(, $rest)*)
    };
    ($first:expr $(, $rest:expr)+ => |$head:pat_param $(, $tail:pat_param)+ $(,)?| $body:expr) => {
        $crate::Output::map(
            &$crate::combine!(@zip ($first).clone() $(, $rest)+),
            move |$crate::combine!(@pat $head $(, $tail)+)| $body,
        )
    };
}

struct Pair<T, U> {
    left: Option<Settled<T>>,
    right: Option<Settled<U>>,
}

impl<T, U> Pair<T, U>
where
    T: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
{
    fn finish(slots: &Mutex<Self>, resolver: &Resolver<(T, U)>) {
        let (left, right) = {
            let mut slots = lock(slots);
            if slots.left.is_none() || slots.right.is_none() {
                return;
            }
            (slots.left.take(), slots.right.take())
        };

        let (Some(left), Some(right)) = (left, right) else {
            return;
        };

        resolver.settle(match (left, right) {
            (Err(error), _) | (Ok(_), Err(error)) => Err(error),
            (Ok(left), Ok(right)) => Ok((left, right)),
        });
    }
}

struct Gather<T> {
    slots: Vec<Option<Settled<T>>>,
    remaining: usize,
}
