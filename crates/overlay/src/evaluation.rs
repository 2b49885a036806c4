//! Composed evaluations.
//!
//! `evaluate(own_mixins)` linearizes the inheritance closure, collects the
//! scalars and resources and registers one lazy slot per property name.
//! The node gets its [`EvalId`] before any property is computed; property
//! constructors receive the node itself as `self`, which is how a scope can
//! refer to its own, eventually complete, composition.
//!
//! Every slot is computed at most once. Concurrent readers block on the
//! slot until the computing thread is done. A thread reaching a slot it is
//! itself computing gets [`ErrorKind::CyclicEvaluation`], and so does a
//! thread about to block on a slot whose owner is, transitively, waiting
//! for it.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::arena::EvalId;
use crate::error::{ErrorContext, ErrorKind, Result};
use crate::mixin::{Mixin, MixinKey, PropertyConstructor};
use crate::resource::{self, BoundResource, Value};
use crate::runtime::{Arguments, Runtime, arguments_mixin};
use crate::source::Primitive;

enum MemoState<T> {
    Vacant,
    Running(ThreadId),
    Done(Result<T>),
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct SlotId(u64);

static NEXT_SLOT: AtomicU64 = AtomicU64::new(0);

/// Which thread runs each slot, and which slot each blocked thread waits
/// for. Blocking on a slot whose chain of owners leads back to the
/// blocking thread is a cycle.
#[derive(Default)]
pub(crate) struct WaitGraph {
    state: Mutex<WaitState>,
}

#[derive(Default)]
struct WaitState {
    owners: FxHashMap<SlotId, ThreadId>,
    waiting: FxHashMap<ThreadId, SlotId>,
}

impl WaitGraph {
    fn lock(&self) -> MutexGuard<'_, WaitState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn claim(&self, slot: SlotId, owner: ThreadId) {
        self.lock().owners.insert(slot, owner);
    }

    fn release(&self, slot: SlotId) {
        self.lock().owners.remove(&slot);
    }

    /// Registers `waiter` as blocked on `slot`, or returns `false` if that
    /// would close a cycle.
    fn block(&self, waiter: ThreadId, slot: SlotId) -> bool {
        let mut state = self.lock();
        let mut next = slot;
        while let Some(&owner) = state.owners.get(&next) {
            if owner == waiter {
                return false;
            }
            match state.waiting.get(&owner) {
                Some(&slot) => next = slot,
                None => break,
            }
        }
        state.waiting.insert(waiter, slot);
        true
    }

    fn unblock(&self, waiter: ThreadId) {
        self.lock().waiting.remove(&waiter);
    }
}

/// Exactly-once cell with reentrancy detection.
pub(crate) struct Memo<T> {
    id: SlotId,
    state: Mutex<MemoState<T>>,
    ready: Condvar,
}

impl<T: Clone> Memo<T> {
    pub(crate) fn new() -> Self {
        Self {
            id: SlotId(NEXT_SLOT.fetch_add(1, Ordering::Relaxed)),
            state: Mutex::new(MemoState::Vacant),
            ready: Condvar::new(),
        }
    }

    /// Returns the cached result, computing it with `init` on first use.
    /// `scope` labels the cycle error, which is also returned when waiting
    /// for another thread would deadlock through `waits`.
    pub(crate) fn get_or_init(
        &self,
        waits: &WaitGraph,
        scope: impl FnOnce() -> String,
        init: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let current = thread::current().id();
        let mut state = self.lock();
        loop {
            let running_elsewhere = match &*state {
                MemoState::Done(result) => return result.clone(),
                MemoState::Running(owner) if *owner == current => {
                    return Err(ErrorKind::CyclicEvaluation { scope: scope() }.into());
                }
                MemoState::Running(_) => true,
                MemoState::Vacant => false,
            };
            if !running_elsewhere {
                break;
            }
            if !waits.block(current, self.id) {
                return Err(ErrorKind::CyclicEvaluation { scope: scope() }.into());
            }
            state = self.ready.wait(state).unwrap_or_else(|poisoned| poisoned.into_inner());
            waits.unblock(current);
        }
        *state = MemoState::Running(current);
        waits.claim(self.id, current);
        drop(state);

        let guard = RunningGuard { memo: self, waits };
        let result = init();
        *self.lock() = MemoState::Done(result.clone());
        drop(guard);
        result
    }

    fn lock(&self) -> MutexGuard<'_, MemoState<T>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Wakes waiters when a computation finishes, and vacates the cell if it
/// unwound instead.
struct RunningGuard<'a, T> {
    memo: &'a Memo<T>,
    waits: &'a WaitGraph,
}

impl<T> Drop for RunningGuard<'_, T> {
    fn drop(&mut self) {
        let mut state = self.memo.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if matches!(*state, MemoState::Running(_)) {
            *state = MemoState::Vacant;
        }
        self.waits.release(self.memo.id);
        drop(state);
        self.memo.ready.notify_all();
    }
}

pub(crate) struct PropertySlot {
    constructor: PropertyConstructor,
    memo: Memo<EvalId>,
}

pub(crate) struct EvaluationNode {
    path: Arc<str>,
    own_mixins: Arc<[Mixin]>,
    all_mixins: Arc<[Mixin]>,
    primitives: Arc<[Primitive]>,
    resources: Arc<[BoundResource]>,
    properties: IndexMap<Arc<str>, PropertySlot>,
    value: Memo<Value>,
}

impl EvaluationNode {
    pub(crate) fn compose(path: Arc<str>, own_mixins: Vec<Mixin>) -> Self {
        let all_mixins = linearize(&own_mixins);

        let mut primitives = Vec::new();
        let mut resources = Vec::new();
        let mut constructors: IndexMap<Arc<str>, Vec<PropertyConstructor>> = IndexMap::new();
        for mixin in &all_mixins {
            primitives.extend_from_slice(mixin.primitives());
            resources.extend_from_slice(mixin.resources());
            for (name, constructor) in mixin.own_properties() {
                constructors.entry(name.clone()).or_default().push(constructor.clone());
            }
        }

        let properties = constructors
            .into_iter()
            .map(|(name, constructors)| {
                let slot = PropertySlot {
                    constructor: PropertyConstructor::merge(constructors),
                    memo: Memo::new(),
                };
                (name, slot)
            })
            .collect();

        Self {
            path,
            own_mixins: own_mixins.into(),
            all_mixins: all_mixins.into(),
            primitives: primitives.into(),
            resources: resources.into(),
            properties,
            value: Memo::new(),
        }
    }

    pub(crate) fn is_leaf(&self) -> bool {
        !self.primitives.is_empty() || !self.resources.is_empty()
    }

    pub(crate) fn label(&self) -> String {
        scope_label(&self.path)
    }
}

/// Depth-first, pre-order closure over `inheritances`, keeping the first
/// occurrence of each key.
fn linearize(own_mixins: &[Mixin]) -> Vec<Mixin> {
    let mut seen: FxHashSet<MixinKey> = FxHashSet::default();
    let mut all = Vec::new();
    let mut stack: Vec<&Mixin> = own_mixins.iter().rev().collect();
    while let Some(mixin) = stack.pop() {
        if !seen.insert(mixin.key().clone()) {
            continue;
        }
        all.push(mixin.clone());
        stack.extend(mixin.inheritances().iter().rev());
    }
    all
}

pub(crate) fn scope_label(path: &str) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.to_string()
    }
}

fn child_path(parent: &str, name: &str) -> Arc<str> {
    if parent.is_empty() {
        name.into()
    } else {
        format!("{parent}.{name}").into()
    }
}

impl Runtime {
    pub(crate) fn property(&self, id: EvalId, name: &str) -> Result<EvalId> {
        let node = self.node(id);
        let Some(slot) = node.properties.get(name) else {
            return Err(ErrorKind::NoSuchProperty {
                scope: node.label(),
                name: name.to_string(),
            }
            .into());
        };

        let path = child_path(&node.path, name);
        slot.memo.get_or_init(
            self.waits(),
            || path.to_string(),
            || {
                log::trace!("evaluating `{path}`");
                let mixins = slot
                    .constructor
                    .construct(Evaluation::new(self, id))
                    .context(|| format!("while evaluating `{path}`"))?;
                Ok(self.evaluate_at(path.clone(), mixins))
            },
        )
    }

    pub(crate) fn has_property(&self, id: EvalId, name: &str) -> bool {
        self.node(id).properties.contains_key(name)
    }

    pub(crate) fn value(&self, id: EvalId) -> Result<Value> {
        let node = self.node(id);
        node.value.get_or_init(
            self.waits(),
            || node.label(),
            || {
                if !node.is_leaf() {
                    return Ok(Value::Scope(id));
                }
                if !node.properties.is_empty() {
                    return Err(mixed_primitive_property(&node));
                }
                resource::compute(self, &node.label(), &node.primitives, &node.resources)
            },
        )
    }

    pub(crate) fn scope_label(&self, id: EvalId) -> String {
        self.node(id).label()
    }
}

fn mixed_primitive_property(node: &EvaluationNode) -> crate::Error {
    let properties = node
        .properties
        .keys()
        .map(|name| name.as_ref())
        .collect::<Vec<_>>()
        .join(", ");
    ErrorKind::MixedPrimitiveProperty {
        scope: node.label(),
        properties,
    }
    .into()
}

/// Handle to a composed evaluation owned by a [`Runtime`].
#[derive(Clone, Copy)]
pub struct Evaluation<'rt> {
    runtime: &'rt Runtime,
    id: EvalId,
}

impl<'rt> Evaluation<'rt> {
    pub(crate) fn new(runtime: &'rt Runtime, id: EvalId) -> Self {
        Self { runtime, id }
    }

    pub fn runtime(&self) -> &'rt Runtime {
        self.runtime
    }

    pub fn id(&self) -> EvalId {
        self.id
    }

    /// Dotted property path from the root this evaluation was reached by.
    pub fn path(&self) -> Arc<str> {
        self.node().path.clone()
    }

    pub fn own_mixins(&self) -> Arc<[Mixin]> {
        self.node().own_mixins.clone()
    }

    pub fn all_mixins(&self) -> Arc<[Mixin]> {
        self.node().all_mixins.clone()
    }

    pub fn resources(&self) -> Arc<[BoundResource]> {
        self.node().resources.clone()
    }

    /// Whether this evaluation produces a value (scalars or resources)
    /// rather than being a scope.
    pub fn is_leaf(&self) -> bool {
        self.node().is_leaf()
    }

    /// The value of a leaf, or [`Value::Scope`] of this evaluation for a
    /// scope.
    pub fn value(&self) -> Result<Value> {
        self.runtime.value(self.id)
    }

    pub fn get_path<'a>(&self, path: impl IntoIterator<Item = &'a str>) -> Result<Evaluation<'rt>> {
        let mut current = *self;
        for name in path {
            current = current.get(name)?;
        }
        Ok(current)
    }

    /// Forces every property.
    pub fn all_properties(&self) -> Result<IndexMap<Arc<str>, Evaluation<'rt>>> {
        self.property_names()
            .into_iter()
            .map(|name| {
                let property = self.get(&name)?;
                Ok((name, property))
            })
            .collect()
    }

    fn node(&self) -> Arc<EvaluationNode> {
        self.runtime.node(self.id)
    }
}

impl PartialEq for Evaluation<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.runtime, other.runtime) && self.id == other.id
    }
}

impl Eq for Evaluation<'_> {}

impl fmt::Debug for Evaluation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evaluation")
            .field("id", &self.id)
            .field("path", &self.path())
            .finish()
    }
}

pub trait HasPrimitives {
    fn all_primitives(&self) -> Arc<[Primitive]>;
}

pub trait HasProperties<'rt> {
    fn property_names(&self) -> Vec<Arc<str>>;

    fn has_property(&self, name: &str) -> bool;

    /// The composed evaluation of property `name`, computed on first access.
    fn get(&self, name: &str) -> Result<Evaluation<'rt>>;
}

/// Keyword-argument instantiation.
pub trait Callable<'rt> {
    /// A fresh instance of this scope with `arguments` merged in as scalar
    /// bases. The receiver is not affected.
    fn instantiate(&self, arguments: Arguments) -> Evaluation<'rt>;
}

impl HasPrimitives for Evaluation<'_> {
    fn all_primitives(&self) -> Arc<[Primitive]> {
        self.node().primitives.clone()
    }
}

impl<'rt> HasProperties<'rt> for Evaluation<'rt> {
    fn property_names(&self) -> Vec<Arc<str>> {
        self.node().properties.keys().cloned().collect()
    }

    fn has_property(&self, name: &str) -> bool {
        self.runtime.has_property(self.id, name)
    }

    fn get(&self, name: &str) -> Result<Evaluation<'rt>> {
        let id = self.runtime.property(self.id, name)?;
        Ok(Evaluation::new(self.runtime, id))
    }
}

impl<'rt> Callable<'rt> for Evaluation<'rt> {
    fn instantiate(&self, arguments: Arguments) -> Evaluation<'rt> {
        let node = self.node();
        let mut own_mixins = node.own_mixins.to_vec();
        own_mixins.push(arguments_mixin(arguments));
        let id = self.runtime.evaluate_at(node.path.clone(), own_mixins);
        Evaluation::new(self.runtime, id)
    }
}
