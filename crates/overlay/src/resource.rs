//! External resources and the base/patch merge rule.
//!
//! A resource is an opaque host function with named inputs. Inputs are
//! resolved by name through the lexical scope chain of the scope the
//! resource is declared in, exactly like references in source files.
//!
//! Every property that produces a value must end up with exactly one base
//! definition (a scalar, a [`Role::Resource`] or a [`Role::Aggregator`])
//! and any number of [`Role::Patch`] definitions.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::arena::EvalId;
use crate::error::{Error, ErrorContext, ErrorKind, Result};
use crate::evaluation::Evaluation;
use crate::mixin::MixinKey;
use crate::runtime::Runtime;
use crate::source::Primitive;
use crate::symbol_table::{SymbolTable, look_up_skipping_self};

/// A computed value: a scalar, a list, or a composed scope.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Primitive(Primitive),
    List(Arc<Vec<Value>>),
    Scope(EvalId),
}

impl Value {
    pub fn as_primitive(&self) -> Option<&Primitive> {
        match self {
            Value::Primitive(primitive) => Some(primitive),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        self.as_primitive().and_then(Primitive::as_int)
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_primitive().and_then(Primitive::as_str)
    }
}

impl From<Primitive> for Value {
    fn from(value: Primitive) -> Self {
        Value::Primitive(value)
    }
}

macro_rules! value_from_scalar {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::Primitive(value.into())
                }
            }
        )*
    };
}

value_from_scalar!(i64, i32, bool, f64, &str, String);

impl FromIterator<Value> for Value {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Value::List(Arc::new(iter.into_iter().collect()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Resource,
    Aggregator,
    Patch,
}

impl Role {
    fn name(self) -> &'static str {
        match self {
            Role::Resource => "resource",
            Role::Aggregator => "aggregator",
            Role::Patch => "patch",
        }
    }
}

pub type TransformFn = dyn Fn(Value) -> Result<Value> + Send + Sync;

/// What a patch contributes to its base.
#[derive(Clone)]
pub enum Patch {
    /// Rewrites the value of a resource or scalar base.
    Transform(Arc<TransformFn>),
    /// Feeds one element into an aggregator base.
    Contribute(Value),
}

impl Patch {
    pub fn transform<F>(transform: F) -> Self
    where
        F: Fn(Value) -> Result<Value> + Send + Sync + 'static,
    {
        Patch::Transform(Arc::new(transform))
    }
}

impl fmt::Debug for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Patch::Transform(_) => write!(f, "Patch::Transform"),
            Patch::Contribute(value) => f.debug_tuple("Patch::Contribute").field(value).finish(),
        }
    }
}

pub type ResourceFn = dyn Fn(&Inputs<'_>) -> Result<Value> + Send + Sync;
pub type AggregatorFn = dyn Fn(&Inputs<'_>, Vec<Value>) -> Result<Value> + Send + Sync;
pub type PatchFn = dyn Fn(&Inputs<'_>) -> Result<Patch> + Send + Sync;

#[derive(Clone)]
enum Adapter {
    Resource(Arc<ResourceFn>),
    Aggregator(Arc<AggregatorFn>),
    Patch(Arc<PatchFn>),
}

/// Host-side definition of a resource, aggregator or patch.
#[derive(Clone)]
pub struct ResourceDefinition {
    inputs: Vec<Arc<str>>,
    adapter: Adapter,
}

impl ResourceDefinition {
    pub fn resource<'a, F>(inputs: impl IntoIterator<Item = &'a str>, compute: F) -> Self
    where
        F: Fn(&Inputs<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            inputs: inputs.into_iter().map(Arc::from).collect(),
            adapter: Adapter::Resource(Arc::new(compute)),
        }
    }

    pub fn aggregator<'a, F>(inputs: impl IntoIterator<Item = &'a str>, reduce: F) -> Self
    where
        F: Fn(&Inputs<'_>, Vec<Value>) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            inputs: inputs.into_iter().map(Arc::from).collect(),
            adapter: Adapter::Aggregator(Arc::new(reduce)),
        }
    }

    pub fn patch<'a, F>(inputs: impl IntoIterator<Item = &'a str>, patch: F) -> Self
    where
        F: Fn(&Inputs<'_>) -> Result<Patch> + Send + Sync + 'static,
    {
        Self {
            inputs: inputs.into_iter().map(Arc::from).collect(),
            adapter: Adapter::Patch(Arc::new(patch)),
        }
    }

    pub fn role(&self) -> Role {
        match self.adapter {
            Adapter::Resource(_) => Role::Resource,
            Adapter::Aggregator(_) => Role::Aggregator,
            Adapter::Patch(_) => Role::Patch,
        }
    }

    pub fn inputs(&self) -> &[Arc<str>] {
        &self.inputs
    }
}

impl fmt::Debug for ResourceDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDefinition")
            .field("role", &self.role())
            .field("inputs", &self.inputs)
            .finish()
    }
}

/// A resource definition attached to the scope it was declared in.
#[derive(Clone)]
pub struct BoundResource {
    definition: Arc<ResourceDefinition>,
    table: Arc<SymbolTable>,
    name: Arc<str>,
    key: MixinKey,
}

impl BoundResource {
    pub fn new(definition: Arc<ResourceDefinition>, table: Arc<SymbolTable>, name: Arc<str>, key: MixinKey) -> Self {
        Self {
            definition,
            table,
            name,
            key,
        }
    }

    pub fn role(&self) -> Role {
        self.definition.role()
    }

    pub fn key(&self) -> &MixinKey {
        &self.key
    }

    fn inputs<'rt>(&self, runtime: &'rt Runtime) -> Result<Inputs<'rt>> {
        let mut values = IndexMap::with_capacity(self.definition.inputs.len());
        for input in &self.definition.inputs {
            let id = look_up_skipping_self(runtime, Some(&self.table), Some(self.name.as_ref()), input)?.ok_or_else(
                || -> Error {
                    ErrorKind::UnresolvedReference {
                        path: format!("[{input}]"),
                        key: self.key.to_string(),
                    }
                    .into()
                },
            )?;
            let value = runtime
                .value(id)
                .context(|| format!("while resolving input `{input}` of `{}`", self.key))?;
            values.insert(input.clone(), value);
        }
        Ok(Inputs {
            runtime,
            resource: self.name.clone(),
            values,
        })
    }
}

impl fmt::Debug for BoundResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundResource")
            .field("key", &self.key)
            .field("definition", &self.definition)
            .finish()
    }
}

/// Resolved inputs handed to an adapter.
pub struct Inputs<'rt> {
    runtime: &'rt Runtime,
    resource: Arc<str>,
    values: IndexMap<Arc<str>, Value>,
}

impl<'rt> Inputs<'rt> {
    pub fn runtime(&self) -> &'rt Runtime {
        self.runtime
    }

    pub fn get(&self, name: &str) -> Result<&Value> {
        self.values.get(name).ok_or_else(|| {
            Error::adapter(
                self.resource.as_ref(),
                format_args!("`{name}` is not a declared input"),
            )
        })
    }

    pub fn int(&self, name: &str) -> Result<i64> {
        let value = self.get(name)?;
        value.as_int().ok_or_else(|| {
            Error::adapter(
                self.resource.as_ref(),
                format_args!("input `{name}` is {value:?}, expected an integer"),
            )
        })
    }

    pub fn str(&self, name: &str) -> Result<&str> {
        let value = self.get(name)?;
        value.as_str().ok_or_else(|| {
            Error::adapter(
                self.resource.as_ref(),
                format_args!("input `{name}` is {value:?}, expected a string"),
            )
        })
    }

    /// The composed scope behind a scope-valued input.
    pub fn scope(&self, name: &str) -> Result<Evaluation<'rt>> {
        match self.get(name)? {
            Value::Scope(id) => self.runtime.evaluation(*id).ok_or_else(|| {
                Error::adapter(self.resource.as_ref(), format_args!("input `{name}` belongs to another runtime"))
            }),
            other => Err(Error::adapter(
                self.resource.as_ref(),
                format_args!("input `{name}` is {other:?}, expected a scope"),
            )),
        }
    }
}

/// The base elected for a leaf evaluation.
pub(crate) enum Base<'a> {
    Scalar(&'a Primitive),
    Resource(&'a BoundResource),
}

pub(crate) struct Election<'a> {
    pub base: Base<'a>,
    pub patches: Vec<&'a BoundResource>,
}

/// Applies the arity rule: exactly one base, the rest patches.
pub(crate) fn elect<'a>(
    scope: &str,
    primitives: &'a [Primitive],
    resources: &'a [BoundResource],
) -> Result<Election<'a>> {
    let (patches, bases): (Vec<_>, Vec<_>) = resources.iter().partition(|resource| resource.role() == Role::Patch);
    let base_count = primitives.len() + bases.len();
    if base_count == 1 {
        let base = match (primitives.first(), bases.first()) {
            (Some(primitive), _) => Base::Scalar(primitive),
            (None, Some(resource)) => Base::Resource(resource),
            (None, None) => unreachable!("one base was counted"),
        };
        return Ok(Election { base, patches });
    }
    if bases.is_empty() && patches.is_empty() {
        return Err(ErrorKind::AmbiguousScalar {
            scope: scope.to_string(),
            count: primitives.len(),
        }
        .into());
    }
    Err(ErrorKind::AmbiguousMerge {
        scope: scope.to_string(),
        bases: base_count,
        patches: patches.len(),
    }
    .into())
}

/// Computes the value of a leaf evaluation.
pub(crate) fn compute(runtime: &Runtime, scope: &str, primitives: &[Primitive], resources: &[BoundResource]) -> Result<Value> {
    let Election { base, patches } = elect(scope, primitives, resources)?;

    let incompatible = |patch: &BoundResource, base: Role| -> Error {
        ErrorKind::IncompatiblePatch {
            scope: scope.to_string(),
            patch: patch.key.to_string(),
            base: base.name(),
        }
        .into()
    };

    let invoke_patch = |patch: &BoundResource| -> Result<Patch> {
        let Adapter::Patch(adapter) = &patch.definition.adapter else {
            unreachable!("election only yields patch-role definitions as patches");
        };
        let inputs = patch.inputs(runtime)?;
        log::trace!("applying patch `{}` to `{scope}`", patch.key);
        adapter(&inputs).context(|| format!("while computing patch `{}`", patch.key))
    };

    let (mut value, base_role) = match base {
        Base::Scalar(primitive) => (Value::Primitive(primitive.clone()), Role::Resource),
        Base::Resource(resource) => match &resource.definition.adapter {
            Adapter::Resource(adapter) => {
                let inputs = resource.inputs(runtime)?;
                log::trace!("computing resource `{}`", resource.key);
                let value = adapter(&inputs).context(|| format!("while computing resource `{}`", resource.key))?;
                (value, Role::Resource)
            }
            Adapter::Aggregator(adapter) => {
                let mut contributions = Vec::with_capacity(patches.len());
                for patch in patches.iter().copied() {
                    match invoke_patch(patch)? {
                        Patch::Contribute(value) => contributions.push(value),
                        Patch::Transform(_) => return Err(incompatible(patch, Role::Aggregator)),
                    }
                }
                let inputs = resource.inputs(runtime)?;
                log::trace!("aggregating {} contributions into `{}`", contributions.len(), resource.key);
                let value = adapter(&inputs, contributions)
                    .context(|| format!("while computing aggregator `{}`", resource.key))?;
                return Ok(value);
            }
            Adapter::Patch(_) => unreachable!("election never yields a patch as base"),
        },
    };

    for patch in patches.iter().copied() {
        match invoke_patch(patch)? {
            Patch::Transform(transform) => {
                value = transform(value).context(|| format!("while applying patch `{}`", patch.key))?;
            }
            Patch::Contribute(_) => return Err(incompatible(patch, base_role)),
        }
    }
    Ok(value)
}
