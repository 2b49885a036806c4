//! Source tree to mixin compilation.
//!
//! A mapping becomes a mixin with one lazy property constructor per key, a
//! reference array becomes inheritance of the referenced evaluation's own
//! mixins, a scalar becomes a primitive, and a general list is compiled
//! element by element and unioned into one mixin.
//!
//! Property constructors create the [`SymbolTable`] of their scope when they
//! are invoked, because only then is the scope's composed `self` known.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::arena::EvalId;
use crate::error::{ErrorContext, Result};
use crate::evaluation::Evaluation;
use crate::mixin::{Mixin, MixinKey, PropertyConstructor};
use crate::resolver::{Reference, ReferenceSite, resolve};
use crate::runtime::Runtime;
use crate::source::SourceNode;
use crate::symbol_table::{NameSet, SymbolTable};

/// Compilation context for one structural position.
#[derive(Clone)]
pub struct CompileContext {
    origin: Arc<str>,
    /// `/`-separated property path within `origin`, `[i]` for list elements
    position: Arc<str>,
    /// Table of the scope this position is declared in
    declaring: Option<Arc<SymbolTable>>,
    self_name: Option<Arc<str>>,
    /// Names declared directly for the scope at this position
    scope_names: Arc<NameSet>,
}

impl CompileContext {
    pub fn root(origin: impl Into<Arc<str>>, scope_names: Arc<NameSet>) -> Self {
        Self {
            origin: origin.into(),
            position: "".into(),
            declaring: None,
            self_name: None,
            scope_names,
        }
    }

    pub fn key(&self) -> MixinKey {
        format!("{}#{}", self.origin, self.position).into()
    }

    pub fn self_name(&self) -> Option<&Arc<str>> {
        self.self_name.as_ref()
    }

    /// The table of the scope at this position, instantiated as `this`.
    pub fn bind(&self, this: EvalId) -> Arc<SymbolTable> {
        SymbolTable::new(
            self.self_name.clone(),
            this,
            self.scope_names.clone(),
            self.declaring.clone(),
        )
    }

    /// Context of property `name`, declared in the scope bound to `table`.
    pub fn property(&self, table: Arc<SymbolTable>, name: &Arc<str>, scope_names: NameSet) -> Self {
        let position = if self.position.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.position, name)
        };
        Self {
            origin: self.origin.clone(),
            position: position.into(),
            declaring: Some(table),
            self_name: Some(name.clone()),
            scope_names: Arc::new(scope_names),
        }
    }

    pub fn element(&self, index: usize) -> Self {
        Self {
            position: format!("{}[{index}]", self.position).into(),
            ..self.clone()
        }
    }

    /// Same scope, definitions coming from another source.
    pub fn with_origin(&self, origin: impl Into<Arc<str>>) -> Self {
        Self {
            origin: origin.into(),
            position: "".into(),
            ..self.clone()
        }
    }

    fn site<'a>(&'a self, key: &'a str) -> ReferenceSite<'a> {
        ReferenceSite {
            declaring: self.declaring.as_ref(),
            self_name: self.self_name.as_deref(),
            key,
        }
    }
}

pub fn compile(runtime: &Runtime, node: &SourceNode, context: &CompileContext) -> Result<Mixin> {
    match node {
        SourceNode::Scalar(primitive) => Ok(Mixin::scalar(context.key(), primitive.clone())),
        SourceNode::Mapping(entries) => Ok(compile_mapping(entries, context)),
        SourceNode::Sequence(items) => {
            let key = context.key();
            match Reference::classify(items, &key)? {
                Some(reference) => inherit_reference(runtime, &reference, context),
                None => {
                    let mut builder = Mixin::builder(key);
                    for (index, item) in items.iter().enumerate() {
                        builder = builder.absorb(compile(runtime, item, &context.element(index))?);
                    }
                    Ok(builder.build())
                }
            }
        }
    }
}

/// A mixin inheriting the own mixins of the evaluation `reference` resolves
/// to from `context`.
pub(crate) fn inherit_reference(runtime: &Runtime, reference: &Reference, context: &CompileContext) -> Result<Mixin> {
    let key = context.key();
    let target = resolve(runtime, reference, context.site(&key)).context(|| format!("while compiling `{key}`"))?;
    let inherited = Evaluation::new(runtime, target).own_mixins();
    Ok(Mixin::builder(key).inherit(inherited.iter().cloned()).build())
}

fn compile_mapping(entries: &Arc<IndexMap<String, SourceNode>>, context: &CompileContext) -> Mixin {
    let mut builder = Mixin::builder(context.key());
    for (name, value) in entries.iter() {
        let name: Arc<str> = name.as_str().into();
        let property_name = name.clone();
        let value = value.clone();
        let context = context.clone();
        builder = builder.property(
            name,
            PropertyConstructor::new(move |this| {
                let table = context.bind(this.id());
                let child = context.property(table, &property_name, declared_names(&value));
                compile(this.runtime(), &value, &child).map(|mixin| vec![mixin])
            }),
        );
    }
    builder.build()
}

/// Names a value node declares for its own scope: the keys of a mapping,
/// or of every mapping element of a general list.
pub fn declared_names(node: &SourceNode) -> NameSet {
    let mut names = NameSet::new();
    collect_declared_names(node, &mut names);
    names
}

fn collect_declared_names(node: &SourceNode, names: &mut NameSet) {
    match node {
        SourceNode::Mapping(entries) => names.extend(entries.keys().map(|key| Arc::from(key.as_str()))),
        SourceNode::Sequence(items) if matches!(Reference::classify(items, ""), Ok(None)) => {
            for item in items.iter() {
                collect_declared_names(item, names);
            }
        }
        _ => {}
    }
}
