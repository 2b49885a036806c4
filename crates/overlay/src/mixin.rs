//! Mixins: the compiled, immutable unit of definition.
//!
//! A [`Mixin`] never evaluates anything by itself. It lists the mixins it
//! inherits, the scalars it contributes and one [`PropertyConstructor`] per
//! property name it declares. Constructors run only once the composed
//! evaluation of the enclosing scope exists, see [`crate::evaluation`].

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;
use ulid::Ulid;

use crate::error::Result;
use crate::evaluation::Evaluation;
use crate::resource::BoundResource;
use crate::source::Primitive;

/// Structural identity of a mixin: origin plus position, e.g.
/// `lib/main.oyaml#ten/addend1[1]`. Deduplication is by key.
pub type MixinKey = Arc<str>;

/// Instance identity, distinct for every constructed mixin.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct MixinId(Ulid);

impl MixinId {
    fn new() -> Self {
        MixinId(Ulid::new())
    }
}

pub type ConstructorFn = dyn Fn(Evaluation<'_>) -> Result<Vec<Mixin>> + Send + Sync;

/// Produces the mixins of one property given the composed evaluation of
/// the scope that owns the property.
///
/// Constructors registered under the same name by different mixins merge
/// into a single constructor whose output is the concatenation of every
/// part's output, in order.
#[derive(Clone)]
pub struct PropertyConstructor {
    parts: SmallVec<[Arc<ConstructorFn>; 1]>,
}

impl PropertyConstructor {
    pub fn new<F>(constructor: F) -> Self
    where
        F: Fn(Evaluation<'_>) -> Result<Vec<Mixin>> + Send + Sync + 'static,
    {
        let mut parts = SmallVec::new();
        parts.push(Arc::new(constructor) as Arc<ConstructorFn>);
        Self { parts }
    }

    /// A constructor contributing nothing, used for declared-only names.
    pub fn empty() -> Self {
        Self {
            parts: SmallVec::new(),
        }
    }

    pub fn merge(constructors: impl IntoIterator<Item = PropertyConstructor>) -> Self {
        let mut parts = SmallVec::new();
        for constructor in constructors {
            parts.extend(constructor.parts);
        }
        Self { parts }
    }

    pub fn construct(&self, this: Evaluation<'_>) -> Result<Vec<Mixin>> {
        let mut mixins = Vec::new();
        for part in &self.parts {
            mixins.extend(part(this)?);
        }
        Ok(mixins)
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }
}

impl fmt::Debug for PropertyConstructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PropertyConstructor({} parts)", self.parts.len())
    }
}

#[derive(Clone)]
struct MixinData {
    id: MixinId,
    key: MixinKey,
    inheritances: Vec<Mixin>,
    primitives: Vec<Primitive>,
    own_properties: IndexMap<Arc<str>, PropertyConstructor>,
    resources: Vec<BoundResource>,
}

#[derive(Clone)]
pub struct Mixin(Arc<MixinData>);

impl Mixin {
    pub fn builder(key: impl Into<MixinKey>) -> MixinBuilder {
        MixinBuilder {
            key: key.into(),
            inheritances: Vec::new(),
            primitives: Vec::new(),
            own_properties: IndexMap::new(),
            resources: Vec::new(),
        }
    }

    /// A mixin contributing a single scalar.
    pub fn scalar(key: impl Into<MixinKey>, value: impl Into<Primitive>) -> Self {
        Self::builder(key).primitive(value).build()
    }

    pub fn id(&self) -> MixinId {
        self.0.id
    }

    pub fn key(&self) -> &MixinKey {
        &self.0.key
    }

    pub fn inheritances(&self) -> &[Mixin] {
        &self.0.inheritances
    }

    pub fn primitives(&self) -> &[Primitive] {
        &self.0.primitives
    }

    pub fn own_properties(&self) -> &IndexMap<Arc<str>, PropertyConstructor> {
        &self.0.own_properties
    }

    pub fn resources(&self) -> &[BoundResource] {
        &self.0.resources
    }
}

impl fmt::Debug for Mixin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mixin")
            .field("key", &self.0.key)
            .field("inheritances", &self.0.inheritances.len())
            .field("primitives", &self.0.primitives)
            .field("own_properties", &self.0.own_properties.keys().collect::<Vec<_>>())
            .field("resources", &self.0.resources.len())
            .finish()
    }
}

pub struct MixinBuilder {
    key: MixinKey,
    inheritances: Vec<Mixin>,
    primitives: Vec<Primitive>,
    own_properties: IndexMap<Arc<str>, PropertyConstructor>,
    resources: Vec<BoundResource>,
}

impl MixinBuilder {
    pub fn inherit(mut self, mixins: impl IntoIterator<Item = Mixin>) -> Self {
        self.inheritances.extend(mixins);
        self
    }

    pub fn primitive(mut self, value: impl Into<Primitive>) -> Self {
        self.primitives.push(value.into());
        self
    }

    /// Registers a property; a second registration under the same name
    /// merges with the first.
    pub fn property(mut self, name: impl Into<Arc<str>>, constructor: PropertyConstructor) -> Self {
        self.add_property(name.into(), constructor);
        self
    }

    pub fn resource(mut self, resource: BoundResource) -> Self {
        self.resources.push(resource);
        self
    }

    /// Unions another mixin's contents into this one. The other mixin's
    /// key is dropped.
    pub fn absorb(mut self, other: Mixin) -> Self {
        let data = Arc::unwrap_or_clone(other.0);
        self.inheritances.extend(data.inheritances);
        self.primitives.extend(data.primitives);
        for (name, constructor) in data.own_properties {
            self.add_property(name, constructor);
        }
        self.resources.extend(data.resources);
        self
    }

    pub fn build(self) -> Mixin {
        Mixin(Arc::new(MixinData {
            id: MixinId::new(),
            key: self.key,
            inheritances: self.inheritances,
            primitives: self.primitives,
            own_properties: self.own_properties,
            resources: self.resources,
        }))
    }

    fn add_property(&mut self, name: Arc<str>, constructor: PropertyConstructor) {
        match self.own_properties.get_mut(&name) {
            Some(existing) => {
                let merged = PropertyConstructor::merge([existing.clone(), constructor]);
                *existing = merged;
            }
            None => {
                self.own_properties.insert(name, constructor);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absorb_unions_contents_and_merges_properties() {
        let first = Mixin::builder("a#x[0]")
            .primitive(1)
            .property("shared", PropertyConstructor::new(|_| Ok(Vec::new())))
            .build();
        let second = Mixin::builder("a#x[1]")
            .inherit([first.clone()])
            .property("shared", PropertyConstructor::new(|_| Ok(Vec::new())))
            .property("own", PropertyConstructor::empty())
            .build();

        let merged = Mixin::builder("a#x").absorb(first).absorb(second).build();

        assert_eq!(merged.key().as_ref(), "a#x");
        assert_eq!(merged.primitives(), [Primitive::Int(1)]);
        assert_eq!(merged.inheritances().len(), 1);
        assert_eq!(merged.own_properties()["shared"].len(), 2);
        assert!(merged.own_properties()["own"].is_empty());
    }

    #[test]
    fn every_build_gets_a_fresh_instance_id() {
        let first = Mixin::scalar("k", 1);
        let second = Mixin::scalar("k", 1);
        assert_eq!(first.key(), second.key());
        assert_ne!(first.id(), second.id());
    }
}
