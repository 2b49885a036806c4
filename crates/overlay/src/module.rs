//! Host-defined scopes.
//!
//! A [`Module`] is the Rust-side counterpart of a mapping in a source file:
//! a package of named members that compiles to a mixin with the same
//! lexical scoping, so file definitions and module definitions can inherit
//! from and patch each other.
//!
//! ```
//! use overlay::{Module, ResourceDefinition};
//!
//! let arithmetic = Module::new()
//!     .scope("add", |add| {
//!         add.declare("addend1")
//!             .declare("addend2")
//!             .resource("sum", ResourceDefinition::resource(["addend1", "addend2"], |inputs| {
//!                 Ok((inputs.int("addend1")? + inputs.int("addend2")?).into())
//!             }))
//!     });
//! assert!(arithmetic.names().contains("add"));
//! ```

use std::sync::Arc;

use indexmap::IndexMap;

use crate::compiler::{CompileContext, inherit_reference};
use crate::error::Result;
use crate::mixin::{Mixin, PropertyConstructor};
use crate::resolver::Reference;
use crate::resource::{BoundResource, ResourceDefinition};
use crate::runtime::Runtime;
use crate::source::Primitive;
use crate::symbol_table::{NameSet, SymbolTable};

#[derive(Clone, Default)]
pub struct Module {
    inherits: Vec<Reference>,
    members: IndexMap<Arc<str>, Vec<Member>>,
}

#[derive(Clone)]
enum Member {
    Scope(Module),
    Scalar(Primitive),
    Inherit(Reference),
    Resource(Arc<ResourceDefinition>),
    Declared,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the module itself inherit the evaluation `reference` resolves to.
    pub fn extends(mut self, reference: Reference) -> Self {
        self.inherits.push(reference);
        self
    }

    pub fn scope(self, name: &str, build: impl FnOnce(Module) -> Module) -> Self {
        self.member(name, Member::Scope(build(Module::new())))
    }

    pub fn scalar(self, name: &str, value: impl Into<Primitive>) -> Self {
        self.member(name, Member::Scalar(value.into()))
    }

    pub fn inherit(self, name: &str, reference: Reference) -> Self {
        self.member(name, Member::Inherit(reference))
    }

    pub fn resource(self, name: &str, definition: ResourceDefinition) -> Self {
        self.member(name, Member::Resource(Arc::new(definition)))
    }

    /// Declares `name` without defining it, making it visible to lexical
    /// lookup. A value is expected from elsewhere, e.g. keyword arguments.
    pub fn declare(self, name: &str) -> Self {
        self.member(name, Member::Declared)
    }

    pub fn names(&self) -> NameSet {
        self.members.keys().cloned().collect()
    }

    fn member(mut self, name: &str, member: Member) -> Self {
        self.members.entry(Arc::from(name)).or_default().push(member);
        self
    }
}

pub(crate) fn compile_module(runtime: &Runtime, module: &Module, context: &CompileContext) -> Result<Mixin> {
    let mut builder = Mixin::builder(context.key());
    for reference in &module.inherits {
        builder = builder.absorb(inherit_reference(runtime, reference, context)?);
    }

    for (name, members) in &module.members {
        if members.iter().all(|member| matches!(member, Member::Declared)) {
            builder = builder.property(name.clone(), PropertyConstructor::empty());
            continue;
        }
        let property_name = name.clone();
        let members = members.clone();
        let context = context.clone();
        builder = builder.property(
            name.clone(),
            PropertyConstructor::new(move |this| {
                let table = context.bind(this.id());
                let mut names = NameSet::new();
                for member in &members {
                    if let Member::Scope(module) = member {
                        names.extend(module.names());
                    }
                }
                let child = context.property(table.clone(), &property_name, names);
                members
                    .iter()
                    .enumerate()
                    .map(|(index, member)| {
                        let context = if members.len() > 1 {
                            child.element(index)
                        } else {
                            child.clone()
                        };
                        compile_member(this.runtime(), member, &context, &table, &property_name)
                    })
                    .collect()
            }),
        );
    }
    Ok(builder.build())
}

fn compile_member(
    runtime: &Runtime,
    member: &Member,
    context: &CompileContext,
    table: &Arc<SymbolTable>,
    name: &Arc<str>,
) -> Result<Mixin> {
    match member {
        Member::Scope(module) => compile_module(runtime, module, context),
        Member::Scalar(value) => Ok(Mixin::scalar(context.key(), value.clone())),
        Member::Inherit(reference) => inherit_reference(runtime, reference, context),
        Member::Resource(definition) => {
            let key = context.key();
            let resource = BoundResource::new(definition.clone(), table.clone(), name.clone(), key.clone());
            Ok(Mixin::builder(key).resource(resource).build())
        }
        Member::Declared => Ok(Mixin::builder(context.key()).build()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::evaluation::{Callable, HasProperties};
    use crate::resource::{Patch, Value};
    use crate::runtime::Mount;

    fn adder() -> ResourceDefinition {
        ResourceDefinition::resource(["addend1", "addend2"], |inputs| {
            Ok((inputs.int("addend1")? + inputs.int("addend2")?).into())
        })
    }

    #[test]
    fn resource_inputs_resolve_lexically() {
        let runtime = Runtime::new();
        let module = Module::new().scope("calc", |calc| {
            calc.scalar("addend1", 2).scalar("addend2", 3).resource("sum", adder())
        });
        let root = runtime
            .mount(&[Mount::Module {
                name: "calc".into(),
                module,
            }])
            .unwrap();

        let sum = root.get_path(["calc", "sum"]).unwrap();
        assert_eq!(sum.value().unwrap(), Value::from(5));
    }

    #[test]
    fn resource_input_named_like_itself_binds_outward() {
        let runtime = Runtime::new();
        let module = Module::new().scalar("total", 40).scope("inner", |inner| {
            inner.resource(
                "total",
                ResourceDefinition::resource(["total"], |inputs| Ok((inputs.int("total")? + 2).into())),
            )
        });
        let root = runtime
            .mount(&[Mount::Module {
                name: "m".into(),
                module,
            }])
            .unwrap();

        assert_eq!(root.get_path(["inner", "total"]).unwrap().value().unwrap(), Value::from(42));
    }

    #[test]
    fn declared_names_take_keyword_arguments() {
        let runtime = Runtime::new();
        let module = Module::new().scope("add", |add| {
            add.declare("addend1").declare("addend2").resource("sum", adder())
        });
        let root = runtime
            .mount(&[Mount::Module {
                name: "m".into(),
                module,
            }])
            .unwrap();

        let add = root.get("add").unwrap();
        let instance = add.instantiate(
            [("addend1".to_string(), 4.into()), ("addend2".to_string(), 5.into())]
                .into_iter()
                .collect(),
        );
        assert_eq!(instance.get("sum").unwrap().value().unwrap(), Value::from(9));

        let unset = add.get("sum").unwrap().value().unwrap_err();
        assert!(matches!(unset.kind(), ErrorKind::Adapter { .. }));
    }

    #[test]
    fn patch_transforms_resource_value() {
        let runtime = Runtime::new();
        let base = Module::new().scope("server", |server| {
            server.resource(
                "port",
                ResourceDefinition::resource([], |_| Ok(8080.into())),
            )
        });
        let overlay = Module::new().scope("server", |server| {
            server.scalar("offset", 1).resource(
                "port",
                ResourceDefinition::patch(["offset"], |inputs| {
                    let offset = inputs.int("offset")?;
                    Ok(Patch::transform(move |value| match value.as_int() {
                        Some(port) => Ok((port + offset).into()),
                        None => Ok(value),
                    }))
                }),
            )
        });
        let root = runtime
            .mount(&[
                Mount::Module {
                    name: "base".into(),
                    module: base,
                },
                Mount::Module {
                    name: "overlay".into(),
                    module: overlay,
                },
            ])
            .unwrap();

        assert_eq!(root.get_path(["server", "port"]).unwrap().value().unwrap(), Value::from(8081));
    }

    #[test]
    fn two_patches_without_base_are_ambiguous() {
        let runtime = Runtime::new();
        let patch = || ResourceDefinition::patch([], |_| Ok(Patch::transform(Ok)));
        let module = Module::new().resource("x", patch()).resource("x", patch());
        let root = runtime
            .mount(&[Mount::Module {
                name: "m".into(),
                module,
            }])
            .unwrap();

        let error = root.get("x").unwrap().value().unwrap_err();
        assert!(matches!(
            error.kind(),
            ErrorKind::AmbiguousMerge { bases: 0, patches: 2, .. }
        ));
    }

    #[test]
    fn two_bases_are_ambiguous() {
        let runtime = Runtime::new();
        let module = Module::new()
            .resource("x", ResourceDefinition::resource([], |_| Ok(1.into())))
            .scalar("x", 2);
        let root = runtime
            .mount(&[Mount::Module {
                name: "m".into(),
                module,
            }])
            .unwrap();

        let error = root.get("x").unwrap().value().unwrap_err();
        assert!(matches!(
            error.kind(),
            ErrorKind::AmbiguousMerge { bases: 2, patches: 0, .. }
        ));
    }

    #[test]
    fn aggregator_reduces_contributions() {
        let runtime = Runtime::new();
        let contribute = |value: &'static str| {
            ResourceDefinition::patch([], move |_| Ok(Patch::Contribute(value.into())))
        };
        let module = Module::new()
            .resource(
                "plugins",
                ResourceDefinition::aggregator([], |_, contributions| Ok(contributions.into_iter().collect())),
            )
            .resource("plugins", contribute("auth"))
            .resource("plugins", contribute("metrics"));
        let root = runtime
            .mount(&[Mount::Module {
                name: "m".into(),
                module,
            }])
            .unwrap();

        let value = root.get("plugins").unwrap().value().unwrap();
        assert_eq!(value, [Value::from("auth"), Value::from("metrics")].into_iter().collect::<Value>());
    }

    #[test]
    fn contribution_to_resource_base_is_incompatible() {
        let runtime = Runtime::new();
        let module = Module::new()
            .scalar("x", 1)
            .resource("x", ResourceDefinition::patch([], |_| Ok(Patch::Contribute(2.into()))));
        let root = runtime
            .mount(&[Mount::Module {
                name: "m".into(),
                module,
            }])
            .unwrap();

        let error = root.get("x").unwrap().value().unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::IncompatiblePatch { base: "resource", .. }));
    }

    #[test]
    fn module_extends_reference() {
        let runtime = Runtime::new();
        let module = Module::new()
            .scope("Base", |base| base.scalar("x", 1))
            .scope("Derived", |derived| {
                derived
                    .extends(Reference::lexical(["Base"]).unwrap())
                    .scalar("y", 2)
            });
        let root = runtime
            .mount(&[Mount::Module {
                name: "m".into(),
                module,
            }])
            .unwrap();

        let derived = root.get("Derived").unwrap();
        assert_eq!(derived.get("x").unwrap().value().unwrap(), Value::from(1));
        assert_eq!(derived.get("y").unwrap().value().unwrap(), Value::from(2));
    }
}
