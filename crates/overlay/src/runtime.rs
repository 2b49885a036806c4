//! The runtime: owner of the evaluation arena and entry point for mounting
//! root containers.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use ulid::Ulid;

use crate::arena::{Arena, EvalId};
use crate::cache::SourceCache;
use crate::compiler::{CompileContext, compile, declared_names};
use crate::config::EngineConfig;
use crate::directory::DirectoryListing;
use crate::error::{ErrorContext, ErrorKind, Result};
use crate::evaluation::{Evaluation, EvaluationNode, WaitGraph};
use crate::mixin::{Mixin, MixinId, PropertyConstructor};
use crate::module::{Module, compile_module};
use crate::source::{Primitive, SourceNode, match_suffix};
use crate::symbol_table::NameSet;

/// Keyword arguments, applied as scalar bases under their names.
pub type Arguments = IndexMap<String, Primitive>;

/// A root container.
#[derive(Clone)]
pub enum Mount {
    /// A directory tree: every recognised file and subdirectory becomes a
    /// property named after its stem.
    Directory(PathBuf),
    /// A single source file whose top-level keys become root properties.
    File(PathBuf),
    /// An already parsed source tree, labelled `origin` in keys and errors.
    Source { origin: String, node: SourceNode },
    Module { name: String, module: Module },
}

impl Mount {
    fn origin(&self) -> String {
        match self {
            Mount::Directory(path) | Mount::File(path) => path.display().to_string(),
            Mount::Source { origin, .. } => origin.clone(),
            Mount::Module { name, .. } => format!("module:{name}"),
        }
    }
}

/// A mount with its root-level names known, ready to compile.
enum Prepared<'a> {
    Directory(DirectoryListing),
    Node(SourceNode),
    Module(&'a Module),
}

/// Path plus the sorted, deduplicated ids of the own mixins.
#[derive(Clone, PartialEq, Eq, Hash)]
struct CompositionKey {
    path: Arc<str>,
    mixins: Vec<MixinId>,
}

impl CompositionKey {
    fn new(path: Arc<str>, own_mixins: &[Mixin]) -> Self {
        let mut mixins: Vec<MixinId> = own_mixins.iter().map(Mixin::id).collect();
        mixins.sort_unstable();
        mixins.dedup();
        Self { path, mixins }
    }
}

/// Owner of every evaluation composed from its mounts.
///
/// Evaluations live as long as the runtime: nothing composed by [`mount`],
/// [`evaluate`] or [`instantiate`] is freed before the runtime is dropped.
/// Long-lived hosts should create a fresh runtime per run rather than
/// mounting repeatedly into one.
///
/// [`mount`]: Runtime::mount
/// [`evaluate`]: Runtime::evaluate
/// [`instantiate`]: crate::Callable::instantiate
pub struct Runtime {
    arena: Arena<EvaluationNode>,
    /// Evaluation per distinct own-mixins set
    compositions: Mutex<FxHashMap<CompositionKey, EvalId>>,
    waits: WaitGraph,
    sources: SourceCache,
    config: EngineConfig,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            arena: Arena::new(),
            compositions: Mutex::new(FxHashMap::default()),
            waits: WaitGraph::default(),
            sources: SourceCache::new(),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sources(&self) -> &SourceCache {
        &self.sources
    }

    /// Number of evaluations composed so far.
    pub fn evaluation_count(&self) -> usize {
        self.arena.len()
    }

    /// Composes `own_mixins` into a root evaluation. The same set of mixins,
    /// in any order, yields the same evaluation; the first composition
    /// fixes the linearization order.
    pub fn evaluate(&self, own_mixins: Vec<Mixin>) -> Evaluation<'_> {
        Evaluation::new(self, self.evaluate_at("".into(), own_mixins))
    }

    /// The evaluation behind an id, if it was composed by this runtime.
    pub fn evaluation(&self, id: EvalId) -> Option<Evaluation<'_>> {
        self.arena.is_valid(id).then(|| Evaluation::new(self, id))
    }

    pub fn mount(&self, mounts: &[Mount]) -> Result<Evaluation<'_>> {
        self.mount_with_arguments(mounts, Arguments::new())
    }

    /// Compiles every mount under one root scope whose names are the union
    /// of all mounts' names and the argument names, and composes the root.
    pub fn mount_with_arguments(&self, mounts: &[Mount], arguments: Arguments) -> Result<Evaluation<'_>> {
        let mut names = NameSet::new();
        let mut prepared = Vec::with_capacity(mounts.len());
        for mount in mounts {
            let origin = mount.origin();
            let (mount_names, mount) = self.prepare(mount).context(|| format!("while mounting `{origin}`"))?;
            names.extend(mount_names);
            prepared.push((origin, mount));
        }
        names.extend(arguments.keys().map(|name| Arc::from(name.as_str())));
        let names = Arc::new(names);

        let mut own_mixins = Vec::with_capacity(prepared.len() + 1);
        for (origin, mount) in prepared {
            log::debug!("compiling root `{origin}`");
            let context = CompileContext::root(origin.as_str(), names.clone());
            let mixin = match mount {
                Prepared::Directory(listing) => listing.compile(&context),
                Prepared::Node(node) => compile(self, &node, &context),
                Prepared::Module(module) => compile_module(self, module, &context),
            }
            .context(|| format!("while compiling `{}`", context.key()))?;
            own_mixins.push(mixin);
        }
        if !arguments.is_empty() {
            own_mixins.push(arguments_mixin(arguments));
        }
        Ok(self.evaluate(own_mixins))
    }

    fn prepare<'a>(&self, mount: &'a Mount) -> Result<(NameSet, Prepared<'a>)> {
        match mount {
            Mount::Directory(path) => {
                if !path.is_dir() {
                    return Err(ErrorKind::Source {
                        path: path.clone(),
                        message: "not a directory".to_string(),
                    }
                    .into());
                }
                let listing = DirectoryListing::read(path, &self.config)?;
                Ok((listing.names(), Prepared::Directory(listing)))
            }
            Mount::File(path) => {
                let file_name = path.file_name().and_then(|name| name.to_str()).unwrap_or_default();
                let Some((_, format)) = match_suffix(file_name, &self.config.formats) else {
                    return Err(ErrorKind::UnsupportedSource {
                        origin: path.display().to_string(),
                        message: "unrecognised file suffix".to_string(),
                    }
                    .into());
                };
                let node = self.sources.load(path, format)?;
                Ok((declared_names(&node), Prepared::Node(node)))
            }
            Mount::Source { node, .. } => Ok((declared_names(node), Prepared::Node(node.clone()))),
            Mount::Module { module, .. } => Ok((module.names(), Prepared::Module(module))),
        }
    }

    pub(crate) fn evaluate_at(&self, path: Arc<str>, own_mixins: Vec<Mixin>) -> EvalId {
        let key = CompositionKey::new(path.clone(), &own_mixins);
        let mut compositions = self.compositions.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(&id) = compositions.get(&key) {
            return id;
        }
        let id = self.arena.alloc(EvaluationNode::compose(path, own_mixins));
        compositions.insert(key, id);
        id
    }

    pub(crate) fn waits(&self) -> &WaitGraph {
        &self.waits
    }

    pub(crate) fn node(&self, id: EvalId) -> Arc<EvaluationNode> {
        match self.arena.get(id) {
            Some(node) => node,
            None => unreachable!("evaluation {id:?} belongs to another runtime"),
        }
    }
}

/// A mixin contributing each argument as a scalar property.
pub(crate) fn arguments_mixin(arguments: Arguments) -> Mixin {
    let origin = format!("arguments:{}", Ulid::new());
    let mut builder = Mixin::builder(format!("{origin}#"));
    for (name, value) in arguments {
        let key: Arc<str> = format!("{origin}#{name}").into();
        builder = builder.property(
            name.as_str(),
            PropertyConstructor::new(move |_| Ok(vec![Mixin::scalar(key.clone(), value.clone())])),
        );
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::Callable;
    use crate::resource::Value;
    use crate::source::SourceFormat;

    fn source(origin: &str, yaml: &str) -> Mount {
        Mount::Source {
            origin: origin.into(),
            node: SourceNode::parse(SourceFormat::Yaml, yaml, origin).unwrap(),
        }
    }

    #[test]
    fn same_own_mixins_compose_once() {
        let runtime = Runtime::new();
        let mixin = Mixin::scalar("test#", 1);
        let first = runtime.evaluate(vec![mixin.clone()]);
        let second = runtime.evaluate(vec![mixin]);
        assert_eq!(first, second);
        assert_eq!(runtime.evaluation_count(), 1);
    }

    #[test]
    fn own_mixins_compose_as_a_set() {
        let runtime = Runtime::new();
        let a = Mixin::scalar("a#", 1);
        let b = Mixin::builder("b#").build();
        let forward = runtime.evaluate(vec![a.clone(), b.clone()]);
        let backward = runtime.evaluate(vec![b.clone(), a.clone()]);
        let repeated = runtime.evaluate(vec![a.clone(), b, a]);
        assert_eq!(forward, backward);
        assert_eq!(forward, repeated);
        assert_eq!(runtime.evaluation_count(), 1);
    }

    #[test]
    fn instances_stay_until_the_runtime_is_dropped() {
        let runtime = Runtime::new();
        let root = runtime.evaluate(Vec::new());
        let first = root.instantiate(Arguments::new());
        let second = root.instantiate(Arguments::new());
        assert_ne!(first, second);
        assert_eq!(runtime.evaluation_count(), 3);
        assert!(runtime.evaluation(first.id()).is_some());
    }

    #[test]
    fn union_mount_sees_names_across_roots() {
        let runtime = Runtime::new();
        let root = runtime
            .mount(&[source("a.oyaml", "port: 8080\n"), source("b.oyaml", "server:\n  port: [port]\n")])
            .unwrap();
        assert_eq!(root.get_path(["server", "port"]).unwrap().value().unwrap(), Value::from(8080));
    }

    #[test]
    fn arguments_are_root_scalars() {
        let runtime = Runtime::new();
        let mut arguments = Arguments::new();
        arguments.insert("port".into(), 9090.into());
        let root = runtime
            .mount_with_arguments(&[source("a.oyaml", "server:\n  port: [port]\n")], arguments)
            .unwrap();
        assert_eq!(root.get_path(["server", "port"]).unwrap().value().unwrap(), Value::from(9090));
    }

    #[test]
    fn foreign_ids_are_rejected() {
        let first = Runtime::new();
        let second = Runtime::new();
        let root = first.evaluate(vec![Mixin::builder("test#").build()]);
        assert!(first.evaluation(root.id()).is_some());
        assert!(second.evaluation(root.id()).is_none());
    }

    #[test]
    fn missing_directory_is_a_source_error() {
        let runtime = Runtime::new();
        let error = runtime
            .mount(&[Mount::Directory("/definitely/not/here".into())])
            .unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::Source { .. }));
    }

    #[test]
    fn unrecognised_file_suffix_is_unsupported() {
        let runtime = Runtime::new();
        let error = runtime.mount(&[Mount::File("settings.ini".into())]).unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::UnsupportedSource { .. }));
    }
}
