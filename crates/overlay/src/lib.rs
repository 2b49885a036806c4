//! Overlay: lazy, lexically scoped mixin composition.
//!
//! Definitions come from YAML, JSON and TOML files, directory trees and
//! host-side [`Module`]s. Each compiles to a [`Mixin`]; a [`Runtime`]
//! composes mixins into [`Evaluation`]s whose properties are computed on
//! first access, exactly once.
//!
//! ```
//! use overlay::{Mount, Runtime, SourceFormat, SourceNode, Value};
//!
//! let node = SourceNode::parse(
//!     SourceFormat::Yaml,
//!     "defaults:\n  port: 8080\nserver:\n  - [defaults]\n  - host: localhost\n",
//!     "app.oyaml",
//! )?;
//! let runtime = Runtime::new();
//! let root = runtime.mount(&[Mount::Source { origin: "app.oyaml".into(), node }])?;
//! assert_eq!(root.get_path(["server", "port"])?.value()?, Value::from(8080));
//! # Ok::<(), overlay::Error>(())
//! ```

mod arena;
mod cache;
mod checker;
mod compiler;
mod config;
mod directory;
mod error;
mod evaluation;
mod mixin;
mod module;
mod render;
mod resolver;
mod resource;
mod runtime;
mod source;
mod symbol_table;

pub use arena::EvalId;
pub use cache::{CacheStats, SourceCache};
pub use checker::{CheckReport, TotalityChecker};
pub use compiler::{CompileContext, compile, declared_names};
pub use config::{CONFIG_FILE_NAME, CheckConfig, EngineConfig};
pub use error::{Error, ErrorContext, ErrorKind, Result};
pub use evaluation::{Callable, Evaluation, HasPrimitives, HasProperties};
pub use mixin::{Mixin, MixinBuilder, MixinId, MixinKey, PropertyConstructor};
pub use module::Module;
pub use resolver::{Reference, Segments};
pub use resource::{BoundResource, Inputs, Patch, ResourceDefinition, Role, Value};
pub use runtime::{Arguments, Mount, Runtime};
pub use source::{FormatSuffix, Primitive, SourceFormat, SourceNode, default_suffixes, match_suffix};
pub use symbol_table::{NameSet, SymbolTable};
