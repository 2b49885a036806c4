//! Directory trees as scopes.
//!
//! Every recognised source file `name.<suffix>` and every subdirectory
//! `name/` of a directory contributes to the property `name`. A file and a
//! directory sharing a name are merged like any other pair of definitions.
//! Files are parsed on first access of their property, through the
//! runtime's [`SourceCache`](crate::SourceCache).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;
use walkdir::WalkDir;

use crate::compiler::{CompileContext, compile, declared_names};
use crate::config::EngineConfig;
use crate::error::{ErrorKind, Result};
use crate::mixin::{Mixin, PropertyConstructor};
use crate::runtime::Runtime;
use crate::source::{SourceFormat, SourceNode, match_suffix};
use crate::symbol_table::NameSet;

#[derive(Debug, Clone)]
enum Entry {
    File { path: PathBuf, format: SourceFormat },
    Directory(PathBuf),
}

/// The entries of one directory, grouped by property name.
#[derive(Debug, Clone)]
pub(crate) struct DirectoryListing {
    path: PathBuf,
    entries: IndexMap<Arc<str>, Vec<Entry>>,
}

impl DirectoryListing {
    pub(crate) fn read(path: &Path, config: &EngineConfig) -> Result<Self> {
        let mut entries: IndexMap<Arc<str>, Vec<Entry>> = IndexMap::new();
        let walker = WalkDir::new(path)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name();
        for dir_entry in walker {
            let dir_entry = dir_entry.map_err(|error| ErrorKind::Source {
                path: path.to_path_buf(),
                message: error.to_string(),
            })?;
            let Some(file_name) = dir_entry.file_name().to_str() else {
                log::warn!("skipping non UTF-8 entry {}", dir_entry.path().display());
                continue;
            };
            if file_name.starts_with('.') && !config.include_hidden {
                continue;
            }

            if dir_entry.file_type().is_dir() {
                entries
                    .entry(Arc::from(file_name))
                    .or_default()
                    .push(Entry::Directory(dir_entry.path().to_path_buf()));
            } else if let Some((stem, format)) = match_suffix(file_name, &config.formats) {
                entries.entry(Arc::from(stem)).or_default().push(Entry::File {
                    path: dir_entry.path().to_path_buf(),
                    format,
                });
            } else {
                log::trace!("ignoring {}", dir_entry.path().display());
            }
        }
        Ok(Self {
            path: path.to_path_buf(),
            entries,
        })
    }

    pub(crate) fn names(&self) -> NameSet {
        self.entries.keys().cloned().collect()
    }

    pub(crate) fn compile(&self, context: &CompileContext) -> Result<Mixin> {
        log::debug!("compiling directory {}", self.path.display());
        let mut builder = Mixin::builder(context.key());
        for (name, entries) in &self.entries {
            let property_name = name.clone();
            let entries = entries.clone();
            let context = context.clone();
            builder = builder.property(
                name.clone(),
                PropertyConstructor::new(move |this| {
                    let runtime = this.runtime();
                    let loaded = entries
                        .iter()
                        .map(|entry| Loaded::load(runtime, entry))
                        .collect::<Result<Vec<_>>>()?;
                    let mut names = NameSet::new();
                    for source in &loaded {
                        names.extend(source.names());
                    }

                    let table = context.bind(this.id());
                    let child = context.property(table, &property_name, names);
                    loaded.iter().map(|source| source.compile(runtime, &child)).collect()
                }),
            );
        }
        Ok(builder.build())
    }
}

enum Loaded {
    File { path: PathBuf, node: SourceNode },
    Directory(DirectoryListing),
}

impl Loaded {
    fn load(runtime: &Runtime, entry: &Entry) -> Result<Self> {
        match entry {
            Entry::File { path, format } => Ok(Loaded::File {
                path: path.clone(),
                node: runtime.sources().load(path, *format)?,
            }),
            Entry::Directory(path) => Ok(Loaded::Directory(DirectoryListing::read(path, runtime.config())?)),
        }
    }

    fn names(&self) -> NameSet {
        match self {
            Loaded::File { node, .. } => declared_names(node),
            Loaded::Directory(listing) => listing.names(),
        }
    }

    fn compile(&self, runtime: &Runtime, context: &CompileContext) -> Result<Mixin> {
        match self {
            Loaded::File { path, node } => compile(runtime, node, &context.with_origin(path.display().to_string())),
            Loaded::Directory(listing) => listing.compile(&context.with_origin(listing.path.display().to_string())),
        }
    }
}
