//! Lexical scope chain.
//!
//! A [`SymbolTable`] is created when the composed evaluation of a scope
//! (its `self`) is handed to one of the scope's property constructors. It
//! records the names the defining source declares for that scope and links
//! to the table of the enclosing definition.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexSet;

use crate::arena::EvalId;
use crate::error::Result;
use crate::runtime::Runtime;

pub type NameSet = IndexSet<Arc<str>>;

pub struct SymbolTable {
    self_name: Option<Arc<str>>,
    this: EvalId,
    own_names: Arc<NameSet>,
    outer: Option<Arc<SymbolTable>>,
}

impl SymbolTable {
    pub fn new(
        self_name: Option<Arc<str>>,
        this: EvalId,
        own_names: Arc<NameSet>,
        outer: Option<Arc<SymbolTable>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            self_name,
            this,
            own_names,
            outer,
        })
    }

    /// Name of the property this scope was declared as; `None` at a root.
    pub fn self_name(&self) -> Option<&str> {
        self.self_name.as_deref()
    }

    /// The composed evaluation this table's definitions were instantiated in.
    pub fn this(&self) -> EvalId {
        self.this
    }

    pub fn outer(&self) -> Option<&Arc<SymbolTable>> {
        self.outer.as_ref()
    }

    pub fn declares(&self, name: &str) -> bool {
        self.own_names.contains(name)
    }

    pub fn own_names(&self) -> &NameSet {
        &self.own_names
    }
}

impl fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolTable")
            .field("self_name", &self.self_name)
            .field("this", &self.this)
            .field("own_names", &self.own_names)
            .field("outer", &self.outer.as_ref().map(|outer| outer.self_name.clone()))
            .finish()
    }
}

/// Upward search for the first table declaring `name`, evaluating the
/// property on that table's `self`.
pub fn look_up(runtime: &Runtime, start: Option<&Arc<SymbolTable>>, name: &str) -> Result<Option<EvalId>> {
    let mut table = start;
    while let Some(current) = table {
        if current.declares(name) {
            return runtime.property(current.this, name).map(Some);
        }
        table = current.outer();
    }
    Ok(None)
}

/// Lexical lookup from a scope declared as `self_name` in `declaring`.
///
/// A name equal to the scope's own name never resolves to the scope
/// itself: the search starts one table further out, binding to the
/// nearest enclosing definition of that name.
pub fn look_up_skipping_self(
    runtime: &Runtime,
    declaring: Option<&Arc<SymbolTable>>,
    self_name: Option<&str>,
    name: &str,
) -> Result<Option<EvalId>> {
    let start = if self_name == Some(name) {
        declaring.and_then(|table| table.outer())
    } else {
        declaring
    };
    look_up(runtime, start, name)
}

/// The nearest table, from `start` outward, whose scope is named `target`.
pub fn find_qualified_this<'a>(start: Option<&'a Arc<SymbolTable>>, target: &str) -> Option<&'a Arc<SymbolTable>> {
    let mut table = start;
    while let Some(current) = table {
        if current.self_name() == Some(target) {
            return Some(current);
        }
        table = current.outer();
    }
    None
}
