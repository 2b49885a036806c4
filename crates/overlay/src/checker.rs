//! Totality checking.
//!
//! Normal access only validates what it touches. The checker walks an
//! evaluation eagerly and reports the first scope that is both a value and
//! a scope, the first leaf whose definitions do not elect exactly one base,
//! and any reference that fails to resolve on the way. Resource adapters
//! are not invoked.

use std::sync::Arc;

use rustc_hash::FxHashSet;

use crate::arena::EvalId;
use crate::config::CheckConfig;
use crate::error::{ErrorContext, ErrorKind, Result};
use crate::evaluation::{Evaluation, HasPrimitives, HasProperties};
use crate::resource::elect;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckReport {
    /// Scopes visited
    pub scopes: usize,
    /// Leaves whose merge election succeeded
    pub resources: usize,
    /// Scopes not descended into because of the depth bound
    pub truncated: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TotalityChecker {
    max_depth: Option<usize>,
}

impl TotalityChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &CheckConfig) -> Self {
        Self {
            max_depth: config.max_depth,
        }
    }

    /// Stops descending below `depth` levels of properties. Structures that
    /// unfold recursively, one level per access, need a bound to terminate.
    /// Leaves at the bound are still checked; scopes at the bound count as
    /// truncated and their properties are not forced.
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn check(&self, root: Evaluation<'_>) -> Result<CheckReport> {
        let mut report = CheckReport::default();
        let mut visited: FxHashSet<EvalId> = FxHashSet::default();
        let mut stack = vec![(root, 0usize)];

        while let Some((evaluation, depth)) = stack.pop() {
            if !visited.insert(evaluation.id()) {
                continue;
            }
            let names = evaluation.property_names();

            if evaluation.is_leaf() {
                if !names.is_empty() {
                    return Err(mixed(evaluation, &names));
                }
                elect(&label(evaluation), &evaluation.all_primitives(), &evaluation.resources())?;
                report.resources += 1;
                continue;
            }

            report.scopes += 1;
            if names.is_empty() {
                continue;
            }
            if self.max_depth.is_some_and(|max| depth >= max) {
                report.truncated += 1;
                continue;
            }
            log::trace!("checking `{}`", label(evaluation));
            for name in names.iter().rev() {
                let child = evaluation
                    .get(name)
                    .context(|| format!("while checking `{}`", label(evaluation)))?;
                stack.push((child, depth + 1));
            }
        }

        log::debug!(
            "checked {} scopes and {} resources ({} truncated)",
            report.scopes,
            report.resources,
            report.truncated
        );
        Ok(report)
    }
}

fn label(evaluation: Evaluation<'_>) -> String {
    evaluation.runtime().scope_label(evaluation.id())
}

fn mixed(evaluation: Evaluation<'_>, names: &[Arc<str>]) -> crate::Error {
    ErrorKind::MixedPrimitiveProperty {
        scope: label(evaluation),
        properties: names.iter().map(|name| name.as_ref()).collect::<Vec<_>>().join(", "),
    }
    .into()
}
