//! Reference arrays and their resolution.
//!
//! `[name, seg...]` is a lexical reference, `[name, null, seg...]` a
//! qualified-this reference. Anything else in a sequence is a general list.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::arena::EvalId;
use crate::error::{ErrorKind, Result};
use crate::runtime::Runtime;
use crate::source::{Primitive, SourceNode};
use crate::symbol_table::{SymbolTable, find_qualified_this, look_up_skipping_self};

pub type Segments = SmallVec<[Arc<str>; 4]>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Lexical { name: Arc<str>, segments: Segments },
    QualifiedThis { self_name: Arc<str>, segments: Segments },
}

impl Reference {
    pub fn lexical<'a>(path: impl IntoIterator<Item = &'a str>) -> Option<Self> {
        let mut path = path.into_iter().map(Arc::<str>::from);
        let name = path.next()?;
        Some(Reference::Lexical {
            name,
            segments: path.collect(),
        })
    }

    pub fn qualified_this<'a>(self_name: &str, segments: impl IntoIterator<Item = &'a str>) -> Self {
        Reference::QualifiedThis {
            self_name: self_name.into(),
            segments: segments.into_iter().map(Arc::<str>::from).collect(),
        }
    }

    /// Classifies a sequence node. `Ok(None)` means a general list.
    pub fn classify(items: &[SourceNode], key: &str) -> Result<Option<Self>> {
        let Some(SourceNode::Scalar(Primitive::String(first))) = items.first() else {
            return Ok(None);
        };

        if let Some(SourceNode::Scalar(Primitive::Null)) = items.get(1) {
            let mut segments = Segments::new();
            for item in &items[2..] {
                match item {
                    SourceNode::Scalar(Primitive::String(segment)) => segments.push(segment.clone()),
                    other => {
                        return Err(ErrorKind::MalformedReference {
                            key: key.to_string(),
                            message: format!("qualified-this segment {other:?} is not a string"),
                        }
                        .into());
                    }
                }
            }
            return Ok(Some(Reference::QualifiedThis {
                self_name: first.clone(),
                segments,
            }));
        }

        let mut segments = Segments::new();
        for item in &items[1..] {
            match item {
                SourceNode::Scalar(Primitive::String(segment)) => segments.push(segment.clone()),
                _ => return Ok(None),
            }
        }
        Ok(Some(Reference::Lexical {
            name: first.clone(),
            segments,
        }))
    }

    pub fn segments(&self) -> &[Arc<str>] {
        match self {
            Reference::Lexical { segments, .. } | Reference::QualifiedThis { segments, .. } => segments,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let segments = self.segments();
        match self {
            Reference::Lexical { name, .. } => write!(f, "[{name}")?,
            Reference::QualifiedThis { self_name, .. } => write!(f, "[{self_name}, ~")?,
        }
        for segment in segments {
            write!(f, ", {segment}")?;
        }
        write!(f, "]")
    }
}

/// Where a reference is written: the table of the scope declaring the
/// referencing property, that property's name and the mixin key.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceSite<'a> {
    pub declaring: Option<&'a Arc<SymbolTable>>,
    pub self_name: Option<&'a str>,
    pub key: &'a str,
}

pub fn resolve(runtime: &Runtime, reference: &Reference, site: ReferenceSite<'_>) -> Result<EvalId> {
    let unresolved = || -> crate::Error {
        ErrorKind::UnresolvedReference {
            path: reference.to_string(),
            key: site.key.to_string(),
        }
        .into()
    };

    let start = match reference {
        Reference::Lexical { name, .. } => {
            look_up_skipping_self(runtime, site.declaring, site.self_name, name)?.ok_or_else(unresolved)?
        }
        Reference::QualifiedThis { self_name, .. } => find_qualified_this(site.declaring, self_name)
            .map(|table| table.this())
            .ok_or_else(unresolved)?,
    };

    let mut current = start;
    for segment in reference.segments() {
        if !runtime.has_property(current, segment) {
            return Err(ErrorKind::MissingSegment {
                path: reference.to_string(),
                key: site.key.to_string(),
                segment: segment.to_string(),
                scope: runtime.scope_label(current),
            }
            .into());
        }
        current = runtime.property(current, segment)?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceFormat;

    fn items(yaml: &str) -> Vec<SourceNode> {
        match SourceNode::parse(SourceFormat::Yaml, yaml, "test").unwrap() {
            SourceNode::Sequence(items) => items.as_ref().clone(),
            other => panic!("expected a sequence, got {other:?}"),
        }
    }

    #[test]
    fn classify_lexical_reference() {
        let reference = Reference::classify(&items("[a, b, c]"), "k").unwrap().unwrap();
        assert_eq!(reference, Reference::lexical(["a", "b", "c"]).unwrap());
        assert_eq!(reference.to_string(), "[a, b, c]");
    }

    #[test]
    fn classify_qualified_this_reference() {
        let reference = Reference::classify(&items("[Root, ~, A, inner]"), "k").unwrap().unwrap();
        assert_eq!(reference, Reference::qualified_this("Root", ["A", "inner"]));
        assert_eq!(reference.to_string(), "[Root, ~, A, inner]");

        let bare = Reference::classify(&items("[Root, ~]"), "k").unwrap().unwrap();
        assert!(bare.segments().is_empty());
    }

    #[test]
    fn mixed_sequences_are_general_lists() {
        assert_eq!(Reference::classify(&items("[a, 1]"), "k").unwrap(), None);
        assert_eq!(Reference::classify(&items("[[a], {b: 1}]"), "k").unwrap(), None);
        assert_eq!(Reference::classify(&items("[1, a]"), "k").unwrap(), None);
        assert_eq!(Reference::classify(&items("[]"), "k").unwrap(), None);
    }

    #[test]
    fn qualified_this_with_non_string_segment_is_malformed() {
        let error = Reference::classify(&items("[a, ~, 3]"), "file#x").unwrap_err();
        assert!(matches!(error.kind(), ErrorKind::MalformedReference { key, .. } if key == "file#x"));
    }
}
