//! Generic source trees.
//!
//! Every surface format (YAML, JSON, TOML) is lowered into a [`SourceNode`]
//! before compilation, so the compiler only ever sees three node shapes:
//! mappings, sequences and scalars. Aggregates are behind `Arc`, which makes
//! a `SourceNode` cheap to clone into the property constructors that capture
//! it.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, Result};

/// A scalar leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Arc<str>),
}

impl Primitive {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Primitive::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Primitive::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Primitive::Null => serde_json::Value::Null,
            Primitive::Bool(value) => serde_json::Value::Bool(*value),
            Primitive::Int(value) => serde_json::Value::from(*value),
            Primitive::Float(value) => serde_json::Number::from_f64(*value)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Primitive::String(value) => serde_json::Value::String(value.to_string()),
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primitive::Null => write!(f, "null"),
            Primitive::Bool(value) => write!(f, "{value}"),
            Primitive::Int(value) => write!(f, "{value}"),
            Primitive::Float(value) => write!(f, "{value}"),
            Primitive::String(value) => write!(f, "{value:?}"),
        }
    }
}

impl From<i64> for Primitive {
    fn from(value: i64) -> Self {
        Primitive::Int(value)
    }
}

impl From<i32> for Primitive {
    fn from(value: i32) -> Self {
        Primitive::Int(value.into())
    }
}

impl From<bool> for Primitive {
    fn from(value: bool) -> Self {
        Primitive::Bool(value)
    }
}

impl From<f64> for Primitive {
    fn from(value: f64) -> Self {
        Primitive::Float(value)
    }
}

impl From<&str> for Primitive {
    fn from(value: &str) -> Self {
        Primitive::String(value.into())
    }
}

impl From<String> for Primitive {
    fn from(value: String) -> Self {
        Primitive::String(value.into())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SourceNode {
    Mapping(Arc<IndexMap<String, SourceNode>>),
    Sequence(Arc<Vec<SourceNode>>),
    Scalar(Primitive),
}

impl SourceNode {
    pub fn mapping(entries: impl IntoIterator<Item = (String, SourceNode)>) -> Self {
        SourceNode::Mapping(Arc::new(entries.into_iter().collect()))
    }

    pub fn sequence(items: impl IntoIterator<Item = SourceNode>) -> Self {
        SourceNode::Sequence(Arc::new(items.into_iter().collect()))
    }

    pub fn as_mapping(&self) -> Option<&IndexMap<String, SourceNode>> {
        match self {
            SourceNode::Mapping(entries) => Some(entries),
            _ => None,
        }
    }

    /// Parses `text` in the given format. `origin` only labels errors.
    pub fn parse(format: SourceFormat, text: &str, origin: &str) -> Result<Self> {
        match format {
            SourceFormat::Yaml => {
                let value: serde_yaml::Value = serde_yaml::from_str(text)
                    .map_err(|error| unsupported(origin, error.to_string()))?;
                from_yaml(value, origin)
            }
            SourceFormat::Json => {
                let value: serde_json::Value = serde_json::from_str(text)
                    .map_err(|error| unsupported(origin, error.to_string()))?;
                from_json(value, origin)
            }
            SourceFormat::Toml => {
                let value: toml::Table = text
                    .parse()
                    .map_err(|error: toml::de::Error| unsupported(origin, error.to_string()))?;
                from_toml(toml::Value::Table(value), origin)
            }
        }
    }
}

impl From<Primitive> for SourceNode {
    fn from(value: Primitive) -> Self {
        SourceNode::Scalar(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Yaml,
    Json,
    Toml,
}

/// A file suffix recognised as an overlay source, e.g. `.mixin.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatSuffix {
    pub suffix: String,
    pub format: SourceFormat,
}

impl FormatSuffix {
    pub fn new(suffix: &str, format: SourceFormat) -> Self {
        Self {
            suffix: suffix.to_string(),
            format,
        }
    }
}

/// Default suffixes. Longer suffixes never shadow shorter ones because
/// matching picks the longest match.
pub fn default_suffixes() -> Vec<FormatSuffix> {
    vec![
        FormatSuffix::new(".oyaml", SourceFormat::Yaml),
        FormatSuffix::new(".oyml", SourceFormat::Yaml),
        FormatSuffix::new(".mixin.yaml", SourceFormat::Yaml),
        FormatSuffix::new(".mixin.yml", SourceFormat::Yaml),
        FormatSuffix::new(".ojson", SourceFormat::Json),
        FormatSuffix::new(".mixin.json", SourceFormat::Json),
        FormatSuffix::new(".otoml", SourceFormat::Toml),
        FormatSuffix::new(".mixin.toml", SourceFormat::Toml),
    ]
}

/// Splits a file name into `(stem, format)` if one of `suffixes` matches.
pub fn match_suffix<'a>(file_name: &'a str, suffixes: &[FormatSuffix]) -> Option<(&'a str, SourceFormat)> {
    suffixes
        .iter()
        .filter(|candidate| file_name.len() > candidate.suffix.len())
        .filter(|candidate| file_name.ends_with(candidate.suffix.as_str()))
        .max_by_key(|candidate| candidate.suffix.len())
        .map(|candidate| {
            (
                &file_name[..file_name.len() - candidate.suffix.len()],
                candidate.format,
            )
        })
}

/// Reads and parses a single source file.
pub fn load_file(path: &Path, format: SourceFormat) -> Result<SourceNode> {
    let text = std::fs::read_to_string(path).map_err(|error| ErrorKind::Source {
        path: path.to_path_buf(),
        message: error.to_string(),
    })?;
    SourceNode::parse(format, &text, &path.display().to_string()).map_err(|error| match error.kind() {
        ErrorKind::UnsupportedSource { message, .. } => ErrorKind::Source {
            path: path.to_path_buf(),
            message: message.clone(),
        }
        .into(),
        _ => error,
    })
}

fn unsupported(origin: &str, message: impl Into<String>) -> crate::Error {
    ErrorKind::UnsupportedSource {
        origin: origin.to_string(),
        message: message.into(),
    }
    .into()
}

fn from_yaml(value: serde_yaml::Value, origin: &str) -> Result<SourceNode> {
    use serde_yaml::Value;

    Ok(match value {
        Value::Null => Primitive::Null.into(),
        Value::Bool(value) => Primitive::Bool(value).into(),
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                Primitive::Int(int).into()
            } else if let (true, Some(float)) = (number.is_f64(), number.as_f64()) {
                Primitive::Float(float).into()
            } else {
                return Err(unsupported(origin, format!("number {number} is out of range")));
            }
        }
        Value::String(value) => Primitive::String(value.into()).into(),
        Value::Sequence(items) => SourceNode::sequence(
            items
                .into_iter()
                .map(|item| from_yaml(item, origin))
                .collect::<Result<Vec<_>>>()?,
        ),
        Value::Mapping(entries) => {
            let mut mapping = IndexMap::with_capacity(entries.len());
            for (key, value) in entries {
                let key = match key {
                    Value::String(key) => key,
                    other => {
                        return Err(unsupported(origin, format!("mapping key {other:?} is not a string")));
                    }
                };
                mapping.insert(key, from_yaml(value, origin)?);
            }
            SourceNode::Mapping(Arc::new(mapping))
        }
        Value::Tagged(tagged) => {
            return Err(unsupported(origin, format!("tagged value `{}`", tagged.tag)));
        }
    })
}

fn from_json(value: serde_json::Value, origin: &str) -> Result<SourceNode> {
    use serde_json::Value;

    Ok(match value {
        Value::Null => Primitive::Null.into(),
        Value::Bool(value) => Primitive::Bool(value).into(),
        Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                Primitive::Int(int).into()
            } else if let (true, Some(float)) = (number.is_f64(), number.as_f64()) {
                Primitive::Float(float).into()
            } else {
                return Err(unsupported(origin, format!("number {number} is out of range")));
            }
        }
        Value::String(value) => Primitive::String(value.into()).into(),
        Value::Array(items) => SourceNode::sequence(
            items
                .into_iter()
                .map(|item| from_json(item, origin))
                .collect::<Result<Vec<_>>>()?,
        ),
        Value::Object(entries) => {
            let mut mapping = IndexMap::with_capacity(entries.len());
            for (key, value) in entries {
                mapping.insert(key, from_json(value, origin)?);
            }
            SourceNode::Mapping(Arc::new(mapping))
        }
    })
}

fn from_toml(value: toml::Value, origin: &str) -> Result<SourceNode> {
    use toml::Value;

    Ok(match value {
        Value::String(value) => Primitive::String(value.into()).into(),
        Value::Integer(value) => Primitive::Int(value).into(),
        Value::Float(value) => Primitive::Float(value).into(),
        Value::Boolean(value) => Primitive::Bool(value).into(),
        Value::Datetime(datetime) => {
            return Err(unsupported(origin, format!("datetime {datetime} has no JSON equivalent")));
        }
        Value::Array(items) => SourceNode::sequence(
            items
                .into_iter()
                .map(|item| from_toml(item, origin))
                .collect::<Result<Vec<_>>>()?,
        ),
        Value::Table(entries) => {
            let mut mapping = IndexMap::with_capacity(entries.len());
            for (key, value) in entries {
                mapping.insert(key, from_toml(value, origin)?);
            }
            SourceNode::Mapping(Arc::new(mapping))
        }
    })
}
