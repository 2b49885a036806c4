use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use overlay::{
    Arguments, EngineConfig, Evaluation, HasProperties, Mount, Primitive, Runtime, SourceFormat, SourceNode,
    TotalityChecker,
};

pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => {
            EngineConfig::load(path).with_context(|| format!("Failed to load configuration {}", path.display()))
        }
        None => {
            let current = std::env::current_dir().context("Failed to read the current directory")?;
            let (config, found) = EngineConfig::discover(&current)?;
            if let Some(found) = found {
                log::info!("using configuration {}", found.display());
            }
            Ok(config)
        }
    }
}

/// Parses `name=value`, reading `value` as a YAML scalar.
pub fn parse_argument(raw: &str) -> Result<(String, Primitive)> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("Expected `name=value`, got `{raw}`"))?;
    if name.is_empty() {
        bail!("Argument name is empty in `{raw}`");
    }
    match SourceNode::parse(SourceFormat::Yaml, value, "--arg")? {
        SourceNode::Scalar(primitive) => Ok((name.to_string(), primitive)),
        _ => bail!("Argument `{name}` must be a scalar"),
    }
}

fn mounts(roots: &[PathBuf]) -> Vec<Mount> {
    roots
        .iter()
        .map(|root| {
            if root.is_dir() {
                Mount::Directory(root.clone())
            } else {
                Mount::File(root.clone())
            }
        })
        .collect()
}

fn select<'rt>(root: Evaluation<'rt>, path: Option<&str>) -> Result<Evaluation<'rt>> {
    match path {
        Some(path) if !path.is_empty() => Ok(root.get_path(path.split('.'))?),
        _ => Ok(root),
    }
}

pub fn eval(
    config: EngineConfig,
    roots: &[PathBuf],
    path: Option<&str>,
    arguments: Vec<(String, Primitive)>,
    depth: usize,
) -> Result<()> {
    let runtime = Runtime::with_config(config);
    let arguments: Arguments = arguments.into_iter().collect();
    let root = runtime.mount_with_arguments(&mounts(roots), arguments)?;
    let selected = select(root, path)?;
    let json = selected.to_json(depth)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

pub fn check(config: EngineConfig, roots: &[PathBuf], max_depth: Option<usize>) -> Result<()> {
    let mut checker = TotalityChecker::from_config(&config.check);
    if let Some(depth) = max_depth {
        checker = checker.max_depth(depth);
    }
    let runtime = Runtime::with_config(config);
    let root = runtime.mount(&mounts(roots))?;
    let report = checker.check(root)?;
    eprintln!(
        "ok: {} scopes, {} resources{}",
        report.scopes,
        report.resources,
        if report.truncated > 0 {
            format!(", {} truncated at the depth bound", report.truncated)
        } else {
            String::new()
        }
    );
    Ok(())
}

pub fn keys(config: EngineConfig, roots: &[PathBuf], path: Option<&str>) -> Result<()> {
    let runtime = Runtime::with_config(config);
    let root = runtime.mount(&mounts(roots))?;
    for name in select(root, path)?.property_names() {
        println!("{name}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_are_yaml_scalars() {
        assert_eq!(parse_argument("port=8080").unwrap(), ("port".to_string(), Primitive::Int(8080)));
        assert_eq!(parse_argument("debug=true").unwrap(), ("debug".to_string(), Primitive::Bool(true)));
        assert_eq!(
            parse_argument("host=example.org").unwrap(),
            ("host".to_string(), Primitive::from("example.org"))
        );
    }

    #[test]
    fn malformed_arguments_are_rejected() {
        assert!(parse_argument("port").is_err());
        assert!(parse_argument("=1").is_err());
        assert!(parse_argument("list=[1, 2]").is_err());
    }
}
