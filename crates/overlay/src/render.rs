//! JSON rendering of composed evaluations.

use serde_json::{Map, Value as Json};

use crate::error::Result;
use crate::evaluation::Evaluation;
use crate::resource::Value;
use crate::runtime::Runtime;

impl Evaluation<'_> {
    /// Renders scopes as objects and leaves as their values. Scopes nested
    /// deeper than `depth` property levels render as `null`.
    pub fn to_json(&self, depth: usize) -> Result<Json> {
        if self.is_leaf() {
            return render_value(self.runtime(), &self.value()?, depth);
        }
        let properties = self.all_properties()?;
        if properties.is_empty() {
            return Ok(Json::Object(Map::new()));
        }
        if depth == 0 {
            return Ok(Json::Null);
        }
        let mut object = Map::with_capacity(properties.len());
        for (name, property) in properties {
            object.insert(name.to_string(), property.to_json(depth - 1)?);
        }
        Ok(Json::Object(object))
    }
}

fn render_value(runtime: &Runtime, value: &Value, depth: usize) -> Result<Json> {
    match value {
        Value::Primitive(primitive) => Ok(primitive.to_json()),
        Value::List(items) => items
            .iter()
            .map(|item| render_value(runtime, item, depth))
            .collect::<Result<Vec<_>>>()
            .map(Json::Array),
        Value::Scope(id) => match runtime.evaluation(*id) {
            Some(scope) => scope.to_json(depth),
            None => Ok(Json::Null),
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::evaluation::HasProperties;
    use crate::runtime::{Mount, Runtime};
    use crate::source::{SourceFormat, SourceNode};

    #[test]
    fn renders_scopes_and_scalars() {
        let runtime = Runtime::new();
        let node = SourceNode::parse(
            SourceFormat::Yaml,
            "defaults:\n  port: 8080\nserver:\n  - [defaults]\n  - host: localhost\n    tls: {}\n",
            "render.oyaml",
        )
        .unwrap();
        let root = runtime
            .mount(&[Mount::Source {
                origin: "render.oyaml".into(),
                node,
            }])
            .unwrap();

        assert_eq!(
            root.get_path(["server"]).unwrap().to_json(8).unwrap(),
            json!({"port": 8080, "host": "localhost", "tls": {}})
        );
        assert_eq!(root.to_json(1).unwrap(), json!({"defaults": null, "server": null}));
    }

    #[test]
    fn renders_recursive_structure_to_bounded_depth() {
        let runtime = Runtime::new();
        let node = SourceNode::parse(SourceFormat::Yaml, "Nat:\n  zero: false\n  predecessor: [Nat]\n", "nat.oyaml")
            .unwrap();
        let root = runtime
            .mount(&[Mount::Source {
                origin: "nat.oyaml".into(),
                node,
            }])
            .unwrap();

        assert_eq!(
            root.get("Nat").unwrap().to_json(2).unwrap(),
            json!({"zero": false, "predecessor": {"zero": false, "predecessor": null}})
        );
    }
}
