//! JSON input schemas derived from declared argument specs

use docgate_core::{Category, Check, ToolSchema};
use serde_json::{json, Map, Value};

/// Build the `inputSchema` advertised by `tools/list`
///
/// Category arguments of path bindings advertise the accepted spellings;
/// everything else is derived from the argument's checks.
pub fn input_schema(schema: &ToolSchema, categories: &[Category]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();

    for arg in &schema.args {
        let mut property = Map::new();
        for check in &arg.checks {
            apply_check(&mut property, check);
        }

        if schema.paths.iter().any(|p| p.category == arg.name) {
            let spellings: Vec<&str> = categories
                .iter()
                .flat_map(|c| [c.dir_name(), c.singular()])
                .collect();
            property.insert("type".to_string(), json!("string"));
            property.insert("enum".to_string(), json!(spellings));
        } else if schema.paths.iter().any(|p| p.identifier == arg.name) {
            property.insert("type".to_string(), json!("string"));
        }

        if !arg.description.is_empty() {
            property.insert("description".to_string(), json!(arg.description));
        }
        if arg.required {
            required.push(arg.name.clone());
        }
        properties.insert(arg.name.clone(), Value::Object(property));
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

fn apply_check(property: &mut Map<String, Value>, check: &Check) {
    match check {
        Check::NonEmpty => {
            property.insert("minLength".to_string(), json!(1));
        }
        Check::EnumMembership { values } => {
            property.insert("type".to_string(), json!("string"));
            property.insert("enum".to_string(), json!(values));
        }
        Check::NumericRange { min, max } => {
            property.insert("type".to_string(), json!("number"));
            if let Some(min) = min {
                property.insert("minimum".to_string(), json!(min));
            }
            if let Some(max) = max {
                property.insert("maximum".to_string(), json!(max));
            }
        }
        Check::PositiveInteger => {
            property.insert("type".to_string(), json!("integer"));
            property.insert("minimum".to_string(), json!(1));
        }
        Check::MaxLength { max } => {
            property.insert("maxLength".to_string(), json!(max));
        }
        Check::StructuredText { format } => {
            property.insert("format".to_string(), json!(format));
        }
        Check::NoInjection | Check::Custom { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docgate_core::{ArgumentSpec, PathBinding};

    fn arg(name: &str, required: bool, checks: Vec<Check>) -> ArgumentSpec {
        ArgumentSpec {
            name: name.to_string(),
            description: format!("{} argument", name),
            required,
            checks,
        }
    }

    #[test]
    fn test_schema_from_checks() {
        let schema = ToolSchema {
            description: String::new(),
            args: vec![
                arg("category", true, vec![Check::NonEmpty]),
                arg("id", true, vec![Check::NoInjection]),
                arg("mode", false, vec![Check::EnumMembership { values: vec!["a".into(), "b".into()] }]),
                arg("limit", false, vec![Check::PositiveInteger]),
                arg("ratio", false, vec![Check::NumericRange { min: Some(0.0), max: None }]),
            ],
            paths: vec![PathBinding {
                name: "doc".to_string(),
                category: "category".to_string(),
                identifier: "id".to_string(),
            }],
        };

        let value = input_schema(&schema, &[Category::Roots, Category::Edges]);
        assert_eq!(value["type"], "object");
        assert_eq!(value["required"], json!(["category", "id"]));
        assert_eq!(
            value["properties"]["category"]["enum"],
            json!(["roots", "root", "edges", "edge"])
        );
        assert_eq!(value["properties"]["category"]["minLength"], 1);
        assert_eq!(value["properties"]["id"]["type"], "string");
        assert_eq!(value["properties"]["mode"]["enum"], json!(["a", "b"]));
        assert_eq!(value["properties"]["limit"]["type"], "integer");
        assert_eq!(value["properties"]["ratio"]["minimum"], 0.0);
        assert!(value["properties"]["ratio"].get("maximum").is_none());
        assert_eq!(value["properties"]["limit"]["description"], "limit argument");
    }
}
