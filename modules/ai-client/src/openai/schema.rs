use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Types usable as OpenAI structured output.
///
/// Implemented for anything `JsonSchema + DeserializeOwned`. OpenAI's strict
/// mode rejects schemas unless every object sets
/// `additionalProperties: false`, lists all properties as `required`, and
/// contains no `$ref` indirection, so the generated schema is rewritten
/// accordingly.
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    fn openai_schema() -> Value {
        let mut value = serde_json::to_value(schema_for!(Self)).unwrap_or_default();

        let definitions = match &value {
            Value::Object(map) => map.get("definitions").cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        };
        tighten(&mut value, &definitions);

        if let Value::Object(map) = &mut value {
            map.remove("definitions");
            map.remove("$schema");
        }

        value
    }

    fn type_name() -> String {
        <Self as JsonSchema>::schema_name()
    }
}

impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {}

fn tighten(value: &mut Value, definitions: &Value) {
    match value {
        Value::Object(map) => {
            // Inline $ref targets so the schema is self-contained.
            if let Some(Value::String(ref_path)) = map.get("$ref").cloned() {
                if let Some(name) = ref_path.strip_prefix("#/definitions/") {
                    if let Some(def) = definitions.get(name) {
                        *value = def.clone();
                        tighten(value, definitions);
                        return;
                    }
                }
            }

            if map.get("type") == Some(&Value::String("object".to_string())) {
                map.insert("additionalProperties".to_string(), Value::Bool(false));
                if let Some(Value::Object(props)) = map.get("properties") {
                    let all_keys: Vec<Value> =
                        props.keys().map(|k| Value::String(k.clone())).collect();
                    map.insert("required".to_string(), Value::Array(all_keys));
                }
            }

            for (_, v) in map.iter_mut() {
                tighten(v, definitions);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                tighten(item, definitions);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct Inner {
        #[allow(dead_code)]
        label: String,
    }

    #[derive(Debug, Deserialize, JsonSchema)]
    struct Outer {
        #[allow(dead_code)]
        name: String,
        #[allow(dead_code)]
        maybe: Option<String>,
        #[allow(dead_code)]
        items: Vec<Inner>,
    }

    #[test]
    fn schema_satisfies_strict_mode() {
        let schema = Outer::openai_schema();

        assert_eq!(schema["additionalProperties"], Value::Bool(false));
        let required = schema["required"].as_array().unwrap();
        // Optional fields still appear in `required`; nullability is carried
        // by the property type instead.
        assert!(required.contains(&Value::String("maybe".to_string())));
        assert!(required.contains(&Value::String("name".to_string())));

        assert!(schema.get("definitions").is_none());
        assert!(schema.get("$schema").is_none());

        let rendered = serde_json::to_string(&schema).unwrap();
        assert!(!rendered.contains("$ref"), "refs must be inlined: {rendered}");
    }
}
