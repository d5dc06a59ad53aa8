use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;

/// A type the model can be forced to emit through a tool-use schema.
/// Blanket-implemented for anything deriving `JsonSchema` + `Deserialize`.
pub trait StructuredOutput: DeserializeOwned {
    /// JSON schema sent as the tool's `input_schema`.
    fn output_schema() -> serde_json::Value;
}

impl<T> StructuredOutput for T
where
    T: DeserializeOwned + JsonSchema,
{
    fn output_schema() -> serde_json::Value {
        serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| serde_json::json!({}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct Sample {
        #[allow(dead_code)]
        name: String,
        #[allow(dead_code)]
        count: u32,
    }

    #[test]
    fn schema_includes_fields() {
        let schema = Sample::output_schema();
        let props = schema["properties"].as_object().unwrap();
        assert!(props.contains_key("name"));
        assert!(props.contains_key("count"));
    }
}
