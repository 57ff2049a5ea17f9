//! Tool-argument validation.
//!
//! Arguments are validated against the tool's declared JSON Schema before
//! they reach an adapter, so malformed model output is rejected as a
//! caller fault instead of surfacing as a confusing provider error.

use jsonschema::JSONSchema;
use serde_json::Value;

use crate::error::{AdapterError, Result};
use crate::traits::ToolDescriptor;

/// Validate `arguments` against the descriptor's input schema.
///
/// A schema that itself fails to compile is treated as absent — providers
/// own their schemas and a broken one must not block the call.
pub fn validate_arguments(descriptor: &ToolDescriptor, arguments: &Value) -> Result<()> {
    let Ok(schema) = JSONSchema::compile(&descriptor.input_schema) else {
        tracing::warn!(
            tool = %descriptor.name,
            "tool input schema does not compile; skipping validation"
        );
        return Ok(());
    };

    if let Err(errors) = schema.validate(arguments) {
        let reasons: Vec<String> = errors.take(3).map(|e| e.to_string()).collect();
        return Err(AdapterError::InvalidArguments {
            tool_name: descriptor.name.clone(),
            reason: reasons.join("; "),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn descriptor(schema: Value) -> ToolDescriptor {
        ToolDescriptor {
            name: "quote".into(),
            description: "Get a quote".into(),
            input_schema: schema,
            provider_key: "demo".into(),
            requires_detailed_schema: false,
        }
    }

    #[test]
    fn valid_arguments_pass() {
        let d = descriptor(json!({
            "type": "object",
            "properties": {"symbol": {"type": "string"}},
            "required": ["symbol"]
        }));
        assert!(validate_arguments(&d, &json!({"symbol": "AAPL"})).is_ok());
    }

    #[test]
    fn missing_required_field_fails() {
        let d = descriptor(json!({
            "type": "object",
            "properties": {"symbol": {"type": "string"}},
            "required": ["symbol"]
        }));
        let result = validate_arguments(&d, &json!({}));
        assert!(matches!(
            result,
            Err(AdapterError::InvalidArguments { .. })
        ));
    }

    #[test]
    fn wrong_type_fails() {
        let d = descriptor(json!({
            "type": "object",
            "properties": {"limit": {"type": "integer"}}
        }));
        assert!(validate_arguments(&d, &json!({"limit": "five"})).is_err());
    }

    #[test]
    fn broken_schema_is_skipped() {
        let d = descriptor(json!({"type": "not-a-real-type"}));
        assert!(validate_arguments(&d, &json!({"anything": true})).is_ok());
    }
}
