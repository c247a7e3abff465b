use crate::error::Result;
use crate::session::ChatMessage;
use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde_json::Value;

/// One call to the reasoning service.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReasoningRequest {
    pub system: String,
    /// Document text supplied as a second system-level message.
    pub context: Option<String>,
    pub history: Vec<ChatMessage>,
    pub prompt: String,
    /// JSON schema the reply must follow. `None` requests free text.
    pub response_schema: Option<Value>,
}

impl ReasoningRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let context = context.into();
        if !context.trim().is_empty() {
            self.context = Some(context);
        }
        self
    }

    pub fn with_history(mut self, history: &[ChatMessage]) -> Self {
        self.history = history.to_vec();
        self
    }

    /// Requests a JSON reply shaped like `T`.
    pub fn expecting<T: JsonSchema>(mut self) -> Self {
        self.response_schema = Some(clean_schema(serde_json::to_value(schema_for!(T)).unwrap_or_default()));
        self
    }
}

/// Opaque text-in/text-out capability. Replies carry no correctness guarantee, so every
/// caller parses them defensively.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn reason(&self, request: &ReasoningRequest) -> Result<String>;

    /// Provider/model label used in logs.
    fn name(&self) -> &str {
        "reasoning-service"
    }
}

/// Inlines `$ref` definitions and drops the keys providers reject (`$schema`, `title`,
/// `definitions`).
pub fn clean_schema(mut schema: Value) -> Value {
    let definitions = schema
        .as_object_mut()
        .and_then(|root| root.remove("definitions"))
        .unwrap_or(Value::Null);
    inline_refs(&mut schema, &definitions, 0);
    strip_meta(&mut schema);
    schema
}

fn inline_refs(node: &mut Value, definitions: &Value, depth: usize) {
    if depth > 16 {
        return;
    }
    match node {
        Value::Object(map) => {
            if let Some(Value::String(reference)) = map.get("$ref") {
                let name = reference.trim_start_matches("#/definitions/");
                if let Some(found) = definitions.get(name) {
                    let mut replacement = found.clone();
                    inline_refs(&mut replacement, definitions, depth + 1);
                    *node = replacement;
                    return;
                }
            }
            // A lone `allOf` wrapping one reference is how schemars annotates documented fields.
            if let Some(Value::Array(parts)) = map.get("allOf") {
                if parts.len() == 1 {
                    let mut only = parts[0].clone();
                    inline_refs(&mut only, definitions, depth + 1);
                    let description = map.get("description").cloned();
                    *node = only;
                    if let (Some(desc), Value::Object(inner)) = (description, &mut *node) {
                        inner.insert("description".to_string(), desc);
                    }
                    return;
                }
            }
            for value in map.values_mut() {
                inline_refs(value, definitions, depth);
            }
        }
        Value::Array(items) => {
            for item in items {
                inline_refs(item, definitions, depth);
            }
        }
        _ => {}
    }
}

fn strip_meta(node: &mut Value) {
    match node {
        Value::Object(map) => {
            map.remove("$schema");
            map.remove("title");
            map.remove("definitions");
            for value in map.values_mut() {
                strip_meta(value);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(strip_meta),
        _ => {}
    }
}
