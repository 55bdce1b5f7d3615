use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{AgentHostError, Result};

/// JSON type a tool parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            // Some backends send integral floats such as `2.0`.
            Self::Integer => value.as_f64().map_or(false, |n| n.fract() == 0.0),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

impl fmt::Display for ParameterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParameterType,
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

/// Declared shape of a tool. Fixed once the tool is registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
        }
    }

    /// Add a required parameter.
    pub fn param(
        self,
        name: impl Into<String>,
        ty: ParameterType,
        description: impl Into<String>,
    ) -> Self {
        self.push_param(name.into(), ty, true, description.into())
    }

    pub fn optional_param(
        self,
        name: impl Into<String>,
        ty: ParameterType,
        description: impl Into<String>,
    ) -> Self {
        self.push_param(name.into(), ty, false, description.into())
    }

    fn push_param(mut self, name: String, ty: ParameterType, required: bool, description: String) -> Self {
        self.parameters.push(ParameterSpec {
            name,
            ty,
            required,
            description,
        });
        self
    }

    /// JSON Schema advertised to the model. Mirrors exactly what `validate` enforces.
    pub fn json_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.parameters {
            let mut prop = Map::new();
            prop.insert("type".into(), Value::String(param.ty.as_str().into()));
            if !param.description.is_empty() {
                prop.insert("description".into(), Value::String(param.description.clone()));
            }
            properties.insert(param.name.clone(), Value::Object(prop));
        }
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }

    pub fn validate(&self, arguments: &Value) -> Result<()> {
        let empty = Map::new();
        let object = match arguments {
            Value::Null => &empty,
            Value::Object(map) => map,
            other => {
                return Err(self.argument_error(format!(
                    "arguments must be a JSON object, got {}",
                    json_type_name(other)
                )))
            }
        };

        for param in &self.parameters {
            match object.get(&param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(self.argument_error(format!(
                        "missing required parameter `{}`",
                        param.name
                    )));
                }
                None | Some(Value::Null) => {}
                Some(value) if !param.ty.matches(value) => {
                    return Err(self.argument_error(format!(
                        "parameter `{}` must be {}, got {}",
                        param.name,
                        param.ty,
                        json_type_name(value)
                    )));
                }
                Some(_) => {}
            }
        }

        if let Some(extra) = object
            .keys()
            .find(|key| !self.parameters.iter().any(|p| &p.name == *key))
        {
            return Err(self.argument_error(format!("unexpected parameter `{extra}`")));
        }
        Ok(())
    }

    fn argument_error(&self, reason: String) -> AgentHostError {
        AgentHostError::ToolArgument {
            tool: self.name.clone(),
            reason,
        }
    }
}

/// A locally executable function the model may ask for by name.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> &ToolSpec;

    async fn call(&self, input: Value) -> Result<Value>;
}

type ToolFn = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Binds a `ToolSpec` to an async closure.
#[derive(Clone)]
pub struct FnTool {
    spec: ToolSpec,
    func: ToolFn,
}

impl FnTool {
    pub fn new<F, Fut>(spec: ToolSpec, func: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            spec,
            func: Arc::new(move |input| Box::pin(func(input))),
        }
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool").field("spec", &self.spec).finish()
    }
}

#[async_trait]
impl Tool for FnTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    async fn call(&self, input: Value) -> Result<Value> {
        (self.func)(input).await
    }
}

/// Tool schema in the shape handed to model backends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> Result<()> {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.spec().name.clone();
        if self.tools.contains_key(&name) {
            return Err(AgentHostError::DuplicateTool(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn register_fn<F, Fut>(&mut self, spec: ToolSpec, func: F) -> Result<()>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register(FnTool::new(spec, func))
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| AgentHostError::UnknownTool(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn describe(&self) -> Vec<ToolDescription> {
        let mut descriptions: Vec<ToolDescription> = self
            .tools
            .values()
            .map(|tool| {
                let spec = tool.spec();
                ToolDescription {
                    name: spec.name.clone(),
                    description: spec.description.clone(),
                    parameters: spec.json_schema(),
                }
            })
            .collect();

        descriptions.sort_by(|a, b| a.name.cmp(&b.name));
        descriptions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn greet_spec() -> ToolSpec {
        ToolSpec::new("greet", "Greets someone")
            .param("name", ParameterType::String, "Who to greet")
            .optional_param("times", ParameterType::Integer, "Repeat count")
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry
            .register_fn(greet_spec(), |input| async move {
                Ok(json!(format!("hello {}", input["name"].as_str().unwrap_or_default())))
            })
            .unwrap();
        registry
            .register_fn(ToolSpec::new("a_first", "First tool"), |input| async move { Ok(input) })
            .unwrap();
        registry
    }

    #[tokio::test]
    async fn resolves_registered_tools() {
        let registry = registry();
        let tool = registry.resolve("greet").unwrap();
        assert_eq!(tool.spec().name, "greet");
        let out = tool.call(json!({"name": "Ada"})).await.unwrap();
        assert_eq!(out, json!("hello Ada"));
    }

    #[test]
    fn unknown_tool_is_an_error() {
        let err = registry().resolve("missing").err().unwrap();
        assert!(matches!(err, AgentHostError::UnknownTool(name) if name == "missing"));
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut registry = registry();
        let err = registry
            .register_fn(ToolSpec::new("greet", "again"), |input| async move { Ok(input) })
            .unwrap_err();
        assert!(matches!(err, AgentHostError::DuplicateTool(name) if name == "greet"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn returns_sorted_descriptions() {
        let names: Vec<String> = registry().describe().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["a_first", "greet"]);
    }

    #[test]
    fn schema_lists_required_parameters() {
        let schema = greet_spec().json_schema();
        assert_eq!(schema["properties"]["name"]["type"], "string");
        assert_eq!(schema["properties"]["times"]["type"], "integer");
        assert_eq!(schema["required"], json!(["name"]));
    }

    #[test]
    fn validation_catches_missing_and_mistyped_arguments() {
        let spec = greet_spec();
        assert!(spec.validate(&json!({"name": "Ada"})).is_ok());
        assert!(spec.validate(&json!({"name": "Ada", "times": 2})).is_ok());

        let missing = spec.validate(&json!({})).unwrap_err();
        assert!(missing.to_string().contains("missing required parameter `name`"));

        let mistyped = spec.validate(&json!({"name": 3})).unwrap_err();
        assert!(mistyped.to_string().contains("must be string, got integer"));

        assert!(spec.validate(&json!({"name": "Ada", "times": 2.0})).is_ok());

        let fractional = spec.validate(&json!({"name": "Ada", "times": 1.5})).unwrap_err();
        assert!(fractional.to_string().contains("must be integer, got number"));

        let extra = spec.validate(&json!({"name": "Ada", "loud": true})).unwrap_err();
        assert!(extra.to_string().contains("unexpected parameter `loud`"));

        assert!(spec.validate(&json!("Ada")).is_err());
    }

    #[test]
    fn null_arguments_count_as_empty() {
        let spec = ToolSpec::new("ping", "No parameters");
        assert!(spec.validate(&Value::Null).is_ok());
    }
}
