//! Declared tool interfaces and argument validation.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgKind {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
    Any,
}

impl ArgKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            ArgKind::String => value.is_string(),
            ArgKind::Number => value.is_number(),
            ArgKind::Integer => value.is_i64() || value.is_u64(),
            ArgKind::Boolean => value.is_boolean(),
            ArgKind::Object => value.is_object(),
            ArgKind::Array => value.is_array(),
            ArgKind::Any => true,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            ArgKind::String => "string",
            ArgKind::Number => "number",
            ArgKind::Integer => "integer",
            ArgKind::Boolean => "boolean",
            ArgKind::Object => "object",
            ArgKind::Array => "array",
            ArgKind::Any => "any",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgField {
    pub name: String,
    pub kind: ArgKind,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ArgField {
    pub fn required(name: impl Into<String>, kind: ArgKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            description: None,
        }
    }

    pub fn optional(name: impl Into<String>, kind: ArgKind) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind)
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ArgSchema {
    pub fields: Vec<ArgField>,
    /// Accept keys that are not declared.
    #[serde(default)]
    pub allow_extra: bool,
}

impl ArgSchema {
    pub fn new(fields: Vec<ArgField>) -> Self {
        Self {
            fields,
            allow_extra: false,
        }
    }

    pub fn allow_extra(mut self) -> Self {
        self.allow_extra = true;
        self
    }

    /// `null` counts as an empty argument object.
    pub fn validate(&self, arguments: &Value) -> Result<(), String> {
        let empty = Map::new();
        let map = match arguments {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => return Err(format!("arguments must be an object, got {other}")),
        };

        for field in &self.fields {
            match map.get(&field.name) {
                None | Some(Value::Null) if field.required => {
                    return Err(format!("missing required argument `{}`", field.name));
                }
                Some(value) if !value.is_null() && !field.kind.accepts(value) => {
                    return Err(format!(
                        "argument `{}` must be {}",
                        field.name,
                        field.kind.as_str()
                    ));
                }
                _ => {}
            }
        }

        if !self.allow_extra {
            if let Some(extra) = map
                .keys()
                .find(|key| !self.fields.iter().any(|field| &field.name == *key))
            {
                return Err(format!("unexpected argument `{extra}`"));
            }
        }
        Ok(())
    }

    /// JSON-Schema rendering handed to the reasoning service.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mut prop = Map::new();
            if field.kind != ArgKind::Any {
                prop.insert("type".into(), json!(field.kind.as_str()));
            }
            if let Some(description) = &field.description {
                prop.insert("description".into(), json!(description));
            }
            properties.insert(field.name.clone(), Value::Object(prop));
        }
        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|field| field.required)
            .map(|field| field.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": self.allow_extra,
        })
    }
}

/// Name, description and argument schema of one tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub schema: ArgSchema,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, schema: ArgSchema) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
        }
    }
}
