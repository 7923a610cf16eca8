//! JSON schema parser for Avro schemas.
//!
//! Parses Avro schema JSON into the [`AvroSchema`] tree. References to
//! previously defined records, enums and fixed types are replaced by a copy of
//! the definition. Logical type annotations are dropped in favour of their
//! underlying type.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::SchemaError;
use crate::schema::{AvroSchema, EnumSchema, FieldSchema, FixedSchema, RecordSchema};

/// Parse an Avro schema from a JSON string.
///
/// ```
/// use atds::schema::{parse_schema, AvroSchema};
///
/// let schema = parse_schema(r#"{"type": "array", "items": "long"}"#).unwrap();
/// assert_eq!(schema, AvroSchema::Array(Box::new(AvroSchema::Long)));
/// ```
pub fn parse_schema(json: &str) -> Result<AvroSchema, SchemaError> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| SchemaError::ParseError(format!("Invalid JSON: {}", e)))?;

    SchemaParser::new().parse(&value)
}

/// Schema parser with a registry of named types.
#[derive(Debug, Default)]
pub struct SchemaParser {
    /// Completed named types by fully qualified name
    named_types: HashMap<String, AvroSchema>,
    /// Records whose fields are still being parsed
    in_progress: HashSet<String>,
    /// Enclosing namespace for unqualified names
    current_namespace: Option<String>,
}

impl SchemaParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON value into an AvroSchema.
    pub fn parse(&mut self, value: &Value) -> Result<AvroSchema, SchemaError> {
        match value {
            Value::String(s) => self.parse_type_name(s),
            Value::Object(obj) => self.parse_object_schema(obj),
            Value::Array(arr) => self.parse_union_schema(arr),
            _ => Err(SchemaError::InvalidSchema(format!(
                "Expected string, object, or array, found: {}",
                value
            ))),
        }
    }

    /// Get a named type from the registry.
    pub fn get_named_type(&self, fullname: &str) -> Option<&AvroSchema> {
        self.named_types.get(fullname)
    }

    fn parse_type_name(&self, name: &str) -> Result<AvroSchema, SchemaError> {
        match name {
            "null" => Ok(AvroSchema::Null),
            "boolean" => Ok(AvroSchema::Boolean),
            "int" => Ok(AvroSchema::Int),
            "long" => Ok(AvroSchema::Long),
            "float" => Ok(AvroSchema::Float),
            "double" => Ok(AvroSchema::Double),
            "bytes" => Ok(AvroSchema::Bytes),
            "string" => Ok(AvroSchema::String),
            other => self.resolve_reference(other),
        }
    }

    fn resolve_reference(&self, name: &str) -> Result<AvroSchema, SchemaError> {
        let fullname = self.resolve_name(name);
        if let Some(schema) = self
            .named_types
            .get(&fullname)
            .or_else(|| self.named_types.get(name))
        {
            return Ok(schema.clone());
        }
        if self.in_progress.contains(&fullname) || self.in_progress.contains(name) {
            return Err(SchemaError::UnsupportedType(format!(
                "Recursive type '{}' cannot be decoded as a tensor feature",
                fullname
            )));
        }
        Err(SchemaError::UnsupportedType(format!("Unknown type: {}", name)))
    }

    fn parse_object_schema(&mut self, obj: &Map<String, Value>) -> Result<AvroSchema, SchemaError> {
        let type_value = obj
            .get("type")
            .ok_or_else(|| SchemaError::InvalidSchema("Missing 'type' field".to_string()))?;

        let type_str = match type_value {
            Value::String(s) => s.as_str(),
            // {"type": {"type": "array", ...}} and {"type": ["null", "int"]}
            nested => return self.parse(nested),
        };

        match type_str {
            "record" | "error" => self.parse_record_schema(obj),
            "enum" => self.parse_enum_schema(obj),
            "array" => {
                let items = obj.get("items").ok_or_else(|| {
                    SchemaError::InvalidSchema("Array missing 'items' field".to_string())
                })?;
                Ok(AvroSchema::Array(Box::new(self.parse(items)?)))
            }
            "map" => {
                let values = obj.get("values").ok_or_else(|| {
                    SchemaError::InvalidSchema("Map missing 'values' field".to_string())
                })?;
                Ok(AvroSchema::Map(Box::new(self.parse(values)?)))
            }
            "fixed" => self.parse_fixed_schema(obj),
            // Primitives, possibly annotated with a logicalType
            other => self.parse_type_name(other),
        }
    }

    fn parse_union_schema(&mut self, arr: &[Value]) -> Result<AvroSchema, SchemaError> {
        if arr.is_empty() {
            return Err(SchemaError::InvalidSchema(
                "Union schema cannot be empty".to_string(),
            ));
        }

        let variants = arr
            .iter()
            .map(|v| self.parse(v))
            .collect::<Result<Vec<_>, _>>()?;

        if variants.iter().any(|v| matches!(v, AvroSchema::Union(_))) {
            return Err(SchemaError::InvalidSchema(
                "Union contains nested union (unions cannot be nested)".to_string(),
            ));
        }

        Ok(AvroSchema::Union(variants))
    }

    /// Split a possibly dotted name and work out its namespace.
    fn name_parts(
        &self,
        obj: &Map<String, Value>,
        kind: &str,
    ) -> Result<(String, Option<String>), SchemaError> {
        let raw = obj
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SchemaError::InvalidSchema(format!("{} missing 'name' field", kind)))?;

        if let Some((ns, name)) = raw.rsplit_once('.') {
            check_name(name, kind);
            return Ok((name.to_string(), Some(ns.to_string())));
        }

        check_name(raw, kind);
        let namespace = obj
            .get("namespace")
            .and_then(|v| v.as_str())
            .filter(|ns| !ns.is_empty())
            .map(String::from)
            .or_else(|| self.current_namespace.clone());
        Ok((raw.to_string(), namespace))
    }

    fn parse_record_schema(&mut self, obj: &Map<String, Value>) -> Result<AvroSchema, SchemaError> {
        let (name, namespace) = self.name_parts(obj, "Record")?;
        let fullname = match &namespace {
            Some(ns) => format!("{}.{}", ns, name),
            None => name.clone(),
        };

        let fields_value = obj
            .get("fields")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                SchemaError::InvalidSchema("Record missing 'fields' array".to_string())
            })?;

        let prev_namespace = std::mem::replace(&mut self.current_namespace, namespace.clone());
        self.in_progress.insert(fullname.clone());
        let fields = fields_value
            .iter()
            .map(|f| self.parse_field_schema(f))
            .collect::<Result<Vec<_>, _>>();
        self.in_progress.remove(&fullname);
        self.current_namespace = prev_namespace;

        let fields = fields?;
        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::InvalidSchema(format!(
                    "Record '{}' has duplicate field '{}'",
                    fullname, field.name
                )));
            }
        }

        let record = RecordSchema {
            name,
            namespace,
            fields,
            doc: obj.get("doc").and_then(|v| v.as_str()).map(String::from),
        };

        let schema = AvroSchema::Record(record);
        self.named_types.insert(fullname, schema.clone());
        Ok(schema)
    }

    fn parse_field_schema(&mut self, value: &Value) -> Result<FieldSchema, SchemaError> {
        let obj = value
            .as_object()
            .ok_or_else(|| SchemaError::InvalidSchema("Field must be an object".to_string()))?;

        let name = obj
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| SchemaError::InvalidSchema("Field missing 'name'".to_string()))?
            .to_string();
        check_name(&name, "Field");

        let type_value = obj
            .get("type")
            .ok_or_else(|| SchemaError::InvalidSchema("Field missing 'type'".to_string()))?;

        Ok(FieldSchema {
            name,
            schema: self.parse(type_value)?,
            default: obj.get("default").cloned(),
        })
    }

    fn parse_enum_schema(&mut self, obj: &Map<String, Value>) -> Result<AvroSchema, SchemaError> {
        let (name, namespace) = self.name_parts(obj, "Enum")?;

        let symbols = obj
            .get("symbols")
            .and_then(|v| v.as_array())
            .ok_or_else(|| SchemaError::InvalidSchema("Enum missing 'symbols' array".to_string()))?
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect::<Vec<_>>();

        if symbols.is_empty() {
            return Err(SchemaError::InvalidSchema(
                "Enum must have at least one symbol".to_string(),
            ));
        }

        let schema = AvroSchema::Enum(EnumSchema {
            name,
            namespace,
            symbols,
        });
        self.register(schema.clone());
        Ok(schema)
    }

    fn parse_fixed_schema(&mut self, obj: &Map<String, Value>) -> Result<AvroSchema, SchemaError> {
        let (name, namespace) = self.name_parts(obj, "Fixed")?;

        let size = obj
            .get("size")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| SchemaError::InvalidSchema("Fixed missing 'size' field".to_string()))?
            as usize;

        let schema = AvroSchema::Fixed(FixedSchema {
            name,
            namespace,
            size,
        });
        self.register(schema.clone());
        Ok(schema)
    }

    fn register(&mut self, schema: AvroSchema) {
        let fullname = match &schema {
            AvroSchema::Enum(e) => e.fullname(),
            AvroSchema::Fixed(f) => f.fullname(),
            AvroSchema::Record(r) => r.fullname(),
            _ => return,
        };
        self.named_types.insert(fullname, schema);
    }

    fn resolve_name(&self, name: &str) -> String {
        match &self.current_namespace {
            Some(ns) if !name.contains('.') => format!("{}.{}", ns, name),
            _ => name.to_string(),
        }
    }
}

/// Avro names start with `[A-Za-z_]` and continue with `[A-Za-z0-9_]`.
/// Files in the wild break this often enough that it only warns.
fn check_name(name: &str, kind: &str) {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if !valid {
        warn!(name = %name, kind = %kind, "Invalid Avro name");
    }
}
