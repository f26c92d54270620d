//! Field declarations and validation.
//!
//! Every entity type carries a static field table: which fields exist, what
//! JSON type they hold, and whether they are plain (last write wins) or
//! tracked (backed by a revision log). The merge engine, the reconstructor and
//! the projection builder all read this table; nothing inspects values at
//! runtime to decide how a field behaves.

use crate::document::{ID_KEY, REVISIONS_KEY};
use crate::{error::Result, Error, SchemaVersion};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

/// Field types supported in schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    Timestamp,
    /// Ordered collection of JSON values
    Array,
    /// Arbitrary nested JSON
    Json,
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldType::String => write!(f, "String"),
            FieldType::Int => write!(f, "Int"),
            FieldType::Float => write!(f, "Float"),
            FieldType::Bool => write!(f, "Bool"),
            FieldType::Timestamp => write!(f, "Timestamp"),
            FieldType::Array => write!(f, "Array"),
            FieldType::Json => write!(f, "Json"),
        }
    }
}

/// Whether a field keeps history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Only the latest value is kept.
    #[default]
    Plain,
    /// Every distinct value is kept in a revision log.
    Tracked,
}

/// How two values of a tracked field are compared for the no-op check.
///
/// `null` and a missing value are the same "absent" value under both
/// strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Equality {
    /// Value equality; numbers compare numerically (`5 == 5.0`).
    Scalar,
    /// Element-wise equality over ordered sequences.
    Sequence,
}

impl Equality {
    /// Whether `current` and `incoming` hold the same value.
    pub fn matches(self, current: &Value, incoming: &Value) -> bool {
        match (current, incoming) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Array(a), Value::Array(b)) if self == Equality::Sequence => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| scalar_eq(x, y))
            }
            (a, b) => scalar_eq(a, b),
        }
    }
}

fn scalar_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) if x.is_f64() || y.is_f64() => {
            x.as_f64() == y.as_f64()
        }
        _ => a == b,
    }
}

/// Definition of a field in an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Field type
    pub field_type: FieldType,
    /// Plain or tracked
    #[serde(default)]
    pub kind: FieldKind,
    /// Whether this field must be present in submitted snapshots
    #[serde(default)]
    pub required: bool,
}

impl FieldDef {
    /// Declare a plain (last write wins) field.
    pub fn plain(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            kind: FieldKind::Plain,
            required: false,
        }
    }

    /// Declare a tracked (history keeping) field.
    pub fn tracked(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            kind: FieldKind::Tracked,
            required: false,
        }
    }

    /// Builder-style: mark the field as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn is_tracked(&self) -> bool {
        self.kind == FieldKind::Tracked
    }

    /// The comparison used to suppress duplicate revisions.
    pub fn equality(&self) -> Equality {
        match self.field_type {
            FieldType::Array => Equality::Sequence,
            _ => Equality::Scalar,
        }
    }

    /// Validate a JSON value against this field definition.
    pub fn validate(&self, value: Option<&Value>) -> Result<()> {
        match value {
            None | Some(Value::Null) if self.required => {
                Err(Error::MissingRequiredField(self.name.clone()))
            }
            None | Some(Value::Null) => Ok(()),
            Some(v) => self.validate_type(v),
        }
    }

    fn validate_type(&self, value: &Value) -> Result<()> {
        let valid = match self.field_type {
            FieldType::String => value.is_string(),
            FieldType::Int => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Timestamp => value.is_u64() || value.is_i64(),
            FieldType::Array => value.is_array(),
            FieldType::Json => true,
        };

        if valid {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                field: self.name.clone(),
                expected: self.field_type.to_string(),
                got: json_type_name(value).to_string(),
            })
        }
    }
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Int",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "Array",
        Value::Object(_) => "Object",
    }
}

/// Field table for one entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySchema {
    /// Entity type (collection) name
    pub name: String,
    /// Field definitions
    pub fields: Vec<FieldDef>,
}

impl EntitySchema {
    /// Create an entity schema, rejecting duplicate or reserved field names.
    pub fn try_new(name: impl Into<String>, fields: Vec<FieldDef>) -> Result<Self> {
        let schema = Self {
            name: name.into(),
            fields,
        };
        schema.check()?;
        Ok(schema)
    }

    fn check(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidSchema("entity name must not be empty".into()));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() {
                return Err(Error::InvalidSchema(format!(
                    "{}: field name must not be empty",
                    self.name
                )));
            }
            if field.name == ID_KEY || field.name == REVISIONS_KEY {
                return Err(Error::InvalidSchema(format!(
                    "{}: '{}' is a reserved field name",
                    self.name, field.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(Error::InvalidSchema(format!(
                    "{}: duplicate field '{}'",
                    self.name, field.name
                )));
            }
        }
        Ok(())
    }

    /// Look up a field declaration.
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn tracked_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.is_tracked())
    }

    pub fn plain_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| !f.is_tracked())
    }

    /// Check that `field` can be filtered or sorted on.
    ///
    /// Only the id and plain fields hold scalar values in the store.
    pub fn check_queryable(&self, field: &str) -> Result<()> {
        if field == ID_KEY {
            return Ok(());
        }
        match self.field(field) {
            Some(def) if !def.is_tracked() => Ok(()),
            Some(_) => Err(Error::InvalidQuery(format!(
                "'{field}' is tracked; only plain fields can be filtered or sorted on"
            ))),
            None => Err(Error::UnknownField(field.to_string())),
        }
    }

    /// Validate a snapshot payload against the field table.
    pub fn validate_payload(&self, payload: &Map<String, Value>) -> Result<()> {
        if let Some(unknown) = payload.keys().find(|k| self.field(k).is_none()) {
            return Err(Error::UnknownField(unknown.clone()));
        }

        for field in &self.fields {
            field.validate(payload.get(&field.name))?;
        }

        Ok(())
    }
}

/// Registry of all entity types served by one store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    /// Schema version
    pub version: SchemaVersion,
    /// Entity schemas by name
    pub entities: HashMap<String, EntitySchema>,
}

impl Schema {
    /// Create a new schema.
    pub fn new(version: SchemaVersion) -> Self {
        Self {
            version,
            entities: HashMap::new(),
        }
    }

    /// Add an entity type to the schema.
    pub fn add_entity(&mut self, entity: EntitySchema) -> &mut Self {
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    /// Builder-style method to add an entity type.
    pub fn with_entity(mut self, entity: EntitySchema) -> Self {
        self.add_entity(entity);
        self
    }

    /// Get an entity schema by name.
    pub fn entity(&self, name: &str) -> Result<&EntitySchema> {
        self.entities
            .get(name)
            .ok_or_else(|| Error::EntityTypeNotFound(name.to_string()))
    }

    /// Parse a schema from JSON and check every entity's field table.
    pub fn from_json(json: &str) -> Result<Self> {
        let schema: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSchema(e.to_string()))?;

        for (key, entity) in &schema.entities {
            if *key != entity.name {
                return Err(Error::InvalidSchema(format!(
                    "entity registered as '{}' is named '{}'",
                    key, entity.name
                )));
            }
            entity.check()?;
        }

        Ok(schema)
    }
}
