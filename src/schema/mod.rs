//! Declarative entity schemas and the write-time validator.
//!
//! A [`Schema`] is a list of [`FieldSpec`] constraints. Validation applies
//! defaults first, then trims, then checks presence, type and enum membership.
//! Fields that are not declared pass through untouched.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::db::Document;

pub mod entities;

/// Shared handle to a registered schema
pub type SchemaHandle = Arc<Schema>;

/// Storage type of a field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    /// Epoch milliseconds
    Date,
    Object(Schema),
    Array(Box<FieldType>),
}

impl FieldType {
    fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::Object(_) => "object",
            FieldType::Array(_) => "array",
        }
    }
}

/// Value used when a field is absent on write
#[derive(Debug, Clone, PartialEq)]
pub enum DefaultValue {
    Value(Value),
    Now,
}

/// Constraints for a single field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub default: Option<DefaultValue>,
    /// Closed set of allowed string values
    pub allowed: Option<Vec<String>>,
    pub trim: bool,
}

impl FieldSpec {
    pub fn new(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: false,
            default: None,
            allowed: None,
            trim: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(DefaultValue::Value(value));
        self
    }

    pub fn default_now(mut self) -> Self {
        self.default = Some(DefaultValue::Now);
        self
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.allowed = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn trim(mut self) -> Self {
        self.trim = true;
        self
    }
}

/// Why a document failed validation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationErrorKind {
    #[error("required field is missing")]
    Missing,
    #[error("value {value:?} is not one of {allowed:?}")]
    NotInEnum { value: String, allowed: Vec<String> },
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
    #[error("no schema registered")]
    UnknownEntity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub entity: String,
    pub path: String,
    pub kind: ValidationErrorKind,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}: {}", self.entity, self.kind)
        } else {
            write!(f, "{}.{}: {}", self.entity, self.path, self.kind)
        }
    }
}

impl std::error::Error for ValidationError {}

/// Shape of one entity
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub entity: String,
    pub fields: Vec<FieldSpec>,
    /// Maintain createdAt/updatedAt
    pub timestamps: bool,
}

impl Schema {
    pub fn new(entity: &str, fields: Vec<FieldSpec>) -> Self {
        Self {
            entity: entity.to_string(),
            fields,
            timestamps: false,
        }
    }

    pub fn with_timestamps(mut self) -> Self {
        self.timestamps = true;
        self
    }

    /// Apply defaults, trim and validate, returning the normalized document
    pub fn validate(&self, document: &Document, now: DateTime<Utc>) -> Result<Document, ValidationError> {
        self.walk(document, "", Some(now)).map_err(|(path, kind)| ValidationError {
            entity: self.entity.clone(),
            path,
            kind,
        })
    }

    /// Validate as stored, without defaults
    pub fn check(&self, document: &Document) -> Result<(), ValidationError> {
        self.walk(document, "", None)
            .map(|_| ())
            .map_err(|(path, kind)| ValidationError {
                entity: self.entity.clone(),
                path,
                kind,
            })
    }

    /// Validate only the top-level fields that `paths` write into.
    ///
    /// Used after bulk updates: a legacy document may break constraints the
    /// update never touches, and those must not block the update.
    pub fn check_fields<'a, I>(&self, document: &Document, paths: I) -> Result<(), ValidationError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.touched(paths).check(document)
    }

    /// Sub-schema holding the fields written by `paths`
    pub fn touched<'a, I>(&self, paths: I) -> Schema
    where
        I: IntoIterator<Item = &'a str>,
    {
        let roots: Vec<&str> = paths.into_iter().filter_map(|p| p.split('.').next()).collect();
        Schema {
            entity: self.entity.clone(),
            fields: self
                .fields
                .iter()
                .filter(|f| roots.contains(&f.name.as_str()))
                .cloned()
                .collect(),
            timestamps: false,
        }
    }

    fn walk(
        &self,
        document: &Document,
        prefix: &str,
        now: Option<DateTime<Utc>>,
    ) -> Result<Document, (String, ValidationErrorKind)> {
        let mut out = document.clone();

        for spec in &self.fields {
            let path = join_path(prefix, &spec.name);
            let mut value = document.get(&spec.name).cloned();

            if value.is_none() {
                if let (Some(default), Some(now)) = (&spec.default, now) {
                    value = Some(match default {
                        DefaultValue::Value(v) => v.clone(),
                        DefaultValue::Now => Value::from(now.timestamp_millis()),
                    });
                }
            }

            if spec.trim {
                if let Some(Value::String(s)) = value.as_mut() {
                    *s = s.trim().to_string();
                }
            }

            match value {
                None | Some(Value::Null) => {
                    if spec.required {
                        return Err((path, ValidationErrorKind::Missing));
                    }
                    if let Some(v) = value {
                        out.insert(spec.name.clone(), v);
                    }
                }
                Some(v) => {
                    if spec.required && v.as_str().map_or(false, str::is_empty) {
                        return Err((path, ValidationErrorKind::Missing));
                    }
                    let v = check_type(&spec.field_type, v, &path, now)?;
                    if let Some(allowed) = &spec.allowed {
                        let member = v.as_str().map_or(false, |s| allowed.iter().any(|a| a == s));
                        if !member {
                            return Err((
                                path,
                                ValidationErrorKind::NotInEnum {
                                    value: display_value(&v),
                                    allowed: allowed.clone(),
                                },
                            ));
                        }
                    }
                    out.insert(spec.name.clone(), v);
                }
            }
        }

        if self.timestamps {
            if let Some(now) = now {
                let millis = Value::from(now.timestamp_millis());
                out.entry("createdAt").or_insert_with(|| millis.clone());
                out.entry("updatedAt").or_insert(millis);
            }
        }

        Ok(out)
    }
}

fn check_type(
    field_type: &FieldType,
    value: Value,
    path: &str,
    now: Option<DateTime<Utc>>,
) -> Result<Value, (String, ValidationErrorKind)> {
    let mismatch = |v: &Value| {
        (
            path.to_string(),
            ValidationErrorKind::TypeMismatch {
                expected: field_type.name(),
                found: json_type(v),
            },
        )
    };

    match (field_type, value) {
        (FieldType::String, v @ Value::String(_)) => Ok(v),
        (FieldType::Number, v @ Value::Number(_)) => Ok(v),
        (FieldType::Boolean, v @ Value::Bool(_)) => Ok(v),
        (FieldType::Date, Value::Number(n)) if n.is_i64() => Ok(Value::Number(n)),
        (FieldType::Object(schema), Value::Object(map)) => schema.walk(&map, path, now).map(Value::Object),
        (FieldType::Array(elem), Value::Array(items)) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| check_type(elem, item, &format!("{}.{}", path, i), now))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        (_, v) => Err(mismatch(&v)),
    }
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Registry of entity schemas and the collections they are stored in
#[derive(Debug, Default, Clone)]
pub struct SchemaRegistry {
    schemas: HashMap<String, SchemaHandle>,
    collections: HashMap<String, String>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity. Top-level entities always carry timestamps.
    pub fn define(&mut self, entity: &str, collection: &str, fields: Vec<FieldSpec>) -> SchemaHandle {
        let schema = Arc::new(Schema::new(entity, fields).with_timestamps());
        self.schemas.insert(entity.to_string(), schema.clone());
        self.collections.insert(collection.to_string(), entity.to_string());
        schema
    }

    pub fn for_collection(&self, collection: &str) -> Option<SchemaHandle> {
        self.collections
            .get(collection)
            .and_then(|entity| self.schemas.get(entity))
            .cloned()
    }

    pub fn validate(&self, entity: &str, document: &Document) -> Result<Document, ValidationError> {
        self.validate_at(entity, document, Utc::now())
    }

    pub fn validate_at(
        &self,
        entity: &str,
        document: &Document,
        now: DateTime<Utc>,
    ) -> Result<Document, ValidationError> {
        self.lookup(entity)?.validate(document, now)
    }

    pub fn check(&self, entity: &str, document: &Document) -> Result<(), ValidationError> {
        self.lookup(entity)?.check(document)
    }

    fn lookup(&self, entity: &str) -> Result<&SchemaHandle, ValidationError> {
        self.schemas.get(entity).ok_or_else(|| ValidationError {
            entity: entity.to_string(),
            path: String::new(),
            kind: ValidationErrorKind::UnknownEntity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry.define(
            "Widget",
            "widgets",
            vec![
                FieldSpec::new("name", FieldType::String).required().trim(),
                FieldSpec::new("kind", FieldType::String)
                    .one_of(&["small", "large"])
                    .default_value(json!("small")),
                FieldSpec::new("seenAt", FieldType::Date).default_now(),
            ],
        );
        registry
    }

    #[test]
    fn test_defaults_applied_before_validation() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let out = registry()
            .validate_at("Widget", &doc(json!({"name": "  bolt "})), now)
            .unwrap();

        assert_eq!(out["name"], json!("bolt"));
        assert_eq!(out["kind"], json!("small"));
        assert_eq!(out["seenAt"], json!(now.timestamp_millis()));
        assert_eq!(out["createdAt"], json!(now.timestamp_millis()));
        assert_eq!(out["updatedAt"], json!(now.timestamp_millis()));
    }

    #[test]
    fn test_missing_required_field() {
        let err = registry().validate("Widget", &doc(json!({"kind": "large"}))).unwrap_err();
        assert_eq!(err.path, "name");
        assert_eq!(err.kind, ValidationErrorKind::Missing);
    }

    #[test]
    fn test_blank_required_string_is_missing() {
        let err = registry().validate("Widget", &doc(json!({"name": "   "}))).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::Missing);
    }

    #[test]
    fn test_enum_violation() {
        let err = registry()
            .validate("Widget", &doc(json!({"name": "bolt", "kind": "huge"})))
            .unwrap_err();
        assert!(matches!(err.kind, ValidationErrorKind::NotInEnum { ref value, .. } if value == "huge"));
        assert_eq!(err.to_string(), "Widget.kind: value \"huge\" is not one of [\"small\", \"large\"]");
    }

    #[test]
    fn test_type_mismatch_on_date() {
        let err = registry()
            .validate("Widget", &doc(json!({"name": "bolt", "seenAt": "yesterday"})))
            .unwrap_err();
        assert_eq!(
            err.kind,
            ValidationErrorKind::TypeMismatch {
                expected: "date",
                found: "string"
            }
        );
    }

    #[test]
    fn test_unknown_fields_pass_through() {
        let out = registry()
            .validate("Widget", &doc(json!({"name": "bolt", "tenantId": "acme"})))
            .unwrap();
        assert_eq!(out["tenantId"], json!("acme"));
    }

    #[test]
    fn test_check_does_not_apply_defaults() {
        let registry = registry();
        registry.check("Widget", &doc(json!({"name": "bolt"}))).unwrap();
        assert!(registry.check("Widget", &doc(json!({}))).is_err());
    }

    #[test]
    fn test_unknown_entity() {
        let err = registry().validate("Gadget", &doc(json!({}))).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::UnknownEntity);
    }

    #[test]
    fn test_collection_lookup() {
        let registry = registry();
        assert_eq!(registry.for_collection("widgets").unwrap().entity, "Widget");
        assert!(registry.for_collection("gadgets").is_none());
    }

    #[test]
    fn test_check_fields_ignores_untouched_constraints() {
        let schema = registry().for_collection("widgets").unwrap();
        // missing name and a bad seenAt are not written, so they do not count
        let legacy = doc(json!({"kind": "large", "seenAt": "yesterday"}));
        schema.check_fields(&legacy, ["kind"]).unwrap();
        assert!(schema.check(&legacy).is_err());

        let err = schema
            .check_fields(&doc(json!({"kind": "huge"})), ["kind"])
            .unwrap_err();
        assert_eq!(err.path, "kind");
        assert!(matches!(err.kind, ValidationErrorKind::NotInEnum { .. }));

        let err = schema.check_fields(&doc(json!({})), ["name.first"]).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::Missing);
    }
}
