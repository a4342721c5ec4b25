//! Schema facade over the external validator
//!
//! The dispatch pipeline never validates input itself; it calls through the
//! [`Schema`] trait, which an external validation engine implements. The
//! crate ships one implementation, [`ObjectSchema`], a declarative rules
//! validator used by the test suite and by applications that don't bring
//! their own engine.
//!
//! # Example
//!
//! ```rust,ignore
//! use nexus_rpc::schema::{FieldSchema, ObjectSchema, ParseMode};
//!
//! let schema = ObjectSchema::new()
//!     .field("id", FieldSchema::string())
//!     .field("age", FieldSchema::integer().range(0, 150).optional())
//!     .field("email", FieldSchema::string().email().optional());
//!
//! let typed = schema.parse(&serde_json::json!({"id": "42"}), ParseMode::Coerce)?;
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// How strictly raw values are matched against the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Values must already have the declared type.
    Strict,
    /// String-keyed raw data may be coerced into typed values
    /// (e.g. `"42"` parses as the integer 42). Used for input validation.
    Coerce,
}

/// Validation error for a single location in the input.
///
/// `path` is the sequence of segments into the input value; the empty path
/// refers to the input itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Segments into the input (field names, indexes rendered as strings)
    pub path: Vec<String>,
    /// Human-readable error message
    pub message: String,
}

impl ValidationError {
    /// Create a validation error at the given path.
    pub fn new(path: Vec<String>, message: impl Into<String>) -> Self {
        Self {
            path,
            message: message.into(),
        }
    }

    /// Create a validation error at the input root.
    pub fn root(message: impl Into<String>) -> Self {
        Self::new(Vec::new(), message)
    }

    /// Create a validation error for a single top-level field.
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(vec![field.into()], message)
    }

    /// The dotted rendering of the path ("a.b.c"; empty for the root).
    pub fn dotted(&self) -> String {
        self.path.join(".")
    }
}

/// Group validation errors by dotted field path, preserving message order.
pub fn group_errors(errors: &[ValidationError]) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for error in errors {
        grouped
            .entry(error.dotted())
            .or_default()
            .push(error.message.clone());
    }
    grouped
}

/// Render grouped validation errors as a JSON details payload.
pub fn errors_to_details(errors: &[ValidationError]) -> serde_json::Value {
    let grouped = group_errors(errors);
    let mut map = serde_json::Map::new();
    for (path, messages) in grouped {
        map.insert(
            path,
            serde_json::Value::Array(
                messages.into_iter().map(serde_json::Value::String).collect(),
            ),
        );
    }
    serde_json::Value::Object(map)
}

/// Opaque schema handle produced by a validation engine.
///
/// `parse` turns raw wire data into a typed value or a list of validation
/// errors; `to_json_schema` optionally renders the schema for documentation
/// consumers.
pub trait Schema: Send + Sync {
    /// Parse a raw value into its typed form.
    fn parse(
        &self,
        raw: &serde_json::Value,
        mode: ParseMode,
    ) -> Result<serde_json::Value, Vec<ValidationError>>;

    /// Render this schema as a JSON Schema document, when supported.
    fn to_json_schema(&self) -> Option<serde_json::Value> {
        None
    }
}

/// Shared handle to a schema.
pub type SchemaRef = Arc<dyn Schema>;

// =============================================================================
// Built-in Object Schema
// =============================================================================

/// The shape a field must have.
#[derive(Debug, Clone)]
enum FieldKind {
    String {
        min_len: Option<usize>,
        max_len: Option<usize>,
        pattern: Option<regex::Regex>,
        email: bool,
    },
    Integer {
        min: Option<i64>,
        max: Option<i64>,
    },
    Number,
    Boolean,
    Any,
    Array(Box<FieldSchema>),
    Object(ObjectSchema),
}

/// A single field rule inside an [`ObjectSchema`].
///
/// Fields are required by default; call [`FieldSchema::optional`] to relax
/// that.
#[derive(Debug, Clone)]
pub struct FieldSchema {
    kind: FieldKind,
    required: bool,
}

impl FieldSchema {
    fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            required: true,
        }
    }

    /// A string field.
    pub fn string() -> Self {
        Self::new(FieldKind::String {
            min_len: None,
            max_len: None,
            pattern: None,
            email: false,
        })
    }

    /// An integer field.
    pub fn integer() -> Self {
        Self::new(FieldKind::Integer {
            min: None,
            max: None,
        })
    }

    /// A floating-point number field.
    pub fn number() -> Self {
        Self::new(FieldKind::Number)
    }

    /// A boolean field.
    pub fn boolean() -> Self {
        Self::new(FieldKind::Boolean)
    }

    /// A field accepting any JSON value.
    pub fn any() -> Self {
        Self::new(FieldKind::Any)
    }

    /// An array whose items all match the given field schema.
    pub fn array(items: FieldSchema) -> Self {
        Self::new(FieldKind::Array(Box::new(items)))
    }

    /// A nested object.
    pub fn object(schema: ObjectSchema) -> Self {
        Self::new(FieldKind::Object(schema))
    }

    /// Mark the field as optional.
    #[must_use = "This method returns a new FieldSchema and does not modify self"]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Require a minimum string length.
    #[must_use = "This method returns a new FieldSchema and does not modify self"]
    pub fn min_len(mut self, min: usize) -> Self {
        if let FieldKind::String { min_len, .. } = &mut self.kind {
            *min_len = Some(min);
        }
        self
    }

    /// Require a maximum string length.
    #[must_use = "This method returns a new FieldSchema and does not modify self"]
    pub fn max_len(mut self, max: usize) -> Self {
        if let FieldKind::String { max_len, .. } = &mut self.kind {
            *max_len = Some(max);
        }
        self
    }

    /// Require the string to match a regex pattern. An invalid pattern is a
    /// programming error and is reported at validation time.
    #[must_use = "This method returns a new FieldSchema and does not modify self"]
    pub fn pattern(mut self, pattern: &str) -> Self {
        if let FieldKind::String {
            pattern: slot,
            ..
        } = &mut self.kind
        {
            match regex::Regex::new(pattern) {
                Ok(re) => *slot = Some(re),
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Invalid field pattern");
                }
            }
        }
        self
    }

    /// Require the string to look like an email address.
    #[must_use = "This method returns a new FieldSchema and does not modify self"]
    pub fn email(mut self) -> Self {
        if let FieldKind::String { email, .. } = &mut self.kind {
            *email = true;
        }
        self
    }

    /// Require an inclusive integer range.
    #[must_use = "This method returns a new FieldSchema and does not modify self"]
    pub fn range(mut self, lo: i64, hi: i64) -> Self {
        if let FieldKind::Integer { min, max } = &mut self.kind {
            *min = Some(lo);
            *max = Some(hi);
        }
        self
    }

    fn type_name(&self) -> &'static str {
        match self.kind {
            FieldKind::String { .. } => "string",
            FieldKind::Integer { .. } => "integer",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
            FieldKind::Any => "any",
            FieldKind::Array(_) => "array",
            FieldKind::Object(_) => "object",
        }
    }

    fn check(
        &self,
        path: &[String],
        field: &str,
        raw: &serde_json::Value,
        mode: ParseMode,
        errors: &mut Vec<ValidationError>,
    ) -> serde_json::Value {
        use serde_json::Value;

        let mut at = |message: String| {
            let mut p = path.to_vec();
            p.push(field.to_string());
            errors.push(ValidationError::new(p, message));
        };

        match &self.kind {
            FieldKind::Any => raw.clone(),
            FieldKind::String {
                min_len,
                max_len,
                pattern,
                email,
            } => {
                let value = match (raw, mode) {
                    (Value::String(s), _) => s.clone(),
                    // Numbers arriving for a string field stringify under
                    // coercion; anything else is a type error.
                    (Value::Number(n), ParseMode::Coerce) => n.to_string(),
                    _ => {
                        at(format!("{} must be a string", field));
                        return raw.clone();
                    }
                };
                if let Some(min) = min_len
                    && value.len() < *min
                {
                    at(format!("{} must be at least {} characters", field, min));
                }
                if let Some(max) = max_len
                    && value.len() > *max
                {
                    at(format!("{} must be at most {} characters", field, max));
                }
                if let Some(re) = pattern
                    && !re.is_match(&value)
                {
                    at(format!("{} must match pattern: {}", field, re.as_str()));
                }
                if *email && !looks_like_email(&value) {
                    at(format!("{} must be a valid email address", field));
                }
                Value::String(value)
            }
            FieldKind::Integer { min, max } => {
                let parsed = match (raw, mode) {
                    (Value::Number(n), _) if n.is_i64() => n.as_i64(),
                    (Value::String(s), ParseMode::Coerce) => s.trim().parse::<i64>().ok(),
                    _ => None,
                };
                let Some(value) = parsed else {
                    at(format!("{} must be an integer", field));
                    return raw.clone();
                };
                if let (Some(lo), Some(hi)) = (min, max)
                    && (value < *lo || value > *hi)
                {
                    at(format!("{} must be between {} and {}", field, lo, hi));
                } else {
                    if let Some(lo) = min
                        && value < *lo
                    {
                        at(format!("{} must be at least {}", field, lo));
                    }
                    if let Some(hi) = max
                        && value > *hi
                    {
                        at(format!("{} must be at most {}", field, hi));
                    }
                }
                Value::from(value)
            }
            FieldKind::Number => {
                let parsed = match (raw, mode) {
                    (Value::Number(n), _) => n.as_f64(),
                    (Value::String(s), ParseMode::Coerce) => s.trim().parse::<f64>().ok(),
                    _ => None,
                };
                match parsed {
                    Some(value) => serde_json::Number::from_f64(value)
                        .map(Value::Number)
                        .unwrap_or_else(|| raw.clone()),
                    None => {
                        at(format!("{} must be a number", field));
                        raw.clone()
                    }
                }
            }
            FieldKind::Boolean => match (raw, mode) {
                (Value::Bool(b), _) => Value::Bool(*b),
                (Value::String(s), ParseMode::Coerce) if s == "true" || s == "false" => {
                    Value::Bool(s == "true")
                }
                _ => {
                    at(format!("{} must be a boolean", field));
                    raw.clone()
                }
            },
            FieldKind::Array(items) => {
                let Value::Array(raw_items) = raw else {
                    at(format!("{} must be an array", field));
                    return raw.clone();
                };
                let mut out = Vec::with_capacity(raw_items.len());
                let mut item_path = path.to_vec();
                item_path.push(field.to_string());
                for (i, item) in raw_items.iter().enumerate() {
                    out.push(items.check(&item_path, &i.to_string(), item, mode, errors));
                }
                Value::Array(out)
            }
            FieldKind::Object(schema) => {
                let mut nested_path = path.to_vec();
                nested_path.push(field.to_string());
                schema.parse_at(&nested_path, raw, mode, errors)
            }
        }
    }

    fn json_schema(&self) -> serde_json::Value {
        match &self.kind {
            FieldKind::Object(schema) => schema.json_schema_value(),
            FieldKind::Array(items) => serde_json::json!({
                "type": "array",
                "items": items.json_schema(),
            }),
            _ => serde_json::json!({"type": self.type_name()}),
        }
    }
}

// Deliberately simple: one '@', a dot somewhere in the domain, no dangling
// separators. Anything stricter belongs in a real validation engine.
fn looks_like_email(value: &str) -> bool {
    value.contains('@')
        && value.split('@').count() == 2
        && value
            .split('@')
            .next_back()
            .map(|domain| domain.contains('.'))
            .unwrap_or(false)
        && !value.starts_with('@')
        && !value.ends_with('@')
        && !value.ends_with('.')
}

/// Declarative object validator implementing [`Schema`].
///
/// Unknown keys are preserved in the typed output unless
/// [`ObjectSchema::deny_unknown`] is set.
#[derive(Debug, Clone, Default)]
pub struct ObjectSchema {
    fields: Vec<(String, FieldSchema)>,
    deny_unknown: bool,
}

impl ObjectSchema {
    /// Create an empty object schema.
    pub fn new() -> Self {
        trace!("Creating new ObjectSchema");
        Self::default()
    }

    /// Add a field rule.
    #[must_use = "This method returns a new ObjectSchema and does not modify self"]
    pub fn field(mut self, name: impl Into<String>, schema: FieldSchema) -> Self {
        self.fields.push((name.into(), schema));
        self
    }

    /// Reject inputs carrying keys the schema does not declare.
    #[must_use = "This method returns a new ObjectSchema and does not modify self"]
    pub fn deny_unknown(mut self) -> Self {
        self.deny_unknown = true;
        self
    }

    fn parse_at(
        &self,
        path: &[String],
        raw: &serde_json::Value,
        mode: ParseMode,
        errors: &mut Vec<ValidationError>,
    ) -> serde_json::Value {
        let serde_json::Value::Object(map) = raw else {
            errors.push(ValidationError::new(
                path.to_vec(),
                "must be an object".to_string(),
            ));
            return raw.clone();
        };

        let mut out = serde_json::Map::new();
        for (name, field) in &self.fields {
            match map.get(name) {
                Some(serde_json::Value::Null) | None => {
                    if field.required {
                        let mut p = path.to_vec();
                        p.push(name.clone());
                        errors.push(ValidationError::new(p, format!("{} is required", name)));
                    }
                }
                Some(value) => {
                    out.insert(name.clone(), field.check(path, name, value, mode, errors));
                }
            }
        }

        for (key, value) in map {
            if self.fields.iter().any(|(name, _)| name == key) {
                continue;
            }
            if self.deny_unknown {
                let mut p = path.to_vec();
                p.push(key.clone());
                errors.push(ValidationError::new(p, format!("{} is not recognised", key)));
            } else {
                out.insert(key.clone(), value.clone());
            }
        }

        serde_json::Value::Object(out)
    }

    fn json_schema_value(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for (name, field) in &self.fields {
            properties.insert(name.clone(), field.json_schema());
            if field.required {
                required.push(serde_json::Value::String(name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

impl Schema for ObjectSchema {
    fn parse(
        &self,
        raw: &serde_json::Value,
        mode: ParseMode,
    ) -> Result<serde_json::Value, Vec<ValidationError>> {
        let mut errors = Vec::new();
        let typed = self.parse_at(&[], raw, mode, &mut errors);
        if errors.is_empty() {
            trace!("Schema validation passed");
            Ok(typed)
        } else {
            let paths: Vec<_> = errors.iter().map(ValidationError::dotted).collect();
            debug!(error_count = errors.len(), fields = ?paths, "Schema validation failed");
            Err(errors)
        }
    }

    fn to_json_schema(&self) -> Option<serde_json::Value> {
        Some(self.json_schema_value())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_schema() -> ObjectSchema {
        ObjectSchema::new()
            .field("id", FieldSchema::string())
            .field("age", FieldSchema::integer().range(0, 150).optional())
            .field("email", FieldSchema::string().email().optional())
    }

    #[test]
    fn test_parse_accepts_valid_input() {
        let typed = user_schema()
            .parse(&json!({"id": "42", "age": 30}), ParseMode::Strict)
            .unwrap();
        assert_eq!(typed["id"], "42");
        assert_eq!(typed["age"], 30);
    }

    #[test]
    fn test_missing_required_field() {
        let errors = user_schema()
            .parse(&json!({"age": 30}), ParseMode::Strict)
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].dotted(), "id");
        assert!(errors[0].message.contains("required"));
    }

    #[test]
    fn test_coercion_parses_string_keyed_data() {
        let raw = json!({"id": "42", "age": "30"});

        let strict = user_schema().parse(&raw, ParseMode::Strict);
        assert!(strict.is_err());

        let typed = user_schema().parse(&raw, ParseMode::Coerce).unwrap();
        assert_eq!(typed["age"], 30);
    }

    #[test]
    fn test_range_violation() {
        let errors = user_schema()
            .parse(&json!({"id": "1", "age": 200}), ParseMode::Strict)
            .unwrap_err();
        assert!(errors[0].message.contains("between 0 and 150"));
    }

    #[test]
    fn test_email_rule() {
        let ok = user_schema().parse(
            &json!({"id": "1", "email": "a@example.com"}),
            ParseMode::Strict,
        );
        assert!(ok.is_ok());

        let errors = user_schema()
            .parse(&json!({"id": "1", "email": "not-an-email"}), ParseMode::Strict)
            .unwrap_err();
        assert!(errors[0].message.contains("email"));
    }

    #[test]
    fn test_unknown_keys_preserved_by_default() {
        let typed = user_schema()
            .parse(&json!({"id": "1", "extra": true}), ParseMode::Strict)
            .unwrap();
        assert_eq!(typed["extra"], true);
    }

    #[test]
    fn test_deny_unknown() {
        let schema = user_schema().deny_unknown();
        let errors = schema
            .parse(&json!({"id": "1", "extra": true}), ParseMode::Strict)
            .unwrap_err();
        assert_eq!(errors[0].dotted(), "extra");
    }

    #[test]
    fn test_nested_object_error_paths() {
        let schema = ObjectSchema::new().field(
            "address",
            FieldSchema::object(ObjectSchema::new().field("city", FieldSchema::string())),
        );
        let errors = schema
            .parse(&json!({"address": {"city": 7}}), ParseMode::Strict)
            .unwrap_err();
        assert_eq!(errors[0].dotted(), "address.city");
    }

    #[test]
    fn test_group_errors_by_dotted_path() {
        let errors = vec![
            ValidationError::field("name", "name is required"),
            ValidationError::field("name", "name must be at least 2 characters"),
            ValidationError::field("age", "age must be an integer"),
        ];
        let grouped = group_errors(&errors);
        assert_eq!(grouped["name"].len(), 2);
        assert_eq!(grouped["age"].len(), 1);
    }

    #[test]
    fn test_errors_to_details_shape() {
        let errors = vec![ValidationError::field("age", "age must be an integer")];
        let details = errors_to_details(&errors);
        assert_eq!(details["age"][0], "age must be an integer");
    }

    #[test]
    fn test_to_json_schema() {
        let schema = user_schema().to_json_schema().unwrap();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["id"]["type"], "string");
        assert!(
            schema["required"]
                .as_array()
                .unwrap()
                .contains(&json!("id"))
        );
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    proptest! {
        /// Property: integer coercion accepts every i64 rendered as a string.
        #[test]
        fn prop_integer_coercion_roundtrip(n in any::<i64>()) {
            let schema = ObjectSchema::new().field("n", FieldSchema::integer());
            let typed = schema
                .parse(&json!({"n": n.to_string()}), ParseMode::Coerce)
                .unwrap();
            prop_assert_eq!(typed["n"].as_i64().unwrap(), n);
        }

        /// Property: strict mode never accepts string-typed integers.
        #[test]
        fn prop_strict_rejects_string_integers(n in any::<i64>()) {
            let schema = ObjectSchema::new().field("n", FieldSchema::integer());
            let result = schema.parse(&json!({"n": n.to_string()}), ParseMode::Strict);
            prop_assert!(result.is_err());
        }

        /// Property: every reported error path points into the input.
        #[test]
        fn prop_error_paths_name_declared_fields(
            value in prop_oneof![
                Just(json!(null)),
                Just(json!(true)),
                Just(json!([1, 2])),
                "[a-z]{0,8}".prop_map(|s| json!(s)),
            ]
        ) {
            let schema = ObjectSchema::new()
                .field("name", FieldSchema::string().min_len(2));
            if let Err(errors) = schema.parse(&json!({"name": value}), ParseMode::Strict) {
                for error in errors {
                    prop_assert_eq!(error.dotted(), "name");
                }
            }
        }
    }
}
