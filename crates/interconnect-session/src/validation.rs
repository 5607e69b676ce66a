//! Runtime type checking for payloads crossing the session boundary.
//!
//! A [`Validator`] turns an untyped JSON value into the method's declared
//! input (or a caller's expected result), or reports every failing field with
//! a JSONPath-like location such as `$.source.image` or `$.args[1]`.

use std::fmt;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One failed check.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Location of the offending value (`$` is the root).
    pub path: String,
    /// What was wrong.
    pub message: String,
}

impl ValidationIssue {
    /// Build an issue.
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Checks (and possibly converts) an untyped payload.
pub trait Validator: Send + Sync + 'static {
    /// Typed value produced on success.
    type Output: Send + 'static;

    /// Validate `value`, returning every issue found on failure.
    fn validate(&self, value: &Value) -> Result<Self::Output, Vec<ValidationIssue>>;
}

/// Accepts anything and returns it unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnyValue;

impl Validator for AnyValue {
    type Output = Value;

    fn validate(&self, value: &Value) -> Result<Value, Vec<ValidationIssue>> {
        Ok(value.clone())
    }
}

/// Validates by deserializing into `T`.
///
/// serde stops at the first mismatch, so at most one issue is reported, at
/// the root path.
pub struct Schema<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Schema<T> {
    /// Validator for `T`.
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for Schema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Schema<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Schema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Schema<{}>", std::any::type_name::<T>())
    }
}

impl<T> Validator for Schema<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = T;

    fn validate(&self, value: &Value) -> Result<T, Vec<ValidationIssue>> {
        T::deserialize(value).map_err(|err| vec![ValidationIssue::new("$", err.to_string())])
    }
}

/// Structural description of a JSON value.
#[derive(Clone, Debug, PartialEq)]
pub enum Shape {
    /// Any value, including `null`.
    Any,
    /// A string.
    String,
    /// Any number.
    Number,
    /// A number without a fractional part.
    Integer,
    /// `true` or `false`.
    Boolean,
    /// `null`.
    Null,
    /// Exactly this value.
    Literal(Value),
    /// One of these values.
    OneOf(Vec<Value>),
    /// An array whose items all match.
    Array(Box<Shape>),
    /// An object whose values all match.
    Record(Box<Shape>),
    /// An object with declared fields. Undeclared fields are allowed.
    Object(Vec<Field>),
    /// `null` or the inner shape.
    Nullable(Box<Shape>),
    /// Matches if any branch matches.
    Union(Vec<Shape>),
}

/// A declared object field.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    /// Field name.
    pub name: String,
    /// Field shape.
    pub shape: Shape,
    /// Whether the field must be present.
    pub required: bool,
}

/// Builder for [`Shape::Object`].
#[derive(Clone, Debug, Default)]
pub struct ObjectShape {
    fields: Vec<Field>,
}

impl ObjectShape {
    /// Declare a required field.
    #[must_use]
    pub fn required(mut self, name: impl Into<String>, shape: impl Into<Shape>) -> Self {
        self.fields.push(Field {
            name: name.into(),
            shape: shape.into(),
            required: true,
        });
        self
    }

    /// Declare an optional field. A present value must still match.
    #[must_use]
    pub fn optional(mut self, name: impl Into<String>, shape: impl Into<Shape>) -> Self {
        self.fields.push(Field {
            name: name.into(),
            shape: shape.into(),
            required: false,
        });
        self
    }

    /// Finish the object.
    pub fn build(self) -> Shape {
        Shape::Object(self.fields)
    }
}

impl From<ObjectShape> for Shape {
    fn from(object: ObjectShape) -> Self {
        object.build()
    }
}

impl Shape {
    /// Start an object shape.
    pub fn object() -> ObjectShape {
        ObjectShape::default()
    }

    /// Array of `item`.
    pub fn array(item: impl Into<Shape>) -> Self {
        Self::Array(Box::new(item.into()))
    }

    /// String-keyed map of `value`.
    pub fn record(value: impl Into<Shape>) -> Self {
        Self::Record(Box::new(value.into()))
    }

    /// Exactly `value`.
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// One of `values`.
    pub fn one_of<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::OneOf(values.into_iter().map(Into::into).collect())
    }

    /// Any of `shapes`.
    pub fn union(shapes: impl IntoIterator<Item = Shape>) -> Self {
        Self::Union(shapes.into_iter().collect())
    }

    /// Also accept `null`.
    #[must_use]
    pub fn nullable(self) -> Self {
        Self::Nullable(Box::new(self))
    }

    fn check(&self, value: &Value, path: &str, issues: &mut Vec<ValidationIssue>) {
        let mismatch = |issues: &mut Vec<ValidationIssue>, expected: &str| {
            issues.push(ValidationIssue::new(
                path,
                format!("expected {expected}, received {}", type_name(value)),
            ));
        };

        match self {
            Self::Any => {}
            Self::String => {
                if !value.is_string() {
                    mismatch(issues, "string");
                }
            }
            Self::Number => {
                if !value.is_number() {
                    mismatch(issues, "number");
                }
            }
            Self::Integer => {
                let integral = value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|n| n.fract() == 0.0);
                if !integral {
                    mismatch(issues, "integer");
                }
            }
            Self::Boolean => {
                if !value.is_boolean() {
                    mismatch(issues, "boolean");
                }
            }
            Self::Null => {
                if !value.is_null() {
                    mismatch(issues, "null");
                }
            }
            Self::Literal(expected) => {
                if value != expected {
                    issues.push(ValidationIssue::new(path, format!("expected {expected}")));
                }
            }
            Self::OneOf(options) => {
                if !options.contains(value) {
                    let listed = options
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(" | ");
                    issues.push(ValidationIssue::new(path, format!("expected one of {listed}")));
                }
            }
            Self::Array(item) => match value.as_array() {
                Some(items) => {
                    for (index, entry) in items.iter().enumerate() {
                        item.check(entry, &format!("{path}[{index}]"), issues);
                    }
                }
                None => mismatch(issues, "array"),
            },
            Self::Record(inner) => match value.as_object() {
                Some(map) => {
                    for (key, entry) in map {
                        inner.check(entry, &format!("{path}.{key}"), issues);
                    }
                }
                None => mismatch(issues, "object"),
            },
            Self::Object(fields) => match value.as_object() {
                Some(map) => {
                    for field in fields {
                        let field_path = format!("{path}.{}", field.name);
                        match map.get(&field.name) {
                            Some(entry) => field.shape.check(entry, &field_path, issues),
                            None if field.required => {
                                issues.push(ValidationIssue::new(field_path, "is required"));
                            }
                            None => {}
                        }
                    }
                }
                None => mismatch(issues, "object"),
            },
            Self::Nullable(inner) => {
                if !value.is_null() {
                    inner.check(value, path, issues);
                }
            }
            Self::Union(branches) => {
                let matched = branches.iter().any(|branch| {
                    let mut scratch = Vec::new();
                    branch.check(value, path, &mut scratch);
                    scratch.is_empty()
                });
                if !matched {
                    issues.push(ValidationIssue::new(path, "does not match any variant"));
                }
            }
        }
    }
}

impl Validator for Shape {
    type Output = Value;

    fn validate(&self, value: &Value) -> Result<Value, Vec<ValidationIssue>> {
        let mut issues = Vec::new();
        self.check(value, "$", &mut issues);
        if issues.is_empty() {
            Ok(value.clone())
        } else {
            Err(issues)
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn deployment_shape() -> Shape {
        Shape::object()
            .required("id", Shape::String)
            .required(
                "source",
                Shape::object()
                    .required("image", Shape::String)
                    .optional("tag", Shape::String),
            )
            .optional("args", Shape::array(Shape::String))
            .optional("replicas", Shape::Integer)
            .build()
    }

    #[test]
    fn any_value_passes_through() {
        let v = json!({"x": [1, 2]});
        assert_eq!(AnyValue.validate(&v).unwrap(), v);
    }

    #[test]
    fn schema_deserializes() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Params {
            id: String,
        }
        let out = Schema::<Params>::new().validate(&json!({"id": "srv_1"})).unwrap();
        assert_eq!(out, Params { id: "srv_1".into() });
    }

    #[test]
    fn schema_reports_root_issue() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Params {
            id: String,
        }
        let issues = Schema::<Params>::new().validate(&json!({})).unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "$");
        assert!(issues[0].message.contains("id"));
    }

    #[test]
    fn shape_accepts_valid_object() {
        let v = json!({"id": "d1", "source": {"image": "nginx"}, "args": ["-p", "80"], "extra": true});
        assert!(deployment_shape().validate(&v).is_ok());
    }

    #[test]
    fn shape_reports_nested_paths() {
        let v = json!({"source": {"image": 7}, "args": ["-p", 80]});
        let issues = deployment_shape().validate(&v).unwrap_err();
        let paths: Vec<&str> = issues.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["$.id", "$.source.image", "$.args[1]"]);
        assert_eq!(issues[0].message, "is required");
        assert_eq!(issues[1].message, "expected string, received number");
    }

    #[test]
    fn optional_field_still_checked() {
        let v = json!({"id": "d1", "source": {"image": "x", "tag": false}});
        let issues = deployment_shape().validate(&v).unwrap_err();
        assert_eq!(issues[0].path, "$.source.tag");
    }

    #[test]
    fn integer_rejects_fraction() {
        assert!(Shape::Integer.validate(&json!(3)).is_ok());
        assert!(Shape::Integer.validate(&json!(3.0)).is_ok());
        assert!(Shape::Integer.validate(&json!(3.5)).is_err());
    }

    #[test]
    fn nullable_and_union() {
        let shape = Shape::String.nullable();
        assert!(shape.validate(&Value::Null).is_ok());
        assert!(shape.validate(&json!("x")).is_ok());
        assert!(shape.validate(&json!(1)).is_err());

        let either = Shape::union([Shape::String, Shape::array(Shape::Number)]);
        assert!(either.validate(&json!([1, 2])).is_ok());
        let issues = either.validate(&json!(true)).unwrap_err();
        assert_eq!(issues[0].message, "does not match any variant");
    }

    #[test]
    fn literal_and_one_of() {
        assert!(Shape::literal("v1").validate(&json!("v1")).is_ok());
        assert!(Shape::literal("v1").validate(&json!("v2")).is_err());
        let level = Shape::one_of(["debug", "info"]);
        assert!(level.validate(&json!("info")).is_ok());
        let issues = level.validate(&json!("trace")).unwrap_err();
        assert_eq!(issues[0].message, r#"expected one of "debug" | "info""#);
    }

    #[test]
    fn record_checks_every_value() {
        let env = Shape::record(Shape::String);
        let issues = env.validate(&json!({"A": "1", "B": 2})).unwrap_err();
        assert_eq!(issues, vec![ValidationIssue::new("$.B", "expected string, received number")]);
    }

    #[test]
    fn issue_display() {
        let issue = ValidationIssue::new("$.id", "is required");
        assert_eq!(issue.to_string(), "$.id: is required");
    }
}
