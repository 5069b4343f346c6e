//! Resource - Property bags and resource handles
//!
//! A `PropertyBag` is the configuration of a single resource as it travels
//! between the orchestration engine and a provider. Bags are built once from
//! an incoming payload and never mutated afterwards.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Attribute value of a resource
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    String(String),
    Number(f64),
    Bool(bool),
    List(Vec<Value>),
    Map(PropertyBag),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Number(_) => "number",
            Value::Bool(_) => "bool",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Converts a JSON value, returning `None` for `null`.
    /// Nulls nested in lists or objects are dropped the same way.
    pub fn from_json(json: serde_json::Value) -> Option<Self> {
        match json {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(Value::Bool(b)),
            serde_json::Value::Number(n) => n.as_f64().map(Value::Number),
            serde_json::Value::String(s) => Some(Value::String(s)),
            serde_json::Value::Array(items) => Some(Value::List(
                items.into_iter().filter_map(Value::from_json).collect(),
            )),
            serde_json::Value::Object(map) => Some(Value::Map(PropertyBag::from_json_map(map))),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<Vec<String>> for Value {
    fn from(items: Vec<String>) -> Self {
        Value::List(items.into_iter().map(Value::String).collect())
    }
}

impl From<PropertyBag> for Value {
    fn from(bag: PropertyBag) -> Self {
        Value::Map(bag)
    }
}

/// Error returned by the typed accessors of a `PropertyBag`
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PropertyError {
    #[error("required property '{name}' is missing")]
    Missing { name: String },

    #[error("property '{name}' must be {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },
}

impl PropertyError {
    /// True when the property was absent rather than malformed
    pub fn is_missing(&self) -> bool {
        matches!(self, PropertyError::Missing { .. })
    }

    fn mismatch(name: &str, expected: &'static str, actual: &'static str) -> Self {
        PropertyError::TypeMismatch {
            name: name.to_string(),
            expected,
            actual,
        }
    }
}

pub type PropertyResult<T> = Result<T, PropertyError>;

/// Typed key/value configuration of a resource
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyBag {
    properties: BTreeMap<String, Value>,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Builds a bag from a JSON object, dropping `null` entries
    pub fn from_json_map(map: serde_json::Map<String, serde_json::Value>) -> Self {
        let properties = map
            .into_iter()
            .filter_map(|(k, v)| Value::from_json(v).map(|v| (k, v)))
            .collect();
        Self { properties }
    }

    pub fn from_json(json: serde_json::Value) -> Result<Self, PropertyError> {
        match json {
            serde_json::Value::Object(map) => Ok(Self::from_json_map(map)),
            serde_json::Value::Null => Ok(Self::new()),
            other => Err(PropertyError::mismatch(
                "<root>",
                "map",
                Value::from_json(other).map(|v| v.type_name()).unwrap_or("null"),
            )),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn req_string(&self, name: &str) -> PropertyResult<String> {
        self.opt_string(name)?.ok_or_else(|| PropertyError::Missing {
            name: name.to_string(),
        })
    }

    pub fn opt_string(&self, name: &str) -> PropertyResult<Option<String>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(PropertyError::mismatch(name, "string", other.type_name())),
        }
    }

    pub fn opt_bool(&self, name: &str) -> PropertyResult<Option<bool>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(PropertyError::mismatch(name, "bool", other.type_name())),
        }
    }

    pub fn opt_number(&self, name: &str) -> PropertyResult<Option<f64>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Number(n)) => Ok(Some(*n)),
            Some(other) => Err(PropertyError::mismatch(name, "number", other.type_name())),
        }
    }

    pub fn opt_string_list(&self, name: &str) -> PropertyResult<Option<Vec<String>>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::List(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    other => Err(PropertyError::mismatch(
                        name,
                        "a list of strings",
                        other.type_name(),
                    )),
                })
                .collect::<PropertyResult<Vec<_>>>()
                .map(Some),
            Some(other) => Err(PropertyError::mismatch(
                name,
                "a list of strings",
                other.type_name(),
            )),
        }
    }

    pub fn opt_bag(&self, name: &str) -> PropertyResult<Option<&PropertyBag>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Map(bag)) => Ok(Some(bag)),
            Some(other) => Err(PropertyError::mismatch(name, "map", other.type_name())),
        }
    }

    /// Nested bag whose values are all strings (e.g. tags)
    pub fn opt_string_map(&self, name: &str) -> PropertyResult<Option<BTreeMap<String, String>>> {
        let Some(bag) = self.opt_bag(name)? else {
            return Ok(None);
        };
        bag.iter()
            .map(|(k, v)| match v {
                Value::String(s) => Ok((k.to_string(), s.clone())),
                other => Err(PropertyError::mismatch(
                    name,
                    "a map of strings",
                    other.type_name(),
                )),
            })
            .collect::<PropertyResult<BTreeMap<_, _>>>()
            .map(Some)
    }
}

impl FromIterator<(String, Value)> for PropertyBag {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            properties: iter.into_iter().collect(),
        }
    }
}

impl From<BTreeMap<String, String>> for PropertyBag {
    fn from(map: BTreeMap<String, String>) -> Self {
        map.into_iter().map(|(k, v)| (k, Value::String(v))).collect()
    }
}

impl Serialize for PropertyBag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.properties.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PropertyBag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        PropertyBag::from_json(json).map_err(serde::de::Error::custom)
    }
}

/// Identifier of a provisioned resource, assigned by the remote API
///
/// Opaque to callers; only the provider for the resource type interprets it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceHandle(String);

impl ResourceHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_json_drops_nulls() {
        let bag = PropertyBag::from_json(json!({
            "imageId": "ami-123",
            "keyName": null,
            "securityGroups": ["sg-1", null],
        }))
        .unwrap();

        assert_eq!(bag.len(), 2);
        assert!(!bag.contains("keyName"));
        assert_eq!(
            bag.opt_string_list("securityGroups").unwrap(),
            Some(vec!["sg-1".to_string()])
        );
    }

    #[test]
    fn from_json_rejects_non_object() {
        let err = PropertyBag::from_json(json!(["a"])).unwrap_err();
        assert!(!err.is_missing());
    }

    #[test]
    fn req_string_distinguishes_missing_and_mismatch() {
        let bag = PropertyBag::new().with("count", 3.0);

        let missing = bag.req_string("name").unwrap_err();
        assert!(missing.is_missing());
        assert_eq!(missing.to_string(), "required property 'name' is missing");

        let mismatch = bag.req_string("count").unwrap_err();
        assert!(!mismatch.is_missing());
        assert_eq!(
            mismatch.to_string(),
            "property 'count' must be string, got number"
        );
    }

    #[test]
    fn string_list_rejects_mixed_items() {
        let bag = PropertyBag::new().with(
            "groups",
            Value::List(vec![Value::from("sg-1"), Value::Bool(true)]),
        );
        assert!(bag.opt_string_list("groups").is_err());
    }

    #[test]
    fn string_map_reads_nested_bag() {
        let tags = PropertyBag::new().with("env", "prod");
        let bag = PropertyBag::new().with("tags", tags);

        let map = bag.opt_string_map("tags").unwrap().unwrap();
        assert_eq!(map.get("env").map(String::as_str), Some("prod"));
        assert_eq!(bag.opt_string_map("labels").unwrap(), None);
    }

    #[test]
    fn bag_equality_ignores_insertion_order() {
        let a = PropertyBag::new().with("a", "1").with("b", true);
        let b = PropertyBag::new().with("b", true).with("a", "1");
        assert_eq!(a, b);
    }

    #[test]
    fn bag_serde_round_trips_through_json() {
        let bag = PropertyBag::new()
            .with("imageId", "ami-123")
            .with("tags", PropertyBag::new().with("env", "dev"));

        let text = serde_json::to_string(&bag).unwrap();
        assert_eq!(text, r#"{"imageId":"ami-123","tags":{"env":"dev"}}"#);
        let back: PropertyBag = serde_json::from_str(&text).unwrap();
        assert_eq!(back, bag);
    }

    #[test]
    fn handle_serializes_as_plain_string() {
        let handle = ResourceHandle::new("i-0abc");
        assert_eq!(serde_json::to_string(&handle).unwrap(), r#""i-0abc""#);
        assert!(ResourceHandle::default().is_empty());
    }
}
