//! Schema - Resource type schemas and configuration validation
//!
//! Each resource type declares its attributes and how a change to each one
//! can be applied. Per-type validators turn a `PropertyBag` into a strongly
//! shaped configuration in one pass, collecting every failure on the way.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::differ::PropertyDiff;
use crate::provider::{ProviderError, ProviderResult};
use crate::resource::{PropertyBag, PropertyError, PropertyResult};

/// A single validation problem with a property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckFailure {
    pub property: String,
    pub reason: String,
}

impl CheckFailure {
    pub fn new(property: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CheckFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.property, self.reason)
    }
}

/// Outcome of validating a property bag: the projected value plus every
/// failure found while building it
#[derive(Debug, Clone)]
pub struct Validated<T> {
    pub value: T,
    pub failures: Vec<CheckFailure>,
}

impl<T> Validated<T> {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// Hard-failure mode used on mutating paths
    pub fn into_result(self) -> ProviderResult<T> {
        if self.failures.is_empty() {
            Ok(self.value)
        } else {
            Err(ProviderError::CheckFailed(self.failures))
        }
    }
}

/// Reads typed properties out of a bag while accumulating failures
///
/// With `require_all` unset, absent required properties are tolerated; type
/// errors are reported in both modes.
pub struct Validator<'a> {
    bag: &'a PropertyBag,
    require_all: bool,
    failures: Vec<CheckFailure>,
}

impl<'a> Validator<'a> {
    pub fn new(bag: &'a PropertyBag, require_all: bool) -> Self {
        Self {
            bag,
            require_all,
            failures: Vec::new(),
        }
    }

    pub fn bag(&self) -> &'a PropertyBag {
        self.bag
    }

    /// Required string; empty when absent or invalid
    pub fn required_string(&mut self, name: &str) -> String {
        match self.bag.req_string(name) {
            Ok(s) => s,
            Err(err) => {
                if self.require_all || !err.is_missing() {
                    self.push(name, &err);
                }
                String::new()
            }
        }
    }

    pub fn optional_string(&mut self, name: &str) -> Option<String> {
        let result = self.bag.opt_string(name);
        self.optional(name, result)
    }

    pub fn optional_bool(&mut self, name: &str) -> Option<bool> {
        let result = self.bag.opt_bool(name);
        self.optional(name, result)
    }

    pub fn optional_number(&mut self, name: &str) -> Option<f64> {
        let result = self.bag.opt_number(name);
        self.optional(name, result)
    }

    pub fn optional_string_list(&mut self, name: &str) -> Option<Vec<String>> {
        let result = self.bag.opt_string_list(name);
        self.optional(name, result)
    }

    pub fn optional_string_map(&mut self, name: &str) -> Option<BTreeMap<String, String>> {
        let result = self.bag.opt_string_map(name);
        self.optional(name, result)
    }

    /// Record a rule violation found by the caller
    pub fn fail(&mut self, name: &str, reason: impl Into<String>) {
        self.failures.push(CheckFailure::new(name, reason));
    }

    pub fn has_failure(&self, name: &str) -> bool {
        self.failures.iter().any(|f| f.property == name)
    }

    pub fn finish<T>(self, value: T) -> Validated<T> {
        Validated {
            value,
            failures: self.failures,
        }
    }

    fn optional<T>(&mut self, name: &str, result: PropertyResult<Option<T>>) -> Option<T> {
        result.unwrap_or_else(|err| {
            self.push(name, &err);
            None
        })
    }

    fn push(&mut self, name: &str, err: &PropertyError) {
        self.failures.push(CheckFailure::new(name, err.to_string()));
    }
}

/// Attribute type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttributeType {
    String,
    Number,
    Bool,
    StringList,
    StringMap,
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttributeType::String => "String",
            AttributeType::Number => "Number",
            AttributeType::Bool => "Bool",
            AttributeType::StringList => "List<String>",
            AttributeType::StringMap => "Map<String>",
        };
        f.write_str(name)
    }
}

/// How a change to an attribute can be applied to a live resource
#[derive(Clone, Copy)]
pub enum UpdatePolicy {
    /// Any change destroys and recreates the resource
    ForcesReplace,
    /// Changes are applied to the live resource
    InPlace,
    /// Replacement depends on surrounding state; the function returns true
    /// when the change between `olds` and `news` forces replacement
    Conditional(fn(&PropertyBag, &PropertyBag) -> bool),
}

impl UpdatePolicy {
    pub fn forces_replace(&self, olds: &PropertyBag, news: &PropertyBag) -> bool {
        match self {
            UpdatePolicy::ForcesReplace => true,
            UpdatePolicy::InPlace => false,
            UpdatePolicy::Conditional(decide) => decide(olds, news),
        }
    }
}

impl fmt::Debug for UpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdatePolicy::ForcesReplace => f.write_str("ForcesReplace"),
            UpdatePolicy::InPlace => f.write_str("InPlace"),
            UpdatePolicy::Conditional(_) => f.write_str("Conditional"),
        }
    }
}

impl fmt::Display for UpdatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdatePolicy::ForcesReplace => f.write_str("forces replace"),
            UpdatePolicy::InPlace => f.write_str("in place"),
            UpdatePolicy::Conditional(_) => f.write_str("conditional"),
        }
    }
}

impl Serialize for UpdatePolicy {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Attribute schema
#[derive(Debug, Clone, Serialize)]
pub struct AttributeSchema {
    pub name: String,
    pub attr_type: AttributeType,
    pub required: bool,
    pub update: UpdatePolicy,
    pub description: Option<String>,
}

impl AttributeSchema {
    pub fn new(name: impl Into<String>, attr_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attr_type,
            required: false,
            update: UpdatePolicy::ForcesReplace,
            description: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn updatable(mut self) -> Self {
        self.update = UpdatePolicy::InPlace;
        self
    }

    pub fn replace_when(mut self, decide: fn(&PropertyBag, &PropertyBag) -> bool) -> Self {
        self.update = UpdatePolicy::Conditional(decide);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}

/// Resource schema
#[derive(Debug, Clone, Serialize)]
pub struct ResourceSchema {
    pub resource_type: String,
    pub attributes: Vec<AttributeSchema>,
    pub description: Option<String>,
}

impl ResourceSchema {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            attributes: Vec::new(),
            description: None,
        }
    }

    pub fn attribute(mut self, schema: AttributeSchema) -> Self {
        self.attributes.push(schema);
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttributeSchema> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Properties whose change in `diff` cannot be applied in place
    ///
    /// Every changed property is classified independently; undeclared
    /// properties force replacement. The result is ordered by name.
    pub fn replacements(
        &self,
        diff: &PropertyDiff,
        olds: &PropertyBag,
        news: &PropertyBag,
    ) -> Vec<String> {
        diff.keys()
            .filter(|name| {
                self.get(name)
                    .map(|attr| attr.update.forces_replace(olds, news))
                    .unwrap_or(true)
            })
            .map(str::to_string)
            .collect()
    }
}
