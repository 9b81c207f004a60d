//! Subject, resource and action matchers.
//!
//! A matcher with no criteria matches nothing. Wildcards must be explicit.

use crate::error::PolicyError;
use crate::types::{Attributes, Resource, Subject};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Matches any id, type or action.
pub const WILDCARD: &str = "*";

/// A compiled regular expression that (de)serialises as its source string.
#[derive(Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn new(pattern: &str) -> Result<Self, PolicyError> {
        Regex::new(pattern)
            .map(Self)
            .map_err(|source| PolicyError::Pattern {
                pattern: pattern.to_string(),
                source,
            })
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.0.is_match(value)
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pattern").field(&self.as_str()).finish()
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Serialize for Pattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Regex::new(&source)
            .map(Self)
            .map_err(serde::de::Error::custom)
    }
}

/// A test applied to a single attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AttributeMatch {
    Equals { value: Value },
    OneOf { values: Vec<Value> },
    /// The attribute exists, whatever its value.
    Present,
    /// The attribute is a string matching the pattern.
    Matches { pattern: Pattern },
}

impl AttributeMatch {
    pub fn equals(value: impl Into<Value>) -> Self {
        Self::Equals {
            value: value.into(),
        }
    }

    pub fn one_of<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::OneOf {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(pattern: &str) -> Result<Self, PolicyError> {
        Ok(Self::Matches {
            pattern: Pattern::new(pattern)?,
        })
    }

    /// Apply to a possibly missing value. A missing attribute only fails.
    pub fn test(&self, value: Option<&Value>) -> bool {
        let Some(value) = value else {
            return false;
        };
        match self {
            Self::Equals { value: expected } => value == expected,
            Self::OneOf { values } => values.contains(value),
            Self::Present => true,
            Self::Matches { pattern } => value.as_str().is_some_and(|s| pattern.is_match(s)),
        }
    }
}

/// All predicates must hold.
fn attributes_match(predicates: &BTreeMap<String, AttributeMatch>, attributes: &Attributes) -> bool {
    predicates
        .iter()
        .all(|(key, test)| test.test(attributes.get(key)))
}

/// Selects subjects by id, role or attributes.
///
/// The subject must match the id (or wildcard) or hold one of the roles;
/// when neither is given, the attribute predicates alone select. Attribute
/// predicates always have to hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectMatcher {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub roles: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttributeMatch>,
}

impl SubjectMatcher {
    pub fn any() -> Self {
        Self::id(WILDCARD)
    }

    pub fn id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }

    pub fn roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, test: AttributeMatch) -> Self {
        self.attributes.insert(key.into(), test);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.roles.is_empty() && self.attributes.is_empty()
    }

    pub fn matches(&self, subject: &Subject) -> bool {
        if self.is_empty() {
            return false;
        }

        let has_identity = self.id.is_some() || !self.roles.is_empty();
        if has_identity {
            let id_ok = self
                .id
                .as_deref()
                .is_some_and(|id| id == WILDCARD || id == subject.id);
            let role_ok = self.roles.iter().any(|r| subject.roles.contains(r));
            if !id_ok && !role_ok {
                return false;
            }
        }

        attributes_match(&self.attributes, &subject.attributes)
    }
}

/// Selects resources by id pattern, type and attributes. Every given
/// criterion must hold.
///
/// Id patterns are `*`, an exact id, or a hierarchical prefix such as
/// `docs/*` (matching `docs/a` and `docs/a/b`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMatcher {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttributeMatch>,
}

impl ResourceMatcher {
    pub fn any() -> Self {
        Self::id(WILDCARD)
    }

    pub fn id(pattern: impl Into<String>) -> Self {
        Self {
            id: Some(pattern.into()),
            ..Default::default()
        }
    }

    pub fn of_type(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: Some(resource_type.into()),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, resource_type: impl Into<String>) -> Self {
        self.resource_type = Some(resource_type.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, test: AttributeMatch) -> Self {
        self.attributes.insert(key.into(), test);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.resource_type.is_none() && self.attributes.is_empty()
    }

    pub fn matches(&self, resource: &Resource) -> bool {
        if self.is_empty() {
            return false;
        }
        if let Some(pattern) = &self.id {
            if !id_pattern_matches(pattern, &resource.id) {
                return false;
            }
        }
        if let Some(t) = &self.resource_type {
            if t != WILDCARD && *t != resource.resource_type {
                return false;
            }
        }
        attributes_match(&self.attributes, &resource.attributes)
    }
}

fn id_pattern_matches(pattern: &str, id: &str) -> bool {
    if pattern == WILDCARD {
        return true;
    }
    match pattern.strip_suffix(WILDCARD) {
        Some(prefix) if prefix.ends_with('/') => id.len() > prefix.len() && id.starts_with(prefix),
        _ => pattern == id,
    }
}

/// Selects an action by name, or every action with `*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionMatcher(pub String);

impl ActionMatcher {
    pub fn any() -> Self {
        Self(WILDCARD.to_string())
    }

    pub fn matches(&self, action: &str) -> bool {
        !self.0.is_empty() && (self.0 == WILDCARD || self.0 == action)
    }
}

impl From<&str> for ActionMatcher {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}
