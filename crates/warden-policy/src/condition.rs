//! Named conditions evaluated against an access request.

use crate::error::ConditionError;
use crate::matcher::AttributeMatch;
use crate::types::{AccessRequest, Attributes};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Where an attribute is looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeSource {
    Subject,
    Resource,
    Context,
}

impl AttributeSource {
    fn attributes<'a>(&self, request: &'a AccessRequest) -> &'a Attributes {
        match self {
            Self::Subject => &request.subject.attributes,
            Self::Resource => &request.resource.attributes,
            Self::Context => &request.context,
        }
    }

    pub fn lookup<'a>(&self, request: &'a AccessRequest, key: &str) -> Option<&'a Value> {
        self.attributes(request).get(key)
    }
}

type CustomFn = dyn Fn(&AccessRequest) -> Result<bool, ConditionError> + Send + Sync;

/// An in-process predicate. Not serialisable.
#[derive(Clone)]
pub struct CustomPredicate {
    func: Arc<CustomFn>,
}

impl CustomPredicate {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(&AccessRequest) -> Result<bool, ConditionError> + Send + Sync + 'static,
    {
        Self {
            func: Arc::new(func),
        }
    }

    fn call(&self, request: &AccessRequest) -> Result<bool, ConditionError> {
        (self.func)(request)
    }
}

impl fmt::Debug for CustomPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CustomPredicate(<fn>)")
    }
}

/// What a condition checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Predicate {
    /// An attribute of the subject, resource or context passes a test.
    Attribute {
        source: AttributeSource,
        key: String,
        #[serde(rename = "match")]
        test: AttributeMatch,
    },
    /// The subject id equals a string attribute, e.g. the resource `owner`.
    SubjectIsOwner {
        #[serde(default = "default_owner_source")]
        source: AttributeSource,
        #[serde(default = "default_owner_key")]
        key: String,
    },
    /// The subject holds every listed role.
    RolesAll { roles: BTreeSet<String> },
    #[serde(skip)]
    Custom(CustomPredicate),
}

fn default_owner_source() -> AttributeSource {
    AttributeSource::Resource
}

fn default_owner_key() -> String {
    "owner".to_string()
}

/// A named predicate attached to a policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub name: String,
    #[serde(flatten)]
    pub predicate: Predicate,
}

impl Condition {
    pub fn new(name: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            name: name.into(),
            predicate,
        }
    }

    pub fn attribute(
        name: impl Into<String>,
        source: AttributeSource,
        key: impl Into<String>,
        test: AttributeMatch,
    ) -> Self {
        Self::new(
            name,
            Predicate::Attribute {
                source,
                key: key.into(),
                test,
            },
        )
    }

    pub fn subject_is_owner(name: impl Into<String>) -> Self {
        Self::new(
            name,
            Predicate::SubjectIsOwner {
                source: default_owner_source(),
                key: default_owner_key(),
            },
        )
    }

    pub fn roles_all<I, S>(name: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            name,
            Predicate::RolesAll {
                roles: roles.into_iter().map(Into::into).collect(),
            },
        )
    }

    pub fn custom<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(&AccessRequest) -> Result<bool, ConditionError> + Send + Sync + 'static,
    {
        Self::new(name, Predicate::Custom(CustomPredicate::new(func)))
    }

    pub fn evaluate(&self, request: &AccessRequest) -> Result<bool, ConditionError> {
        match &self.predicate {
            Predicate::Attribute { source, key, test } => {
                Ok(test.test(source.lookup(request, key)))
            }
            Predicate::SubjectIsOwner { source, key } => {
                let value = source
                    .lookup(request, key)
                    .ok_or_else(|| ConditionError::MissingAttribute(key.clone()))?;
                let owner = value
                    .as_str()
                    .ok_or_else(|| ConditionError::NotAString { key: key.clone() })?;
                Ok(owner == request.subject.id)
            }
            Predicate::RolesAll { roles } => {
                Ok(roles.iter().all(|r| request.subject.roles.contains(r)))
            }
            Predicate::Custom(custom) => custom.call(request),
        }
    }
}
