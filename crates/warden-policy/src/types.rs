//! Authorization request and decision types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Attribute bag attached to subjects, resources and request context.
pub type Attributes = BTreeMap<String, Value>;

/// The principal asking for access.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Subject {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.insert(role.into());
        self
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles.extend(roles.into_iter().map(Into::into));
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// The thing being accessed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub attributes: Attributes,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// What the subject wants to do.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action {
    pub name: String,
}

impl Action {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl From<&str> for Action {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// One authorization question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub subject: Subject,
    pub action: Action,
    pub resource: Resource,
    #[serde(default)]
    pub context: Attributes,
}

impl AccessRequest {
    pub fn new(subject: Subject, action: impl Into<Action>, resource: Resource) -> Self {
        Self {
            subject,
            action: action.into(),
            resource,
            context: Attributes::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Reason recorded when nothing matched.
pub const NO_MATCHING_POLICY: &str = "no matching policy";

/// Outcome of an authorization call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: String,
    /// The policy that decided, if any.
    pub policy_id: Option<String>,
}

impl Decision {
    pub fn allow(policy_id: &str) -> Self {
        Self {
            allowed: true,
            reason: format!("allowed by policy '{policy_id}'"),
            policy_id: Some(policy_id.to_string()),
        }
    }

    pub fn deny(policy_id: &str) -> Self {
        Self {
            allowed: false,
            reason: format!("denied by policy '{policy_id}'"),
            policy_id: Some(policy_id.to_string()),
        }
    }

    /// Default deny.
    pub fn no_match() -> Self {
        Self {
            allowed: false,
            reason: NO_MATCHING_POLICY.to_string(),
            policy_id: None,
        }
    }

    /// Denied because an explicit deny policy matched.
    pub fn is_explicit_deny(&self) -> bool {
        !self.allowed && self.policy_id.is_some()
    }
}
