//! Policy definitions and policy-set loading.

use crate::condition::{Condition, Predicate};
use crate::error::{ConditionError, PolicyError};
use crate::matcher::{ActionMatcher, ResourceMatcher, SubjectMatcher};
use crate::types::AccessRequest;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Effect of a matching policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    Allow,
    Deny,
}

/// An authorization rule.
///
/// A policy applies when at least one matcher in each of `subjects`,
/// `resources` and `actions` matches and every condition evaluates true.
/// An empty matcher list applies to nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub effect: Effect,

    /// Higher priority policies are reported first when several decide.
    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub subjects: Vec<SubjectMatcher>,

    #[serde(default)]
    pub resources: Vec<ResourceMatcher>,

    #[serde(default)]
    pub actions: Vec<ActionMatcher>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl Policy {
    pub fn new(id: impl Into<String>, effect: Effect) -> Self {
        Self {
            id: id.into(),
            description: None,
            effect,
            priority: 0,
            subjects: Vec::new(),
            resources: Vec::new(),
            actions: Vec::new(),
            conditions: Vec::new(),
        }
    }

    pub fn allow(id: impl Into<String>) -> Self {
        Self::new(id, Effect::Allow)
    }

    pub fn deny(id: impl Into<String>) -> Self {
        Self::new(id, Effect::Deny)
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn for_subject(mut self, matcher: SubjectMatcher) -> Self {
        self.subjects.push(matcher);
        self
    }

    pub fn on_resource(mut self, matcher: ResourceMatcher) -> Self {
        self.resources.push(matcher);
        self
    }

    pub fn for_action(mut self, action: impl Into<String>) -> Self {
        self.actions.push(ActionMatcher(action.into()));
        self
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Check the policy is well formed.
    pub fn validate(&self) -> Result<(), PolicyError> {
        let invalid = |reason: &str| PolicyError::Invalid {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        let mut names = HashSet::new();
        for condition in &self.conditions {
            if condition.name.trim().is_empty() {
                return Err(invalid("condition name must not be empty"));
            }
            if !names.insert(condition.name.as_str()) {
                return Err(invalid(&format!(
                    "duplicate condition name '{}'",
                    condition.name
                )));
            }
            if let Predicate::RolesAll { roles } = &condition.predicate {
                if roles.is_empty() {
                    return Err(invalid(&format!(
                        "condition '{}' lists no roles",
                        condition.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Whether the subject, resource and action matchers select `request`.
    pub fn targets(&self, request: &AccessRequest) -> bool {
        self.subjects.iter().any(|m| m.matches(&request.subject))
            && self.resources.iter().any(|m| m.matches(&request.resource))
            && self.actions.iter().any(|m| m.matches(&request.action.name))
    }

    /// Evaluate every condition. Returns the name of the first condition that
    /// did not hold, with its error when it could not be evaluated.
    pub fn check_conditions(
        &self,
        request: &AccessRequest,
    ) -> Result<(), (&str, Option<ConditionError>)> {
        for condition in &self.conditions {
            match condition.evaluate(request) {
                Ok(true) => {}
                Ok(false) => return Err((&condition.name, None)),
                Err(e) => return Err((&condition.name, Some(e))),
            }
        }
        Ok(())
    }
}

/// A collection of policies as loaded from YAML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicySet {
    #[serde(default)]
    pub policies: Vec<Policy>,
}

impl PolicySet {
    /// Parse a policy set. Accepts `policies: [...]` or a bare list.
    pub fn from_yaml(content: &str) -> Result<Self, PolicyError> {
        let document: serde_yaml::Value = serde_yaml::from_str(content)?;
        let set = match document {
            serde_yaml::Value::Null => Self::default(),
            serde_yaml::Value::Sequence(list) => Self {
                policies: serde_yaml::from_value(serde_yaml::Value::Sequence(list))?,
            },
            other => serde_yaml::from_value(other)?,
        };
        set.validate()?;
        Ok(set)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PolicyError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Type raw policy entries, such as those collected in the main
    /// configuration file.
    pub fn from_values(values: &[serde_yaml::Value]) -> Result<Self, PolicyError> {
        let policies = values
            .iter()
            .cloned()
            .map(serde_yaml::from_value)
            .collect::<Result<Vec<Policy>, _>>()?;
        let set = Self { policies };
        set.validate()?;
        Ok(set)
    }

    /// Every policy is valid and ids are unique.
    pub fn validate(&self) -> Result<(), PolicyError> {
        let mut ids = HashSet::new();
        for policy in &self.policies {
            policy.validate()?;
            if !ids.insert(policy.id.as_str()) {
                return Err(PolicyError::Duplicate(policy.id.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Resource, Subject};

    const POLICIES: &str = r#"
policies:
  - id: engineering-read
    description: Engineers read technical documents
    effect: allow
    priority: 10
    subjects:
      - id: "*"
        attributes:
          department: { op: equals, value: engineering }
    resources:
      - type: document
        attributes:
          category: { op: equals, value: technical }
    actions: [read]
  - id: owner-write
    effect: allow
    subjects:
      - id: "*"
    resources:
      - id: "docs/*"
    actions: [update, delete]
    conditions:
      - name: is-owner
        type: subject_is_owner
"#;

    #[test]
    fn test_policy_set_from_yaml() {
        let set = PolicySet::from_yaml(POLICIES).unwrap();
        assert_eq!(set.policies.len(), 2);

        let read = &set.policies[0];
        assert_eq!(read.effect, Effect::Allow);
        assert_eq!(read.priority, 10);

        let request = AccessRequest::new(
            Subject::new("alice").with_attribute("department", "engineering"),
            "read",
            Resource::new("document", "d1").with_attribute("category", "technical"),
        );
        assert!(read.targets(&request));
        assert!(!set.policies[1].targets(&request));
    }

    #[test]
    fn test_policy_set_rejects_duplicates() {
        let yaml = r#"
- id: p
  effect: allow
- id: p
  effect: deny
"#;
        assert!(matches!(
            PolicySet::from_yaml(yaml),
            Err(PolicyError::Duplicate(id)) if id == "p"
        ));
    }

    #[test]
    fn test_policy_set_from_file_and_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policies.yaml");
        fs::write(&path, POLICIES).unwrap();
        let set = PolicySet::from_file(&path).unwrap();
        assert_eq!(set.policies.len(), 2);

        let raw: serde_yaml::Value = serde_yaml::from_str(POLICIES).unwrap();
        let values = raw["policies"].as_sequence().unwrap().clone();
        let typed = PolicySet::from_values(&values).unwrap();
        assert_eq!(typed.policies[1].id, "owner-write");
    }

    #[test]
    fn test_conditions_report_failure() {
        let policy = Policy::allow("p").when(Condition::subject_is_owner("owner"));
        let request = AccessRequest::new(
            Subject::new("alice"),
            "update",
            Resource::new("document", "d1"),
        );

        let (name, err) = policy.check_conditions(&request).unwrap_err();
        assert_eq!(name, "owner");
        assert!(err.is_some());
    }

    #[test]
    fn test_validate_rejects_bad_policies() {
        assert!(Policy::allow("").validate().is_err());
        assert!(
            Policy::allow("p")
                .when(Condition::roles_all("none", Vec::<String>::new()))
                .validate()
                .is_err()
        );
        assert!(
            Policy::allow("p")
                .when(Condition::subject_is_owner("c"))
                .when(Condition::subject_is_owner("c"))
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_policy_without_matchers_targets_nothing() {
        let request = AccessRequest::new(
            Subject::new("alice"),
            "read",
            Resource::new("document", "d1"),
        );
        assert!(!Policy::allow("empty").targets(&request));
        assert!(
            !Policy::allow("no-actions")
                .for_subject(SubjectMatcher::any())
                .on_resource(ResourceMatcher::any())
                .targets(&request)
        );
    }
}
