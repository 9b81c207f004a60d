//! Policy evaluation.
//!
//! Deny overrides allow, and no match means deny. Any single applicable
//! allow policy is enough to allow; priority only decides which policy is
//! reported when several apply.

use crate::error::PolicyError;
use crate::policy::{Effect, Policy, PolicySet};
use crate::types::{AccessRequest, Decision};
use std::sync::{Arc, RwLock};
use warden_core::WardenConfig;

/// Policies in evaluation order: priority descending, then id.
type Snapshot = Arc<Vec<Arc<Policy>>>;

/// Evaluates access requests against a policy set.
///
/// Mutations build a new snapshot and swap it in, so every `authorize` call
/// sees either the old or the new set, never a mix.
#[derive(Debug, Default)]
pub struct PolicyAuthorizer {
    snapshot: RwLock<Snapshot>,
}

impl PolicyAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_set(set: PolicySet) -> Result<Self, PolicyError> {
        let authorizer = Self::new();
        authorizer.replace_all(set)?;
        Ok(authorizer)
    }

    /// Build from the inline (and file-loaded) policies of a configuration.
    pub fn from_config(config: &WardenConfig) -> Result<Self, PolicyError> {
        Self::from_set(PolicySet::from_values(&config.policies)?)
    }

    fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.snapshot.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Apply `change` to a copy of the current set and swap it in.
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Vec<Arc<Policy>>) -> Result<T, PolicyError>,
    ) -> Result<T, PolicyError> {
        let mut current = self.snapshot.write().unwrap_or_else(|e| e.into_inner());
        let mut next: Vec<Arc<Policy>> = current.as_ref().clone();
        let out = change(&mut next)?;
        next.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        *current = Arc::new(next);
        Ok(out)
    }

    /// Decide `request`.
    pub fn authorize(&self, request: &AccessRequest) -> Decision {
        let policies = self.snapshot();
        let mut allowed_by: Option<&Policy> = None;

        for policy in policies.iter() {
            if !policy.targets(request) {
                continue;
            }
            if let Err((condition, error)) = policy.check_conditions(request) {
                match error {
                    Some(e) => tracing::debug!(
                        policy_id = %policy.id,
                        condition,
                        error = %e,
                        "condition could not be evaluated"
                    ),
                    None => tracing::trace!(policy_id = %policy.id, condition, "condition not met"),
                }
                continue;
            }

            match policy.effect {
                Effect::Deny => {
                    let decision = Decision::deny(&policy.id);
                    self.log(request, &decision);
                    return decision;
                }
                Effect::Allow => {
                    allowed_by.get_or_insert(policy);
                }
            }
        }

        let decision = allowed_by.map_or_else(Decision::no_match, |p| Decision::allow(&p.id));
        self.log(request, &decision);
        decision
    }

    fn log(&self, request: &AccessRequest, decision: &Decision) {
        tracing::debug!(
            subject = %request.subject.id,
            action = %request.action.name,
            resource = %request.resource.id,
            allowed = decision.allowed,
            policy_id = decision.policy_id.as_deref().unwrap_or("-"),
            "authorization decision"
        );
    }

    /// Add a new policy. Fails on an existing id or an invalid policy.
    pub fn add_policy(&self, policy: Policy) -> Result<(), PolicyError> {
        policy.validate()?;
        let id = policy.id.clone();
        self.mutate(|policies| {
            if policies.iter().any(|p| p.id == policy.id) {
                return Err(PolicyError::Duplicate(policy.id));
            }
            policies.push(Arc::new(policy));
            Ok(())
        })?;
        tracing::info!(policy_id = %id, "added policy");
        Ok(())
    }

    /// Insert or replace a policy. Returns the replaced one.
    pub fn update_policy(&self, policy: Policy) -> Result<Option<Arc<Policy>>, PolicyError> {
        policy.validate()?;
        let id = policy.id.clone();
        let previous = self.mutate(|policies| {
            let previous = policies
                .iter()
                .position(|p| p.id == policy.id)
                .map(|pos| policies.remove(pos));
            policies.push(Arc::new(policy));
            Ok(previous)
        })?;
        tracing::info!(policy_id = %id, replaced = previous.is_some(), "updated policy");
        Ok(previous)
    }

    pub fn remove_policy(&self, id: &str) -> Result<Arc<Policy>, PolicyError> {
        let removed = self.mutate(|policies| {
            let pos = policies
                .iter()
                .position(|p| p.id == id)
                .ok_or_else(|| PolicyError::NotFound(id.to_string()))?;
            Ok(policies.remove(pos))
        })?;
        tracing::info!(policy_id = %id, "removed policy");
        Ok(removed)
    }

    /// Replace the whole set atomically.
    pub fn replace_all(&self, set: PolicySet) -> Result<(), PolicyError> {
        set.validate()?;
        let count = set.policies.len();
        self.mutate(|policies| {
            *policies = set.policies.into_iter().map(Arc::new).collect();
            Ok(())
        })?;
        tracing::info!(count, "replaced policy set");
        Ok(())
    }

    pub fn get_policy(&self, id: &str) -> Option<Arc<Policy>> {
        self.snapshot().iter().find(|p| p.id == id).cloned()
    }

    /// Policies in evaluation order.
    pub fn list_policies(&self) -> Vec<Arc<Policy>> {
        self.snapshot().as_ref().clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}
