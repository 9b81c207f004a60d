//! # warden-policy
//!
//! RBAC/ABAC authorization for Warden.
//!
//! A [`Policy`] selects requests through subject, resource and action
//! matchers, narrows them with named [`Condition`]s and carries an
//! [`Effect`]. The [`PolicyAuthorizer`] combines the applicable policies:
//!
//! - any applicable deny policy denies
//! - otherwise any applicable allow policy allows
//! - otherwise the request is denied with reason `"no matching policy"`
//!
//! Policy sets load from YAML:
//!
//! ```yaml
//! policies:
//!   - id: engineering-read
//!     effect: allow
//!     subjects:
//!       - id: "*"
//!         attributes:
//!           department: { op: equals, value: engineering }
//!     resources:
//!       - type: document
//!     actions: [read]
//! ```

pub mod authorizer;
pub mod condition;
pub mod error;
pub mod matcher;
pub mod policy;
pub mod types;

pub use authorizer::PolicyAuthorizer;
pub use condition::{AttributeSource, Condition, CustomPredicate, Predicate};
pub use error::{ConditionError, PolicyError};
pub use matcher::{ActionMatcher, AttributeMatch, Pattern, ResourceMatcher, SubjectMatcher, WILDCARD};
pub use policy::{Effect, Policy, PolicySet};
pub use types::{AccessRequest, Action, Attributes, Decision, NO_MATCHING_POLICY, Resource, Subject};
