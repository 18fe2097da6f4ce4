//! Authorization module
//!
//! Role-based access decisions. A requirement names one role; a request is
//! allowed iff the caller's role set contains it. There are no wildcards and
//! no role hierarchy.

use crate::auth::AuthorizationContext;
use crate::config::PolicyConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A role an operation requires
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CapabilityRequirement {
    role: String,
}

impl CapabilityRequirement {
    pub fn role(role: impl Into<String>) -> Self {
        Self { role: role.into() }
    }

    pub fn required_role(&self) -> &str {
        &self.role
    }
}

/// Why a request was denied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    /// No authorization context reached the handler
    NoContext,
    /// The caller lacks the required role
    MissingRole { role: String },
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::NoContext => write!(f, "no authorization context"),
            DenyReason::MissingRole { role } => write!(f, "missing role '{}'", role),
        }
    }
}

/// Outcome of a policy check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Decide whether `context` satisfies `requirement`
pub fn authorize(
    context: Option<&AuthorizationContext>,
    requirement: &CapabilityRequirement,
) -> Decision {
    match context {
        None => Decision::Deny(DenyReason::NoContext),
        Some(context) if context.has_role(&requirement.role) => Decision::Allow,
        Some(_) => Decision::Deny(DenyReason::MissingRole {
            role: requirement.role.clone(),
        }),
    }
}

/// Protected operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    ListVms,
    CreateVm,
    GetVm,
    UpdateVm,
    DeleteVm,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::ListVms,
        Operation::CreateVm,
        Operation::GetVm,
        Operation::UpdateVm,
        Operation::DeleteVm,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::ListVms => "list_vms",
            Operation::CreateVm => "create_vm",
            Operation::GetVm => "get_vm",
            Operation::UpdateVm => "update_vm",
            Operation::DeleteVm => "delete_vm",
        }
    }
}

/// Requirement attached to each operation
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    default: CapabilityRequirement,
    overrides: HashMap<Operation, CapabilityRequirement>,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::new("admin")
    }
}

impl AccessPolicy {
    /// Every operation requires `default_role`
    pub fn new(default_role: impl Into<String>) -> Self {
        Self {
            default: CapabilityRequirement::role(default_role),
            overrides: HashMap::new(),
        }
    }

    pub fn from_config(config: &PolicyConfig) -> Self {
        config
            .operations
            .iter()
            .fold(Self::new(config.default_role.as_str()), |policy, (op, role)| {
                policy.with_requirement(*op, role.as_str())
            })
    }

    /// Require `role` for `operation` instead of the default
    #[must_use]
    pub fn with_requirement(mut self, operation: Operation, role: impl Into<String>) -> Self {
        self.overrides
            .insert(operation, CapabilityRequirement::role(role));
        self
    }

    pub fn requirement(&self, operation: Operation) -> &CapabilityRequirement {
        self.overrides.get(&operation).unwrap_or(&self.default)
    }

    /// Check `operation` for `context` and record the decision
    pub fn evaluate(
        &self,
        operation: Operation,
        context: Option<&AuthorizationContext>,
    ) -> Decision {
        let decision = authorize(context, self.requirement(operation));
        crate::metrics::record_policy_decision(operation.as_str(), decision.is_allowed());
        decision
    }
}
