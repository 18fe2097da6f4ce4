//! Claim extraction
//!
//! Turns verified claims into an [`AuthorizationContext`]. Providers disagree
//! on how roles are shaped, so extraction is tolerant: anything that is not a
//! role name is dropped and counted, never an error. Access decisions are
//! made only by [`crate::authz`].

use super::{json_type, VerifiedClaims};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

/// Default location of the roles attribute
pub const DEFAULT_ROLES_CLAIM: &str = "roles";

/// Canonical caller identity: subject plus role set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationContext {
    pub subject: String,
    pub roles: BTreeSet<String>,
}

impl AuthorizationContext {
    pub fn new<I, S>(subject: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subject: subject.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

/// Result of extraction: the context and how many role entries were dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub context: AuthorizationContext,
    pub discarded: usize,
}

/// Reads the subject and the roles attribute at a configured claim path
#[derive(Debug, Clone)]
pub struct ClaimExtractor {
    path: Vec<String>,
}

impl Default for ClaimExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_ROLES_CLAIM)
    }
}

impl ClaimExtractor {
    /// `roles_claim` is a dotted path, e.g. `roles` or `realm_access.roles`
    pub fn new(roles_claim: &str) -> Self {
        Self {
            path: roles_claim.split('.').map(str::to_string).collect(),
        }
    }

    pub fn roles_claim(&self) -> String {
        self.path.join(".")
    }

    pub fn extract(&self, claims: &VerifiedClaims) -> Extraction {
        let (roles, discarded) = match self.lookup(claims) {
            Lookup::Absent => (BTreeSet::new(), 0),
            Lookup::Found(value) => collect_roles(value),
            Lookup::Blocked(value) => {
                debug!(
                    subject = %claims.subject,
                    claim = %self.roles_claim(),
                    found = json_type(value),
                    "Roles claim path runs through a non-object"
                );
                (BTreeSet::new(), 1)
            }
        };

        if discarded > 0 {
            debug!(
                subject = %claims.subject,
                claim = %self.roles_claim(),
                discarded,
                "Discarded non-string role entries"
            );
        }

        Extraction {
            context: AuthorizationContext {
                subject: claims.subject.clone(),
                roles,
            },
            discarded,
        }
    }

    fn lookup<'a>(&self, claims: &'a VerifiedClaims) -> Lookup<'a> {
        let Some((first, rest)) = self.path.split_first() else {
            return Lookup::Absent;
        };
        let Some(mut current) = claims.claims.get(first) else {
            return Lookup::Absent;
        };

        for segment in rest {
            match current {
                Value::Object(map) => match map.get(segment) {
                    Some(next) => current = next,
                    None => return Lookup::Absent,
                },
                other => return Lookup::Blocked(other),
            }
        }

        Lookup::Found(current)
    }
}

enum Lookup<'a> {
    Absent,
    Found(&'a Value),
    Blocked(&'a Value),
}

fn collect_roles(value: &Value) -> (BTreeSet<String>, usize) {
    match value {
        Value::Null => (BTreeSet::new(), 0),
        Value::String(role) => (BTreeSet::from([role.clone()]), 0),
        Value::Array(entries) => {
            let mut roles = BTreeSet::new();
            let mut discarded = 0;
            for entry in entries {
                match entry {
                    Value::String(role) => {
                        roles.insert(role.clone());
                    }
                    _ => discarded += 1,
                }
            }
            (roles, discarded)
        }
        _ => (BTreeSet::new(), 1),
    }
}
