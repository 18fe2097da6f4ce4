//! Request gate
//!
//! Per-request orchestration in front of every protected operation:
//!
//! ```text
//! Unauthenticated -> TokenExtracted -> Verified -> ContextAttached -> Authorized
//!        \________________\______________\_______________\______-> Failed(kind)
//! ```
//!
//! [`RequestGate::admit`] runs the first three transitions and hands back the
//! [`AuthorizationContext`] by value; handlers then call
//! [`authorize_operation`] before touching the platform. Every failure is
//! decided here and mapped to a client-facing status with a generic message.

use crate::auth::{extract_bearer, AuthError, AuthorizationContext, ClaimExtractor, TokenVerifier};
use crate::authz::{AccessPolicy, Decision, DenyReason, Operation};
use crate::metrics;
use hyper::StatusCode;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Where a request was in the gate when it stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Unauthenticated,
    TokenExtracted,
    Verified,
    ContextAttached,
    Authorized,
}

/// Caller-visible gate failures
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateFailure {
    #[error("missing credential")]
    MissingCredential,

    #[error("invalid token")]
    InvalidToken,

    #[error("verifier not ready")]
    VerifierNotReady,

    #[error("forbidden")]
    Forbidden,

    #[error("internal error")]
    Internal,
}

impl GateFailure {
    pub fn status(&self) -> StatusCode {
        match self {
            GateFailure::MissingCredential | GateFailure::InvalidToken => StatusCode::UNAUTHORIZED,
            GateFailure::Forbidden => StatusCode::FORBIDDEN,
            GateFailure::VerifierNotReady | GateFailure::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Response body text; never contains header values or verification details
    pub fn public_message(&self) -> &'static str {
        match self {
            GateFailure::MissingCredential => "Authorization header required",
            GateFailure::InvalidToken => "Invalid token",
            GateFailure::VerifierNotReady => "Authentication unavailable",
            GateFailure::Forbidden => "Forbidden: required role missing",
            GateFailure::Internal => "Internal server error",
        }
    }

    /// `WWW-Authenticate` challenge for 401 responses
    pub fn challenge(&self) -> Option<&'static str> {
        match self {
            GateFailure::MissingCredential => Some("Bearer"),
            GateFailure::InvalidToken => Some("Bearer error=\"invalid_token\""),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GateFailure::MissingCredential => "missing_credential",
            GateFailure::InvalidToken => "invalid_token",
            GateFailure::VerifierNotReady => "verifier_not_ready",
            GateFailure::Forbidden => "forbidden",
            GateFailure::Internal => "internal",
        }
    }
}

impl From<&AuthError> for GateFailure {
    fn from(error: &AuthError) -> Self {
        match error {
            AuthError::MissingCredential => GateFailure::MissingCredential,
            AuthError::InvalidToken(_) => GateFailure::InvalidToken,
            AuthError::VerifierNotReady | AuthError::DiscoveryFailed(_) => {
                GateFailure::VerifierNotReady
            }
            AuthError::MalformedClaims(_) => GateFailure::Internal,
        }
    }
}

/// Authenticates requests and attaches the caller's authorization context
pub struct RequestGate {
    verifier: Arc<TokenVerifier>,
    extractor: ClaimExtractor,
}

impl RequestGate {
    pub fn new(verifier: Arc<TokenVerifier>, extractor: ClaimExtractor) -> Self {
        Self {
            verifier,
            extractor,
        }
    }

    pub fn verifier(&self) -> &Arc<TokenVerifier> {
        &self.verifier
    }

    /// Authenticate a request from its `Authorization` header value.
    ///
    /// Readiness is checked before the header: an unready verifier is a
    /// server fault whatever the caller sent.
    pub fn admit(&self, authorization: Option<&str>) -> Result<AuthorizationContext, GateFailure> {
        match self.walk(authorization) {
            Ok(context) => {
                metrics::record_auth_attempt("admitted");
                Ok(context)
            }
            Err((state, auth_error)) => Err(self.reject(state, &auth_error)),
        }
    }

    fn walk(
        &self,
        authorization: Option<&str>,
    ) -> Result<AuthorizationContext, (GateState, AuthError)> {
        if !self.verifier.is_ready() {
            return Err((GateState::Unauthenticated, AuthError::VerifierNotReady));
        }

        let token =
            extract_bearer(authorization).map_err(|e| (GateState::Unauthenticated, e))?;

        let claims = self
            .verifier
            .verify_token(token)
            .map_err(|e| (GateState::TokenExtracted, e))?;

        let extraction = self.extractor.extract(&claims);
        metrics::record_claims_discarded(extraction.discarded);

        debug!(
            state = ?GateState::ContextAttached,
            subject = %extraction.context.subject,
            roles = ?extraction.context.roles,
            "Authorization context attached"
        );

        Ok(extraction.context)
    }

    fn reject(&self, state: GateState, auth_error: &AuthError) -> GateFailure {
        let failure = GateFailure::from(auth_error);
        metrics::record_auth_attempt(failure.kind());

        match failure {
            GateFailure::MissingCredential => {
                debug!(state = ?state, "Request without bearer credential");
            }
            GateFailure::InvalidToken => {
                info!(
                    state = ?state,
                    kind = auth_error.kind(),
                    reason = %auth_error,
                    "Token rejected"
                );
            }
            GateFailure::VerifierNotReady => {
                metrics::record_verifier_not_ready();
                error!(
                    state = ?state,
                    error = %auth_error,
                    "Token verifier not ready; identity provider discovery has not completed"
                );
            }
            GateFailure::Internal | GateFailure::Forbidden => {
                error!(
                    state = ?state,
                    kind = auth_error.kind(),
                    error = %auth_error,
                    "Authorization invariant violated"
                );
            }
        }

        failure
    }
}

/// Evaluate `operation`'s requirement for the attached context.
///
/// Handlers call this before any platform call; a denial becomes
/// [`GateFailure::Forbidden`].
pub fn authorize_operation(
    policy: &AccessPolicy,
    operation: Operation,
    context: Option<&AuthorizationContext>,
) -> Result<(), GateFailure> {
    match policy.evaluate(operation, context) {
        Decision::Allow => {
            debug!(
                state = ?GateState::Authorized,
                operation = operation.as_str(),
                subject = context.map(|c| c.subject.as_str()).unwrap_or_default(),
                "Operation authorized"
            );
            Ok(())
        }
        Decision::Deny(reason) => {
            match &reason {
                DenyReason::NoContext => error!(
                    operation = operation.as_str(),
                    %reason,
                    "Operation reached without authorization context"
                ),
                DenyReason::MissingRole { .. } => warn!(
                    operation = operation.as_str(),
                    subject = context.map(|c| c.subject.as_str()).unwrap_or_default(),
                    %reason,
                    "Access denied"
                ),
            }
            Err(GateFailure::Forbidden)
        }
    }
}
