//! Allow/deny orchestration.
//!
//! [`DecisionCore::decide`] runs a linear pipeline: map the path, verify the
//! credential, resolve membership. The first failure ends the pipeline with a
//! denial; every call returns exactly one [`Decision`].
use crate::{
    MembershipResolver, PathError, PathMapper, ResolveError, SubjectId, TokenError, TokenVerifier,
};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Allow,
    Deny,
}

/// Machine-readable reason attached to every decision. Server-side only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionReason {
    InvalidPath,
    NoCredential,
    InvalidSignature,
    Expired,
    NotMember,
    SubjectNotFound,
    SystemError,
    Member,
    Privileged,
}

impl DecisionReason {
    pub fn code(self) -> &'static str {
        match self {
            DecisionReason::InvalidPath => "INVALID_PATH",
            DecisionReason::NoCredential => "NO_CREDENTIAL",
            DecisionReason::InvalidSignature => "INVALID_SIGNATURE",
            DecisionReason::Expired => "EXPIRED",
            DecisionReason::NotMember => "NOT_MEMBER",
            DecisionReason::SubjectNotFound => "SUBJECT_NOT_FOUND",
            DecisionReason::SystemError => "SYSTEM_ERROR",
            DecisionReason::Member => "MEMBER",
            DecisionReason::Privileged => "PRIVILEGED",
        }
    }

    /// Outcome is a function of the reason, so the two can never disagree.
    pub fn outcome(self) -> Outcome {
        match self {
            DecisionReason::Member | DecisionReason::Privileged => Outcome::Allow,
            _ => Outcome::Deny,
        }
    }
}

impl std::fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub reason: DecisionReason,
    /// Verified subject, when the pipeline got that far.
    pub subject: Option<SubjectId>,
    /// Required group, when the path mapped.
    pub group: Option<String>,
}

impl Decision {
    pub fn new(reason: DecisionReason) -> Self {
        Self {
            reason,
            subject: None,
            group: None,
        }
    }

    pub fn outcome(&self) -> Outcome {
        self.reason.outcome()
    }

    pub fn is_allowed(&self) -> bool {
        self.outcome() == Outcome::Allow
    }

    fn with_group(mut self, group: &str) -> Self {
        self.group = Some(group.to_string());
        self
    }

    fn with_subject(mut self, subject: &SubjectId) -> Self {
        self.subject = Some(subject.clone());
        self
    }
}

pub struct DecisionCore {
    mapper: PathMapper,
    verifier: Arc<TokenVerifier>,
    resolver: Arc<dyn MembershipResolver>,
}

impl DecisionCore {
    pub fn new(
        mapper: PathMapper,
        verifier: Arc<TokenVerifier>,
        resolver: Arc<dyn MembershipResolver>,
    ) -> Self {
        Self {
            mapper,
            verifier,
            resolver,
        }
    }

    pub fn mapper(&self) -> &PathMapper {
        &self.mapper
    }

    pub fn resolver(&self) -> &Arc<dyn MembershipResolver> {
        &self.resolver
    }

    /// Decide whether `credential` may read `url_path`.
    ///
    /// `group_hint` is the group the edge server parsed on its own. When
    /// present it must equal the group derived here, otherwise the request
    /// is treated as an invalid path.
    pub async fn decide(
        &self,
        url_path: &str,
        credential: Option<&str>,
        group_hint: Option<&str>,
    ) -> Decision {
        let decision = self.evaluate(url_path, credential, group_hint).await;
        record(&decision);
        decision
    }

    /// Denial for requests the HTTP layer could not even route to a path.
    pub fn invalid_path(&self) -> Decision {
        let decision = Decision::new(DecisionReason::InvalidPath);
        record(&decision);
        decision
    }

    async fn evaluate(
        &self,
        url_path: &str,
        credential: Option<&str>,
        group_hint: Option<&str>,
    ) -> Decision {
        let request = match self.mapper.map(url_path).and_then(|request| {
            match group_hint {
                Some(hint) if hint != request.group => Err(PathError::GroupMismatch {
                    hint: hint.to_string(),
                    derived: request.group,
                }),
                _ => Ok(request),
            }
        }) {
            Ok(request) => request,
            Err(err) => {
                tracing::debug!(error = %err, "path rejected");
                return Decision::new(DecisionReason::InvalidPath);
            }
        };
        let group = request.group.as_str();

        let Some(raw) = credential.map(str::trim).filter(|raw| !raw.is_empty()) else {
            return Decision::new(DecisionReason::NoCredential).with_group(group);
        };
        let claims = match self.verifier.verify(raw) {
            Ok(claims) => claims,
            Err(err) => {
                tracing::debug!(error = %err, "credential rejected");
                return Decision::new(token_reason(&err)).with_group(group);
            }
        };

        let membership = match self.resolver.resolve(&claims, group).await {
            Ok(membership) => membership,
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    mode = self.resolver.mode().as_str(),
                    "membership resolution failed"
                );
                return Decision::new(resolve_reason(&err))
                    .with_group(group)
                    .with_subject(&claims.subject_id);
            }
        };

        let reason = if membership.is_privileged {
            DecisionReason::Privileged
        } else if membership.is_member {
            DecisionReason::Member
        } else if !membership.subject_found {
            DecisionReason::SubjectNotFound
        } else {
            DecisionReason::NotMember
        };
        Decision::new(reason)
            .with_group(group)
            .with_subject(&claims.subject_id)
    }
}

fn token_reason(err: &TokenError) -> DecisionReason {
    match err {
        TokenError::Malformed(_) | TokenError::MissingClaim(_) => DecisionReason::NoCredential,
        TokenError::Expired => DecisionReason::Expired,
        TokenError::UnsupportedAlgorithm(_)
        | TokenError::InvalidSignature
        | TokenError::InvalidClaim(_) => DecisionReason::InvalidSignature,
    }
}

fn resolve_reason(err: &ResolveError) -> DecisionReason {
    match err {
        ResolveError::Unavailable(_) | ResolveError::Timeout(_) => DecisionReason::SystemError,
    }
}

fn record(decision: &Decision) {
    let outcome = match decision.outcome() {
        Outcome::Allow => "allow",
        Outcome::Deny => "deny",
    };
    metrics::counter!(
        "gatekeeper_decisions_total",
        "outcome" => outcome,
        "reason" => decision.reason.code()
    )
    .increment(1);

    let subject = decision.subject.as_ref().map(SubjectId::as_str);
    let group = decision.group.as_deref();
    if decision.reason == DecisionReason::SystemError {
        tracing::warn!(reason = decision.reason.code(), subject, group, "decision");
    } else {
        tracing::info!(reason = decision.reason.code(), outcome, subject, group, "decision");
    }
}
