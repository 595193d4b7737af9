//! Group membership resolution for verified subjects.
//!
//! Two resolvers implement [`MembershipResolver`]: [`ClaimsResolver`] reads
//! groups embedded in the token, [`StoreResolver`] asks an [`IdentityStore`].
//! The deployment picks one at startup.
use crate::{ResolveError, StoreResult, SubjectId, VerifiedClaims};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Default bound on a single identity-store lookup.
pub const DEFAULT_RESOLVER_TIMEOUT: Duration = Duration::from_millis(30);

/// Result of checking one subject against one required group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Membership {
    pub is_member: bool,
    pub is_privileged: bool,
    pub subject_found: bool,
}

impl Membership {
    /// Evaluate a known subject's groups against `required_group`.
    ///
    /// Matching is exact and case-sensitive. Privileged subjects count as
    /// members of every group.
    pub fn evaluate<S: AsRef<str>>(
        groups: &[S],
        required_group: &str,
        privileged: &PrivilegedGroups,
    ) -> Self {
        let is_privileged = groups.iter().any(|group| privileged.contains(group.as_ref()));
        let in_group = groups.iter().any(|group| group.as_ref() == required_group);
        Self {
            is_member: in_group || is_privileged,
            is_privileged,
            subject_found: true,
        }
    }

    pub fn subject_not_found() -> Self {
        Self {
            is_member: false,
            is_privileged: false,
            subject_found: false,
        }
    }
}

/// Group names whose members bypass per-group matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivilegedGroups(Vec<String>);

impl PrivilegedGroups {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            names
                .into_iter()
                .map(Into::into)
                .filter(|name: &String| !name.is_empty())
                .collect(),
        )
    }

    pub fn contains(&self, group: &str) -> bool {
        self.0.iter().any(|name| name == group)
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }
}

impl Default for PrivilegedGroups {
    fn default() -> Self {
        Self::new(["admin", "Administrators"])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverMode {
    Claims,
    Store,
}

impl ResolverMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ResolverMode::Claims => "claims",
            ResolverMode::Store => "store",
        }
    }
}

#[async_trait]
pub trait MembershipResolver: Send + Sync {
    async fn resolve(
        &self,
        claims: &VerifiedClaims,
        required_group: &str,
    ) -> Result<Membership, ResolveError>;

    fn mode(&self) -> ResolverMode;

    /// Readiness probe; resolvers without external dependencies are always
    /// ready.
    async fn health_check(&self) -> Result<(), ResolveError> {
        Ok(())
    }
}

/// Lookup result distinguishing an unknown subject from one with no groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubjectLookup {
    Found(Vec<String>),
    NotFound,
}

/// Read-only view of the identity provider's subject/group data.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn subject_groups(&self, subject: &SubjectId) -> StoreResult<SubjectLookup>;

    async fn health_check(&self) -> StoreResult<()>;

    fn backend_name(&self) -> &'static str;
}

/// Resolves membership from the token's `groups` claim.
#[derive(Debug, Clone, Default)]
pub struct ClaimsResolver {
    privileged: PrivilegedGroups,
}

impl ClaimsResolver {
    pub fn new(privileged: PrivilegedGroups) -> Self {
        Self { privileged }
    }
}

#[async_trait]
impl MembershipResolver for ClaimsResolver {
    async fn resolve(
        &self,
        claims: &VerifiedClaims,
        required_group: &str,
    ) -> Result<Membership, ResolveError> {
        // A verified token always names a known subject; a missing claim just
        // means no groups.
        let groups = claims.groups.as_deref().unwrap_or_default();
        Ok(Membership::evaluate(groups, required_group, &self.privileged))
    }

    fn mode(&self) -> ResolverMode {
        ResolverMode::Claims
    }
}

/// Resolves membership with a bounded lookup against an [`IdentityStore`].
///
/// No retries: a failed or slow lookup surfaces immediately as an error and
/// the decision core denies.
pub struct StoreResolver {
    store: Arc<dyn IdentityStore>,
    privileged: PrivilegedGroups,
    timeout: Duration,
}

impl StoreResolver {
    pub fn new(store: Arc<dyn IdentityStore>, privileged: PrivilegedGroups) -> Self {
        Self {
            store,
            privileged,
            timeout: DEFAULT_RESOLVER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl MembershipResolver for StoreResolver {
    async fn resolve(
        &self,
        claims: &VerifiedClaims,
        required_group: &str,
    ) -> Result<Membership, ResolveError> {
        let started = Instant::now();
        let lookup = tokio::time::timeout(
            self.timeout,
            self.store.subject_groups(&claims.subject_id),
        )
        .await;
        metrics::histogram!("gatekeeper_store_lookup_seconds")
            .record(started.elapsed().as_secs_f64());

        let (result, outcome) = match lookup {
            Err(_) => (Err(ResolveError::Timeout(self.timeout)), "timeout"),
            Ok(Err(err)) => (Err(ResolveError::Unavailable(err.to_string())), "error"),
            Ok(Ok(SubjectLookup::NotFound)) => (Ok(Membership::subject_not_found()), "not_found"),
            Ok(Ok(SubjectLookup::Found(groups))) => (
                Ok(Membership::evaluate(&groups, required_group, &self.privileged)),
                "found",
            ),
        };
        metrics::counter!("gatekeeper_store_lookups_total", "result" => outcome).increment(1);
        if let Err(err) = &result {
            tracing::warn!(
                backend = self.store.backend_name(),
                error = %err,
                "identity store lookup failed"
            );
        }
        result
    }

    fn mode(&self) -> ResolverMode {
        ResolverMode::Store
    }

    async fn health_check(&self) -> Result<(), ResolveError> {
        match tokio::time::timeout(self.timeout * 10, self.store.health_check()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(ResolveError::Unavailable(err.to_string())),
            Err(_) => Err(ResolveError::Timeout(self.timeout * 10)),
        }
    }
}
