//! Decision core for the gatekeeper authorization sidecar.
//!
//! # Purpose
//! Decides whether the holder of a signed token may read a resource under a
//! protected path prefix. The required permission group is the first path
//! segment after the prefix; the caller must belong to that group or to the
//! privileged override group.
//!
//! # How it fits
//! The `gatekeeper` service wraps [`DecisionCore`] in an HTTP endpoint that an
//! edge server calls before serving a static file. This crate has no HTTP or
//! storage dependencies; identity stores plug in through [`IdentityStore`].
//!
//! # Key invariants
//! - Exactly one signing algorithm is accepted per [`TokenVerifier`]; tokens
//!   declaring any other algorithm (including `none`) are rejected before any
//!   cryptographic work.
//! - Every call to [`DecisionCore::decide`] returns exactly one [`Decision`];
//!   any error along the way resolves to a denial.
//! - Group matching is exact and case-sensitive.
//!
//! # Examples
//! ```rust
//! use gatekeeper_authz::PathMapper;
//!
//! let mapper = PathMapper::new("/secure");
//! let request = mapper.map("/secure/dev/project1/diagram.png").expect("path");
//! assert_eq!(request.group, "dev");
//! assert_eq!(request.asset_path, "project1/diagram.png");
//! ```

mod decision;
mod errors;
mod membership;
mod path;
mod token;
mod types;

pub use decision::{Decision, DecisionCore, DecisionReason, Outcome};
pub use errors::{KeyError, PathError, ResolveError, StoreError, StoreResult, TokenError};
pub use membership::{
    ClaimsResolver, IdentityStore, Membership, MembershipResolver, PrivilegedGroups,
    ResolverMode, StoreResolver, SubjectLookup,
};
pub use path::{PathMapper, ResourceRequest, map_to_group};
pub use token::{KeyFamily, TokenVerifier, VerificationKey, VerifiedClaims};
pub use types::SubjectId;

/// Re-exported so callers can name algorithms without depending on
/// `jsonwebtoken` directly.
pub use jsonwebtoken::Algorithm;
